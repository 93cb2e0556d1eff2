use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockplan::cli::{BlockView, Command};
use blockplan::config::Config;
use blockplan::engine::Scheduler;
use blockplan::notify::NotifyHub;
use blockplan::store::{BlockStore, WalStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let command = Command::parse();
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .with_writer(std::io::stderr)
        .init();
    blockplan::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(config.wal_path(), Arc::new(NotifyHub::new()))?);
    if store.compact_if_needed(config.compact_threshold).await? {
        info!("compacted {}", config.wal_path().display());
    }

    match command {
        Command::List { subject_id } => {
            let blocks = store.list_blocks(subject_id).await?;
            let views: Vec<BlockView> = blocks.iter().map(BlockView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Command::Propose(args) => {
            let scheduler = Scheduler::new(store.clone());
            let proposal = scheduler.propose_block(args.request()).await?;
            println!("{}", serde_json::to_string_pretty(&proposal.preview)?);
            if !args.dry_run {
                let block = proposal.commit().await?;
                println!("{}", serde_json::to_string_pretty(&BlockView::from(&block))?);
            }
        }
        Command::Delete { block_id } => {
            store.delete_block(block_id).await?;
            info!("deleted block {block_id}");
        }
    }
    Ok(())
}
