use chrono::NaiveDate;
use clap::{Args, Parser};
use serde::Serialize;

use crate::engine::ProposeRequest;
use crate::model::*;

/// Plan periodization blocks on a per-subject week timeline.
#[derive(Debug, Parser, PartialEq, Eq)]
#[command(name = "blockplan", version)]
pub enum Command {
    /// Print a subject's blocks as JSON.
    List {
        #[arg(value_parser = parse_ulid)]
        subject_id: SubjectId,
    },
    /// Preview a block, then commit it unless `--dry-run` is given.
    Propose(ProposeArgs),
    /// Delete a single block.
    Delete {
        #[arg(value_parser = parse_ulid)]
        block_id: BlockId,
    },
}

#[derive(Debug, Args, PartialEq, Eq)]
pub struct ProposeArgs {
    #[arg(value_parser = parse_ulid)]
    pub subject_id: SubjectId,
    /// Any day of the first week, as YYYY-MM-DD.
    #[arg(value_parser = parse_date)]
    pub start: NaiveDate,
    /// Length in whole weeks.
    pub weeks: u32,
    pub name: String,
    /// Comma-separated tags.
    #[arg(value_delimiter = ',', required = true)]
    pub tags: Vec<String>,
    /// Replace this block instead of adding a new one.
    #[arg(long, value_parser = parse_ulid)]
    pub edit: Option<BlockId>,
    /// Print the preview without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl ProposeArgs {
    pub fn request(&self) -> ProposeRequest {
        ProposeRequest {
            subject_id: self.subject_id,
            start: self.start,
            duration: self.weeks,
            payload: Payload::new(
                self.name.as_str(),
                self.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()),
            ),
            editing_id: self.edit,
        }
    }
}

fn parse_ulid(value: &str) -> Result<ulid::Ulid, String> {
    value.parse().map_err(|e| format!("not a ULID: {e}"))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

/// JSON shape of a block for command output, with calendar dates.
#[derive(Debug, Serialize)]
pub struct BlockView {
    pub id: BlockId,
    pub subject_id: SubjectId,
    pub start: String,
    /// Exclusive.
    pub end: String,
    pub weeks: u32,
    pub name: String,
    pub tags: Vec<String>,
}

impl From<&Block> for BlockView {
    fn from(b: &Block) -> Self {
        Self {
            id: b.id,
            subject_id: b.subject_id,
            start: b.start.to_string(),
            end: b.end().to_string(),
            weeks: b.duration,
            name: b.payload.name.clone(),
            tags: b.payload.tags.clone(),
        }
    }
}
