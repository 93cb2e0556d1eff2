use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, SubjectId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for block changes, one channel per subject.
///
/// Lets a front end re-fetch a subject's timeline after any commit, including
/// commits that failed part way.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<SubjectId, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a subject's changes. Creates the channel if needed.
    pub fn subscribe(&self, subject_id: SubjectId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(subject_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. A channel whose receivers are all gone
    /// is dropped here.
    pub fn send(&self, event: &Event) {
        let subject_id = event.subject_id();
        let Some(sender) = self.channels.get(&subject_id) else {
            return;
        };
        if sender.send(event.clone()).is_ok() {
            return;
        }
        drop(sender);
        self.channels
            .remove_if(&subject_id, |_, sender| sender.receiver_count() == 0);
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscriber_receives_its_subject_only() {
        let hub = NotifyHub::new();
        let (mine, other) = (Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(mine);

        hub.send(&Event::BlockDeleted {
            id: Ulid::new(),
            subject_id: other,
        });
        let event = Event::BlockDeleted {
            id: Ulid::new(),
            subject_id: mine,
        };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::BlockDeleted {
            id: Ulid::new(),
            subject_id: Ulid::new(),
        });
    }

    #[tokio::test]
    async fn abandoned_channel_is_pruned_on_send() {
        let hub = NotifyHub::new();
        let (kept, dropped) = (Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(kept);
        drop(hub.subscribe(dropped));
        assert_eq!(hub.channel_count(), 2);

        for subject_id in [kept, dropped] {
            hub.send(&Event::BlockDeleted {
                id: Ulid::new(),
                subject_id,
            });
        }
        assert_eq!(hub.channel_count(), 1);
        assert!(rx.recv().await.is_ok());

        // a fresh subscription recreates the channel
        let mut again = hub.subscribe(dropped);
        let event = Event::BlockDeleted {
            id: Ulid::new(),
            subject_id: dropped,
        };
        hub.send(&event);
        assert_eq!(again.recv().await.unwrap(), event);
    }
}
