use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Status events sent from the background flush to every open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueEvent {
    /// At least one queued file reached the server during a flush.
    QueueDrainCompleted,
    /// The server refused a queued file; the entry now carries the diagnostic.
    ItemFailed {
        id: i64,
        message: String,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

/// Fire-and-forget broadcast. Publishing with no subscriber is not an error.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<QueueEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Returns how many sessions received the event.
    pub fn publish(&self, event: QueueEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(?event, "no open session to notify");
                0
            }
        }
    }

    pub fn drain_completed(&self) -> usize {
        self.publish(QueueEvent::QueueDrainCompleted)
    }

    pub fn item_failed(&self, id: i64, message: impl Into<String>, at: OffsetDateTime) -> usize {
        self.publish(QueueEvent::ItemFailed {
            id,
            message: message.into(),
            at,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
