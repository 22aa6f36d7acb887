//! Fire-and-forget notifications.
//!
//! Services hand committed [`DomainEvent`]s to a [`Notifier`]; a separate task
//! drains the channel and publishes to NATS. Nothing on this path can fail a
//! request.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;

#[derive(Clone, Debug)]
pub struct Notifier {
    sender: mpsc::Sender<DomainEvent>,
}

impl Notifier {
    /// Bounded channel; the receiver goes to [`spawn_publisher`] or to a test.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Never blocks. A full or closed channel drops the event with a warning.
    pub fn dispatch(&self, event: DomainEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "dropping notification");
        }
    }

    pub fn dispatch_all(&self, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            self.dispatch(event);
        }
    }
}

/// Publishes every event as JSON on `marketplace.<kind>`, or logs it when NATS is not configured.
pub fn spawn_publisher(mut receiver: mpsc::Receiver<DomainEvent>, nats: Option<async_nats::Client>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode notification");
                    continue;
                }
            };
            match &nats {
                Some(client) => {
                    if let Err(e) = client.publish(event.subject(), payload.into()).await {
                        warn!(subject = %event.subject(), error = %e, "failed to publish notification");
                    } else {
                        debug!(subject = %event.subject(), "notification published");
                    }
                }
                None => info!(subject = %event.subject(), ?event, "notification"),
            }
        }
        debug!("notification channel closed");
    })
}
