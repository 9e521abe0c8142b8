//! Event pipeline: the single ordered write path for activity events.
//!
//! Producers (orchestrator, drain monitor, providers) hold an
//! [`EventSender`]. One consumer task turns each [`EventMessage`] into a
//! [`ScalingUpdate`] and writes it to the activity backend. A failed write
//! is logged with the full event and the consumer moves on; scaling is
//! never blocked on state.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tidepool_state::{ActivityBackend, Event, EventMessage, ScaleStatus, ScalingUpdate};

/// Queue capacity between producers and the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 10;

pub const MESSAGE_SUCCESS: &str = "scaling activity has successfully completed";
pub const MESSAGE_FAILURE: &str = "scaling activity has reached terminal failure";

/// Producer handle for the pipeline.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EventMessage>,
    shutdown: watch::Receiver<bool>,
}

impl EventSender {
    /// Enqueue an event. Dropped once shutdown has been signalled.
    pub async fn send(&self, msg: EventMessage) {
        if *self.shutdown.borrow() {
            debug!(activity_id = %msg.id, "shutdown in progress, dropping event");
            return;
        }
        if self.tx.send(msg).await.is_err() {
            warn!("event pipeline closed, dropping event");
        }
    }
}

/// The running consumer and a template sender.
pub struct EventPipeline {
    sender: EventSender,
    handle: JoinHandle<()>,
}

impl EventPipeline {
    /// Spawn the consumer writing into `backend`.
    pub fn start(backend: Arc<dyn ActivityBackend>, shutdown: watch::Receiver<bool>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(run_event_consumer(backend, rx, shutdown.clone()));
        Self {
            sender: EventSender { tx, shutdown },
            handle,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Wait for the consumer to drain and exit.
    pub async fn join(self) {
        drop(self.sender);
        let _ = self.handle.await;
    }
}

async fn run_event_consumer(
    backend: Arc<dyn ActivityBackend>,
    mut rx: mpsc::Receiver<EventMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("event pipeline started");
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => write_event(backend.as_ref(), &msg),
                None => break,
            },
            _ = shutdown.changed() => {
                // Accept nothing new, flush what is already queued.
                rx.close();
                while let Some(msg) = rx.recv().await {
                    write_event(backend.as_ref(), &msg);
                }
                break;
            }
        }
    }
    info!("event pipeline stopped");
}

fn write_event(backend: &dyn ActivityBackend, msg: &EventMessage) {
    let update = to_update(msg);
    match backend.write_request_event(&update) {
        Ok(()) => debug!(activity_id = %msg.id, source = %msg.source, "stored scaling activity update"),
        Err(e) => error!(
            activity_id = %msg.id,
            source = %msg.source,
            message = %msg.message,
            timestamp = msg.timestamp,
            event_error = ?msg.error,
            error = %e,
            "failed to add scaling activity update"
        ),
    }
}

/// Closing events become completed or failed with a fixed message;
/// everything else is an in-progress event carried verbatim.
pub fn to_update(msg: &EventMessage) -> ScalingUpdate {
    if msg.is_closing() {
        let (status, message) = match msg.error {
            None => (ScaleStatus::Completed, MESSAGE_SUCCESS),
            Some(_) => (ScaleStatus::Failed, MESSAGE_FAILURE),
        };
        return ScalingUpdate {
            id: msg.id,
            status,
            detail: Event {
                timestamp: msg.timestamp,
                message: message.to_string(),
                source: msg.source.clone(),
            },
        };
    }

    ScalingUpdate {
        id: msg.id,
        status: ScaleStatus::InProgress,
        detail: Event {
            timestamp: msg.timestamp,
            message: msg.message.clone(),
            source: msg.source.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use tidepool_state::{
        MemoryActivityBackend, Policy, ProviderKind, ScaleDirection, ScalingRequest,
        SOURCE_CLUSTER, SOURCE_TIDEPOOL,
    };
    use uuid::Uuid;

    fn request() -> ScalingRequest {
        let policy = Policy {
            class: "batch".to_string(),
            enabled: true,
            min_count: 1,
            max_count: 4,
            scale_in_count: 1,
            scale_out_count: 1,
            provider: ProviderKind::NoOp,
            provider_config: HashMap::new(),
            checks: HashMap::new(),
        };
        ScalingRequest::new(policy, ScaleDirection::Out)
    }

    #[test]
    fn closing_event_maps_to_terminal_status() {
        let id = Uuid::new_v4();
        let ok = to_update(&EventMessage::closing(id, None));
        assert_eq!(ok.status, ScaleStatus::Completed);
        assert_eq!(ok.detail.message, MESSAGE_SUCCESS);
        assert_eq!(ok.detail.source, SOURCE_TIDEPOOL);

        let failed = to_update(&EventMessage::closing(id, Some("boom".to_string())));
        assert_eq!(failed.status, ScaleStatus::Failed);
        assert_eq!(failed.detail.message, MESSAGE_FAILURE);
    }

    #[test]
    fn progress_event_keeps_message_and_source() {
        let msg = EventMessage::progress(Uuid::new_v4(), SOURCE_CLUSTER, "drain complete");
        let update = to_update(&msg);
        assert_eq!(update.status, ScaleStatus::InProgress);
        assert_eq!(update.detail.message, "drain complete");
        assert_eq!(update.detail.source, SOURCE_CLUSTER);
        assert_eq!(update.detail.timestamp, msg.timestamp);
    }

    #[tokio::test]
    async fn events_written_in_order_and_drained_on_shutdown() {
        let backend = Arc::new(MemoryActivityBackend::new());
        let req = request();
        backend.write_request(&req).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = EventPipeline::start(backend.clone(), shutdown_rx);
        let sender = pipeline.sender();

        sender
            .send(EventMessage::progress(req.id, SOURCE_CLUSTER, "one"))
            .await;
        sender
            .send(EventMessage::progress(req.id, SOURCE_CLUSTER, "two"))
            .await;
        sender.send(EventMessage::closing(req.id, None)).await;

        shutdown_tx.send(true).unwrap();
        drop(sender);
        tokio::time::timeout(Duration::from_secs(1), pipeline.join())
            .await
            .unwrap();

        let activity = backend.get_activity(req.id).unwrap().unwrap();
        let messages: Vec<_> = activity.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["scaling activity has started", "one", "two", MESSAGE_SUCCESS]
        );
        assert_eq!(activity.status, ScaleStatus::Completed);
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_consumer() {
        let backend = Arc::new(MemoryActivityBackend::new());
        let req = request();
        backend.write_request(&req).unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = EventPipeline::start(backend.clone(), shutdown_rx);
        let sender = pipeline.sender();

        // Unknown activity: the write fails and is logged.
        sender
            .send(EventMessage::progress(Uuid::new_v4(), SOURCE_CLUSTER, "lost"))
            .await;
        sender.send(EventMessage::closing(req.id, None)).await;
        drop(sender);
        tokio::time::timeout(Duration::from_secs(1), pipeline.join())
            .await
            .unwrap();

        let activity = backend.get_activity(req.id).unwrap().unwrap();
        assert_eq!(activity.status, ScaleStatus::Completed);
    }

    #[tokio::test]
    async fn sends_after_shutdown_are_dropped() {
        let backend = Arc::new(MemoryActivityBackend::new());
        let req = request();
        backend.write_request(&req).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = EventPipeline::start(backend.clone(), shutdown_rx);
        let sender = pipeline.sender();

        shutdown_tx.send(true).unwrap();
        sender.send(EventMessage::closing(req.id, None)).await;
        drop(sender);
        tokio::time::timeout(Duration::from_secs(1), pipeline.join())
            .await
            .unwrap();

        let activity = backend.get_activity(req.id).unwrap().unwrap();
        assert_eq!(activity.status, ScaleStatus::Started);
        assert_eq!(activity.events.len(), 1);
    }
}
