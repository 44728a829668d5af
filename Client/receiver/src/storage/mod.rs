use std::sync::Mutex;

use metrics::get_metrics;
use prometheus::IntGauge;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

use crate::types::SceneEvent;

/// Hand-over point between the session task and the host's render loop.
///
/// Sessions push into a bounded channel and wait when it is full; the host
/// drains it with [`Storage::consume_event`], which never blocks.
pub struct Storage {
    sender: mpsc::Sender<SceneEvent>,
    receiver: Mutex<mpsc::Receiver<SceneEvent>>,
    pub sessions_total: IntGauge,
    pub sessions_failed_total: IntGauge,
    pub patient_records_total: IntGauge,
    pub meshes_decoded_total: IntGauge,
    pub bytes_received_total: IntGauge,
    pub decode_time: IntGauge,
    pub events_consumed_total: IntGauge,
    pub pending_scene_events: IntGauge,
}

fn gauge(name: &str, description: &str) -> IntGauge {
    get_metrics()
        .get_or_create_gauge(name, description)
        .unwrap_or_else(|e| panic!("Failed to create {} gauge: {}", name, e))
}

impl Storage {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        Storage {
            sender,
            receiver: Mutex::new(receiver),
            sessions_total: gauge("sessions_total", "Total number of accepted sessions"),
            sessions_failed_total: gauge(
                "sessions_failed_total",
                "Total number of sessions that ended with an error",
            ),
            patient_records_total: gauge(
                "patient_records_total",
                "Total number of patient headers delivered to the host",
            ),
            meshes_decoded_total: gauge("meshes_decoded_total", "Total number of organ meshes registered"),
            bytes_received_total: gauge("bytes_received_total", "Total protocol bytes consumed"),
            decode_time: gauge("decoding_time", "Time (us) spent decoding OBJ payloads in the last session"),
            events_consumed_total: gauge(
                "events_consumed_total",
                "Total number of scene events consumed by the host",
            ),
            pending_scene_events: gauge(
                "pending_scene_events",
                "Scene events waiting for the host",
            ),
        }
    }

    /// A producer handle for a session.
    pub fn sender(&self) -> mpsc::Sender<SceneEvent> {
        self.sender.clone()
    }

    /// Takes the oldest pending event, if any.
    pub fn consume_event(&self) -> Option<SceneEvent> {
        let mut receiver = self.receiver.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match receiver.try_recv() {
            Ok(event) => {
                self.events_consumed_total.inc();
                self.pending_scene_events.set(self.pending_events() as i64);
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                debug!("Scene channel disconnected");
                None
            }
        }
    }

    /// Takes up to `max` pending events.
    pub fn drain(&self, max: usize) -> Vec<SceneEvent> {
        let mut events = Vec::new();
        while events.len() < max {
            match self.consume_event() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    pub fn pending_events(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_come_out_in_order() {
        let storage = Storage::new(4);
        let sender = storage.sender();
        sender.send(SceneEvent::OrganRemoved { label: 1 }).await.unwrap();
        sender.send(SceneEvent::Detached { child: 2 }).await.unwrap();
        assert_eq!(storage.pending_events(), 2);

        assert!(matches!(storage.consume_event(), Some(SceneEvent::OrganRemoved { label: 1 })));
        assert!(matches!(storage.consume_event(), Some(SceneEvent::Detached { child: 2 })));
        assert!(storage.consume_event().is_none());
    }

    #[tokio::test]
    async fn drain_respects_the_maximum() {
        let storage = Storage::new(8);
        let sender = storage.sender();
        for label in 0..5 {
            sender.send(SceneEvent::OrganRemoved { label }).await.unwrap();
        }
        assert_eq!(storage.drain(3).len(), 3);
        assert_eq!(storage.drain(10).len(), 2);
        assert!(storage.drain(10).is_empty());
    }

    #[tokio::test]
    async fn full_channel_makes_the_producer_wait() {
        let storage = Storage::new(1);
        let sender = storage.sender();
        sender.send(SceneEvent::Detached { child: 1 }).await.unwrap();
        assert!(sender.try_send(SceneEvent::Detached { child: 2 }).is_err());

        storage.consume_event();
        assert!(sender.try_send(SceneEvent::Detached { child: 2 }).is_ok());
    }
}
