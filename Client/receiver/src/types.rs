use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use shared_utils::types::PatientData;
use tokio::sync::mpsc;

use crate::error::{ReceiverError, Result};

/// Decoded surface mesh of one organ.
///
/// `indices` holds flat triangle triples into `vertices`, 0-based.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrganMesh {
    pub label: i32,
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl OrganMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex buffer as `x, y, z, x, y, z, ...`.
    pub fn coordinates(&self) -> &[f32] {
        self.vertices.as_flattened()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub session_id: u64,
    pub bytes_consumed: u64,
    pub patient_notified: bool,
    pub organs_created: usize,
    pub error: Option<String>,
}

/// What the rendering host and the patient UI get to see of a session.
#[derive(Clone, Debug)]
pub enum SceneEvent {
    SessionStarted {
        session_id: u64,
        peer: Option<SocketAddr>,
    },
    Patient(PatientData),
    OrganCreated {
        mesh: Arc<OrganMesh>,
        color: [f32; 4],
    },
    /// A later mesh reused the label; the host should drop its entity.
    OrganRemoved {
        label: i32,
    },
    Reparented {
        child: i32,
        parent: i32,
    },
    Detached {
        child: i32,
    },
    SessionEnded(SessionSummary),
}

/// Destination of scene events produced by a session.
#[async_trait]
pub trait SceneSink: Send {
    async fn emit(&mut self, event: SceneEvent) -> Result<()>;
}

#[async_trait]
impl SceneSink for Vec<SceneEvent> {
    async fn emit(&mut self, event: SceneEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

// A full channel suspends the session until the host catches up.
#[async_trait]
impl SceneSink for mpsc::Sender<SceneEvent> {
    async fn emit(&mut self, event: SceneEvent) -> Result<()> {
        self.send(event).await.map_err(|_| ReceiverError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitting_into_a_closed_channel_fails() {
        let (mut sender, receiver) = mpsc::channel(4);
        sender.emit(SceneEvent::OrganRemoved { label: 3 }).await.unwrap();
        drop(receiver);

        let result = sender.emit(SceneEvent::OrganRemoved { label: 4 }).await;
        assert!(matches!(result, Err(ReceiverError::SinkClosed)));
    }
}
