use tokio::io::AsyncRead;
use tracing::{info, instrument, warn};

use crate::config::ReceiverConfig;
use crate::error::Result;
use crate::ingress::frame_reader::FrameReader;
use crate::scene::SceneAssembler;
use crate::types::{SceneEvent, SceneSink};

pub mod decoders;

use decoders::{decode_mesh_stream, read_patient_header};

/// Counters a session accumulates while it runs; kept even when it fails.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionProgress {
    pub patient_notified: bool,
    pub organs_created: usize,
    pub decode_micros: u64,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub bytes_consumed: u64,
    pub progress: SessionProgress,
    pub result: Result<()>,
}

/// Runs one session: patient header, then the mesh stream.
///
/// The caller owns the reader and the progress, so both stay readable if the
/// returned future is dropped midway. The scene registry lives exactly as long
/// as this call; the session task is its only writer.
#[instrument(skip_all)]
pub async fn process_session<R, S>(
    reader: &mut FrameReader<R>,
    config: &ReceiverConfig,
    sink: &mut S,
    progress: &mut SessionProgress,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    S: SceneSink + ?Sized,
{
    let mut assembler = SceneAssembler::new(config.hierarchy.clone(), config.duplicate_policy);

    let result = drive(reader, &mut assembler, sink, config, progress).await;

    if assembler.is_empty() {
        warn!("Session finished after {} bytes without any organ", reader.consumed());
    } else {
        info!(
            "Session finished after {} bytes: {} organs, patient header {}",
            reader.consumed(),
            assembler.len(),
            if progress.patient_notified { "delivered" } else { "absent" }
        );
    }
    result
}

async fn drive<R, S>(
    reader: &mut FrameReader<R>,
    assembler: &mut SceneAssembler,
    sink: &mut S,
    config: &ReceiverConfig,
    progress: &mut SessionProgress,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    S: SceneSink + ?Sized,
{
    if let Some(data) = read_patient_header(reader, config.limits.max_json_bytes).await? {
        sink.emit(SceneEvent::Patient(data)).await?;
        progress.patient_notified = true;
    }

    decode_mesh_stream(reader, assembler, sink, config, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, ReceiverError};
    use shared_utils::wire::{encode_session, session_length, MeshFrame};

    const TRIANGLE: &[u8] = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";

    async fn run_session<R>(source: R, config: &ReceiverConfig, sink: &mut Vec<SceneEvent>) -> SessionOutcome
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = FrameReader::new(source);
        let mut progress = SessionProgress::default();
        let result = process_session(&mut reader, config, sink, &mut progress).await;
        SessionOutcome {
            bytes_consumed: reader.consumed(),
            progress,
            result,
        }
    }

    fn created_labels(events: &[SceneEvent]) -> Vec<i32> {
        events
            .iter()
            .filter_map(|event| match event {
                SceneEvent::OrganCreated { mesh, .. } => Some(mesh.label),
                _ => None,
            })
            .collect()
    }

    fn patient_count(events: &[SceneEvent]) -> usize {
        events.iter().filter(|event| matches!(event, SceneEvent::Patient(_))).count()
    }

    #[tokio::test]
    async fn consumes_exactly_the_declared_bytes() {
        let json = br#"{"hasta":{"ad":"X"}}"#;
        let meshes = [
            MeshFrame { label: 8, obj: TRIANGLE },
            MeshFrame { label: 9, obj: TRIANGLE },
            MeshFrame { label: 1, obj: b"" },
        ];
        let mut bytes = encode_session(json, &meshes).unwrap();
        let expected = session_length(json.len(), meshes.iter().map(|m| m.obj.len()));
        // Trailing garbage must stay unread.
        bytes.extend_from_slice(b"trailing");

        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.bytes_consumed, expected as u64);
        assert_eq!(created_labels(&events), vec![8, 9, 1]);
        assert_eq!(outcome.progress.organs_created, 3);
    }

    #[tokio::test]
    async fn empty_object_header_and_single_liver() {
        let bytes = encode_session(b"{}", &[MeshFrame { label: 8, obj: TRIANGLE }]).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;

        assert!(outcome.result.is_ok());
        assert_eq!(events.len(), 2);
        match &events[0] {
            SceneEvent::Patient(data) => {
                assert_eq!(data.patient.name, "");
                assert_eq!(data.analysis.tumor_count, 0);
                assert!(data.analysis.tumors.is_empty());
            }
            other => panic!("expected the patient first, got {:?}", other),
        }
        assert_eq!(created_labels(&events), vec![8]);
        assert!(!events.iter().any(|e| matches!(e, SceneEvent::Reparented { .. })));
    }

    #[tokio::test]
    async fn zero_sized_header_fires_no_notification() {
        let bytes = encode_session(b"", &[MeshFrame { label: 9, obj: TRIANGLE }]).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;

        assert!(outcome.result.is_ok());
        assert_eq!(patient_count(&events), 0);
        assert!(!outcome.progress.patient_notified);
        assert_eq!(created_labels(&events), vec![9]);
    }

    #[tokio::test]
    async fn malformed_json_still_decodes_meshes() {
        let meshes = [
            MeshFrame { label: 9, obj: TRIANGLE },
            MeshFrame { label: 8, obj: TRIANGLE },
        ];
        let bytes = encode_session(b"{\"hasta\": [", &meshes).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;

        assert!(outcome.result.is_ok());
        assert_eq!(patient_count(&events), 0);
        assert_eq!(created_labels(&events), vec![9, 8]);
        assert!(events
            .iter()
            .any(|e| matches!(e, SceneEvent::Reparented { child: 9, parent: 8 })));
    }

    #[tokio::test]
    async fn patient_precedes_every_mesh_event() {
        let bytes = encode_session(b"{}", &[MeshFrame { label: 8, obj: TRIANGLE }]).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;
        assert!(matches!(events.first(), Some(SceneEvent::Patient(_))));
    }

    #[tokio::test]
    async fn malformed_mesh_stops_the_loop() {
        let meshes = [
            MeshFrame { label: 1, obj: TRIANGLE },
            MeshFrame { label: 2, obj: b"v 0 zero 0\n" },
            MeshFrame { label: 3, obj: TRIANGLE },
        ];
        let bytes = encode_session(b"", &meshes).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;

        assert!(matches!(
            outcome.result,
            Err(ReceiverError::Decode(DecodeError::Obj { label: 2, .. }))
        ));
        assert_eq!(created_labels(&events), vec![1]);
        assert_eq!(outcome.progress.organs_created, 1);
    }

    #[tokio::test]
    async fn truncated_mesh_is_a_framing_error() {
        let bytes = encode_session(b"", &[MeshFrame { label: 1, obj: TRIANGLE }]).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..bytes.len() - 3], &ReceiverConfig::default(), &mut events).await;

        assert!(matches!(outcome.result, Err(ReceiverError::Framing { .. })));
        assert!(created_labels(&events).is_empty());
    }

    #[tokio::test]
    async fn oversized_mesh_is_rejected_before_allocation() {
        let mut config = ReceiverConfig::default();
        config.limits.max_obj_bytes = 16;
        let bytes = encode_session(b"", &[MeshFrame { label: 1, obj: TRIANGLE }]).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &config, &mut events).await;

        assert!(matches!(
            outcome.result,
            Err(ReceiverError::ProtocolLimit { field: "obj payload", .. })
        ));
        // jsonSize, meshCount, label, objSize
        assert_eq!(outcome.bytes_consumed, 16);
    }

    #[tokio::test]
    async fn oversized_header_is_rejected_before_reading_it() {
        let mut config = ReceiverConfig::default();
        config.limits.max_json_bytes = 4;
        let bytes = encode_session(br#"{"hasta":{}}"#, &[MeshFrame { label: 8, obj: TRIANGLE }]).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &config, &mut events).await;

        assert!(matches!(
            outcome.result,
            Err(ReceiverError::ProtocolLimit { field: "json header", declared: 12, limit: 4 })
        ));
        assert_eq!(outcome.bytes_consumed, 4);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn too_many_meshes_are_rejected_before_the_first_one() {
        let mut config = ReceiverConfig::default();
        config.limits.max_mesh_count = 1;
        let meshes = [
            MeshFrame { label: 8, obj: TRIANGLE },
            MeshFrame { label: 9, obj: TRIANGLE },
        ];
        let bytes = encode_session(b"", &meshes).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &config, &mut events).await;

        assert!(matches!(
            outcome.result,
            Err(ReceiverError::ProtocolLimit { field: "mesh count", declared: 2, limit: 1 })
        ));
        // jsonSize, meshCount
        assert_eq!(outcome.bytes_consumed, 8);
        assert!(created_labels(&events).is_empty());
    }

    #[tokio::test]
    async fn hierarchy_holds_in_both_arrival_orders() {
        for order in [[8, 9], [9, 8]] {
            let meshes: Vec<MeshFrame> = order
                .iter()
                .map(|&label| MeshFrame { label, obj: TRIANGLE })
                .collect();
            let bytes = encode_session(b"", &meshes).unwrap();
            let mut events: Vec<SceneEvent> = Vec::new();
            let outcome = run_session(&bytes[..], &ReceiverConfig::default(), &mut events).await;

            assert!(outcome.result.is_ok());
            let links: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    SceneEvent::Reparented { child, parent } => Some((*child, *parent)),
                    _ => None,
                })
                .collect();
            assert_eq!(links, vec![(9, 8)], "order {:?}", order);
        }
    }

    #[tokio::test]
    async fn rejected_duplicate_keeps_the_stream_going() {
        let config = ReceiverConfig {
            duplicate_policy: crate::config::DuplicateLabelPolicy::Reject,
            ..Default::default()
        };
        let meshes = [
            MeshFrame { label: 4, obj: TRIANGLE },
            MeshFrame { label: 4, obj: TRIANGLE },
            MeshFrame { label: 5, obj: TRIANGLE },
        ];
        let bytes = encode_session(b"", &meshes).unwrap();
        let mut events: Vec<SceneEvent> = Vec::new();
        let outcome = run_session(&bytes[..], &config, &mut events).await;

        assert!(outcome.result.is_ok());
        assert_eq!(created_labels(&events), vec![4, 5]);
        assert_eq!(outcome.bytes_consumed, bytes.len() as u64);
    }
}
