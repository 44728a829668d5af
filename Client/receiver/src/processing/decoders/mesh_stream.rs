use std::time::Instant;

use shared_utils::types::organ_name;
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument, warn};

use crate::config::ReceiverConfig;
use crate::error::{ReceiverError, Result};
use crate::ingress::frame_reader::FrameReader;
use crate::processing::SessionProgress;
use crate::scene::SceneAssembler;
use crate::types::SceneSink;

use super::obj::decode_obj;

/// Reads `meshCount` followed by that many `label | size | OBJ` frames and
/// registers each decoded mesh.
///
/// The first framing or OBJ error ends the loop: once a frame is corrupt the
/// stream position can no longer be trusted.
#[instrument(skip_all)]
pub async fn decode_mesh_stream<R, S>(
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
    let count = reader
        .read_length("mesh count", config.limits.max_mesh_count)
        .await?;
    info!("Expecting {} meshes", count);

    for index in 0..count {
        let label = reader.read_i32().await?;
        let size = reader
            .read_length("obj payload", config.limits.max_obj_bytes)
            .await?;
        let payload = reader.read_exact(size).await?;

        let start = Instant::now();
        let mesh = decode_obj(&payload, config.unit_scale, label).map_err(|e| {
            warn!("Mesh {}/{} (label {}) failed to decode", index + 1, count, label);
            ReceiverError::from(e)
        })?;
        progress.decode_micros += start.elapsed().as_micros() as u64;

        debug!(
            "Mesh {}/{}: {} ({}), {} vertices, {} triangles",
            index + 1,
            count,
            label,
            organ_name(label),
            mesh.vertices.len(),
            mesh.triangle_count()
        );

        match assembler.register(mesh) {
            Ok(events) => {
                progress.organs_created += 1;
                for event in events {
                    sink.emit(event).await?;
                }
            }
            // The frame was consumed completely, so the stream is still aligned.
            Err(e) => warn!("Skipping mesh {}/{}: {}", index + 1, count, e),
        }
    }

    Ok(())
}
