//! Vertex/face subset of Wavefront OBJ.
//!
//! The producer and the scene disagree on the up axis and on units, so
//! vertices are remapped `(x, y, z) -> (x, z, y)` and uniformly scaled. The
//! swap mirrors the mesh, so every triangle's winding is flipped as well.

use tracing::{debug, instrument};

use crate::error::DecodeError;
use crate::types::OrganMesh;

#[instrument(skip_all, fields(label = label, bytes = data.len()))]
pub fn decode_obj(data: &[u8], scale: f32, label: i32) -> Result<OrganMesh, DecodeError> {
    let text = std::str::from_utf8(data).map_err(|_| DecodeError::Utf8 { label })?;
    parse_obj(text, scale, label)
}

pub fn parse_obj(text: &str, scale: f32, label: i32) -> Result<OrganMesh, DecodeError> {
    let mut mesh = OrganMesh {
        label,
        ..Default::default()
    };
    // Highest index referenced so far and the line it came from.
    let mut highest: Option<(u32, usize)> = None;
    let mut dropped_faces = 0usize;

    for (number, line) in text.lines().enumerate() {
        let line_number = number + 1;
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let mut position = [0f32; 3];
                for component in &mut position {
                    let token = tokens.next().ok_or_else(|| DecodeError::Obj {
                        label,
                        line: line_number,
                        reason: "vertex needs three coordinates".to_string(),
                    })?;
                    *component = parse_coordinate(token).ok_or_else(|| DecodeError::Obj {
                        label,
                        line: line_number,
                        reason: format!("invalid coordinate '{}'", token),
                    })?;
                }
                let [x, y, z] = position;
                mesh.vertices.push([x * scale, z * scale, y * scale]);
            }
            Some("f") => {
                let mut corners = [0u32; 4];
                let mut count = 0;
                for token in tokens {
                    if count == corners.len() {
                        break;
                    }
                    let index = token.split('/').next().unwrap_or_default();
                    if index.is_empty() {
                        continue;
                    }
                    corners[count] = parse_index(index).ok_or_else(|| DecodeError::Obj {
                        label,
                        line: line_number,
                        reason: format!("invalid face index '{}'", token),
                    })?;
                    count += 1;
                }

                if count >= 3 {
                    let max = corners[..count].iter().copied().max().unwrap_or_default();
                    if highest.map_or(true, |(current, _)| max > current) {
                        highest = Some((max, line_number));
                    }
                }

                match count {
                    3 => {
                        let [a, b, c, _] = corners;
                        mesh.indices.extend_from_slice(&[a, c, b]);
                    }
                    4 => {
                        let [a, b, c, d] = corners;
                        mesh.indices.extend_from_slice(&[a, c, b, a, d, c]);
                    }
                    _ => dropped_faces += 1,
                }
            }
            _ => {}
        }
    }

    if let Some((index, line)) = highest {
        if index as usize >= mesh.vertices.len() {
            return Err(DecodeError::Obj {
                label,
                line,
                reason: format!(
                    "face references vertex {} but the mesh has {} vertices",
                    index + 1,
                    mesh.vertices.len()
                ),
            });
        }
    }

    if dropped_faces > 0 {
        debug!("Dropped {} faces with fewer than 3 indices", dropped_faces);
    }
    debug!(
        "Decoded mesh {}: {} vertices, {} triangles",
        label,
        mesh.vertices.len(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

fn parse_coordinate(token: &str) -> Option<f32> {
    token.parse::<f32>().ok().filter(|value| value.is_finite())
}

/// 1-based OBJ index to 0-based. Relative (negative) indices are not supported.
fn parse_index(token: &str) -> Option<u32> {
    token.parse::<u32>().ok().and_then(|index| index.checked_sub(1))
}
