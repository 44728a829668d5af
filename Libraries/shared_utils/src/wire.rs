//! Session framing shared by the sender and the receiver.
//!
//! ```text
//! int32 jsonSize | jsonSize bytes JSON | int32 meshCount |
//!     meshCount x { int32 label | int32 objSize | objSize bytes OBJ text }
//! ```
//!
//! Every integer is 4-byte big-endian and signed.

use byteorder::{BigEndian, WriteBytesExt};

pub const DEFAULT_PORT: u16 = 5555;

/// Size of every integer field on the wire.
pub const INT_FIELD_SIZE: usize = 4;

pub const MAX_JSON_BYTES: usize = 1 << 20;
pub const MAX_MESH_COUNT: usize = 256;
pub const MAX_OBJ_BYTES: usize = 256 << 20;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("{field} of {len} bytes does not fit a signed 32-bit length")]
    TooLarge { field: &'static str, len: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One mesh entry of a session.
#[derive(Clone, Debug)]
pub struct MeshFrame<'a> {
    pub label: i32,
    pub obj: &'a [u8],
}

fn length_field(field: &'static str, len: usize) -> Result<i32, WireError> {
    i32::try_from(len).map_err(|_| WireError::TooLarge { field, len })
}

/// `jsonSize` followed by the JSON bytes. An empty slice encodes a header of size 0.
pub fn encode_header(json: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(INT_FIELD_SIZE + json.len());
    buf.write_i32::<BigEndian>(length_field("json header", json.len())?)?;
    buf.extend_from_slice(json);
    Ok(buf)
}

pub fn encode_mesh_count(count: usize) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(INT_FIELD_SIZE);
    buf.write_i32::<BigEndian>(length_field("mesh count", count)?)?;
    Ok(buf)
}

pub fn encode_mesh(frame: &MeshFrame<'_>) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(2 * INT_FIELD_SIZE + frame.obj.len());
    buf.write_i32::<BigEndian>(frame.label)?;
    buf.write_i32::<BigEndian>(length_field("obj payload", frame.obj.len())?)?;
    buf.extend_from_slice(frame.obj);
    Ok(buf)
}

/// Encodes a complete session into one buffer.
pub fn encode_session(json: &[u8], meshes: &[MeshFrame<'_>]) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(session_length(json.len(), meshes.iter().map(|m| m.obj.len())));
    buf.extend(encode_header(json)?);
    buf.extend(encode_mesh_count(meshes.len())?);
    for frame in meshes {
        buf.extend(encode_mesh(frame)?);
    }
    Ok(buf)
}

/// Number of bytes a well-formed session occupies on the wire.
pub fn session_length(json_len: usize, obj_lens: impl IntoIterator<Item = usize>) -> usize {
    INT_FIELD_SIZE
        + json_len
        + INT_FIELD_SIZE
        + obj_lens
            .into_iter()
            .map(|len| 2 * INT_FIELD_SIZE + len)
            .sum::<usize>()
}
