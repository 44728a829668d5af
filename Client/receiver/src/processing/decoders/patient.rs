use shared_utils::types::PatientData;
use tokio::io::AsyncRead;
use tracing::{info, instrument, warn};

use crate::error::{DecodeError, Result};
use crate::ingress::frame_reader::FrameReader;

pub fn decode_patient(data: &[u8]) -> std::result::Result<PatientData, DecodeError> {
    Ok(serde_json::from_slice(data)?)
}

/// Reads the length-prefixed JSON header.
///
/// Returns `None` when the header is empty or does not decode; only framing
/// problems are errors, because the mesh section that follows is still
/// aligned after a bad JSON body.
#[instrument(skip_all)]
pub async fn read_patient_header<R>(reader: &mut FrameReader<R>, max_bytes: usize) -> Result<Option<PatientData>>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_length("json header", max_bytes).await?;
    if size == 0 {
        info!("Session carries no patient header");
        return Ok(None);
    }

    let body = reader.read_exact(size).await?;
    match decode_patient(&body) {
        Ok(data) => {
            info!(
                "Patient header decoded: {} tumors, liver volume {} ml",
                data.analysis.tumors.len(),
                data.analysis.liver_volume_ml
            );
            Ok(Some(data))
        }
        Err(e) => {
            warn!("Ignoring patient header of {} bytes: {}", size, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::wire::encode_header;

    #[test]
    fn decodes_full_header() {
        let json = br#"{"hasta":{"ad":"A","yas":"40","cinsiyet":"E","kronik_hastalik":"-","doktor_notu":"n"},
                        "analiz":{"liver_volume_ml":1.5,"tumor_count":1,"total_tumor_volume_ml":0.5,
                                  "tumors":[{"id":1,"volume_ml":0.5}]}}"#;
        let data = decode_patient(json).unwrap();
        assert_eq!(data.patient.gender, "E");
        assert_eq!(data.analysis.tumors.len(), 1);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(decode_patient(b"{\"hasta\":"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_patient(b"[1,2]"), Err(DecodeError::Json(_))));
    }

    #[tokio::test]
    async fn empty_header_yields_nothing() {
        let bytes = encode_header(b"").unwrap();
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(read_patient_header(&mut reader, 1024).await.unwrap().is_none());
        assert_eq!(reader.consumed(), 4);
    }

    #[tokio::test]
    async fn bad_json_is_consumed_and_skipped() {
        let mut bytes = encode_header(b"not json").unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(read_patient_header(&mut reader, 1024).await.unwrap().is_none());
        assert_eq!(reader.consumed(), 12);
        assert_eq!(reader.read_i32().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn truncated_header_is_fatal() {
        let bytes = encode_header(b"{}").unwrap();
        let mut reader = FrameReader::new(&bytes[..5]);
        assert!(read_patient_header(&mut reader, 1024).await.is_err());
    }
}
