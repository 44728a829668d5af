use byteorder::{BigEndian, ByteOrder};
use shared_utils::wire::INT_FIELD_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ReceiverError, Result};

// Payload buffers grow by at most this much per read.
const READ_CHUNK: usize = 64 * 1024;

/// Exact-count reader over a byte stream.
///
/// Every read awaits readiness on the runtime instead of blocking a thread, so
/// a slow peer only suspends the session task. There is no read timeout.
pub struct FrameReader<R> {
    inner: R,
    consumed: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Total bytes consumed from the stream so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Reads exactly `count` bytes. Memory grows with the bytes that actually
    /// arrive, so a peer that declares a large payload and then stalls holds
    /// at most one chunk beyond what it sent.
    pub async fn read_exact(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(count.min(READ_CHUNK));
        while buf.len() < count {
            let filled = buf.len();
            buf.resize(count.min(filled + READ_CHUNK), 0);
            let read = self.inner.read(&mut buf[filled..]).await?;
            buf.truncate(filled + read);
            if read == 0 {
                return Err(ReceiverError::Framing {
                    expected: count,
                    received: filled,
                });
            }
            self.consumed += read as u64;
        }
        Ok(buf)
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; INT_FIELD_SIZE];
        self.fill(&mut buf).await?;
        Ok(BigEndian::read_i32(&buf))
    }

    /// Reads a length field and checks it against `limit` before anyone
    /// allocates a buffer for it.
    pub async fn read_length(&mut self, field: &'static str, limit: usize) -> Result<usize> {
        let declared = self.read_i32().await?;
        usize::try_from(declared)
            .ok()
            .filter(|len| *len <= limit)
            .ok_or(ReceiverError::ProtocolLimit {
                field,
                declared: i64::from(declared),
                limit,
            })
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.inner.read(&mut buf[filled..]).await?;
            if read == 0 {
                return Err(ReceiverError::Framing {
                    expected: buf.len(),
                    received: filled,
                });
            }
            filled += read;
            self.consumed += read as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_big_endian_integers() {
        let data: &[u8] = &[0, 0, 1, 0, 0xff, 0xff, 0xff, 0xfe];
        let mut reader = FrameReader::new(data);
        assert_eq!(reader.read_i32().await.unwrap(), 256);
        assert_eq!(reader.read_i32().await.unwrap(), -2);
        assert_eq!(reader.consumed(), 8);
    }

    #[tokio::test]
    async fn short_read_reports_progress() {
        let data: &[u8] = &[1, 2, 3];
        let mut reader = FrameReader::new(data);
        match reader.read_exact(5).await {
            Err(ReceiverError::Framing { expected, received }) => {
                assert_eq!(expected, 5);
                assert_eq!(received, 3);
            }
            other => panic!("expected a framing error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn length_above_limit_is_rejected_before_reading_payload() {
        let data: &[u8] = &[0, 0, 0x10, 0, b'x'];
        let mut reader = FrameReader::new(data);
        let err = reader.read_length("json header", 1024).await.unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::ProtocolLimit { declared: 4096, limit: 1024, .. }
        ));
        assert_eq!(reader.consumed(), 4);
    }

    #[tokio::test]
    async fn negative_length_is_rejected() {
        let data: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let mut reader = FrameReader::new(data);
        let err = reader.read_length("obj payload", usize::MAX).await.unwrap_err();
        assert!(matches!(err, ReceiverError::ProtocolLimit { declared: -1, .. }));
    }

    #[tokio::test]
    async fn waits_for_bytes_arriving_in_pieces() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(reader);

        let producer = tokio::spawn(async move {
            for chunk in [&b"ab"[..], b"c", b"defg"] {
                writer.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        assert_eq!(reader.read_exact(7).await.unwrap(), b"abcdefg");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn large_declared_payload_is_not_allocated_up_front() {
        let data: &[u8] = &[7; 10];
        let mut reader = FrameReader::new(data);
        match reader.read_exact(200 << 20).await {
            Err(ReceiverError::Framing { expected, received }) => {
                assert_eq!(expected, 200 << 20);
                assert_eq!(received, 10);
            }
            other => panic!("expected a framing error, got {:?}", other.map(|b| b.len())),
        }
        assert_eq!(reader.consumed(), 10);
    }

    #[tokio::test]
    async fn payload_larger_than_one_chunk_arrives_intact() {
        let data: Vec<u8> = (0..READ_CHUNK * 2 + 3).map(|i| i as u8).collect();
        let mut reader = FrameReader::new(&data[..]);
        let payload = reader.read_exact(data.len()).await.unwrap();
        assert_eq!(payload, data);
        assert_eq!(reader.consumed(), data.len() as u64);
    }
}
