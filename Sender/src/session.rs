use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use shared_utils::types::{organ_name, PatientData};
use shared_utils::wire::{encode_header, encode_mesh, encode_mesh_count, MeshFrame, WireError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("expected LABEL=PATH, got {0:?}")]
    MeshArgument(String),
    #[error("{path:?} is not a patient record: {source}")]
    Patient {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?} while {1}")]
    Timeout(Duration, &'static str),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// `LABEL=PATH` as given on the command line.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshArg {
    pub label: i32,
    pub path: PathBuf,
}

impl FromStr for MeshArg {
    type Err = SendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SendError::MeshArgument(s.to_string());
        let (label, path) = s.split_once('=').ok_or_else(invalid)?;
        let label = label.trim().parse().map_err(|_| invalid())?;
        if path.is_empty() {
            return Err(invalid());
        }
        Ok(Self { label, path: PathBuf::from(path) })
    }
}

/// Everything one session puts on the wire, loaded up front.
#[derive(Debug, Default)]
pub struct Session {
    pub json: Vec<u8>,
    pub meshes: Vec<(i32, Vec<u8>)>,
}

impl Session {
    /// Reads the patient file and the OBJ files. The patient JSON is sent
    /// verbatim but must decode as a patient record.
    pub async fn load(patient: Option<&Path>, meshes: &[MeshArg]) -> Result<Self, SendError> {
        let json = match patient {
            Some(path) => {
                let json = read(path).await?;
                let data: PatientData = serde_json::from_slice(&json).map_err(|source| SendError::Patient {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!(
                    "Patient {:?}: {} tumors, liver {:.1} ml",
                    data.patient.name, data.analysis.tumor_count, data.analysis.liver_volume_ml
                );
                json
            }
            None => Vec::new(),
        };

        let mut loaded = Vec::with_capacity(meshes.len());
        for mesh in meshes {
            let obj = read(&mesh.path).await?;
            debug!("Loaded {} ({}) from {:?}, {} bytes", mesh.label, organ_name(mesh.label), mesh.path, obj.len());
            loaded.push((mesh.label, obj));
        }

        Ok(Self { json, meshes: loaded })
    }

    /// Writes the session, pausing `mesh_delay` after every mesh.
    #[instrument(skip_all)]
    pub async fn write_to<W>(&self, writer: &mut W, mesh_delay: Duration) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&encode_header(&self.json)?).await?;
        writer.write_all(&encode_mesh_count(self.meshes.len())?).await?;
        for (index, (label, obj)) in self.meshes.iter().enumerate() {
            writer.write_all(&encode_mesh(&MeshFrame { label: *label, obj })?).await?;
            info!("Sent mesh {}/{}: {} ({})", index + 1, self.meshes.len(), label, organ_name(*label));
            if !mesh_delay.is_zero() {
                sleep(mesh_delay).await;
            }
        }
        writer.flush().await?;
        Ok(())
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, SendError> {
    tokio::fs::read(path).await.map_err(|source| SendError::File {
        path: path.to_path_buf(),
        source,
    })
}

/// Connects, sends the session and closes the connection. `limit` bounds the
/// connect and, separately, the whole write.
#[instrument(skip_all, fields(addr = %addr))]
pub async fn send(addr: &str, session: &Session, limit: Duration, mesh_delay: Duration) -> Result<(), SendError> {
    let mut stream = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| SendError::Timeout(limit, "connecting"))??;
    stream.set_nodelay(true)?;
    info!("Connected to {}", addr);

    timeout(limit, session.write_to(&mut stream, mesh_delay))
        .await
        .map_err(|_| SendError::Timeout(limit, "sending"))??;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::wire::encode_session;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn parses_mesh_arguments() {
        let arg: MeshArg = "9=out/tumor.obj".parse().unwrap();
        assert_eq!(arg, MeshArg { label: 9, path: PathBuf::from("out/tumor.obj") });

        assert!("tumor.obj".parse::<MeshArg>().is_err());
        assert!("x=tumor.obj".parse::<MeshArg>().is_err());
        assert!("9=".parse::<MeshArg>().is_err());
    }

    #[tokio::test]
    async fn writes_the_same_bytes_as_the_encoder() {
        let session = Session {
            json: br#"{"hasta":{"ad":"X"}}"#.to_vec(),
            meshes: vec![(8, b"v 0 0 0\n".to_vec()), (9, Vec::new())],
        };
        let mut written = Vec::new();
        session.write_to(&mut written, Duration::ZERO).await.unwrap();

        let frames: Vec<MeshFrame> = session
            .meshes
            .iter()
            .map(|(label, obj)| MeshFrame { label: *label, obj })
            .collect();
        assert_eq!(written, encode_session(&session.json, &frames).unwrap());
    }

    #[tokio::test]
    async fn sends_over_tcp_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let session = Session {
            json: Vec::new(),
            meshes: vec![(8, b"v 1 2 3\n".to_vec())],
        };

        let receiver = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        send(&addr, &session, Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        let received = receiver.await.unwrap();
        assert_eq!(received, encode_session(b"", &[MeshFrame { label: 8, obj: b"v 1 2 3\n" }]).unwrap());
    }

    #[tokio::test]
    async fn rejects_a_patient_file_that_is_not_a_record() {
        let path = std::env::temp_dir().join(format!("organ-sender-{}.json", std::process::id()));
        tokio::fs::write(&path, b"not json").await.unwrap();
        let result = Session::load(Some(path.as_path()), &[]).await;
        tokio::fs::remove_file(&path).await.unwrap();
        assert!(matches!(result, Err(SendError::Patient { .. })));
    }
}
