use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ReceiverConfig;
use crate::error::{ReceiverError, Result};
use crate::ingress::frame_reader::FrameReader;
use crate::processing::{process_session, SessionOutcome, SessionProgress};
use crate::storage::Storage;
use crate::types::{SceneEvent, SceneSink, SessionSummary};

const LISTEN_BACKLOG: i32 = 16;

/// Binds the session listener.
///
/// Must be called from within a tokio runtime context.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let sock = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        None,
    )
    .map_err(ReceiverError::Resource)?;

    sock.set_reuse_address(true).map_err(ReceiverError::Resource)?;
    sock.set_nonblocking(true).map_err(ReceiverError::Resource)?;
    sock.bind(&addr.into()).map_err(ReceiverError::Resource)?;
    sock.listen(LISTEN_BACKLOG).map_err(ReceiverError::Resource)?;

    TcpListener::from_std(sock.into()).map_err(ReceiverError::Resource)
}

/// Serves one session at a time. Connections that arrive meanwhile wait in
/// the OS backlog until the current session is over.
pub struct ConnectionAcceptor {
    listener: TcpListener,
    config: Arc<ReceiverConfig>,
    storage: Arc<Storage>,
    cancellation_token: CancellationToken,
    next_session_id: u64,
}

impl ConnectionAcceptor {
    pub fn new(
        listener: TcpListener,
        config: Arc<ReceiverConfig>,
        storage: Arc<Storage>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            config,
            storage,
            cancellation_token,
            next_session_id: 1,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts and serves sessions until cancelled.
    #[instrument(skip_all)]
    pub async fn run(mut self) {
        info!("Waiting for sessions on {:?}", self.listener.local_addr());
        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!("Acceptor stopped");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.serve(stream, peer).await;
                    }
                    Err(e) => {
                        // Accept errors (e.g. fd exhaustion) are per connection.
                        error!("Failed to accept connection: {}", e);
                        tokio::task::yield_now().await;
                    }
                },
            }
        }
    }

    /// Runs one session to its end or until cancelled. Returns `None` when
    /// nobody drains scene events anymore.
    #[instrument(skip_all, fields(peer = %peer))]
    async fn serve(&mut self, mut stream: TcpStream, peer: SocketAddr) -> Option<SessionSummary> {
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        self.storage.sessions_total.inc();
        info!("Session {} accepted", session_id);

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        let mut sink = self.storage.sender();
        if sink
            .emit(SceneEvent::SessionStarted {
                session_id,
                peer: Some(peer),
            })
            .await
            .is_err()
        {
            warn!("Scene storage is gone, dropping session {}", session_id);
            return None;
        }

        // Owned out here so a cancelled session still reports what it got through.
        let mut reader = FrameReader::new(&mut stream);
        let mut progress = SessionProgress::default();
        let result = tokio::select! {
            _ = self.cancellation_token.cancelled() => Err(ReceiverError::Cancelled),
            result = process_session(&mut reader, &self.config, &mut sink, &mut progress) => result,
        };
        let outcome = SessionOutcome {
            bytes_consumed: reader.consumed(),
            progress,
            result,
        };

        if let Err(e) = stream.shutdown().await {
            debug!("Socket shutdown: {}", e);
        }
        drop(stream);

        self.record(&outcome);
        let summary = SessionSummary {
            session_id,
            bytes_consumed: outcome.bytes_consumed,
            patient_notified: outcome.progress.patient_notified,
            organs_created: outcome.progress.organs_created,
            error: outcome.result.as_ref().err().map(|e| e.to_string()),
        };

        match &outcome.result {
            Ok(()) => info!(
                "Session {} complete: {} organs from {} bytes",
                session_id, summary.organs_created, summary.bytes_consumed
            ),
            Err(ReceiverError::Cancelled) => info!("Session {} cancelled", session_id),
            Err(e) => error!("Session {} aborted: {}", session_id, e),
        }

        if !matches!(outcome.result, Err(ReceiverError::Cancelled)) {
            // Best effort; a closed storage means nobody is listening anyway.
            let _ = sink.emit(SceneEvent::SessionEnded(summary.clone())).await;
        }
        Some(summary)
    }

    fn record(&self, outcome: &SessionOutcome) {
        let storage = &self.storage;
        storage.bytes_received_total.add(outcome.bytes_consumed as i64);
        storage.meshes_decoded_total.add(outcome.progress.organs_created as i64);
        storage.decode_time.set(outcome.progress.decode_micros as i64);
        if outcome.progress.patient_notified {
            storage.patient_records_total.inc();
        }
        if outcome.result.is_err() {
            storage.sessions_failed_total.inc();
        }
    }
}
