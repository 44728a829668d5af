pub mod frame_reader;
pub mod tcp;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ReceiverConfig;
use crate::error::{ConfigError, ReceiverError, Result};
use crate::storage::Storage;

use tcp::{bind_listener, ConnectionAcceptor};

/// Owns the background runtime that accepts and decodes sessions, and the
/// storage the host drains.
pub struct Ingress {
    config: Arc<ReceiverConfig>,
    storage: Arc<Storage>,
    runtime: Mutex<Option<Runtime>>,
    cancellation_token: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Ingress {
    pub fn new(config: ReceiverConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let storage = Arc::new(Storage::new(config.event_capacity));
        Ok(Ingress {
            config: Arc::new(config),
            storage,
            runtime: Mutex::new(None),
            cancellation_token: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Binds the listener and starts accepting. Returns the bound address,
    /// which differs from the configured one when port 0 was requested.
    pub fn initialize(&self) -> Result<SocketAddr> {
        let mut runtime_guard = self.runtime.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if runtime_guard.is_some() {
            error!("Ingress already started");
            return Err(ReceiverError::AlreadyRunning);
        }
        if self.cancellation_token.is_cancelled() {
            return Err(ReceiverError::Cancelled);
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name_fn(|| {
                static ATOMIC_INGRESS_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
                let id = ATOMIC_INGRESS_ID.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                format!("INGRESS_R w-{}", id)
            })
            .enable_all()
            .build()
            .map_err(ReceiverError::Resource)?;

        let acceptor = {
            let _guard = runtime.enter();
            let listener = bind_listener(self.config.socket_addr())?;
            ConnectionAcceptor::new(
                listener,
                self.config.clone(),
                self.storage.clone(),
                self.cancellation_token.clone(),
            )
        };
        let local_addr = acceptor.local_addr()?;
        info!("Listening for sessions on {}", local_addr);

        if let Some(port) = self.config.metrics_port {
            let token = self.cancellation_token.clone();
            runtime.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = metrics::start_server(port) => {
                        if let Err(e) = result {
                            error!("Metrics server stopped: {}", e);
                        }
                    }
                }
            });
        }

        runtime.spawn(acceptor.run());

        *self.local_addr.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(local_addr);
        *runtime_guard = Some(runtime);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Stops accepting and aborts the in-flight session. The listening and
    /// client sockets are closed by the time the runtime has shut down.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(runtime) = runtime {
            info!("Shutting down ingress");
            runtime.shutdown_background();
        }
    }
}

impl Drop for Ingress {
    fn drop(&mut self) {
        self.shutdown();
    }
}
