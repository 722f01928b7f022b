//! TCP front end of the consumer.
//!
//! Accepts any number of producer connections and runs one [`Session`] per
//! connection over a single shared buffer and worker pool.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::SharedBuffer;
use crate::session::Session;
use crate::worker::WorkerPool;
use crate::{ConsumerConfig, ConsumerError};

/// The consumer server.
pub struct ConsumerServer {
    config: ConsumerConfig,
    listener: TcpListener,
    buffer: Arc<SharedBuffer>,
    cancel: CancellationToken,
}

impl ConsumerServer {
    /// Binds `config.listen_addr` and prepares the shared buffer.
    ///
    /// Nothing is accepted until [`run`](Self::run) is called.
    pub async fn bind(
        config: ConsumerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ConsumerError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let buffer = Arc::new(
            SharedBuffer::new(config.buffer_capacity, config.worker_count)
                .with_byte_budget(config.max_buffered_bytes),
        );

        info!(
            addr = %listener.local_addr()?,
            capacity = buffer.capacity(),
            workers = buffer.worker_count(),
            max_buffered_bytes = config.max_buffered_bytes,
            "consumer listening"
        );

        Ok(Self {
            config,
            listener,
            buffer,
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConsumerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn buffer(&self) -> &Arc<SharedBuffer> {
        &self.buffer
    }

    /// Accepts connections until cancellation, then waits for open sessions
    /// and workers to stop.
    pub async fn run(self) -> Result<(), ConsumerError> {
        let workers = WorkerPool::spawn(
            Arc::clone(&self.buffer),
            self.config.output_dir.clone(),
            self.cancel.clone(),
        );
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("consumer shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(%peer, "failed to set TCP_NODELAY: {e}");
                            }
                            let session = Session::new(Arc::clone(&self.buffer))
                                .with_drain_timeout(self.config.drain_timeout)
                                .with_cancel(self.cancel.child_token());
                            let id = session.id();
                            info!(session = %id, %peer, "producer connected");

                            sessions.spawn(async move {
                                match session.run(stream).await {
                                    Ok(_) => {}
                                    Err(ConsumerError::Cancelled) => {
                                        debug!(session = %id, "session cancelled");
                                    }
                                    Err(e) => warn!(session = %id, %peer, "session ended: {e}"),
                                }
                            });
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }

                Some(result) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = result {
                        error!("session task failed: {e}");
                    }
                }
            }
        }

        while let Some(result) = sessions.join_next().await {
            if let Err(e) = result {
                error!("session task failed: {e}");
            }
        }
        workers.join().await;
        Ok(())
    }
}
