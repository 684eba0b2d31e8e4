use std::io::ErrorKind;
use std::net::SocketAddr;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::protocols::relay::{RelayFramer, RelaySource, RelaySummary, RelayTarget};

use super::registry::ClientRegistry;

/// Work handed to the task that owns a connection.
#[derive(Debug)]
enum Job {
    Relay {
        target: RelayTarget,
        source: RelaySource,
        reply: oneshot::Sender<Result<RelaySummary>>,
    },
    Send {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Cheap, clonable reference to a connected client.
///
/// Calls queue a job on the connection's own task, so two transfers on one
/// connection never interleave their writes.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: u64,
    address: SocketAddr,
    jobs: mpsc::Sender<Job>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Relays `source` to `target` over this connection and waits for the
    /// session to end.
    pub async fn relay(&self, target: RelayTarget, source: RelaySource) -> Result<RelaySummary> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Relay { target, source, reply }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed(self.address))?
    }

    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Send {
            data: data.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::ConnectionClosed(self.address))?
    }

    pub async fn close(&self) -> Result<()> {
        self.submit(Job::Close).await
    }

    async fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| Error::ConnectionClosed(self.address))
    }
}

/// One accepted client: a receive loop plus the jobs queued through its
/// [`ClientHandle`]. Registered for as long as it runs.
pub struct Connection<S> {
    id: u64,
    address: SocketAddr,
    stream: S,
    jobs: mpsc::Receiver<Job>,
    registry: ClientRegistry,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(
        id: u64,
        stream: S,
        address: SocketAddr,
        registry: ClientRegistry,
        queue_depth: usize,
        buffer_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let handle = ClientHandle {
            id,
            address,
            jobs: tx,
        };
        if registry.register(address, handle).is_some() {
            warn!("Replaced stale registration for {}", address);
        }
        info!("Client connected: {}", address);

        Self {
            id,
            address,
            stream,
            jobs: rx,
            registry,
            buffer: vec![0u8; buffer_size.max(1)],
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                read = self.stream.read(&mut self.buffer) => match read {
                    Ok(0) => {
                        info!("Client disconnected: {}", self.address);
                        break;
                    }
                    Ok(n) => self.log_received(&self.buffer[..n]),
                    Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                        info!("Client disconnected: {}", self.address);
                        break;
                    }
                    Err(e) => {
                        warn!("Read from {} failed: {}", self.address, e);
                        break;
                    }
                },
                Some(job) = self.jobs.recv() => {
                    if !self.execute(job).await {
                        break;
                    }
                }
            }
        }

        let id = self.id;
        self.registry.unregister_if(&self.address, |h| h.id() == id);
        debug!("Connection {} to {} closed", id, self.address);
    }

    /// Runs one job with exclusive use of the stream. Returns false when the
    /// connection should close.
    async fn execute(&mut self, job: Job) -> bool {
        match job {
            Job::Relay { target, source, reply } => {
                info!("Relaying {} to {} as {}", source.path().display(), self.address, target);
                let (file, info) = source.into_parts();
                let result = RelayFramer::new(&mut self.stream, target, info, file)
                    .run_with_remainder()
                    .await;
                // Status text that arrived behind the final pull.
                if let Ok((_, remainder)) = &result {
                    if !remainder.is_empty() {
                        self.log_received(remainder);
                    }
                }
                let result = result.map(|(summary, _)| summary);

                // The stream is unusable once the peer stops pulling mid-session.
                let keep = !matches!(result, Err(Error::PeerClosed { .. }) | Err(Error::Io(_)));
                if let Err(e) = &result {
                    warn!("Relay to {} terminated: {}", self.address, e);
                }
                let _ = reply.send(result);
                keep
            }
            Job::Send { data, reply } => {
                let result = self.write(&data).await;
                let keep = result.is_ok();
                let _ = reply.send(result);
                keep
            }
            Job::Close => {
                info!("Closing connection to {}", self.address);
                let _ = self.stream.shutdown().await;
                false
            }
        }
    }

    fn log_received(&self, data: &[u8]) {
        info!(
            "Received from {} len {}: {}",
            self.address,
            data.len(),
            String::from_utf8_lossy(data)
        );
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        debug!("Sent {} bytes to {}", data.len(), self.address);
        Ok(())
    }
}
