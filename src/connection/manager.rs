//! Persistent link to a device agent with request/response correlation

use crate::adapter::AdapterError;
use anyhow::{anyhow, Result};
use provision_shared::{
    codec::{self, FrameDecoder},
    envelope::Payload,
    limits, Envelope,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for the device link
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Address of the device agent
    pub address: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7700".into(),
            connect_timeout: Duration::from_millis(limits::CONNECT_TIMEOUT_MS),
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Envelope>>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Envelope>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One established TCP session and its I/O task
struct Link {
    outbound_tx: mpsc::Sender<Envelope>,
    pending: PendingMap,
    task: JoinHandle<()>,
}

impl Link {
    /// Stop the I/O task and fail every waiter
    fn shutdown(&self) {
        self.task.abort();
        lock(&self.pending).clear();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Removes a request's pending slot when its waiter goes away
struct PendingGuard {
    pending: PendingMap,
    request_id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.request_id);
    }
}

/// Client side of the device agent protocol
pub struct DutConnection {
    config: ConnectionConfig,
    request_id: AtomicU64,
    link: RwLock<Option<Arc<Link>>>,
}

impl DutConnection {
    /// Connect to the device agent
    pub async fn connect(config: ConnectionConfig) -> Result<Self, AdapterError> {
        let link = open_link(&config).await?;
        Ok(Self {
            config,
            request_id: AtomicU64::new(0),
            link: RwLock::new(Some(Arc::new(link))),
        })
    }

    /// Get the next request ID
    pub fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Send a request and wait for the matching response payload
    ///
    /// An `ErrorResponse` from the agent is returned as a transport error.
    pub async fn request(&self, payload: Payload) -> Result<Payload, AdapterError> {
        let link = self.link.read().await.clone().ok_or(AdapterError::Closed)?;

        let request_id = self.next_request_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&link.pending).insert(request_id, reply_tx);
        let _guard = PendingGuard {
            pending: Arc::clone(&link.pending),
            request_id,
        };

        link.outbound_tx
            .send(Envelope::new(request_id, payload))
            .await
            .map_err(|_| AdapterError::Closed)?;
        drop(link);

        let reply = reply_rx.await.map_err(|_| AdapterError::Closed)?;
        match reply.payload {
            Some(Payload::Error(err)) => Err(AdapterError::Transport(err.message)),
            Some(payload) => Ok(payload),
            None => Err(AdapterError::UnexpectedResponse(format!(
                "empty payload for request {request_id}"
            ))),
        }
    }

    /// Replace the current link with a fresh one
    pub async fn reopen(&self) -> Result<(), AdapterError> {
        let mut slot = self.link.write().await;
        if let Some(old) = slot.take() {
            old.shutdown();
        }
        let link = open_link(&self.config).await?;
        *slot = Some(Arc::new(link));
        Ok(())
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        match self.link.read().await.as_ref() {
            Some(link) => lock(&link.pending).len(),
            None => 0,
        }
    }

    /// Close the link; later requests fail with [`AdapterError::Closed`]
    pub async fn shutdown(&self) {
        if let Some(link) = self.link.write().await.take() {
            link.shutdown();
            info!("connection to {} closed", self.config.address);
        }
    }
}

async fn open_link(config: &ConnectionConfig) -> Result<Link, AdapterError> {
    let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| AdapterError::Timeout(config.connect_timeout))??;
    stream.set_nodelay(true)?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(100);
    let pending = PendingMap::default();

    let task_pending = Arc::clone(&pending);
    let address = config.address.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, outbound_rx, &task_pending).await {
            warn!("link to {} ended: {}", address, e);
        }
        lock(&task_pending).clear();
    });

    info!("connected to device agent at {}", config.address);
    Ok(Link {
        outbound_tx,
        pending,
        task,
    })
}

/// Pump outbound requests and route inbound responses
async fn handle_connection(
    stream: TcpStream,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    pending: &PendingMap,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    return Ok(());
                };
                let encoded = codec::encode(&envelope)?;
                writer.write_all(&encoded).await?;
            }

            read = reader.read(&mut read_buf) => {
                let n = read?;
                if n == 0 {
                    return Err(anyhow!("device agent closed connection"));
                }
                decoder.extend(&read_buf[..n]);
                while let Some(envelope) = decoder.decode_next()? {
                    route(pending, envelope);
                }
            }
        }
    }
}

fn route(pending: &PendingMap, envelope: Envelope) {
    let request_id = envelope.request_id();
    match lock(pending).remove(&request_id) {
        // The waiter may have timed out already; its result is discarded
        Some(reply_tx) => {
            let _ = reply_tx.send(envelope);
        }
        None => debug!("dropping response for unknown request {}", request_id),
    }
}
