//! One provisioning client connection

use crate::agent::{error_response, Agent};
use anyhow::Result;
use provision_shared::{
    codec::{self, CodecError, FrameDecoder, MAX_MESSAGE_SIZE},
    envelope::Payload,
    Envelope,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Handle to write replies to a client
#[derive(Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    writer: Arc<Mutex<WriteHalf<TcpStream>>>,
}

impl SessionHandle {
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let encoded = codec::encode(envelope)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        Ok(())
    }

    /// Reply to `request_id`, substituting an error when the reply cannot be framed
    pub async fn reply(&self, request_id: u64, payload: Payload) -> Result<()> {
        let Err(e) = self.send(&Envelope::new(request_id, payload)).await else {
            return Ok(());
        };
        let size = match e.downcast_ref::<CodecError>() {
            Some(CodecError::MessageTooLarge(size)) => *size,
            _ => return Err(e),
        };
        warn!("reply to request {} is {} bytes, sending error instead", request_id, size);
        let message = format!("reply of {size} bytes exceeds the {MAX_MESSAGE_SIZE} byte frame limit");
        self.send(&Envelope::new(request_id, error_response(message))).await
    }
}

/// Active client session
pub struct ClientSession {
    handle: SessionHandle,
    reader: ReadHalf<TcpStream>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl ClientSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            handle: SessionHandle {
                addr,
                writer: Arc::new(Mutex::new(writer)),
            },
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Read the next envelope; `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(envelope)) => return Some(envelope),
                Ok(None) => {}
                Err(e) => {
                    warn!("decode error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("read error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }
        }
    }

    /// Answer requests until the client goes away
    ///
    /// Each request runs in its own task so a long exec does not hold up
    /// operation polls on the same connection.
    pub async fn serve(mut self, agent: Arc<Agent>) {
        let addr = self.handle.addr;
        info!("client connected: {}", addr);

        while let Some(envelope) = self.recv().await {
            let request_id = envelope.request_id();
            let handle = self.handle();
            let agent = Arc::clone(&agent);

            tokio::spawn(async move {
                let reply = match envelope.payload {
                    Some(payload) => {
                        debug!("request {} from {}: {:?}", request_id, addr, payload.msg_type());
                        agent.handle(payload).await
                    }
                    None => error_response("empty request".into()),
                };
                if let Err(e) = handle.reply(request_id, reply).await {
                    warn!("failed to reply to {}: {}", addr, e);
                }
            });
        }

        info!("client disconnected: {}", addr);
    }
}
