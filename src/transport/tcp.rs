//! TCP transport: the device agent protocol over a [`DutConnection`]

use crate::adapter::{AdapterError, Operation, OperationSource};
use crate::connection::DutConnection;
use crate::transport::traits::DutTransport;
use async_trait::async_trait;
use provision_shared::{
    envelope::Payload, CacheRequest, ExecRequest, ExecResponse, GetOperationRequest,
    RestartRequest,
};

fn unexpected(payload: &Payload) -> AdapterError {
    AdapterError::UnexpectedResponse(format!("{:?}", payload.msg_type()))
}

#[async_trait]
impl OperationSource for DutConnection {
    async fn get_operation(&self, name: &str) -> Result<Operation, AdapterError> {
        let request = GetOperationRequest {
            name: name.to_string(),
        };
        match self.request(Payload::GetOperation(request)).await? {
            Payload::OperationStatus(status) => Ok(status.into()),
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl DutTransport for DutConnection {
    async fn exec(&self, request: ExecRequest) -> Result<ExecResponse, AdapterError> {
        match self.request(Payload::ExecRequest(request)).await? {
            Payload::ExecResponse(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn reboot(&self) -> Result<(), AdapterError> {
        match self
            .request(Payload::RestartRequest(RestartRequest { args: Vec::new() }))
            .await?
        {
            Payload::RestartResponse(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn reconnect(&self) -> Result<(), AdapterError> {
        self.reopen().await
    }

    async fn cache(&self, request: CacheRequest) -> Result<Operation, AdapterError> {
        match self.request(Payload::CacheRequest(request)).await? {
            Payload::OperationStatus(status) => Ok(status.into()),
            other => Err(unexpected(&other)),
        }
    }

    async fn close(&self) {
        self.shutdown().await
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::OperationResult;
    use crate::connection::ConnectionConfig;
    use provision_shared::{codec, Envelope, ErrorResponse, OperationStatus};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal agent: echoes commands, finishes operations on first status check
    async fn spawn_agent() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket));
            }
        });
        addr
    }

    async fn serve(mut socket: TcpStream) {
        let mut decoder = codec::FrameDecoder::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.extend(&buf[..n]);
            while let Ok(Some(request)) = decoder.decode_next() {
                let request_id = request.request_id();
                let reply = match request.payload {
                    Some(Payload::ExecRequest(exec)) => Payload::ExecResponse(ExecResponse {
                        stdout: format!("{} {}", exec.command, exec.args.join(" ")).into_bytes(),
                        stderr: Vec::new(),
                        exit_status: 0,
                        error_message: String::new(),
                    }),
                    Some(Payload::CacheRequest(_)) => {
                        Payload::OperationStatus(OperationStatus::pending("op-1"))
                    }
                    Some(Payload::GetOperation(get)) if get.name == "op-1" => {
                        Payload::OperationStatus(OperationStatus::succeeded("op-1", b"done".to_vec()))
                    }
                    _ => Payload::Error(ErrorResponse {
                        message: "unsupported request".into(),
                    }),
                };
                let encoded = codec::encode(&Envelope::new(request_id, reply))
                    .expect("encode");
                if socket.write_all(&encoded).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn connect(address: String) -> DutConnection {
        DutConnection::connect(ConnectionConfig {
            address,
            connect_timeout: Duration::from_secs(2),
        })
        .await
        .expect("connect")
    }

    #[tokio::test]
    async fn test_exec_round_trip() {
        let conn = connect(spawn_agent().await).await;

        let response = conn
            .exec(ExecRequest {
                command: "mkdir".into(),
                args: vec!["-p".into(), "/tmp/x".into()],
            })
            .await
            .expect("exec");
        assert_eq!(response.stdout, b"mkdir -p /tmp/x".to_vec());
        assert_eq!(response.exit_status, 0);
    }

    #[tokio::test]
    async fn test_cache_then_poll_operation() {
        let conn = connect(spawn_agent().await).await;

        let op = conn
            .cache(CacheRequest {
                source: "gs://bucket/a".into(),
                destination: None,
            })
            .await
            .expect("cache");
        assert_eq!(op.name, "op-1");
        assert!(!op.done);

        let status = conn.get_operation("op-1").await.expect("status");
        assert!(status.done);
        assert_eq!(
            status.result,
            Some(OperationResult::Response(bytes::Bytes::from_static(b"done")))
        );
    }

    #[tokio::test]
    async fn test_agent_error_becomes_transport_error() {
        let conn = connect(spawn_agent().await).await;

        let err = conn.get_operation("op-404").await.unwrap_err();
        assert!(matches!(err, AdapterError::Transport(ref m) if m == "unsupported request"));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_requests_until_reopened() {
        let conn = connect(spawn_agent().await).await;

        conn.close().await;
        let err = conn
            .exec(ExecRequest {
                command: "true".into(),
                args: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Closed));

        conn.reconnect().await.expect("reopen");
        assert!(conn
            .exec(ExecRequest {
                command: "true".into(),
                args: Vec::new(),
            })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let result = DutConnection::connect(ConnectionConfig {
            address,
            connect_timeout: Duration::from_secs(2),
        })
        .await;
        assert!(result.is_err());
    }
}
