//! Thin WebSocket client over the gateway control plane.

use {
    futures::{SinkExt, StreamExt},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use clawdis_protocol::{ControlFrame, HelloParams, RequestFrame, error_codes};

/// Client-side failure classes, mapped onto process exit codes.
#[derive(Debug)]
pub enum ClientError {
    /// Could not reach the gateway (exit 3).
    Unreachable(String),
    /// The gateway rejected our credentials (exit 4).
    Unauthorized(String),
    /// The gateway returned an error for the call (exit 5).
    Remote { code: String, message: String },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(m) => write!(f, "gateway unreachable: {m}"),
            Self::Unauthorized(m) => write!(f, "authorization failed: {m}"),
            Self::Remote { code, message } => write!(f, "{code}: {message}"),
        }
    }
}

impl ClientError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable(_) => 3,
            Self::Unauthorized(_) => 4,
            Self::Remote { .. } => 5,
        }
    }
}

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct GatewayClient {
    socket: Socket,
    next_id: u64,
}

impl GatewayClient {
    /// Connect and run the `hello` handshake.
    pub async fn connect(host: &str, port: u16, token: Option<&str>) -> Result<Self, ClientError> {
        let url = format!("ws://{host}:{port}/");
        let (socket, _) = connect_async(&url)
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        let mut client = Self { socket, next_id: 0 };

        let params = HelloParams {
            token: token.map(ToString::to_string),
            client: Some("clawdis-cli".into()),
            version: Some(env!("CARGO_PKG_VERSION").into()),
        };
        let hello = client
            .request(
                "hello",
                serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
            )
            .await;
        match hello {
            Ok(_) => Ok(client),
            Err(ClientError::Remote { code, message }) if code == error_codes::UNAUTHORIZED => {
                Err(ClientError::Unauthorized(message))
            },
            Err(e) => Err(e),
        }
    }

    /// One RPC round trip; server-push events arriving in between are
    /// skipped.
    pub async fn request(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let frame = RequestFrame {
            id: id.clone(),
            method: method.to_string(),
            params: (!params.is_null()).then_some(params),
        };
        let line = serde_json::to_string(&frame)
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        self.socket
            .send(Message::Text(line.into()))
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        while let Some(msg) = self.socket.next().await {
            let msg = msg.map_err(|e| ClientError::Unreachable(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            let Ok(frame) = serde_json::from_str::<ControlFrame>(&text) else {
                continue;
            };
            if let ControlFrame::Response(response) = frame
                && response.id == id
            {
                if response.ok {
                    return Ok(response.result.unwrap_or(serde_json::Value::Null));
                }
                let error = response.error.unwrap_or_else(|| {
                    clawdis_protocol::ErrorShape::new("UNKNOWN", "no error detail")
                });
                return Err(ClientError::Remote {
                    code: error.code,
                    message: error.message,
                });
            }
        }
        Err(ClientError::Unreachable("connection closed".into()))
    }
}
