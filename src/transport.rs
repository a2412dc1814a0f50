use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Response header carrying the server-side trace ID.
const LOG_ID_HEADER: &str = "x-tt-logid";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Transport already closed")]
    Closed,

    #[error("Connection lost")]
    ConnectionLost,
}

/// Duplex binary frame channel.
///
/// `receive` must be cancel-safe: the client loop races it against the
/// outbound queue and drops the losing future.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the peer has closed the channel.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    log_id: Option<String>,
}

impl WebSocketTransport {
    /// Open a WebSocket to `endpoint`, sending `headers` with the upgrade request.
    pub async fn connect(
        endpoint: &str,
        headers: &[(&'static str, String)],
    ) -> Result<Self, TransportError> {
        let mut request = endpoint.into_client_request()?;
        for (name, value) in headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            request.headers_mut().insert(header_name, header_value);
        }

        log::info!("🔌 Connecting to {}", endpoint);
        let (stream, response) = connect_async(request).await?;
        let log_id = response
            .headers()
            .get(LOG_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match &log_id {
            Some(id) => log::info!("✅ WebSocket connected, logid: {}", id),
            None => log::info!("✅ WebSocket connected"),
        }

        Ok(Self { stream, log_id })
    }

    /// Server trace ID from the upgrade response, if one was sent.
    pub fn log_id(&self) -> Option<&str> {
        self.log_id.as_deref()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        log::trace!("📤 Sending {} byte frame", frame.len());
        self.stream.send(WsMessage::Binary(frame.into())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        use tokio_tungstenite::tungstenite::Error as WsError;

        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(WsMessage::Text(text))) => {
                    log::debug!("Text message received, treating as frame");
                    return Ok(Some(text.as_str().as_bytes().to_vec()));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    log::info!("🔌 WebSocket closed by server: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    log::trace!("Ignoring control message: {:?}", other);
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory transport; one end of a pair built by [`ChannelTransport::pair`].
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::ConnectionLost)
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}
