//! Control-plane state machine for one connection and the dialogue session on it.
//!
//! ```text
//! Idle ─1/50─▶ Connected ─100/150─▶ SessionActive ─102 or 152/153─▶ SessionFinishing ─2/52─▶ Finished
//! ```
//! Any handshake mismatch, server error or lost transport moves to `Aborted`.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{DialogError, Result};
use crate::payload::EMPTY_OBJECT;
use crate::protocol::{events, FrameCodec, Message, MessageFlags, MessageKind};
use crate::transport::{Transport, TransportError};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    SessionStarting,
    SessionActive,
    SessionFinishing,
    Finished,
    Aborted,
}

/// What the receive loop should do with an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Synthesised speech for the playback buffer.
    Audio(Vec<u8>),
    /// The user started talking; drop whatever is queued for playback.
    ClearAudio,
    /// The server ended the session (152 or 153).
    SessionEnded { event: i32 },
    /// Any other server event, passed through untouched.
    Event { event: Option<i32>, payload: Vec<u8> },
}

pub struct DialogSession<T: Transport> {
    transport: T,
    codec: FrameCodec,
    state: SessionState,
    session_id: String,
    connect_id: Option<String>,
    response_timeout: Duration,
    server_finished: bool,
}

impl<T: Transport> DialogSession<T> {
    pub fn new(transport: T, codec: FrameCodec, session_id: impl Into<String>) -> Self {
        Self {
            transport,
            codec,
            state: SessionState::Idle,
            session_id: session_id.into(),
            connect_id: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            server_finished: false,
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Connect ID assigned by the server in its connection-started reply.
    pub fn connect_id(&self) -> Option<&str> {
        self.connect_id.as_deref()
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Whether the server has announced the end of the session.
    pub fn server_finished(&self) -> bool {
        self.server_finished
    }

    pub async fn open_connection(&mut self) -> Result<()> {
        self.require(SessionState::Idle, "open connection")?;
        self.state = SessionState::Connecting;

        let request = Message::new(MessageKind::FullClient, MessageFlags::WITH_EVENT)
            .with_event(events::START_CONNECTION)
            .with_payload(EMPTY_OBJECT);
        self.send_control(&request).await?;

        let response = self
            .await_event("open connection", events::CONNECTION_STARTED)
            .await?;
        self.connect_id = response.connect_id;
        self.state = SessionState::Connected;
        log::info!(
            "🔗 Connection started (connect_id: {})",
            self.connect_id.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    /// Start the dialogue session; `payload` is the session parameter document.
    pub async fn open_session(&mut self, payload: Vec<u8>) -> Result<()> {
        self.require(SessionState::Connected, "open session")?;
        self.state = SessionState::SessionStarting;

        let request = Message::new(MessageKind::FullClient, MessageFlags::WITH_EVENT)
            .with_event(events::START_SESSION)
            .with_session_id(self.session_id.as_str())
            .with_payload(payload);
        self.send_control(&request).await?;

        let response = self
            .await_event("open session", events::SESSION_STARTED)
            .await?;
        self.state = SessionState::SessionActive;
        log::info!(
            "🎙️ Session {} started: {}",
            self.session_id,
            String::from_utf8_lossy(&response.payload)
        );
        Ok(())
    }

    /// Ask the server to end the session. Does not wait for a reply; the
    /// receive loop sees the server's session-finished event.
    pub async fn close_session(&mut self) -> Result<()> {
        match self.state {
            SessionState::SessionActive => {}
            SessionState::SessionFinishing | SessionState::Finished | SessionState::Aborted => {
                log::debug!("Session already ending ({}), close ignored", self.state);
                return Ok(());
            }
            state => {
                return Err(DialogError::InvalidState {
                    action: "close session",
                    state,
                })
            }
        }

        let request = Message::new(MessageKind::FullClient, MessageFlags::WITH_EVENT)
            .with_event(events::FINISH_SESSION)
            .with_session_id(self.session_id.as_str())
            .with_payload(EMPTY_OBJECT);
        self.send_control(&request).await?;
        self.state = SessionState::SessionFinishing;
        log::info!("👋 Finish requested for session {}", self.session_id);
        Ok(())
    }

    /// Close the connection, ending the session first if it is still active.
    pub async fn close_connection(&mut self) -> Result<()> {
        match self.state {
            SessionState::SessionActive => self.close_session().await?,
            SessionState::Connected | SessionState::SessionFinishing => {}
            SessionState::Finished => {
                log::debug!("Connection already finished, close ignored");
                return Ok(());
            }
            SessionState::Aborted => {
                log::debug!("Connection aborted, nothing more is sent on it");
                return Ok(());
            }
            state => {
                return Err(DialogError::InvalidState {
                    action: "close connection",
                    state,
                })
            }
        }

        let request = Message::new(MessageKind::FullClient, MessageFlags::WITH_EVENT)
            .with_event(events::FINISH_CONNECTION)
            .with_payload(EMPTY_OBJECT);
        self.send_control(&request).await?;

        self.await_event("close connection", events::CONNECTION_FINISHED)
            .await?;
        self.state = SessionState::Finished;
        log::info!("🔌 Connection finished");
        Ok(())
    }

    /// Send a session-scoped event such as SayHello or ChatTtsText.
    pub async fn send_event(&mut self, event: i32, payload: Vec<u8>) -> Result<()> {
        self.require(SessionState::SessionActive, "send event")?;
        let message = Message::new(MessageKind::FullClient, MessageFlags::WITH_EVENT)
            .with_event(event)
            .with_session_id(self.session_id.as_str())
            .with_payload(payload);
        self.send_control(&message).await
    }

    /// Forward an already-encoded audio frame. Frames arriving outside the
    /// active phase are dropped; returns whether the frame was sent.
    pub async fn send_audio_frame(&mut self, frame: Vec<u8>) -> Result<bool> {
        if self.state != SessionState::SessionActive {
            log::debug!("Dropping audio frame while {}", self.state);
            return Ok(false);
        }
        self.transport.send(frame).await?;
        Ok(true)
    }

    /// Next decoded frame, or `None` once the transport is closed. Cancel-safe.
    pub async fn receive_message(&mut self) -> Result<Option<Message>> {
        match self.transport.receive().await? {
            Some(bytes) => {
                let message = self.codec.decode(&bytes)?;
                log::trace!(
                    "📥 {} event={:?} {} bytes",
                    message.kind,
                    message.event,
                    message.payload.len()
                );
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Classify a frame received while the session is up.
    pub fn handle_inbound(&mut self, message: Message) -> Result<Inbound> {
        match message.kind {
            MessageKind::Error => {
                self.state = SessionState::Aborted;
                let code = message.error_code.unwrap_or_default();
                log::error!(
                    "❌ Server error {}: {}",
                    code,
                    String::from_utf8_lossy(&message.payload)
                );
                Err(DialogError::ServerReported {
                    code,
                    payload: message.payload,
                })
            }
            MessageKind::FullClient | MessageKind::AudioOnlyClient => {
                Err(crate::protocol::ProtocolError::InvalidMessage(format!(
                    "server sent client message kind {}",
                    message.kind
                ))
                .into())
            }
            MessageKind::AudioOnlyServer => Ok(Inbound::Audio(message.payload)),
            MessageKind::FullServer | MessageKind::FrontEndResult => match message.event {
                Some(events::ASR_INFO) => Ok(Inbound::ClearAudio),
                Some(event) if events::ends_session(event) => {
                    if event == events::SESSION_FAILED {
                        log::warn!(
                            "⚠️ Session failed on server: {}",
                            String::from_utf8_lossy(&message.payload)
                        );
                    } else {
                        log::info!("🏁 Server finished session {}", self.session_id);
                    }
                    if matches!(
                        self.state,
                        SessionState::SessionActive | SessionState::SessionFinishing
                    ) {
                        self.state = SessionState::SessionFinishing;
                    }
                    self.server_finished = true;
                    Ok(Inbound::SessionEnded { event })
                }
                event => Ok(Inbound::Event {
                    event,
                    payload: message.payload,
                }),
            },
        }
    }

    /// Best-effort shutdown after a failure: close whatever is still open and
    /// log, rather than return, anything that goes wrong.
    pub async fn teardown(&mut self) {
        if self.state == SessionState::SessionActive {
            if let Err(e) = self.close_session().await {
                log::warn!("Teardown: close session failed: {}", e);
            }
        }
        if matches!(
            self.state,
            SessionState::Connected | SessionState::SessionFinishing
        ) {
            if let Err(e) = self.close_connection().await {
                log::warn!("Teardown: close connection failed: {}", e);
            }
        }
        self.close_transport().await;
    }

    pub async fn close_transport(&mut self) {
        if let Err(e) = self.transport.close().await {
            log::debug!("Transport close failed: {}", e);
        }
    }

    fn require(&self, expected: SessionState, action: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DialogError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    async fn send_control(&mut self, message: &Message) -> Result<()> {
        let frame = self.codec.encode(message)?;
        log::debug!(
            "📤 Sending event {:?} ({} bytes)",
            message.event,
            frame.len()
        );
        if let Err(e) = self.transport.send(frame).await {
            self.state = SessionState::Aborted;
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait for a `FullServer` frame carrying `expected`.
    ///
    /// While waiting for connection-finished, leftover frames of the ending
    /// session (audio, or any event carrying a session ID) are skipped.
    async fn await_event(&mut self, action: &'static str, expected: i32) -> Result<Message> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let received = tokio::time::timeout_at(deadline, self.transport.receive()).await;
            let bytes = match received {
                Err(_) => {
                    let detail = format!("no response within {:?}", self.response_timeout);
                    return Err(self.violation(action, expected, detail));
                }
                Ok(Err(e)) => {
                    self.state = SessionState::Aborted;
                    return Err(e.into());
                }
                Ok(Ok(None)) => {
                    self.state = SessionState::Aborted;
                    return Err(TransportError::ConnectionLost.into());
                }
                Ok(Ok(Some(bytes))) => bytes,
            };

            let message = match self.codec.decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    self.state = SessionState::Aborted;
                    return Err(e.into());
                }
            };

            if message.kind == MessageKind::Error {
                self.state = SessionState::Aborted;
                return Err(DialogError::ServerReported {
                    code: message.error_code.unwrap_or_default(),
                    payload: message.payload,
                });
            }
            if message.kind == MessageKind::FullServer && message.event == Some(expected) {
                return Ok(message);
            }
            if expected == events::CONNECTION_FINISHED && belongs_to_session(&message) {
                if let Some(event) = message.event.filter(|e| events::ends_session(*e)) {
                    self.server_finished = true;
                    log::debug!("Session end event {} arrived during close", event);
                } else {
                    log::debug!("Skipping late {} frame during close", message.kind);
                }
                continue;
            }

            let detail = format!(
                "got {} event {:?}: {}",
                message.kind,
                message.event,
                String::from_utf8_lossy(&message.payload)
            );
            return Err(self.violation(action, expected, detail));
        }
    }

    fn violation(&mut self, action: &'static str, expected: i32, detail: String) -> DialogError {
        self.state = SessionState::Aborted;
        log::error!("❌ {} failed: {}", action, detail);
        DialogError::ProtocolViolation {
            action,
            expected,
            detail,
        }
    }
}

fn belongs_to_session(message: &Message) -> bool {
    match message.kind {
        MessageKind::AudioOnlyServer => true,
        MessageKind::FullServer | MessageKind::FrontEndResult => {
            message.event.map_or(false, |e| !events::is_reserved(e))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolConfig;
    use crate::transport::ChannelTransport;

    fn codec() -> FrameCodec {
        FrameCodec::new(ProtocolConfig::default()).unwrap()
    }

    fn server_event(event: i32) -> Message {
        let message = Message::new(MessageKind::FullServer, MessageFlags::WITH_EVENT)
            .with_event(event)
            .with_payload(EMPTY_OBJECT);
        if events::carries_connect_id(event) {
            message.with_connect_id("conn-1")
        } else if events::is_reserved(event) {
            message
        } else {
            message.with_session_id("s1")
        }
    }

    async fn reply(server: &mut ChannelTransport, message: Message) {
        server.send(codec().encode(&message).unwrap()).await.unwrap();
    }

    async fn next_event(server: &mut ChannelTransport) -> Option<i32> {
        let bytes = server.receive().await.unwrap().unwrap();
        codec().decode(&bytes).unwrap().event
    }

    async fn active_session() -> (DialogSession<ChannelTransport>, ChannelTransport) {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1");
        reply(&mut server, server_event(events::CONNECTION_STARTED)).await;
        reply(&mut server, server_event(events::SESSION_STARTED)).await;
        session.open_connection().await.unwrap();
        session.open_session(EMPTY_OBJECT.to_vec()).await.unwrap();
        assert_eq!(next_event(&mut server).await, Some(events::START_CONNECTION));
        assert_eq!(next_event(&mut server).await, Some(events::START_SESSION));
        (session, server)
    }

    #[tokio::test]
    async fn test_handshake_reaches_active() {
        let (session, _server) = active_session().await;
        assert_eq!(session.state(), SessionState::SessionActive);
        assert_eq!(session.connect_id(), Some("conn-1"));
    }

    #[tokio::test]
    async fn test_connection_failed_is_violation() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1");
        reply(&mut server, server_event(events::CONNECTION_FAILED)).await;

        match session.open_connection().await {
            Err(DialogError::ProtocolViolation { expected, .. }) => {
                assert_eq!(expected, events::CONNECTION_STARTED)
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test]
    async fn test_session_failed_reply_is_violation() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1");
        reply(&mut server, server_event(events::CONNECTION_STARTED)).await;
        reply(&mut server, server_event(events::SESSION_FAILED)).await;
        session.open_connection().await.unwrap();

        match session.open_session(EMPTY_OBJECT.to_vec()).await {
            Err(DialogError::ProtocolViolation {
                action, expected, ..
            }) => {
                assert_eq!(action, "open session");
                assert_eq!(expected, events::SESSION_STARTED);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test]
    async fn test_close_connection_wrong_reply_is_violation() {
        let (mut session, mut server) = active_session().await;
        session.close_session().await.unwrap();
        reply(&mut server, server_event(events::CONNECTION_FAILED)).await;

        match session.close_connection().await {
            Err(DialogError::ProtocolViolation {
                action, expected, ..
            }) => {
                assert_eq!(action, "close connection");
                assert_eq!(expected, events::CONNECTION_FINISHED);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(next_event(&mut server).await, Some(events::FINISH_SESSION));
        assert_eq!(next_event(&mut server).await, Some(events::FINISH_CONNECTION));
    }

    #[tokio::test]
    async fn test_aborted_connection_sends_nothing_on_close() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1");
        reply(&mut server, server_event(events::CONNECTION_FAILED)).await;
        assert!(session.open_connection().await.is_err());
        assert_eq!(session.state(), SessionState::Aborted);

        session.close_connection().await.unwrap();
        session.close_session().await.unwrap();
        assert_eq!(session.state(), SessionState::Aborted);

        drop(session);
        assert_eq!(next_event(&mut server).await, Some(events::START_CONNECTION));
        assert_eq!(server.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (client, _server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1")
            .with_response_timeout(Duration::from_millis(20));
        assert!(matches!(
            session.open_connection().await,
            Err(DialogError::ProtocolViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_during_handshake() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1");
        let error = Message::new(MessageKind::Error, MessageFlags::NO_SEQ)
            .with_error_code(45000000)
            .with_payload(b"denied".to_vec());
        reply(&mut server, error).await;

        match session.open_connection().await {
            Err(DialogError::ServerReported { code, payload }) => {
                assert_eq!(code, 45000000);
                assert_eq!(payload, b"denied".to_vec());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_session_requires_connection() {
        let (client, _server) = ChannelTransport::pair();
        let mut session = DialogSession::new(client, codec(), "s1");
        assert!(matches!(
            session.open_session(EMPTY_OBJECT.to_vec()).await,
            Err(DialogError::InvalidState {
                state: SessionState::Idle,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_inbound_classification() {
        let (mut session, _server) = active_session().await;

        let audio = Message::new(MessageKind::AudioOnlyServer, MessageFlags::WITH_EVENT)
            .with_event(352)
            .with_session_id("s1")
            .with_payload(vec![1, 2, 3, 4]);
        assert_eq!(
            session.handle_inbound(audio).unwrap(),
            Inbound::Audio(vec![1, 2, 3, 4])
        );
        assert_eq!(
            session.handle_inbound(server_event(events::ASR_INFO)).unwrap(),
            Inbound::ClearAudio
        );
        assert_eq!(
            session.handle_inbound(server_event(550)).unwrap(),
            Inbound::Event {
                event: Some(550),
                payload: EMPTY_OBJECT.to_vec()
            }
        );
        assert_eq!(
            session
                .handle_inbound(server_event(events::SESSION_FINISHED))
                .unwrap(),
            Inbound::SessionEnded {
                event: events::SESSION_FINISHED
            }
        );
        assert_eq!(session.state(), SessionState::SessionFinishing);
        assert!(session.server_finished());
    }

    #[tokio::test]
    async fn test_client_kind_from_server_rejected() {
        let (mut session, _server) = active_session().await;
        let bogus = Message::new(MessageKind::FullClient, MessageFlags::NO_SEQ);
        let err = session.handle_inbound(bogus).unwrap_err();
        assert!(err.is_fatal_to_connection());
    }

    #[tokio::test]
    async fn test_audio_dropped_outside_active_phase() {
        let (mut session, mut server) = active_session().await;
        assert!(session.send_audio_frame(vec![0xAA]).await.unwrap());
        assert_eq!(server.receive().await.unwrap(), Some(vec![0xAA]));

        session.close_session().await.unwrap();
        assert!(!session.send_audio_frame(vec![0xBB]).await.unwrap());
        assert_eq!(next_event(&mut server).await, Some(events::FINISH_SESSION));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_either_order() {
        let (mut session, mut server) = active_session().await;

        // Server ends the session before the client asks to.
        session
            .handle_inbound(server_event(events::SESSION_FINISHED))
            .unwrap();
        session.close_session().await.unwrap();

        reply(&mut server, server_event(events::CONNECTION_FINISHED)).await;
        session.close_connection().await.unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(next_event(&mut server).await, Some(events::FINISH_CONNECTION));

        session.close_connection().await.unwrap();
        session.close_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_connection_skips_late_session_frames() {
        let (mut session, mut server) = active_session().await;
        session.close_session().await.unwrap();

        let audio = Message::new(MessageKind::AudioOnlyServer, MessageFlags::WITH_EVENT)
            .with_event(352)
            .with_session_id("s1")
            .with_payload(vec![0; 8]);
        reply(&mut server, audio).await;
        reply(&mut server, server_event(events::SESSION_FINISHED)).await;
        reply(&mut server, server_event(events::CONNECTION_FINISHED)).await;

        session.close_connection().await.unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(session.server_finished());
    }

    #[tokio::test]
    async fn test_close_connection_closes_active_session_first() {
        let (mut session, mut server) = active_session().await;
        reply(&mut server, server_event(events::CONNECTION_FINISHED)).await;
        session.close_connection().await.unwrap();

        assert_eq!(next_event(&mut server).await, Some(events::FINISH_SESSION));
        assert_eq!(next_event(&mut server).await, Some(events::FINISH_CONNECTION));
    }

    #[tokio::test]
    async fn test_send_event_carries_session_id() {
        let (mut session, mut server) = active_session().await;
        session
            .send_event(events::SAY_HELLO, br#"{"content":"hi"}"#.to_vec())
            .await
            .unwrap();

        let bytes = server.receive().await.unwrap().unwrap();
        let message = codec().decode(&bytes).unwrap();
        assert_eq!(message.event, Some(events::SAY_HELLO));
        assert_eq!(message.session_id.as_deref(), Some("s1"));
    }
}
