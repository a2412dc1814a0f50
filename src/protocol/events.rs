//! Event codes carried in the optional event field.

// Connection lifecycle (no session ID on the wire)
pub const START_CONNECTION: i32 = 1;
pub const FINISH_CONNECTION: i32 = 2;
pub const CONNECTION_STARTED: i32 = 50;
pub const CONNECTION_FAILED: i32 = 51;
pub const CONNECTION_FINISHED: i32 = 52;

// Session lifecycle
pub const START_SESSION: i32 = 100;
pub const FINISH_SESSION: i32 = 102;
pub const SESSION_STARTED: i32 = 150;
pub const SESSION_FINISHED: i32 = 152;
pub const SESSION_FAILED: i32 = 153;

// Dialogue traffic
pub const TASK_REQUEST: i32 = 200;
pub const SAY_HELLO: i32 = 300;
/// Server detected the user speaking; anything still queued for playback is stale.
pub const ASR_INFO: i32 = 450;
pub const CHAT_TTS_TEXT: i32 = 500;

/// Reserved codes suppress the session ID field.
pub const fn is_reserved(event: i32) -> bool {
    matches!(
        event,
        START_CONNECTION
            | FINISH_CONNECTION
            | CONNECTION_STARTED
            | CONNECTION_FAILED
            | CONNECTION_FINISHED
    )
}

/// Server-side connection events carry a connect ID instead of a session ID.
pub const fn carries_connect_id(event: i32) -> bool {
    matches!(
        event,
        CONNECTION_STARTED | CONNECTION_FAILED | CONNECTION_FINISHED
    )
}

/// Events that end the active session from the server side.
pub const fn ends_session(event: i32) -> bool {
    matches!(event, SESSION_FINISHED | SESSION_FAILED)
}
