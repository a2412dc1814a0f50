pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{DialogClient, Outbound, SessionEnd, SessionSummary};
pub use error::{DialogError, Result};
pub use session::{DialogSession, Inbound, SessionState};
