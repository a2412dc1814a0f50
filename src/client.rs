use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::{pcm, AudioRingBuffer};
use crate::config::OutputSampleFormat;
use crate::error::Result;
use crate::session::{DialogSession, Inbound};
use crate::transport::{Transport, TransportError};

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the capture side to queue its close-session after
/// cancellation before closing the session from here.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Requests from the capture context and the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// An encoded audio-only frame.
    Audio(Vec<u8>),
    /// A session-scoped control event with its payload.
    Event { event: i32, payload: Vec<u8> },
    CloseSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server finished the session on its own (152 or 153).
    Server { event: i32 },
    /// The client asked to finish and the server confirmed.
    Client,
    /// The client asked to finish and the server never confirmed.
    DrainTimeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub ended_by: SessionEnd,
    pub frames_received: usize,
    pub audio_frames_sent: usize,
    pub samples_buffered: usize,
    pub samples_discarded: usize,
}

#[derive(Default)]
struct Counters {
    frames_received: usize,
    audio_frames_sent: usize,
    samples_buffered: usize,
    samples_discarded: usize,
}

impl Counters {
    fn finish(self, ended_by: SessionEnd) -> SessionSummary {
        SessionSummary {
            ended_by,
            frames_received: self.frames_received,
            audio_frames_sent: self.audio_frames_sent,
            samples_buffered: self.samples_buffered,
            samples_discarded: self.samples_discarded,
        }
    }
}

/// Runs one dialogue: handshake, the receive loop, and the closing exchange.
pub struct DialogClient<T: Transport> {
    session: DialogSession<T>,
    ring: Arc<AudioRingBuffer>,
    output_format: OutputSampleFormat,
    drain_timeout: Duration,
}

impl<T: Transport> DialogClient<T> {
    pub fn new(session: DialogSession<T>, ring: Arc<AudioRingBuffer>) -> Self {
        Self {
            session,
            ring,
            output_format: OutputSampleFormat::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_output_format(mut self, format: OutputSampleFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn session(&self) -> &DialogSession<T> {
        &self.session
    }

    pub fn ring(&self) -> &Arc<AudioRingBuffer> {
        &self.ring
    }

    /// Drive the dialogue to completion.
    ///
    /// On failure the connection is torn down (best effort) before the error
    /// is returned; the transport is closed in every case.
    pub async fn run(
        &mut self,
        start_payload: Vec<u8>,
        mut outbound: mpsc::Receiver<Outbound>,
        cancel: CancellationToken,
    ) -> Result<SessionSummary> {
        let result = self.run_dialog(start_payload, &mut outbound, &cancel).await;
        match &result {
            Ok(summary) => {
                log::info!("✅ Dialogue ended: {:?}", summary.ended_by);
                self.session.close_transport().await;
            }
            Err(e) if e.is_fatal_to_connection() => {
                log::error!("❌ Dropping connection: {}", e);
                self.session.close_transport().await;
            }
            Err(e) => {
                log::error!("❌ Dialogue failed: {}", e);
                self.session.teardown().await;
            }
        }
        result
    }

    async fn run_dialog(
        &mut self,
        start_payload: Vec<u8>,
        outbound: &mut mpsc::Receiver<Outbound>,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary> {
        self.session.open_connection().await?;
        self.session.open_session(start_payload).await?;

        let mut counters = Counters::default();
        let mut outbound_open = true;
        let mut cancel_seen = false;
        let mut cancel_deadline: Option<Instant> = None;
        let mut drain_deadline: Option<Instant> = None;

        let ended_by = loop {
            let closing = drain_deadline.is_some();
            let drain_at = drain_deadline.unwrap_or_else(Instant::now);
            let grace_at = cancel_deadline.unwrap_or_else(Instant::now);

            // Outbound first so a burst of server speech cannot hold back capture frames.
            tokio::select! {
                biased;

                command = outbound.recv(), if outbound_open && !closing => match command {
                    Some(Outbound::Audio(frame)) => {
                        if self.session.send_audio_frame(frame).await? {
                            counters.audio_frames_sent += 1;
                        }
                    }
                    Some(Outbound::Event { event, payload }) => {
                        self.session.send_event(event, payload).await?;
                    }
                    Some(Outbound::CloseSession) => {
                        drain_deadline = Some(self.begin_close().await?);
                    }
                    None => {
                        log::debug!("Outbound queue closed");
                        outbound_open = false;
                        drain_deadline = Some(self.begin_close().await?);
                    }
                },

                message = self.session.receive_message() => {
                    let message = match message? {
                        Some(message) => message,
                        None => {
                            log::error!("🔌 Connection lost while {}", self.session.state());
                            return Err(TransportError::ConnectionLost.into());
                        }
                    };
                    counters.frames_received += 1;

                    match self.session.handle_inbound(message)? {
                        Inbound::Audio(payload) => self.buffer_audio(&payload, &mut counters),
                        Inbound::ClearAudio => {
                            let dropped = self.ring.len();
                            self.ring.clear();
                            log::info!("🗣️ User speaking, cleared {} pending samples", dropped);
                        }
                        Inbound::SessionEnded { event } => {
                            break if closing { SessionEnd::Client } else { SessionEnd::Server { event } };
                        }
                        Inbound::Event { event, payload } => {
                            log::info!("💬 Event {:?}: {}", event, String::from_utf8_lossy(&payload));
                        }
                    }
                }

                _ = cancel.cancelled(), if !cancel_seen && !closing => {
                    cancel_seen = true;
                    if outbound_open {
                        log::info!("🛑 Cancelled, waiting for capture to finish");
                        cancel_deadline = Some(Instant::now() + CANCEL_GRACE);
                    } else {
                        drain_deadline = Some(self.begin_close().await?);
                    }
                }

                _ = tokio::time::sleep_until(grace_at), if cancel_deadline.is_some() && !closing => {
                    log::debug!("Capture did not close the session in time");
                    drain_deadline = Some(self.begin_close().await?);
                }

                _ = tokio::time::sleep_until(drain_at), if closing => {
                    log::warn!("⚠️ No session-finished event within {:?}", self.drain_timeout);
                    break SessionEnd::DrainTimeout;
                }
            }
        };

        self.session.close_connection().await?;
        Ok(counters.finish(ended_by))
    }

    async fn begin_close(&mut self) -> Result<Instant> {
        self.session.close_session().await?;
        Ok(Instant::now() + self.drain_timeout)
    }

    fn buffer_audio(&self, payload: &[u8], counters: &mut Counters) {
        let samples = match self.output_format {
            OutputSampleFormat::F32 => pcm::f32le_to_samples(payload),
            OutputSampleFormat::S16 => pcm::s16le_to_f32(payload),
        };
        let discarded = self.ring.push(&samples);
        counters.samples_buffered += samples.len();
        if discarded > 0 {
            counters.samples_discarded += discarded;
            log::warn!("⚠️ Playback buffer full, discarded {} oldest samples", discarded);
        }
        log::trace!("🔊 Buffered {} samples ({} queued)", samples.len(), self.ring.len());
    }
}
