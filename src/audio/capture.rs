use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::{pcm, AudioError};
use crate::client::Outbound;
use crate::protocol::{
    events, FrameCodec, Message, MessageFlags, MessageKind, ProtocolError, Serialization,
};

/// Device-facing end of the capture path.
///
/// Lives inside the capture device callback. Incoming samples are re-chunked
/// to `block_samples` and handed off with `try_send`, so the callback never
/// waits on the network.
pub struct CaptureSink {
    block_samples: usize,
    pending: Vec<i16>,
    blocks: mpsc::Sender<Vec<u8>>,
    dropped_blocks: usize,
}

impl CaptureSink {
    pub fn new(block_samples: usize, blocks: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            block_samples: block_samples.max(1),
            pending: Vec::with_capacity(block_samples.max(1)),
            blocks,
            dropped_blocks: 0,
        }
    }

    /// Accept a little-endian 16-bit PCM block as delivered by the device.
    pub fn accept_pcm(&mut self, block: &[u8]) -> Result<usize, AudioError> {
        let samples = pcm::le_bytes_to_i16(block)?;
        self.accept_samples(&samples)
    }

    /// Accept samples and queue every complete block. Returns how many blocks were queued.
    pub fn accept_samples(&mut self, mut samples: &[i16]) -> Result<usize, AudioError> {
        let mut queued = 0;
        while !samples.is_empty() {
            let take = (self.block_samples - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_samples {
                let block = pcm::i16_to_le_bytes(&self.pending);
                self.pending.clear();
                match self.blocks.try_send(block) {
                    Ok(()) => queued += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped_blocks += 1;
                        log::warn!(
                            "⚠️ Capture queue full, dropped block ({} dropped so far)",
                            self.dropped_blocks
                        );
                    }
                    Err(TrySendError::Closed(_)) => return Err(AudioError::QueueClosed),
                }
            }
        }
        Ok(queued)
    }

    pub fn dropped_blocks(&self) -> usize {
        self.dropped_blocks
    }
}

/// The capture context: turns PCM blocks into audio frames for the session.
pub struct CaptureStreamer {
    codec: FrameCodec,
    session_id: String,
    blocks: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Outbound>,
}

impl CaptureStreamer {
    /// `codec` supplies the sequence policy and header settings; audio frames
    /// are always sent with raw serialization.
    pub fn new(
        codec: &FrameCodec,
        session_id: impl Into<String>,
        blocks: mpsc::Receiver<Vec<u8>>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<Self, ProtocolError> {
        let config = codec.config().with_serialization(Serialization::Raw);
        Ok(Self {
            codec: codec.with_config(config)?,
            session_id: session_id.into(),
            blocks,
            outbound,
        })
    }

    fn encode_block(&self, pcm: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        let message = Message::new(MessageKind::AudioOnlyClient, MessageFlags::WITH_EVENT)
            .with_event(events::TASK_REQUEST)
            .with_session_id(self.session_id.as_str())
            .with_payload(pcm);
        self.codec.encode(&message)
    }

    /// Forward blocks until cancelled or the device goes away, then queue a
    /// close-session request. A block already in hand is always sent first.
    ///
    /// Returns the number of audio frames queued.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut sent = 0usize;
        log::info!("🎤 Capture streaming started for session {}", self.session_id);

        loop {
            let block = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("🛑 Capture cancelled after {} frames", sent);
                    break;
                }
                block = self.blocks.recv() => match block {
                    Some(block) => block,
                    None => {
                        log::info!("🔇 Capture device closed after {} frames", sent);
                        break;
                    }
                },
            };

            let frame = match self.encode_block(block) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("⚠️ Skipping capture block: {}", e);
                    continue;
                }
            };
            if self.outbound.send(Outbound::Audio(frame)).await.is_err() {
                log::debug!("Outbound queue closed, stopping capture");
                return sent;
            }
            sent += 1;
            log::trace!("📤 Queued audio frame {}", sent);
        }

        if self.outbound.send(Outbound::CloseSession).await.is_err() {
            log::debug!("Outbound queue closed before close-session could be queued");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolConfig;

    #[test]
    fn test_sink_rechunks_to_block_size() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = CaptureSink::new(4, tx);

        assert_eq!(sink.accept_samples(&[1, 2, 3]).unwrap(), 0);
        assert_eq!(sink.accept_samples(&[4, 5, 6, 7, 8, 9]).unwrap(), 2);

        let first = rx.try_recv().unwrap();
        assert_eq!(pcm::le_bytes_to_i16(&first).unwrap(), vec![1, 2, 3, 4]);
        let second = rx.try_recv().unwrap();
        assert_eq!(pcm::le_bytes_to_i16(&second).unwrap(), vec![5, 6, 7, 8]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_drops_when_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = CaptureSink::new(2, tx);
        assert_eq!(sink.accept_pcm(&[1, 0, 2, 0, 3, 0, 4, 0]).unwrap(), 1);
        assert_eq!(sink.dropped_blocks(), 1);
    }

    #[test]
    fn test_sink_reports_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = CaptureSink::new(1, tx);
        assert!(matches!(
            sink.accept_samples(&[1]),
            Err(AudioError::QueueClosed)
        ));
    }

    #[test]
    fn test_sink_rejects_odd_pcm() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = CaptureSink::new(2, tx);
        assert!(sink.accept_pcm(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn test_streamer_sends_close_session_on_cancel() {
        let codec = FrameCodec::new(ProtocolConfig::default()).unwrap();
        let (block_tx, block_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let streamer = CaptureStreamer::new(&codec, "s1", block_rx, out_tx).unwrap();

        block_tx.send(pcm::i16_to_le_bytes(&[7, 8])).await.unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(streamer.run(cancel.clone()));

        let frame = match out_rx.recv().await.unwrap() {
            Outbound::Audio(frame) => frame,
            other => panic!("expected audio, got {:?}", other),
        };
        let message = codec.decode(&frame).unwrap();
        assert_eq!(message.kind, MessageKind::AudioOnlyClient);
        assert_eq!(message.event, Some(events::TASK_REQUEST));
        assert_eq!(message.session_id.as_deref(), Some("s1"));
        assert_eq!(message.payload, vec![7, 0, 8, 0]);
        assert_eq!(frame[2] >> 4, Serialization::Raw.code());

        cancel.cancel();
        assert_eq!(out_rx.recv().await, Some(Outbound::CloseSession));
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_streamer_closes_session_when_device_stops() {
        let codec = FrameCodec::new(ProtocolConfig::default()).unwrap();
        let (block_tx, block_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let streamer = CaptureStreamer::new(&codec, "s1", block_rx, out_tx).unwrap();
        drop(block_tx);

        assert_eq!(streamer.run(CancellationToken::new()).await, 0);
        assert_eq!(out_rx.recv().await, Some(Outbound::CloseSession));
        assert_eq!(out_rx.recv().await, None);
    }
}
