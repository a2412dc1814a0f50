use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use anyhow::{Context, Result};
use realtime_dialog::audio::{
    AudioRingBuffer, CaptureSink, CaptureStream, CaptureStreamer, PlaybackSource, PlaybackStream,
};
use realtime_dialog::config::{
    load_config, DialogConfig, InputAudioConfig, OutputAudioConfig, OutputSampleFormat,
    DEFAULT_ENDPOINT,
};
use realtime_dialog::payload::{self, SayHelloPayload, StartSessionPayload};
use realtime_dialog::protocol::{events, Compression, FrameCodec, ProtocolConfig};
use realtime_dialog::transport::WebSocketTransport;
use realtime_dialog::{DialogClient, DialogSession, Outbound};

const OUTBOUND_QUEUE: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Dialogue service WebSocket endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Name the bot introduces itself with
    #[arg(long, default_value = "豆包")]
    bot_name: String,

    /// Have the bot greet the user with this text once the session starts
    #[arg(long)]
    greeting: Option<String>,

    /// Sample format requested for synthesised speech
    #[arg(long, value_enum, default_value_t = OutputSampleFormat::F32)]
    output_format: OutputSampleFormat,

    /// Capture device name (default device if omitted)
    #[arg(long)]
    input_device: Option<String>,

    /// Playback device name (default device if omitted)
    #[arg(long)]
    output_device: Option<String>,

    /// Seconds of speech the playback buffer holds before dropping the oldest
    #[arg(long, default_value_t = 100)]
    max_buffered_secs: u64,

    /// Seconds to wait for each handshake reply
    #[arg(long, default_value_t = 10)]
    response_timeout_secs: u64,

    /// Gzip control-frame payloads
    #[arg(long)]
    gzip: bool,
}

impl Args {
    fn configs(&self) -> Result<(InputAudioConfig, OutputAudioConfig, DialogConfig)> {
        let input = InputAudioConfig {
            device: self.input_device.clone(),
            ..Default::default()
        };
        let output = OutputAudioConfig {
            format: self.output_format,
            max_buffered: Duration::from_secs(self.max_buffered_secs),
            device: self.output_device.clone(),
            ..Default::default()
        };
        let dialog = DialogConfig {
            endpoint: self.endpoint.clone(),
            bot_name: self.bot_name.clone(),
            greeting: self.greeting.clone(),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            ..Default::default()
        };

        input.validate().context("Invalid capture settings")?;
        output.validate().context("Invalid playback settings")?;
        dialog.validate().context("Invalid dialogue settings")?;
        Ok((input, output, dialog))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("🚀 Starting realtime dialogue with args: {:?}", args);

    let api = load_config().context("Failed to load configuration")?;
    let (input, output, dialog) = args.configs()?;

    let connect_id = Uuid::new_v4().to_string();
    let session_id = Uuid::new_v4().to_string();
    let transport =
        WebSocketTransport::connect(&dialog.endpoint, &api.connection_headers(&connect_id))
            .await
            .context("Failed to connect to dialogue service")?;

    let mut protocol = ProtocolConfig::default();
    if args.gzip {
        protocol = protocol.with_compression(Compression::Gzip);
    }
    let codec = FrameCodec::new(protocol).context("Invalid protocol settings")?;
    let session = DialogSession::new(transport, codec.clone(), session_id.as_str())
        .with_response_timeout(dialog.response_timeout);

    let ring = Arc::new(AudioRingBuffer::new(output.ring_capacity()));
    let mut client = DialogClient::new(session, Arc::clone(&ring))
        .with_output_format(output.format)
        .with_drain_timeout(dialog.drain_timeout);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, finishing session...");
            ctrl_c_cancel.cancel();
        }
    });

    let mut playback = PlaybackStream::start(&output, PlaybackSource::new(Arc::clone(&ring)))
        .context("Failed to start playback")?;

    let (block_tx, block_rx) = mpsc::channel(input.queue_blocks);
    let mut capture = CaptureStream::start(
        &input,
        CaptureSink::new(input.block_frames as usize, block_tx),
    )
    .context("Failed to start capture")?;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    if let Some(greeting) = &dialog.greeting {
        let hello = payload::to_bytes(&SayHelloPayload {
            content: greeting.clone(),
        })?;
        outbound_tx
            .send(Outbound::Event {
                event: events::SAY_HELLO,
                payload: hello,
            })
            .await
            .context("Outbound queue closed")?;
    }

    let streamer = CaptureStreamer::new(&codec, session_id.as_str(), block_rx, outbound_tx)?;
    let streamer_handle = tokio::spawn(streamer.run(cancel.clone()));

    println!("🎧 Talk to {} (Ctrl+C to finish)", dialog.bot_name);

    let start_payload = payload::to_bytes(&StartSessionPayload::new(&dialog, &output))?;
    let result = client.run(start_payload, outbound_rx, cancel.clone()).await;

    let user_stopped = cancel.is_cancelled();
    cancel.cancel();
    capture.stop();
    match streamer_handle.await {
        Ok(frames) => log::info!("🎤 Capture sent {} frames", frames),
        Err(e) => log::error!("Capture task failed: {}", e),
    }

    // Let queued speech finish unless the user asked to stop.
    while result.is_ok() && !user_stopped && !ring.is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    playback.stop();

    let summary = result.context("Dialogue failed")?;
    println!(
        "👋 Session ended ({:?}): {} frames received, {} audio frames sent, {} samples dropped",
        summary.ended_by,
        summary.frames_received,
        summary.audio_frames_sent,
        summary.samples_discarded
    );
    Ok(())
}
