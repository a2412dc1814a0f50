//! CPAL bindings for the capture and playback devices.
//!
//! Streams are built and kept alive on a dedicated thread each, since a
//! `cpal::Stream` cannot move between threads on every platform. No
//! resampling happens here: the device must accept the configured rate.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig,
    SupportedStreamConfigRange,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use super::{AudioError, CaptureSink, PlaybackSource};
use crate::config::{InputAudioConfig, OutputAudioConfig};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Running stream plus the thread that owns it.
struct StreamThread {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Stream(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stop_flag.load(Ordering::Acquire) {
                    thread::sleep(STOP_POLL_INTERVAL);
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Device(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::Device(format!("{} thread exited early", name))),
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio thread panicked during shutdown");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Output stream pulling from a [`PlaybackSource`].
pub struct PlaybackStream {
    inner: StreamThread,
}

impl PlaybackStream {
    pub fn start(config: &OutputAudioConfig, source: PlaybackSource) -> Result<Self, AudioError> {
        let config = config.clone();
        let inner = StreamThread::spawn("dialog-playback", move || {
            let host = cpal::default_host();
            let device = match &config.device {
                Some(name) => find_device(host.output_devices(), name)?,
                None => host
                    .default_output_device()
                    .ok_or_else(|| AudioError::Device("No output device found".to_string()))?,
            };
            log::info!("🔊 Playback device: {}", device_name(&device));

            let ranges = device
                .supported_output_configs()
                .map_err(|e| AudioError::Device(e.to_string()))?;
            let (stream_config, format) =
                pick_config(ranges, config.sample_rate, config.channels, config.block_frames)?;
            log::info!(
                "🔊 Playback config: {:?}, {} channels @ {} Hz",
                format,
                stream_config.channels,
                stream_config.sample_rate.0
            );

            match format {
                SampleFormat::F32 => build_output::<f32>(&device, &stream_config, source),
                SampleFormat::I16 => build_output::<i16>(&device, &stream_config, source),
                other => Err(AudioError::Config(format!(
                    "Unsupported output format {:?}",
                    other
                ))),
            }
        })?;
        Ok(Self { inner })
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

/// Input stream feeding a [`CaptureSink`].
pub struct CaptureStream {
    inner: StreamThread,
}

impl CaptureStream {
    pub fn start(config: &InputAudioConfig, sink: CaptureSink) -> Result<Self, AudioError> {
        let config = config.clone();
        let inner = StreamThread::spawn("dialog-capture", move || {
            let host = cpal::default_host();
            let device = match &config.device {
                Some(name) => find_device(host.input_devices(), name)?,
                None => host
                    .default_input_device()
                    .ok_or_else(|| AudioError::Device("No input device found".to_string()))?,
            };
            log::info!("🎤 Capture device: {}", device_name(&device));

            let ranges = device
                .supported_input_configs()
                .map_err(|e| AudioError::Device(e.to_string()))?;
            let (stream_config, format) =
                pick_config(ranges, config.sample_rate, config.channels, config.block_frames)?;
            log::info!(
                "🎤 Capture config: {:?}, {} channels @ {} Hz",
                format,
                stream_config.channels,
                stream_config.sample_rate.0
            );

            match format {
                SampleFormat::I16 => build_input::<i16>(&device, &stream_config, sink),
                SampleFormat::F32 => build_input::<f32>(&device, &stream_config, sink),
                other => Err(AudioError::Config(format!(
                    "Unsupported input format {:?}",
                    other
                ))),
            }
        })?;
        Ok(Self { inner })
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown Device".to_string())
}

fn find_device<I>(
    devices: Result<I, cpal::DevicesError>,
    name: &str,
) -> Result<Device, AudioError>
where
    I: Iterator<Item = Device>,
{
    devices
        .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioError::Device(format!("Device '{}' not found", name)))
}

/// Pick a device config at exactly `sample_rate`, preferring i16 then f32.
fn pick_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
    channels: u16,
    block_frames: u32,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let mut best: Option<(SupportedStreamConfigRange, i32)> = None;
    let mut seen = Vec::new();

    for range in ranges {
        seen.push(format!(
            "{:?} {}ch {}-{} Hz",
            range.sample_format(),
            range.channels(),
            range.min_sample_rate().0,
            range.max_sample_rate().0
        ));
        if range.min_sample_rate().0 > sample_rate || range.max_sample_rate().0 < sample_rate {
            continue;
        }
        if range.channels() < channels {
            continue;
        }
        let mut score = match range.sample_format() {
            SampleFormat::I16 => 50,
            SampleFormat::F32 => 40,
            _ => continue,
        };
        if range.channels() == channels {
            score += 10;
        }
        if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
            best = Some((range, score));
        }
    }

    let (range, _) = best.ok_or_else(|| {
        AudioError::Config(format!(
            "No device config supports {} Hz with {} channels. Available:\n  {}",
            sample_rate,
            channels,
            seen.join("\n  ")
        ))
    })?;

    let format = range.sample_format();
    let mut stream_config = range
        .with_sample_rate(cpal::SampleRate(sample_rate))
        .config();
    stream_config.buffer_size = BufferSize::Fixed(block_frames);
    Ok((stream_config, format))
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    source: PlaybackSource,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    let data_callback = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let frames = data.len() / channels;
        if scratch.len() < frames {
            scratch.resize(frames, 0.0);
        }
        source.fill(&mut scratch[..frames]);
        for (frame, &sample) in data.chunks_mut(channels).zip(scratch.iter()) {
            frame.fill(T::from_sample(sample));
        }
    };

    match device.build_output_stream(
        config,
        data_callback.clone(),
        |err| log::error!("Playback stream error: {}", err),
        None,
    ) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            log::warn!("Fixed buffer size rejected ({}), using device default", e);
            let mut fallback = config.clone();
            fallback.buffer_size = BufferSize::Default;
            device
                .build_output_stream(
                    &fallback,
                    data_callback,
                    |err| log::error!("Playback stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Stream(format!("Failed to build output stream: {}", e)))
        }
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    sink: CaptureSink,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    // The sink is shared by the primary attempt and the fallback; only one
    // stream ever ends up running.
    let sink = Arc::new(std::sync::Mutex::new(sink));
    let make_callback = |sink: Arc<std::sync::Mutex<CaptureSink>>| {
        let channels = config.channels as usize;
        let mut scratch: Vec<i16> = Vec::new();
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().step_by(channels).map(|&s| i16::from_sample(s)));
            let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = sink.accept_samples(&scratch) {
                log::warn!("⚠️ Dropping capture block: {}", e);
            }
        }
    };

    match device.build_input_stream(
        config,
        make_callback(Arc::clone(&sink)),
        |err| log::error!("Capture stream error: {}", err),
        None,
    ) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            log::warn!("Fixed buffer size rejected ({}), using device default", e);
            let mut fallback = config.clone();
            fallback.buffer_size = BufferSize::Default;
            device
                .build_input_stream(
                    &fallback,
                    make_callback(sink),
                    |err| log::error!("Capture stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Stream(format!("Failed to build input stream: {}", e)))
        }
    }
}
