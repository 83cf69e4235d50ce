//! CPAL driver adapter
//!
//! ```text
//! ┌──────────────────┐  write_output()  ┌─────────────────────┐  pop()  ┌─────────────────┐
//! │  Render Thread   │─────────────────►│  Output Ring (SPSC) │────────►│  CPAL Callback  │
//! │ (owns AudioEngine│                  │   (rtrb, f32)       │         │ (device thread) │
//! └──────────────────┘                  └─────────────────────┘         └─────────────────┘
//! ```
//!
//! cpal streams are not `Send`, so they are built and kept alive on a
//! small helper thread. `open` waits for that thread to report whether the
//! streams started. The render thread blocks in `write_output` only until
//! the ring has room for the cycle, which paces rendering to the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, SampleRate, Stream, StreamConfig};

use super::driver::{AudioDriver, DriverConfig};
use super::error::{DriverError, DriverResult};
use crate::types::Sample;

/// Cycles of output buffered between render thread and device
const RING_CYCLES: usize = 4;

/// Longest `write_output` waits for the device before dropping a cycle
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// System audio device
pub struct CpalDriver {
    output: rtrb::Producer<Sample>,
    input: Option<rtrb::Consumer<Sample>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalDriver {
    /// Open the default devices and start their streams
    pub fn open(config: &DriverConfig) -> DriverResult<Self> {
        let ring_size = config.buffer_size.max(64) * config.output_channels.max(1) * RING_CYCLES;
        let (output, output_consumer) = rtrb::RingBuffer::<Sample>::new(ring_size);
        let (input, input_consumer) = if config.input_channels > 0 {
            let (producer, consumer) =
                rtrb::RingBuffer::<Sample>::new(config.buffer_size.max(64) * config.input_channels * RING_CYCLES);
            (Some(producer), Some(consumer))
        } else {
            (None, None)
        };

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = crossbeam::channel::bounded::<DriverResult<()>>(1);
        let config = *config;
        let thread_running = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("cadence-cpal".to_string())
            .spawn(move || {
                let streams = match build_streams(&config, output_consumer, input) {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while thread_running.load(Ordering::Acquire) {
                    std::thread::park_timeout(Duration::from_millis(50));
                }
                drop(streams);
                log::info!("CPAL streams closed");
            })
            .map_err(|e| DriverError::DeviceOpen(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self {
                output,
                input: input_consumer,
                running,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::Release);
                Err(DriverError::DeviceOpen("device did not respond".to_string()))
            }
        }
    }
}

fn build_streams(
    config: &DriverConfig,
    mut ring: rtrb::Consumer<Sample>,
    input: Option<rtrb::Producer<Sample>>,
) -> DriverResult<Vec<Stream>> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DriverError::NoDevices)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = device
        .default_output_config()
        .map_err(|e| DriverError::DeviceOpen(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(DriverError::UnsupportedFormat(format!("{:?}", supported.sample_format())));
    }

    let device_channels = supported.channels() as usize;
    let channels = config.output_channels.max(1);
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: CpalBufferSize::Fixed(config.buffer_size as u32),
    };

    let output = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(device_channels) {
                    for (c, sample) in frame.iter_mut().enumerate() {
                        *sample = if c < channels { ring.pop().unwrap_or(0.0) } else { 0.0 };
                    }
                    // engine channels the device does not have
                    for _ in device_channels..channels {
                        let _ = ring.pop();
                    }
                }
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DriverError::StreamBuild(e.to_string()))?;
    output.play().map_err(|e| DriverError::StreamPlay(e.to_string()))?;

    let mut streams = vec![output];

    if let Some(mut producer) = input {
        let input_device = host.default_input_device().ok_or(DriverError::NoDevices)?;
        let input_config = StreamConfig {
            channels: config.input_channels as u16,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: CpalBufferSize::Fixed(config.buffer_size as u32),
        };
        let stream = input_device
            .build_input_stream(
                &input_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        if producer.push(sample).is_err() {
                            break;
                        }
                    }
                },
                move |err| {
                    log::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DriverError::StreamBuild(e.to_string()))?;
        stream.play().map_err(|e| DriverError::StreamPlay(e.to_string()))?;
        streams.push(stream);
    }

    log::info!(
        "CPAL streams started: {} Hz, {} frames, {} channels",
        config.sample_rate,
        config.buffer_size,
        channels
    );
    Ok(streams)
}

impl AudioDriver for CpalDriver {
    fn write_output(&mut self, interleaved: &[Sample], _frames: usize) {
        let deadline = Instant::now() + WRITE_TIMEOUT;
        while self.output.slots() < interleaved.len() {
            if Instant::now() >= deadline {
                log::warn!("CPAL device stalled, dropping {} samples", interleaved.len());
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        for &sample in interleaved {
            if self.output.push(sample).is_err() {
                break;
            }
        }
    }

    fn read_input(&mut self, interleaved: &mut [Sample], frames: usize) -> usize {
        interleaved.fill(0.0);
        let Some(input) = self.input.as_mut() else {
            return 0;
        };
        let mut read = 0;
        for sample in interleaved.iter_mut() {
            match input.pop() {
                Ok(value) => {
                    *sample = value;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        let channels = (interleaved.len() / frames.max(1)).max(1);
        read / channels
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("CPAL stream thread panicked");
            }
        }
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.close();
    }
}
