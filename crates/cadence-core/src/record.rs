//! Output recording
//!
//! ```text
//! ┌──────────────────┐ append_buffer() ┌─────────────────────┐ drain  ┌──────────────────┐
//! │  Render Thread   │────────────────►│  Sample Ring (SPSC) │───────►│  Writer Thread   │──► WAV
//! │  (never blocks)  │                 │    (rtrb, f32)      │        │ (hound, f32 PCM) │
//! └──────────────────┘                 └─────────────────────┘        └──────────────────┘
//! ```
//!
//! The render thread only copies samples into the ring. If the writer
//! falls behind, samples that do not fit are dropped and counted. Disk
//! failures are reported by notification and through `finish()`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;
use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;

use crate::notify::{Notification, NotificationSink};
use crate::types::Sample;

/// Seconds of audio the ring holds before samples are dropped
const RING_SECONDS: usize = 4;

/// Errors that can occur while writing a recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to write WAV data: {0}")]
    Wav(#[from] hound::Error),

    #[error("Recording I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recording writer thread panicked")]
    WriterPanicked,
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Destination for the rendered output
///
/// `append_buffer` runs on the render thread and must not block;
/// `finish` runs on a control thread.
pub trait RecordingSink: Send {
    /// Queue one cycle of interleaved samples
    fn append_buffer(&mut self, interleaved: &[Sample], frames: usize);

    /// Frames accepted so far
    fn frames(&self) -> u64;

    /// Flush and close; true if a file was successfully produced
    fn finish(&mut self) -> bool;
}

/// `<dir>/cadence-<local timestamp>.wav`
pub fn timestamped_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("cadence-{}.wav", stamp))
}

/// 32-bit float WAV recorder with a background writer thread
pub struct WavRecorder {
    path: PathBuf,
    producer: rtrb::Producer<Sample>,
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<RecordingResult<u64>>>,
    channels: usize,
    frames: u64,
    dropped: u64,
    finished: Option<bool>,
    notifier: Option<Sender<Notification>>,
}

impl WavRecorder {
    /// Create the file and start the writer thread
    ///
    /// The file is created here so that an unwritable path fails right
    /// away instead of in the middle of a recording.
    pub fn create(
        path: impl Into<PathBuf>,
        sample_rate: u32,
        channels: usize,
        notifier: Option<Sender<Notification>>,
    ) -> RecordingResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec)?;

        let (producer, consumer) = rtrb::RingBuffer::<Sample>::new(sample_rate as usize * channels * RING_SECONDS);
        let done = Arc::new(AtomicBool::new(false));
        let recording = RecordingWriter {
            consumer,
            writer,
            done: Arc::clone(&done),
            channels,
            notifier: notifier.clone(),
        };
        let thread = std::thread::Builder::new()
            .name("cadence-recorder".to_string())
            .spawn(move || recording.run())?;

        log::info!("Recording to {:?} ({} Hz, {} channels)", path, sample_rate, channels);
        Ok(Self {
            path,
            producer,
            done,
            thread: Some(thread),
            channels,
            frames: 0,
            dropped: 0,
            finished: None,
            notifier,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples lost because the writer fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }
}

impl RecordingSink for WavRecorder {
    fn append_buffer(&mut self, interleaved: &[Sample], frames: usize) {
        if self.finished.is_some() {
            return;
        }
        let wanted = (frames * self.channels).min(interleaved.len());
        // whole frames only, so channels never shift
        let writable = (self.producer.slots().min(wanted) / self.channels) * self.channels;
        if writable > 0 {
            if let Ok(mut chunk) = self.producer.write_chunk(writable) {
                let (first, second) = chunk.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&interleaved[..split]);
                second.copy_from_slice(&interleaved[split..writable]);
                chunk.commit_all();
            }
        }
        self.frames += (writable / self.channels) as u64;
        self.dropped += (wanted - writable) as u64;
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn finish(&mut self) -> bool {
        if let Some(result) = self.finished {
            return result;
        }
        self.done.store(true, Ordering::Release);
        let result = match self.thread.take().map(|thread| thread.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(RecordingError::WriterPanicked),
            None => Ok(0),
        };
        let success = match result {
            Ok(frames) => {
                if self.dropped > 0 {
                    log::warn!("Recording {:?}: {} samples dropped", self.path, self.dropped);
                }
                log::info!("Recording {:?} finished, {} frames", self.path, frames);
                true
            }
            Err(e) => {
                log::error!("Recording {:?} failed: {}", self.path, e);
                if let Some(notifier) = &self.notifier {
                    notifier.notify(Notification::RecordingFailed { reason: e.to_string() });
                }
                false
            }
        };
        self.finished = Some(success);
        success
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if self.finished.is_none() {
            self.finish();
        }
    }
}

/// Writer thread half: drains the ring into the WAV file
struct RecordingWriter {
    consumer: rtrb::Consumer<Sample>,
    writer: WavWriter<std::io::BufWriter<std::fs::File>>,
    done: Arc<AtomicBool>,
    channels: usize,
    notifier: Option<Sender<Notification>>,
}

impl RecordingWriter {
    fn run(mut self) -> RecordingResult<u64> {
        let mut written: u64 = 0;
        let mut failure: Option<RecordingError> = None;

        loop {
            // read the flag before draining so nothing pushed before it is missed
            let done = self.done.load(Ordering::Acquire);
            let available = self.consumer.slots();
            if available > 0 {
                if let Ok(chunk) = self.consumer.read_chunk(available) {
                    if failure.is_none() {
                        let (first, second) = chunk.as_slices();
                        for &sample in first.iter().chain(second) {
                            if let Err(e) = self.writer.write_sample(sample) {
                                self.report(&e.to_string());
                                failure = Some(e.into());
                                break;
                            }
                            written += 1;
                        }
                    }
                    chunk.commit_all();
                }
            } else if done {
                break;
            } else {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        self.writer.finalize()?;
        Ok(written / self.channels.max(1) as u64)
    }

    fn report(&self, reason: &str) {
        log::error!("Recording write failed: {}", reason);
        if let Some(notifier) = &self.notifier {
            notifier.notify(Notification::RecordingFailed {
                reason: reason.to_string(),
            });
        }
    }
}
