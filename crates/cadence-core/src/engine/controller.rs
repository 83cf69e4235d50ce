//! Control-side engine handle
//!
//! [`Engine`] is what a host holds. While stopped it owns the
//! [`AudioEngine`] and applies commands directly; [`Engine::start`] moves
//! the engine onto a dedicated render thread and from then on every change
//! travels through the command queue.
//!
//! ```text
//!            start()                               stop() / bounce end
//!  ┌──────┐ ─────────► ┌─────────────────────────┐ ──────────────────► ┌──────┐
//!  │ Idle │            │ Running (cadence-render)│                     │ Idle │
//!  └──────┘            └─────────────────────────┘                     └──────┘
//!   apply()              CommandSender ─► ring                           apply()
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use super::command::{command_channel, retired_channel, ChainTarget, CommandSender, EngineCommand, Retired};
use super::engine::AudioEngine;
use super::error::{EngineError, EngineResult};
use crate::audio::{open_driver, AudioDriver, DriverConfig, DriverKind};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::effect::Processor;
use crate::event::AudioEvent;
use crate::group::ChannelGroup;
use crate::instrument::Instrument;
use crate::notify::{Notification, NotificationBus};
use crate::record::{RecordingSink, WavRecorder};
use crate::synth::SynthSettings;
use crate::transport::{TimeSignature, Timing, TransportAtomics};
use crate::types::{EventId, GroupId, InstrumentId, ProcessorId};

/// Notifications buffered for the host before new ones are dropped
const NOTIFICATION_CAPACITY: usize = 1024;

/// How long `stop_recording` waits for the render thread to hand back the recorder
const RECORDER_HANDBACK_TIMEOUT: Duration = Duration::from_secs(2);

struct RenderThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<Box<AudioEngine>>,
}

/// Host handle of the render engine
pub struct Engine {
    config: EngineConfig,
    commands: CommandSender,
    retired: rtrb::Consumer<Retired>,
    bus: NotificationBus,
    atomics: Arc<TransportAtomics>,
    /// Present while idle
    engine: Option<Box<AudioEngine>>,
    render: Option<RenderThread>,
    driver_kind: Option<DriverKind>,
    /// Recorders handed back by the render thread, not yet finished
    recorders: Vec<Box<dyn RecordingSink>>,
}

impl Engine {
    /// Build an idle engine for `config`
    pub fn setup(config: EngineConfig) -> Self {
        let config = config.sanitized();
        let bus = NotificationBus::new(NOTIFICATION_CAPACITY);
        let (producer, engine, retired) = build(&config, &bus);
        let atomics = engine.atomics();
        log::info!(
            "Engine set up: {} Hz, {} frames, {} out / {} in",
            config.sample_rate,
            config.buffer_size,
            config.output_channels,
            config.input_channels
        );
        bus.publish(Notification::Registered);
        Self {
            config,
            commands: CommandSender::new(producer),
            retired,
            bus,
            atomics,
            engine: Some(engine),
            render: None,
            driver_kind: None,
            recorders: Vec::new(),
        }
    }

    /// Drop all engine state and start over from the config
    fn rebuild(&mut self) {
        let (producer, engine, retired) = build(&self.config, &self.bus);
        self.commands = CommandSender::new(producer);
        self.retired = retired;
        self.atomics = engine.atomics();
        self.engine = Some(engine);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock-free transport readout
    pub fn atomics(&self) -> Arc<TransportAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Engine state, only while stopped
    pub fn audio_engine(&self) -> Option<&AudioEngine> {
        self.engine.as_deref()
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.bus.subscribe()
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.bus.drain()
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            sample_rate: self.config.sample_rate,
            input_channels: self.config.input_channels,
            output_channels: self.config.output_channels,
            buffer_size: self.config.buffer_size,
        }
    }

    /// Open a driver and start rendering
    ///
    /// If the driver cannot be opened a `HardwareUnavailable` notification
    /// is published and the engine stays idle.
    pub fn start(&mut self, kind: DriverKind) -> EngineResult<()> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        let driver = match open_driver(kind, &self.driver_config()) {
            Ok(driver) => driver,
            Err(e) => {
                log::error!("Failed to open {:?} driver: {}", kind, e);
                self.bus.publish(Notification::HardwareUnavailable);
                return Err(e.into());
            }
        };
        self.start_with_driver(driver)?;
        self.driver_kind = Some(kind);
        Ok(())
    }

    /// Start rendering into an already opened driver
    pub fn start_with_driver(&mut self, driver: Box<dyn AudioDriver>) -> EngineResult<()> {
        // a bounce may have ended the previous thread on its own
        if self.render.as_ref().is_some_and(|r| !r.running.load(Ordering::Acquire)) {
            self.join()?;
        }
        let Some(mut engine) = self.engine.take() else {
            return Err(EngineError::AlreadyRunning);
        };
        engine.set_driver(driver);

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let spawned = std::thread::Builder::new()
            .name("cadence-render".to_string())
            .spawn(move || {
                let frames = engine.context().buffer_size;
                log::info!("Render thread started ({} frames per cycle)", frames);
                while flag.load(Ordering::Acquire) {
                    if !engine.render(frames) {
                        break;
                    }
                }
                flag.store(false, Ordering::Release);
                if let Some(mut driver) = engine.take_driver() {
                    driver.close();
                }
                log::info!("Render thread stopped");
                engine
            });

        match spawned {
            Ok(handle) => {
                self.render = Some(RenderThread { running, handle });
                Ok(())
            }
            Err(e) => {
                // the engine moved into the failed closure
                log::error!("Failed to spawn render thread: {}", e);
                self.rebuild();
                Err(EngineError::ThreadSpawn(e))
            }
        }
    }

    /// True while the render thread is rendering
    pub fn is_running(&self) -> bool {
        self.render.as_ref().is_some_and(|r| r.running.load(Ordering::Acquire))
    }

    /// Stop rendering and take the engine back
    pub fn stop(&mut self) -> EngineResult<()> {
        if let Some(render) = &self.render {
            render.running.store(false, Ordering::Release);
        }
        self.join()
    }

    /// Wait for the render thread to end on its own
    fn join(&mut self) -> EngineResult<()> {
        let Some(render) = self.render.take() else {
            return Ok(());
        };
        let result = match render.handle.join() {
            Ok(engine) => {
                self.engine = Some(engine);
                Ok(())
            }
            Err(_) => {
                log::error!("Render thread panicked, rebuilding engine");
                self.rebuild();
                Err(EngineError::ThreadJoin)
            }
        };
        self.drain_retired();
        result
    }

    // ─────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────

    /// Apply a command now (idle) or queue it for the next cycle (running)
    pub fn send(&mut self, command: EngineCommand) -> EngineResult<()> {
        match self.engine.as_mut() {
            Some(engine) => {
                // keep order with anything queued while the thread ran
                engine.process_commands();
                engine.apply(command);
                self.drain_retired();
                Ok(())
            }
            None => {
                let result = self.commands.send(command).map_err(|_| EngineError::QueueFull);
                self.drain_retired();
                result
            }
        }
    }

    /// Release objects the render thread handed back
    pub fn drain_retired(&mut self) -> usize {
        let mut count = 0;
        while let Ok(item) = self.retired.pop() {
            count += 1;
            match item {
                Retired::Recorder(recorder) => self.recorders.push(recorder),
                Retired::Command(command) => log::debug!("Command {:?} was not applied", command),
                Retired::Event(_) | Retired::Processor(_) | Retired::Instrument(_) | Retired::Group(_) => {}
            }
        }
        count
    }

    pub fn play(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Play)
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Stop)
    }

    pub fn set_position(&mut self, position: usize) -> EngineResult<()> {
        self.send(EngineCommand::SetPosition(position))
    }

    pub fn set_step_position(&mut self, step: usize) -> EngineResult<()> {
        self.send(EngineCommand::SetStepPosition(step))
    }

    pub fn set_loop_range(&mut self, min: usize, max: usize, steps_per_bar: usize) -> EngineResult<()> {
        self.send(EngineCommand::SetLoopRange { min, max, steps_per_bar })
    }

    pub fn update_measures(&mut self, amount_of_bars: usize, steps_per_bar: usize) -> EngineResult<()> {
        self.send(EngineCommand::UpdateMeasures {
            amount_of_bars,
            steps_per_bar,
        })
    }

    /// Change tempo at the end of the current cycle
    pub fn set_tempo(&mut self, tempo: f64, beat_amount: u32, beat_unit: u32) -> EngineResult<()> {
        self.send(EngineCommand::SetTempo {
            tempo,
            time_signature: TimeSignature { beat_amount, beat_unit },
        })
    }

    /// Change tempo before the next cycle renders
    pub fn set_tempo_now(&mut self, tempo: f64, beat_amount: u32, beat_unit: u32) -> EngineResult<()> {
        self.send(EngineCommand::SetTempoNow {
            tempo,
            time_signature: TimeSignature { beat_amount, beat_unit },
        })
    }

    pub fn set_notification_marker(&mut self, position: Option<usize>) -> EngineResult<()> {
        self.send(EngineCommand::SetMarker(position))
    }

    pub fn set_master_volume(&mut self, volume: f32) -> EngineResult<()> {
        self.send(EngineCommand::SetMasterVolume(volume))
    }

    pub fn set_channel_caching(&mut self, enabled: bool) -> EngineResult<()> {
        self.send(EngineCommand::SetChannelCaching(enabled))
    }

    pub fn set_record_device_input(&mut self, enabled: bool) -> EngineResult<()> {
        self.send(EngineCommand::SetRecordDeviceInput(enabled))
    }

    /// Clear every event and rewind
    pub fn reset(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Reset)
    }

    // ─────────────────────────────────────────────────────────────
    // Instruments, events, groups
    // ─────────────────────────────────────────────────────────────

    fn samples_per_bar(&self) -> usize {
        let timing = Timing::calculate(
            self.config.sample_rate,
            self.atomics.tempo(),
            self.config.time_signature,
            self.config.steps_per_bar,
        );
        timing.samples_per_bar
    }

    /// New sample instrument sized for this engine (not yet registered)
    pub fn create_instrument(&self) -> Instrument {
        Instrument::new(self.config.output_channels, self.config.buffer_size, self.samples_per_bar())
    }

    /// New synth instrument sized for this engine (not yet registered)
    pub fn create_synth_instrument(&self, settings: SynthSettings) -> Instrument {
        Instrument::synth(
            settings,
            self.config.output_channels,
            self.config.buffer_size,
            self.samples_per_bar(),
        )
    }

    pub fn add_instrument(&mut self, instrument: Instrument) -> EngineResult<InstrumentId> {
        let id = instrument.id();
        self.send(EngineCommand::AddInstrument(Box::new(instrument)))?;
        Ok(id)
    }

    pub fn remove_instrument(&mut self, instrument: InstrumentId) -> EngineResult<()> {
        self.send(EngineCommand::RemoveInstrument(instrument))
    }

    pub fn add_event(&mut self, instrument: InstrumentId, event: AudioEvent) -> EngineResult<EventId> {
        let id = event.id();
        self.send(EngineCommand::AddEvent {
            instrument,
            event: Box::new(event),
        })?;
        Ok(id)
    }

    pub fn remove_event(&mut self, instrument: InstrumentId, event: EventId) -> EngineResult<()> {
        self.send(EngineCommand::RemoveEvent { instrument, event })
    }

    /// Release an event (key-up for live events)
    pub fn stop_event(&mut self, instrument: InstrumentId, event: EventId) -> EngineResult<()> {
        self.send(EngineCommand::StopEvent { instrument, event })
    }

    pub fn add_processor(&mut self, target: ChainTarget, processor: Box<dyn Processor>) -> EngineResult<ProcessorId> {
        let id = processor.id();
        self.send(EngineCommand::AddProcessor { target, processor })?;
        Ok(id)
    }

    pub fn add_group(&mut self, group: ChannelGroup) -> EngineResult<GroupId> {
        let id = group.id();
        self.send(EngineCommand::AddGroup(Box::new(group)))?;
        Ok(id)
    }

    pub fn assign_to_group(&mut self, instrument: InstrumentId, group: Option<GroupId>) -> EngineResult<()> {
        self.send(EngineCommand::AssignToGroup { instrument, group })
    }

    // ─────────────────────────────────────────────────────────────
    // Recording and bounce
    // ─────────────────────────────────────────────────────────────

    fn create_recorder(&self, path: PathBuf) -> EngineResult<WavRecorder> {
        Ok(WavRecorder::create(
            path,
            self.config.sample_rate,
            self.config.output_channels,
            Some(self.bus.sender()),
        )?)
    }

    /// Record the master output to a WAV file while playing
    pub fn start_recording(&mut self, path: impl Into<PathBuf>) -> EngineResult<PathBuf> {
        let recorder = self.create_recorder(path.into())?;
        let path = recorder.path().to_path_buf();
        self.send(EngineCommand::SetRecorder(Some(Box::new(recorder))))?;
        Ok(path)
    }

    /// Detach the recorder and finalize its file
    ///
    /// Returns true if every detached recording was written successfully.
    pub fn stop_recording(&mut self) -> EngineResult<bool> {
        self.send(EngineCommand::SetRecorder(None))?;
        let deadline = Instant::now() + RECORDER_HANDBACK_TIMEOUT;
        while self.recorders.is_empty() && self.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            self.drain_retired();
        }
        Ok(self.finish_recorders())
    }

    fn finish_recorders(&mut self) -> bool {
        if self.recorders.is_empty() {
            return false;
        }
        let mut success = true;
        for mut recorder in self.recorders.drain(..) {
            success &= recorder.finish();
        }
        success
    }

    /// Render `[start, end]` as fast as possible into a WAV file
    ///
    /// A running engine is stopped for the bounce and restarted afterwards.
    pub fn bounce(&mut self, start: usize, end: usize, path: impl Into<PathBuf>) -> EngineResult<bool> {
        let restart = if self.is_running() { self.driver_kind } else { None };
        self.stop()?;

        let recorder = self.create_recorder(path.into())?;
        let driver = open_driver(DriverKind::Offline, &self.driver_config())?;
        if !driver.is_offline_render_supported() {
            return Err(EngineError::Driver(crate::audio::DriverError::OfflineUnsupported));
        }
        self.send(EngineCommand::SetRecorder(Some(Box::new(recorder))))?;
        self.send(EngineCommand::StartBounce { start, end })?;

        self.start_with_driver(driver)?;
        self.join()?;

        let success = self.finish_recorders();
        if success {
            self.bus.publish(Notification::BounceComplete);
        }
        if let Some(kind) = restart {
            self.start(kind)?;
        }
        Ok(success)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Engine stop on drop failed: {}", e);
        }
        self.finish_recorders();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("driver", &self.driver_kind)
            .field("config", &self.config)
            .finish()
    }
}

fn build(
    config: &EngineConfig,
    bus: &NotificationBus,
) -> (rtrb::Producer<EngineCommand>, Box<AudioEngine>, rtrb::Consumer<Retired>) {
    let (producer, consumer) = command_channel();
    let (retired_tx, retired_rx) = retired_channel();
    let engine = AudioEngine::new(
        EngineContext::from_config(config),
        consumer,
        retired_tx,
        Box::new(bus.sender()),
    );
    (producer, Box::new(engine), retired_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;

    fn small_config() -> EngineConfig {
        EngineConfig {
            buffer_size: 64,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_setup_announces_registration() {
        let engine = Engine::setup(small_config());
        assert!(!engine.is_running());
        assert_eq!(engine.drain_notifications(), vec![Notification::Registered]);
    }

    #[cfg(not(feature = "cpal-backend"))]
    #[test]
    fn test_unavailable_hardware_keeps_engine_idle() {
        let mut engine = Engine::setup(small_config());
        engine.drain_notifications();

        let result = engine.start(DriverKind::Cpal);
        assert!(matches!(result, Err(EngineError::Driver(_))));
        assert!(!engine.is_running());
        assert!(engine.audio_engine().is_some());
        assert_eq!(engine.drain_notifications(), vec![Notification::HardwareUnavailable]);
    }

    #[test]
    fn test_idle_commands_apply_immediately() {
        let mut engine = Engine::setup(small_config());
        engine.set_position(1234).unwrap();
        engine.play().unwrap();

        let state = engine.audio_engine().unwrap();
        assert_eq!(state.context().transport.position(), 1234);
        assert!(state.context().transport.is_playing());
    }

    #[test]
    fn test_start_and_stop_hand_engine_back() {
        let mut engine = Engine::setup(small_config());
        engine.start(DriverKind::Offline).unwrap();
        assert!(engine.is_running());
        assert!(engine.audio_engine().is_none());
        assert!(matches!(engine.start(DriverKind::Offline), Err(EngineError::AlreadyRunning)));

        engine.play().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        engine.stop().unwrap();

        assert!(!engine.is_running());
        let state = engine.audio_engine().unwrap();
        assert!(state.context().transport.is_playing());
    }

    #[test]
    fn test_bounce_writes_range_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bounce.wav");

        let mut engine = Engine::setup(small_config());
        let mut instrument = engine.create_instrument();
        instrument
            .add_event(Box::new(AudioEvent::sample(
                AudioBuffer::from_channels(vec![vec![0.5; 1000]]),
                0,
            )))
            .unwrap();
        let id = engine.add_instrument(instrument).unwrap();
        engine.drain_notifications();

        assert!(engine.bounce(0, 999, &path).unwrap());
        assert!(!engine.is_running());
        assert!(engine.drain_notifications().contains(&Notification::BounceComplete));

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 1000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert!(samples.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        // transport is back on its own loop and stopped
        let state = engine.audio_engine().unwrap();
        assert!(!state.context().transport.is_playing());
        assert!(state.instrument(id).is_some());
    }

    #[test]
    fn test_stop_recording_without_recorder() {
        let mut engine = Engine::setup(small_config());
        assert!(!engine.stop_recording().unwrap());
    }

    #[test]
    fn test_recording_while_idle_is_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::setup(small_config());
        let path = engine.start_recording(dir.path().join("take.wav")).unwrap();
        assert!(engine.stop_recording().unwrap());
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 0);
    }
}
