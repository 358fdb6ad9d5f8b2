use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dsp::level::REFERENCE_PRESSURE_PA;
use crate::models::channel::ChannelConfig;
use crate::models::error::CaptureError;
use crate::models::request::CaptureRequest;
use crate::models::result::{RecordingMetadata, RecordingResult};
use crate::models::state::CaptureState;
use crate::storage::metadata;
use crate::storage::tdms::{self, ContainerProperties, PropertyValue, TdmsStreamWriter};
use crate::traits::analog_input::{AcquisitionTiming, AnalogInputChannel};
use crate::traits::session_observer::SessionObserver;

/// Cancellation latency is bounded by one polling interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Guard margin added to the requested duration when waiting for the
/// hardware flush after acquisition completes.
pub const FLUSH_GUARD: Duration = Duration::from_secs(2);

/// Assumed maximum input voltage used for the max-SPL estimate.
pub const MAX_INPUT_VOLTS: f64 = 5.0;

/// Fallback estimate when the sensitivity is unusable.
const FALLBACK_MAX_SPL_DB: f64 = 140.0;

/// Convert a pressure in Pascals to dB SPL re 20 µPa.
pub fn pa_to_db_spl(pressure_pa: f64) -> f64 {
    let pressure = pressure_pa.max(1e-12);
    20.0 * (pressure / REFERENCE_PRESSURE_PA).log10()
}

/// Estimate the maximum sound pressure level the input can represent:
/// `Pmax = Vmax / (sensitivity in V/Pa)`, expressed in dB SPL.
pub fn estimate_max_spl_db(max_input_volts: f64, sensitivity_mv_per_pa: f64) -> f64 {
    let sens_v_per_pa = sensitivity_mv_per_pa / 1000.0;
    if sens_v_per_pa <= 0.0 {
        return FALLBACK_MAX_SPL_DB;
    }
    pa_to_db_spl(max_input_volts / sens_v_per_pa)
}

/// Handle to a running capture session.
///
/// Dropping the handle does not stop the session; call [`stop`] for a
/// cooperative cancel (observed within one polling interval) or
/// [`wait`] to block until the terminal result.
///
/// [`stop`]: SessionHandle::stop
/// [`wait`]: SessionHandle::wait
pub struct SessionHandle {
    id: Uuid,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<Result<RecordingResult, CaptureError>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request a cooperative stop. Samples flushed so far are preserved.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the session reaches a terminal state.
    pub fn wait(self) -> Result<RecordingResult, CaptureError> {
        self.worker
            .join()
            .map_err(|_| CaptureError::Device("acquisition worker panicked".into()))?
    }
}

/// Shared view of the session used by both the control side and the
/// acquisition worker.
struct SessionContext {
    state: Arc<Mutex<CaptureState>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl SessionContext {
    fn set_state(&self, new_state: CaptureState) {
        *self.state.lock() = new_state.clone();
        if let Some(observer) = &self.observer {
            observer.on_state_changed(&new_state);
        }
    }

    fn progress(&self, elapsed_secs: f64, samples_acquired: u64) {
        *self.state.lock() = CaptureState::Recording { elapsed_secs, samples_acquired };
        if let Some(observer) = &self.observer {
            observer.on_progress(elapsed_secs);
        }
    }

    /// Return to `Idle` unless a new session has already replaced the
    /// terminal state this worker published. The terminal state is
    /// startable, so a caller may begin the next session before this
    /// worker exits; its state must not be overwritten.
    fn reset_from(&self, terminal: &CaptureState) {
        let mut state = self.state.lock();
        if *state == *terminal {
            *state = CaptureState::Idle;
        }
    }
}

/// Orchestrates one hardware analog-input channel through the capture
/// session state machine.
///
/// ```text
/// [AnalogInputChannel] → poll loop (50 ms) → [TdmsStreamWriter]
///                             ↓
///                 SessionObserver notifications
/// ```
///
/// Acquisition runs on a dedicated worker thread so the caller stays
/// responsive; at most one session is active per recorder, and the
/// destination container is exclusively owned by the active session.
pub struct StreamRecorder<C: AnalogInputChannel> {
    channel: Arc<Mutex<C>>,
    config: Option<ChannelConfig>,
    observer: Option<Arc<dyn SessionObserver>>,
    state: Arc<Mutex<CaptureState>>,
}

impl<C: AnalogInputChannel> StreamRecorder<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
            config: None,
            observer: None,
            state: Arc::new(Mutex::new(CaptureState::Idle)),
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> CaptureState {
        self.state.lock().clone()
    }

    /// Store the sensor configuration for subsequent sessions.
    /// Rejected while a session is active.
    pub fn configure(&mut self, config: ChannelConfig) -> Result<(), CaptureError> {
        if self.state.lock().is_active() {
            return Err(CaptureError::Configuration(
                "cannot reconfigure while a session is active".into(),
            ));
        }
        config.validate().map_err(CaptureError::Configuration)?;
        self.config = Some(config);
        Ok(())
    }

    /// Start a capture session.
    ///
    /// Validates the request, configures the hardware channel (with a
    /// max-SPL estimate derived from the sensitivity and the assumed
    /// maximum input voltage), opens the container writer, and spawns
    /// the acquisition worker. Any failure up to that point aborts
    /// before acquisition begins.
    pub fn start(&mut self, request: CaptureRequest) -> Result<SessionHandle, CaptureError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| CaptureError::Configuration("channel not configured".into()))?;
        request.validate().map_err(CaptureError::Configuration)?;

        if self.state.lock().is_active() {
            return Err(CaptureError::Configuration(
                "a session is already active on this channel".into(),
            ));
        }

        let timing = AcquisitionTiming {
            sample_rate: request.sample_rate,
            total_samples: request.total_samples(),
            max_level_db_spl: estimate_max_spl_db(MAX_INPUT_VOLTS, config.sensitivity_mv_per_pa),
        };
        self.channel.lock().configure(&config, &timing)?;

        let writer = TdmsStreamWriter::create(
            &request.destination,
            &request.group_name,
            &request.channel_name,
            config.unit.as_str(),
            request.sample_rate,
            request.write_mode,
        )?;

        let context = SessionContext {
            state: Arc::clone(&self.state),
            observer: self.observer.clone(),
        };
        context.set_state(CaptureState::Armed);

        let id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let worker_channel = Arc::clone(&self.channel);

        log::info!(
            "starting capture session {id}: {:.1} s at {} Hz into {}",
            request.duration_secs,
            request.sample_rate,
            request.destination.display()
        );

        let worker = thread::Builder::new()
            .name("acquisition-poll".into())
            .spawn(move || {
                let outcome =
                    Self::run_session(&worker_channel, writer, &worker_cancel, &context, &request, &config);
                let terminal = match &outcome {
                    Ok(result) if result.cancelled => {
                        CaptureState::Cancelled(Box::new(result.clone()))
                    }
                    Ok(result) => CaptureState::Completed(Box::new(result.clone())),
                    Err(error) => {
                        log::error!("capture session failed: {error}");
                        CaptureState::Failed(error.clone())
                    }
                };
                context.set_state(terminal.clone());
                if let Some(observer) = &context.observer {
                    match &outcome {
                        Ok(result) => observer.on_finished(result),
                        Err(error) => observer.on_error(error),
                    }
                }
                // Result delivered; the recorder may start the next session.
                context.reset_from(&terminal);
                outcome
            })
            .expect("failed to spawn acquisition thread");

        Ok(SessionHandle { id, cancel, worker })
    }

    /// The acquisition worker: hardware start, polling loop, flush,
    /// close, finalize.
    fn run_session(
        channel: &Mutex<C>,
        mut writer: TdmsStreamWriter,
        cancel: &AtomicBool,
        context: &SessionContext,
        request: &CaptureRequest,
        config: &ChannelConfig,
    ) -> Result<RecordingResult, CaptureError> {
        if let Err(error) = channel.lock().start() {
            let _ = writer.close();
            return Err(error);
        }
        context.progress(0.0, 0);

        let mut cancelled = false;
        loop {
            if cancel.load(Ordering::SeqCst) {
                let _ = channel.lock().stop();
                cancelled = true;
                break;
            }

            let polled = {
                let mut ch = channel.lock();
                ch.read_available().map(|block| (ch.samples_acquired(), block, ch.is_done()))
            };
            let (acquired, block, done) = match polled {
                Ok(polled) => polled,
                Err(error) => {
                    // Driver fault: no further hardware calls for this session.
                    let _ = writer.close();
                    return Err(error);
                }
            };

            if let Err(error) = writer.append(&block) {
                let _ = channel.lock().stop();
                let _ = writer.close();
                return Err(error);
            }

            context.progress(acquired as f64 / request.sample_rate, acquired);

            if done {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        context.set_state(CaptureState::Finishing);

        if !cancelled {
            let timeout = Duration::from_secs_f64(request.duration_secs) + FLUSH_GUARD;
            if let Err(error) = channel.lock().wait_until_done(timeout) {
                // Already-written samples stay valid: close before failing.
                let _ = writer.close();
                return Err(error);
            }
        }

        // Drain whatever the driver flushed after the last tick.
        let remainder = channel.lock().read_available();
        match remainder {
            Ok(block) => {
                if let Err(error) = writer.append(&block) {
                    let _ = writer.close();
                    return Err(error);
                }
            }
            Err(error) => {
                let _ = writer.close();
                return Err(error);
            }
        }

        let samples_written = writer.samples_written();
        writer.close()?;
        let checksum = tdms::sha256_file(&request.destination)?;
        let duration_secs = samples_written as f64 / request.sample_rate;

        let metadata = RecordingMetadata::new(
            request.destination.to_string_lossy().as_ref(),
            duration_secs,
            samples_written,
            request.sample_rate,
            &checksum,
            &config.microphone_id,
            config.sensitivity_mv_per_pa,
            request.tags.clone(),
        );

        // Metadata failures after this point are warnings: the samples
        // are already durable.
        let mut finalize_warning = None;
        if let Err(error) = tdms::append_properties(
            &request.destination,
            &request.group_name,
            &request.channel_name,
            &container_properties(request, config),
        ) {
            let warning = CaptureError::Finalize(format!("container metadata append: {error}"));
            log::warn!("{warning}");
            finalize_warning = Some(warning.to_string());
        }
        if let Err(error) = metadata::write_sidecar(&metadata, &request.destination) {
            let warning = CaptureError::Finalize(format!("sidecar write: {error}"));
            log::warn!("{warning}");
            finalize_warning.get_or_insert(warning.to_string());
        }

        Ok(RecordingResult {
            file_path: request.destination.clone(),
            duration_secs,
            samples_written,
            sample_rate: request.sample_rate,
            cancelled,
            metadata,
            checksum,
            finalize_warning,
        })
    }
}

/// Descriptive properties appended to the container after the samples
/// are durable.
fn container_properties(request: &CaptureRequest, config: &ChannelConfig) -> ContainerProperties {
    ContainerProperties {
        root: vec![
            ("Project".into(), PropertyValue::String(request.tags.project.clone())),
            ("Unit".into(), PropertyValue::String(request.tags.unit.clone())),
            ("Unit State".into(), PropertyValue::String(request.tags.unit_state.clone())),
            ("Location".into(), PropertyValue::String(request.tags.location.clone())),
            (
                "Timestamp".into(),
                PropertyValue::String(request.tags.timestamp.to_rfc3339()),
            ),
            ("Sample Rate (Hz)".into(), PropertyValue::F64(request.sample_rate)),
            (
                "Engineering Units".into(),
                PropertyValue::String(config.unit.as_str().into()),
            ),
        ],
        group: Vec::new(),
        channel: vec![
            ("MicrophoneID".into(), PropertyValue::String(config.microphone_id.clone())),
            (
                "Sensitivity_mV_per_Pa".into(),
                PropertyValue::F64(config.sensitivity_mv_per_pa),
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::RecordingTags;
    use crate::storage::tdms::TdmsFile;
    use approx::assert_abs_diff_eq;

    /// Scripted channel: acquires `per_poll` samples on every drain,
    /// with optional failure injection.
    struct MockChannel {
        total: u64,
        per_poll: u64,
        acquired: u64,
        read_cursor: u64,
        started: bool,
        stopped: bool,
        polls: u64,
        fail_read_at_poll: Option<u64>,
        fail_start: bool,
        flush_times_out: bool,
    }

    impl MockChannel {
        fn new(per_poll: u64) -> Self {
            Self {
                total: 0,
                per_poll,
                acquired: 0,
                read_cursor: 0,
                started: false,
                stopped: false,
                polls: 0,
                fail_read_at_poll: None,
                fail_start: false,
                flush_times_out: false,
            }
        }
    }

    impl AnalogInputChannel for MockChannel {
        fn configure(
            &mut self,
            config: &ChannelConfig,
            timing: &AcquisitionTiming,
        ) -> Result<(), CaptureError> {
            assert!(config.sensitivity_mv_per_pa > 0.0);
            assert!(timing.max_level_db_spl > 0.0);
            self.total = timing.total_samples;
            Ok(())
        }

        fn start(&mut self) -> Result<(), CaptureError> {
            if self.fail_start {
                return Err(CaptureError::Device("simulated start fault".into()));
            }
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            self.stopped = true;
            Ok(())
        }

        fn samples_acquired(&self) -> u64 {
            self.acquired
        }

        fn read_available(&mut self) -> Result<Vec<f64>, CaptureError> {
            self.polls += 1;
            if self.fail_read_at_poll == Some(self.polls) {
                return Err(CaptureError::Device("simulated driver fault".into()));
            }
            if self.started && !self.stopped {
                self.acquired = (self.acquired + self.per_poll).min(self.total);
            }
            let count = (self.acquired - self.read_cursor) as usize;
            self.read_cursor = self.acquired;
            Ok(vec![0.01; count])
        }

        fn is_done(&self) -> bool {
            self.stopped || self.acquired >= self.total
        }

        fn wait_until_done(&mut self, _timeout: Duration) -> Result<(), CaptureError> {
            if self.flush_times_out {
                return Err(CaptureError::FlushTimeout);
            }
            Ok(())
        }
    }

    fn recorder(channel: MockChannel) -> StreamRecorder<MockChannel> {
        let mut recorder = StreamRecorder::new(channel);
        recorder
            .configure(ChannelConfig::new("cDAQ1Mod1/ai0", 45.6))
            .unwrap();
        recorder
    }

    fn request(dir: &std::path::Path, duration_secs: f64, sample_rate: f64) -> CaptureRequest {
        let mut request = CaptureRequest::new(
            dir.join("rec.tdms"),
            duration_secs,
            RecordingTags::new("PIT5", "U1", "Full Load", "G1"),
        );
        request.sample_rate = sample_rate;
        request
    }

    struct ProgressCollector(parking_lot::Mutex<Vec<f64>>);

    impl SessionObserver for ProgressCollector {
        fn on_state_changed(&self, _state: &CaptureState) {}

        fn on_progress(&self, elapsed_secs: f64) {
            self.0.lock().push(elapsed_secs);
        }
    }

    #[test]
    fn completed_capture_writes_all_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(MockChannel::new(400));
        let progress = Arc::new(ProgressCollector(parking_lot::Mutex::new(Vec::new())));
        recorder.set_observer(progress.clone());

        let handle = recorder.start(request(dir.path(), 1.0, 1_000.0)).unwrap();
        let result = handle.wait().unwrap();

        assert!(!result.cancelled);
        assert_eq!(result.samples_written, 1_000);
        assert_abs_diff_eq!(result.duration_secs, 1.0, epsilon = 1e-9);
        assert!(result.finalize_warning.is_none());
        assert!(recorder.state().is_idle());

        let file = TdmsFile::read(&result.file_path).unwrap();
        let channel = file.group("RawRecord").unwrap().channel("Sound").unwrap();
        assert_eq!(channel.data.len(), 1_000);
        // Finalized root properties are present.
        assert_eq!(
            file.properties.get("Project").and_then(|p| p.as_str()),
            Some("PIT5")
        );

        let elapsed = progress.0.lock().clone();
        assert!(!elapsed.is_empty());
        assert!(elapsed.windows(2).all(|w| w[0] <= w[1]), "progress not monotonic");
    }

    #[test]
    fn second_start_is_rejected_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(MockChannel::new(10));

        let handle = recorder.start(request(dir.path(), 100.0, 1_000.0)).unwrap();
        let second = recorder.start(request(dir.path(), 1.0, 1_000.0));
        assert!(matches!(second, Err(CaptureError::Configuration(_))));

        handle.stop();
        let result = handle.wait().unwrap();
        assert!(result.cancelled);
        assert!(result.samples_written < 100_000);
    }

    #[test]
    fn cancellation_preserves_flushed_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(MockChannel::new(50));

        let handle = recorder.start(request(dir.path(), 60.0, 1_000.0)).unwrap();
        thread::sleep(Duration::from_millis(200));
        handle.stop();
        let result = handle.wait().unwrap();

        assert!(result.cancelled);
        assert!(result.samples_written > 0);
        assert!(result.samples_written < 60_000);

        let file = TdmsFile::read(&result.file_path).unwrap();
        let channel = file.group("RawRecord").unwrap().channel("Sound").unwrap();
        assert_eq!(channel.data.len() as u64, result.samples_written);
    }

    #[test]
    fn driver_fault_fails_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = MockChannel::new(100);
        channel.fail_read_at_poll = Some(2);
        let mut recorder = recorder(channel);

        let handle = recorder.start(request(dir.path(), 1.0, 1_000.0)).unwrap();
        let error = handle.wait().unwrap_err();
        assert!(matches!(error, CaptureError::Device(_)));
        assert!(recorder.state().is_idle());

        // Samples flushed before the fault are still readable.
        let file = TdmsFile::read(&dir.path().join("rec.tdms")).unwrap();
        let data = &file.group("RawRecord").unwrap().channel("Sound").unwrap().data;
        assert_eq!(data.len(), 100);
    }

    #[test]
    fn start_fault_fails_before_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = MockChannel::new(100);
        channel.fail_start = true;
        let mut recorder = recorder(channel);

        let handle = recorder.start(request(dir.path(), 1.0, 1_000.0)).unwrap();
        assert!(matches!(handle.wait(), Err(CaptureError::Device(_))));
    }

    #[test]
    fn flush_timeout_is_an_error_with_samples_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = MockChannel::new(1_000);
        channel.flush_times_out = true;
        let mut recorder = recorder(channel);

        let handle = recorder.start(request(dir.path(), 1.0, 1_000.0)).unwrap();
        assert_eq!(handle.wait(), Err(CaptureError::FlushTimeout));

        let file = TdmsFile::read(&dir.path().join("rec.tdms")).unwrap();
        let data = &file.group("RawRecord").unwrap().channel("Sound").unwrap().data;
        assert_eq!(data.len(), 1_000);
    }

    #[test]
    fn invalid_request_is_rejected_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(MockChannel::new(100));

        let result = recorder.start(request(dir.path(), 0.0, 1_000.0));
        assert!(matches!(result, Err(CaptureError::Configuration(_))));
        assert!(!dir.path().join("rec.tdms").exists());
        assert!(recorder.state().is_idle());
    }

    /// Holds the worker inside `on_finished` so the terminal state stays
    /// published for a while before the worker's reset runs.
    struct SlowFinishObserver;

    impl SessionObserver for SlowFinishObserver {
        fn on_state_changed(&self, _state: &CaptureState) {}

        fn on_finished(&self, _result: &RecordingResult) {
            thread::sleep(Duration::from_millis(300));
        }
    }

    #[test]
    fn late_worker_reset_does_not_erase_a_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(MockChannel::new(1_000));
        recorder.set_observer(Arc::new(SlowFinishObserver));

        let first = recorder.start(request(dir.path(), 1.0, 1_000.0)).unwrap();
        while !recorder.state().is_terminal() {
            thread::sleep(Duration::from_millis(2));
        }

        // The first worker is still inside its observer callback. Its
        // terminal result is published, so starting here is legal.
        let mut long_request = request(dir.path(), 60.0, 1_000.0);
        long_request.destination = dir.path().join("rec2.tdms");
        let second = recorder.start(long_request).unwrap();

        first.wait().unwrap();

        // The second session must still be the one owning the state:
        // the first worker's deferred reset must not have run over it.
        assert!(recorder.state().is_active());
        let third = recorder.start(request(dir.path(), 1.0, 1_000.0));
        assert!(matches!(third, Err(CaptureError::Configuration(_))));

        second.stop();
        let result = second.wait().unwrap();
        assert!(result.cancelled);
    }

    #[test]
    fn unconfigured_recorder_rejects_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = StreamRecorder::new(MockChannel::new(100));
        let result = recorder.start(request(dir.path(), 1.0, 1_000.0));
        assert!(matches!(result, Err(CaptureError::Configuration(_))));
    }

    #[test]
    fn max_spl_estimate_matches_sensitivity() {
        // 45.6 mV/Pa with 5 V headroom: Pmax ≈ 109.6 Pa ≈ 134.8 dB SPL.
        assert_abs_diff_eq!(estimate_max_spl_db(5.0, 45.6), 134.78, epsilon = 0.05);
        assert_eq!(estimate_max_spl_db(5.0, 0.0), 140.0);
    }
}
