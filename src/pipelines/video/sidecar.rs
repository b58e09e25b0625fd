// SPDX-License-Identifier: GPL-3.0-only

//! Encoder sidecar
//!
//! Owns the recording state machine and a worker thread that pulls frames
//! forwarded by the renderer, draws them through its own GPU context and
//! feeds the encoder. The worker's context is always a share of the
//! renderer's display context, so texture ids resolve in both.
//!
//! ```text
//!        start_recording            first frame
//!  Off ─────────────────▶ Starting ─────────────▶ Active
//!   ▲                        │                      │
//!   │      finish / abort    ▼     stop_recording   ▼
//!   └──────────────────── Stopping ◀────────────────┘
//! ```

use crate::backends::camera::types::FrameTransform;
use crate::constants::timing;
use crate::errors::{CoreError, CoreResult};
use crate::filters::FilterDescriptor;
use crate::gpu::{ContextRole, GpuContextHandle, GpuDevice, TextureId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Frames allowed to queue before forwarding starts dropping
const MAX_PENDING_FRAMES: usize = 4;

/// Recording state, owned by the sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Off,
    Starting,
    Active,
    Stopping,
}

impl RecordingState {
    /// Starting or Active
    pub fn is_recording(self) -> bool {
        matches!(self, RecordingState::Starting | RecordingState::Active)
    }
}

/// Output parameters for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingConfig {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub frame_rate: u32,
}

impl RecordingConfig {
    /// Nominal frame interval used when timestamps cannot advance the timeline
    pub fn frame_interval_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.frame_rate.max(1))
    }
}

/// A rendered frame handed over by the renderer
#[derive(Debug, Clone, Copy)]
pub struct ForwardedFrame {
    pub texture: TextureId,
    pub transform: FrameTransform,
    pub filter: &'static FilterDescriptor,
    pub timestamp_ns: u64,
}

/// Opens encoder sessions bound to the sidecar's GPU context
pub trait EncoderBackend<D: GpuDevice>: Send + Sync {
    fn open(
        &self,
        config: &RecordingConfig,
        context: GpuContextHandle<D>,
    ) -> CoreResult<Box<dyn EncoderSession<D>>>;
}

/// One open encoder and container muxer
pub trait EncoderSession<D: GpuDevice>: Send {
    /// Draw `texture` through the frame's filter and submit it at `pts_ns`
    fn encode_frame(
        &mut self,
        frame: &ForwardedFrame,
        texture: &D::Texture,
        pts_ns: u64,
    ) -> CoreResult<()>;

    /// Move pending encoder output into the container
    fn drain(&mut self, end_of_stream: bool) -> CoreResult<()>;

    /// Continue on a new shared context without restarting the container
    fn rebind(&mut self, context: GpuContextHandle<D>) -> CoreResult<()>;

    /// Close the container; the file is final once this returns
    fn finish(self: Box<Self>) -> CoreResult<()>;

    /// Tear down and delete the partial file
    fn abort(self: Box<Self>);
}

/// What a finished recording produced
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub output_path: PathBuf,
    pub frames: u64,
    pub duration_ms: u64,
    /// Times the sidecar was rebound to a recreated display context
    pub resumed: u32,
}

type ErrorListener = Arc<dyn Fn(&CoreError) + Send + Sync>;

enum SidecarCommand<D: GpuDevice> {
    Frame(ForwardedFrame),
    Rebind(GpuContextHandle<D>),
    Stop,
    Cancel,
}

struct SidecarSlot<D: GpuDevice> {
    state: RecordingState,
    sender: Option<Sender<SidecarCommand<D>>>,
    context: Option<GpuContextHandle<D>>,
    result: Option<CoreResult<RecordingSummary>>,
    worker: Option<JoinHandle<()>>,
    error_listener: Option<ErrorListener>,
}

struct SidecarShared<D: GpuDevice> {
    slot: Mutex<SidecarSlot<D>>,
    changed: Condvar,
    pending: AtomicUsize,
    backend: Arc<dyn EncoderBackend<D>>,
}

impl<D: GpuDevice> SidecarShared<D> {
    fn lock(&self) -> MutexGuard<'_, SidecarSlot<D>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the encoder sidecar; clones share one state machine
pub struct EncoderSidecar<D: GpuDevice> {
    shared: Arc<SidecarShared<D>>,
}

impl<D: GpuDevice> Clone for EncoderSidecar<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: GpuDevice> EncoderSidecar<D> {
    pub fn new(backend: Arc<dyn EncoderBackend<D>>) -> Self {
        Self {
            shared: Arc::new(SidecarShared {
                slot: Mutex::new(SidecarSlot {
                    state: RecordingState::Off,
                    sender: None,
                    context: None,
                    result: None,
                    worker: None,
                    error_listener: None,
                }),
                changed: Condvar::new(),
                pending: AtomicUsize::new(0),
                backend,
            }),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.shared.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    /// Called with every encoder failure after the partial file is gone
    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(&CoreError) + Send + Sync + 'static,
    {
        self.shared.lock().error_listener = Some(Arc::new(listener));
    }

    /// Open the encoder on a share of `display` and enter `Starting`
    ///
    /// Blocks until the worker has opened the encoder and muxer.
    pub fn start_recording(
        &self,
        config: RecordingConfig,
        display: &GpuContextHandle<D>,
    ) -> CoreResult<()> {
        let context = display.share();
        let (sender, receiver) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);

        {
            let mut slot = self.shared.lock();
            if slot.state != RecordingState::Off {
                warn!(state = ?slot.state, "Recording already in progress");
                return Err(CoreError::EncoderBusy);
            }
            // A previous worker has already reached Off; reap it
            if let Some(worker) = slot.worker.take() {
                let _ = worker.join();
            }
            slot.state = RecordingState::Starting;
            slot.sender = Some(sender);
            slot.context = Some(context.clone());
            slot.result = None;
        }
        self.shared.pending.store(0, Ordering::SeqCst);

        info!(
            path = %config.output_path.display(),
            width = config.width,
            height = config.height,
            bitrate_bps = config.bitrate_bps,
            context = context.id(),
            "Starting recording"
        );

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("encoder-sidecar".to_string())
            .spawn(move || run_worker(shared, config, context, receiver, ack_tx));

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                self.reset_to_off();
                return Err(CoreError::EncodingFailed(format!(
                    "Failed to spawn encoder thread: {}",
                    e
                )));
            }
        };

        match ack_rx.recv_timeout(timing::ENCODER_OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.shared.lock().worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                self.reset_to_off();
                error!(error = %e, "Failed to open encoder");
                Err(e)
            }
            Err(_) => {
                // The worker sees the dropped ack receiver, aborts and resets to Off
                let mut slot = self.shared.lock();
                slot.worker = Some(worker);
                slot.sender = None;
                error!("Timed out opening encoder");
                Err(CoreError::EncodingFailed(
                    "Timed out opening encoder".to_string(),
                ))
            }
        }
    }

    fn reset_to_off(&self) {
        let mut slot = self.shared.lock();
        slot.state = RecordingState::Off;
        slot.sender = None;
        slot.context = None;
        self.shared.changed.notify_all();
    }

    /// Queue a rendered frame; never blocks on encoder work
    ///
    /// Returns false when the frame was dropped.
    pub fn frame_available(&self, frame: ForwardedFrame) -> bool {
        let slot = self.shared.lock();
        if !slot.state.is_recording() {
            return false;
        }
        let (Some(sender), Some(context)) = (&slot.sender, &slot.context) else {
            return false;
        };

        if self.shared.pending.load(Ordering::SeqCst) >= MAX_PENDING_FRAMES {
            debug!(texture = %frame.texture, "Encoder queue full, dropping frame");
            return false;
        }

        // Hold the texture before the renderer can release or reallocate it
        let newly_held = !context.is_held_by(frame.texture, ContextRole::Encoder);
        if newly_held && !context.retain(frame.texture) {
            debug!(texture = %frame.texture, "Forwarded texture no longer exists");
            return false;
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(SidecarCommand::Frame(frame)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            if newly_held {
                context.release(frame.texture);
            }
            return false;
        }
        true
    }

    /// Rebind to a recreated display context, keeping the output file
    pub fn update_shared_context(&self, display: &GpuContextHandle<D>) {
        let mut slot = self.shared.lock();
        if !slot.state.is_recording() {
            debug!(state = ?slot.state, "Ignoring context update while not recording");
            return;
        }
        let context = display.share();
        info!(context = context.id(), namespace = context.namespace_id(), "Rebinding encoder context");
        slot.context = Some(context.clone());
        if let Some(sender) = &slot.sender {
            let _ = sender.send(SidecarCommand::Rebind(context));
        }
    }

    /// Enter `Stopping`; use [`wait_for_stop`](Self::wait_for_stop) to block until final
    pub fn stop_recording(&self) {
        let mut slot = self.shared.lock();
        if !slot.state.is_recording() {
            debug!(state = ?slot.state, "Stop requested while not recording");
            return;
        }
        info!("Stopping recording");
        slot.state = RecordingState::Stopping;
        if let Some(sender) = slot.sender.take() {
            let _ = sender.send(SidecarCommand::Stop);
        }
        self.shared.changed.notify_all();
    }

    /// Block until the sidecar is back to `Off`
    ///
    /// `Ok(None)` when the recording was cancelled or nothing was recording.
    pub fn wait_for_stop(&self, timeout: Duration) -> CoreResult<Option<RecordingSummary>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        while slot.state != RecordingState::Off {
            let now = Instant::now();
            if now >= deadline {
                error!(state = ?slot.state, "Timed out waiting for encoder to stop");
                return Err(CoreError::EncodingFailed(
                    "Timed out waiting for encoder to stop".to_string(),
                ));
            }
            slot = self
                .shared
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let worker = slot.worker.take();
        let result = slot.result.take();
        drop(slot);

        if let Some(worker) = worker {
            let _ = worker.join();
        }
        result.transpose()
    }

    /// Abort the recording and delete the partial file
    pub fn cancel_recording(&self) -> CoreResult<()> {
        {
            let mut slot = self.shared.lock();
            if slot.state == RecordingState::Off {
                return Ok(());
            }
            info!(state = ?slot.state, "Cancelling recording");
            slot.state = RecordingState::Stopping;
            match slot.sender.take() {
                Some(sender) => {
                    let _ = sender.send(SidecarCommand::Cancel);
                }
                None => {
                    // Already stopping; turn the pending stop into a cancel
                    slot.result = None;
                }
            }
            self.shared.changed.notify_all();
        }
        let outcome = self.wait_for_stop(timing::RECORDING_STOP_TIMEOUT);
        // A cancel reports nothing, even if stop had already produced a file
        outcome.map(|_| ())
    }

    /// Cancel anything in flight; used on teardown
    pub fn shutdown(&self) {
        if let Err(e) = self.cancel_recording() {
            warn!(error = %e, "Encoder did not shut down cleanly");
        }
    }
}

enum Exit {
    Finished,
    Cancelled,
    Failed(CoreError),
}

struct WorkerState<D: GpuDevice> {
    config: RecordingConfig,
    context: GpuContextHandle<D>,
    held: Option<TextureId>,
    first_ts: Option<u64>,
    last_pts: Option<u64>,
    frames: u64,
    resumed: u32,
}

impl<D: GpuDevice> WorkerState<D> {
    /// Presentation time relative to the first frame, strictly increasing
    fn next_pts(&mut self, timestamp_ns: u64) -> u64 {
        let first = *self.first_ts.get_or_insert(timestamp_ns);
        let candidate = timestamp_ns.saturating_sub(first);
        let pts = match self.last_pts {
            Some(last) if candidate <= last => last + self.config.frame_interval_ns(),
            _ => candidate,
        };
        self.last_pts = Some(pts);
        pts
    }

    fn switch_held(&mut self, texture: TextureId) {
        if let Some(previous) = self.held.replace(texture)
            && previous != texture
        {
            self.context.release(previous);
        }
    }

    fn release_held(&mut self) {
        if let Some(held) = self.held.take() {
            self.context.release(held);
        }
    }

    fn summary(&self) -> RecordingSummary {
        let duration_ns = self
            .last_pts
            .map(|pts| pts + self.config.frame_interval_ns())
            .unwrap_or(0);
        RecordingSummary {
            output_path: self.config.output_path.clone(),
            frames: self.frames,
            duration_ms: duration_ns / 1_000_000,
            resumed: self.resumed,
        }
    }
}

fn run_worker<D: GpuDevice>(
    shared: Arc<SidecarShared<D>>,
    config: RecordingConfig,
    context: GpuContextHandle<D>,
    receiver: Receiver<SidecarCommand<D>>,
    ack: mpsc::SyncSender<CoreResult<()>>,
) {
    let session = match shared.backend.open(&config, context.clone()) {
        Ok(session) => session,
        Err(e) => {
            let e = match e {
                CoreError::EncodingFailed(_) => e,
                other => CoreError::EncodingFailed(other.to_string()),
            };
            let _ = ack.send(Err(e));
            return;
        }
    };
    if ack.send(Ok(())).is_err() {
        warn!("Recording start abandoned, discarding encoder");
        session.abort();
        finish_worker(&shared, None);
        return;
    }

    let mut worker = WorkerState {
        config,
        context,
        held: None,
        first_ts: None,
        last_pts: None,
        frames: 0,
        resumed: 0,
    };

    let (exit, session) = drive(&shared, &mut worker, session, &receiver);
    worker.release_held();

    let result = match exit {
        Exit::Finished => match session.finish() {
            Ok(()) => {
                let summary = worker.summary();
                info!(
                    path = %summary.output_path.display(),
                    frames = summary.frames,
                    duration_ms = summary.duration_ms,
                    resumed = summary.resumed,
                    "Recording finalized"
                );
                Some(Ok(summary))
            }
            Err(e) => {
                error!(error = %e, "Failed to finalize recording");
                remove_partial(&worker.config.output_path);
                Some(Err(e))
            }
        },
        Exit::Cancelled => {
            info!(path = %worker.config.output_path.display(), "Recording cancelled");
            session.abort();
            None
        }
        Exit::Failed(e) => {
            error!(error = %e, "Encoder failed, discarding recording");
            session.abort();
            Some(Err(e))
        }
    };

    if let Some(Err(e)) = &result {
        let listener = shared.lock().error_listener.clone();
        if let Some(listener) = listener {
            listener(e);
        }
    }
    finish_worker(&shared, result);
}

type BoxedSession<D> = Box<dyn EncoderSession<D>>;

fn drive<D: GpuDevice>(
    shared: &SidecarShared<D>,
    worker: &mut WorkerState<D>,
    mut session: BoxedSession<D>,
    receiver: &Receiver<SidecarCommand<D>>,
) -> (Exit, BoxedSession<D>) {
    loop {
        let command = match receiver.recv() {
            Ok(command) => command,
            // Every sender is gone without a stop: the sidecar was dropped
            Err(_) => return (Exit::Cancelled, session),
        };

        match command {
            SidecarCommand::Frame(frame) => {
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                worker.switch_held(frame.texture);

                let Some(texture) = worker.context.texture(frame.texture) else {
                    debug!(texture = %frame.texture, "Skipping frame with released texture");
                    continue;
                };
                let pts = worker.next_pts(frame.timestamp_ns);
                if let Err(e) = session
                    .encode_frame(&frame, &texture, pts)
                    .and_then(|()| session.drain(false))
                {
                    return (Exit::Failed(e), session);
                }
                worker.frames += 1;

                if worker.frames == 1 {
                    let mut slot = shared.lock();
                    if slot.state == RecordingState::Starting {
                        slot.state = RecordingState::Active;
                        shared.changed.notify_all();
                    }
                    info!("First frame encoded, recording active");
                } else if worker.frames % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(frames = worker.frames, pts_ms = pts / 1_000_000, "Encoding");
                }
            }
            SidecarCommand::Rebind(context) => {
                worker.release_held();
                worker.context = context.clone();
                worker.resumed += 1;
                if let Err(e) = session.rebind(context) {
                    return (Exit::Failed(e), session);
                }
            }
            SidecarCommand::Stop => {
                return match session.drain(true) {
                    Ok(()) => (Exit::Finished, session),
                    Err(e) => (Exit::Failed(e), session),
                };
            }
            SidecarCommand::Cancel => return (Exit::Cancelled, session),
        }
    }
}

fn finish_worker<D: GpuDevice>(
    shared: &SidecarShared<D>,
    result: Option<CoreResult<RecordingSummary>>,
) {
    let mut slot = shared.lock();
    slot.state = RecordingState::Off;
    slot.sender = None;
    slot.context = None;
    slot.result = result;
    shared.pending.store(0, Ordering::SeqCst);
    shared.changed.notify_all();
}

fn remove_partial(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed partial recording"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial recording"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;

    #[derive(Clone)]
    struct NullDevice;

    impl GpuDevice for NullDevice {
        type Texture = u32;

        fn describe(&self) -> String {
            "null".to_string()
        }
    }

    #[derive(Default)]
    struct Calls {
        frames: Vec<(u32, u64)>,
        rebinds: usize,
        finished: bool,
        aborted: bool,
    }

    struct MockBackend {
        calls: Arc<Mutex<Calls>>,
        fail_open: bool,
        fail_on_frame: Option<usize>,
    }

    struct MockSession {
        calls: Arc<Mutex<Calls>>,
        fail_on_frame: Option<usize>,
    }

    impl EncoderBackend<NullDevice> for MockBackend {
        fn open(
            &self,
            _config: &RecordingConfig,
            _context: GpuContextHandle<NullDevice>,
        ) -> CoreResult<Box<dyn EncoderSession<NullDevice>>> {
            if self.fail_open {
                return Err(CoreError::EncodingFailed("no encoder".to_string()));
            }
            Ok(Box::new(MockSession {
                calls: Arc::clone(&self.calls),
                fail_on_frame: self.fail_on_frame,
            }))
        }
    }

    impl EncoderSession<NullDevice> for MockSession {
        fn encode_frame(
            &mut self,
            _frame: &ForwardedFrame,
            texture: &u32,
            pts_ns: u64,
        ) -> CoreResult<()> {
            let mut calls = self.calls.lock().unwrap();
            if Some(calls.frames.len()) == self.fail_on_frame {
                return Err(CoreError::EncodingFailed("encoder error".to_string()));
            }
            calls.frames.push((*texture, pts_ns));
            Ok(())
        }

        fn drain(&mut self, _end_of_stream: bool) -> CoreResult<()> {
            Ok(())
        }

        fn rebind(&mut self, _context: GpuContextHandle<NullDevice>) -> CoreResult<()> {
            self.calls.lock().unwrap().rebinds += 1;
            Ok(())
        }

        fn finish(self: Box<Self>) -> CoreResult<()> {
            self.calls.lock().unwrap().finished = true;
            Ok(())
        }

        fn abort(self: Box<Self>) {
            self.calls.lock().unwrap().aborted = true;
        }
    }

    fn sidecar(
        fail_open: bool,
        fail_on_frame: Option<usize>,
    ) -> (EncoderSidecar<NullDevice>, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let backend = MockBackend {
            calls: Arc::clone(&calls),
            fail_open,
            fail_on_frame,
        };
        (EncoderSidecar::new(Arc::new(backend)), calls)
    }

    fn config() -> RecordingConfig {
        RecordingConfig {
            output_path: PathBuf::from("/nonexistent/test.mp4"),
            width: 640,
            height: 480,
            bitrate_bps: 1_000_000,
            frame_rate: 30,
        }
    }

    fn frame(texture: TextureId, timestamp_ns: u64) -> ForwardedFrame {
        ForwardedFrame {
            texture,
            transform: FrameTransform::IDENTITY,
            filter: filters::pass_through(),
            timestamp_ns,
        }
    }

    fn wait_for(sidecar: &EncoderSidecar<NullDevice>, state: RecordingState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while sidecar.state() != state {
            assert!(Instant::now() < deadline, "state never became {:?}", state);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn second_start_is_busy() {
        let (sidecar, _) = sidecar(false, None);
        let display = GpuContextHandle::create_display(NullDevice);
        sidecar.start_recording(config(), &display).unwrap();
        assert_eq!(sidecar.state(), RecordingState::Starting);
        assert_eq!(
            sidecar.start_recording(config(), &display),
            Err(CoreError::EncoderBusy)
        );
        sidecar.shutdown();
        assert_eq!(sidecar.state(), RecordingState::Off);
    }

    #[test]
    fn open_failure_leaves_state_off() {
        let (sidecar, _) = sidecar(true, None);
        let display = GpuContextHandle::create_display(NullDevice);
        let result = sidecar.start_recording(config(), &display);
        assert!(matches!(result, Err(CoreError::EncodingFailed(_))));
        assert_eq!(sidecar.state(), RecordingState::Off);
    }

    #[test]
    fn first_frame_activates_and_stop_summarizes() {
        let (sidecar, calls) = sidecar(false, None);
        let display = GpuContextHandle::create_display(NullDevice);
        let texture = display.register_texture(7);
        sidecar.start_recording(config(), &display).unwrap();

        assert!(sidecar.frame_available(frame(texture, 5_000_000_000)));
        wait_for(&sidecar, RecordingState::Active);
        assert!(sidecar.frame_available(frame(texture, 5_100_000_000)));

        sidecar.stop_recording();
        let summary = sidecar
            .wait_for_stop(Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.resumed, 0);
        // 100 ms of timeline plus one frame interval
        assert_eq!(summary.duration_ms, 133);

        let calls = calls.lock().unwrap();
        assert!(calls.finished);
        assert_eq!(calls.frames, vec![(7, 0), (7, 100_000_000)]);
        assert!(!display.is_held_by(texture, ContextRole::Encoder));
    }

    #[test]
    fn pts_stays_monotonic_when_timestamps_repeat() {
        let (sidecar, calls) = sidecar(false, None);
        let display = GpuContextHandle::create_display(NullDevice);
        let texture = display.register_texture(1);
        sidecar.start_recording(config(), &display).unwrap();
        for ts in [1_000, 1_000, 500] {
            assert!(sidecar.frame_available(frame(texture, ts)));
            std::thread::sleep(Duration::from_millis(10));
        }
        sidecar.stop_recording();
        sidecar.wait_for_stop(Duration::from_secs(2)).unwrap();

        let pts: Vec<u64> = calls.lock().unwrap().frames.iter().map(|f| f.1).collect();
        assert!(pts.windows(2).all(|w| w[0] < w[1]), "{:?}", pts);
    }

    #[test]
    fn encoder_failure_reports_and_aborts() {
        let (sidecar, calls) = sidecar(false, Some(0));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        sidecar.set_error_listener(move |e| sink.lock().unwrap().push(e.kind()));

        let display = GpuContextHandle::create_display(NullDevice);
        let texture = display.register_texture(3);
        sidecar.start_recording(config(), &display).unwrap();
        sidecar.frame_available(frame(texture, 0));

        wait_for(&sidecar, RecordingState::Off);
        let result = sidecar.wait_for_stop(Duration::from_secs(2));
        assert!(matches!(result, Err(CoreError::EncodingFailed(_))));
        assert!(calls.lock().unwrap().aborted);
        assert_eq!(
            *reported.lock().unwrap(),
            vec![crate::errors::ErrorKind::EncodingFailed]
        );
    }

    #[test]
    fn cancel_aborts_and_reports_nothing() {
        let (sidecar, calls) = sidecar(false, None);
        let display = GpuContextHandle::create_display(NullDevice);
        let texture = display.register_texture(2);
        sidecar.start_recording(config(), &display).unwrap();
        sidecar.frame_available(frame(texture, 0));

        sidecar.cancel_recording().unwrap();
        assert_eq!(sidecar.state(), RecordingState::Off);
        assert!(calls.lock().unwrap().aborted);
        assert!(!calls.lock().unwrap().finished);
        assert_eq!(sidecar.wait_for_stop(Duration::from_millis(10)), Ok(None));

        // The encoder is free for the next recording
        sidecar.start_recording(config(), &display).unwrap();
        sidecar.shutdown();
    }

    #[test]
    fn rebind_keeps_recording_and_counts_resume() {
        let (sidecar, calls) = sidecar(false, None);
        let display = GpuContextHandle::create_display(NullDevice);
        let texture = display.register_texture(1);
        sidecar.start_recording(config(), &display).unwrap();
        sidecar.frame_available(frame(texture, 0));
        wait_for(&sidecar, RecordingState::Active);

        let resumed_display = GpuContextHandle::create_display(NullDevice);
        let resumed_texture = resumed_display.register_texture(9);
        sidecar.update_shared_context(&resumed_display);
        assert!(sidecar.frame_available(frame(resumed_texture, 50_000_000)));

        sidecar.stop_recording();
        let summary = sidecar
            .wait_for_stop(Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(summary.resumed, 1);
        assert_eq!(summary.frames, 2);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.rebinds, 1);
        assert_eq!(calls.frames.last().map(|f| f.0), Some(9));
    }

    #[test]
    fn frames_are_ignored_when_off() {
        let (sidecar, _) = sidecar(false, None);
        let display = GpuContextHandle::create_display(NullDevice);
        let texture = display.register_texture(1);
        assert!(!sidecar.frame_available(frame(texture, 0)));
        assert!(!display.is_held_by(texture, ContextRole::Encoder));
    }
}
