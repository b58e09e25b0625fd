// SPDX-License-Identifier: GPL-3.0-only

//! In-process fakes for driving a session without camera, GPU or codecs

#![allow(dead_code)]

use camera_recorder::backends::camera::{
    BackendError, BackendResult, CameraBackend, CameraCapabilities, CameraDevice, CameraFrame,
    CameraSession, CaptureParameters, Facing, FocusMode, FrameData, FrameSize, FrameTransform,
    SensorRotation, WhiteBalanceMode, monotonic_ns,
};
use camera_recorder::errors::{CoreError, CoreResult, ErrorKind};
use camera_recorder::filters::FilterDescriptor;
use camera_recorder::gpu::{GpuContextHandle, GpuDevice, SurfaceWriter, TextureId};
use camera_recorder::media::{DecodedFrame, DecoderFactory, MediaDecoder, MediaInfo, MediaInspector};
use camera_recorder::pipelines::video::{
    EncoderBackend, EncoderSession, ForwardedFrame, RecordingConfig,
};
use camera_recorder::renderer::RenderBackend;
use camera_recorder::session::{SessionBackends, SessionController, SessionListener};
use camera_recorder::Config;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Interval between fake camera frames
pub const FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub const SENSOR_SIZES: [FrameSize; 4] = [
    FrameSize::new(176, 144),
    FrameSize::new(320, 240),
    FrameSize::new(640, 480),
    FrameSize::new(1280, 720),
];

// ===== GPU =====

#[derive(Clone)]
pub struct NullDevice;

impl GpuDevice for NullDevice {
    type Texture = FrameSize;

    fn describe(&self) -> String {
        "null".to_string()
    }
}

/// Render backend that only tracks texture sizes
#[derive(Default)]
pub struct NullRenderBackend;

impl RenderBackend for NullRenderBackend {
    type Device = NullDevice;

    fn create_context(&mut self, _display: FrameSize) -> CoreResult<GpuContextHandle<NullDevice>> {
        Ok(GpuContextHandle::create_display(NullDevice))
    }

    fn create_frame_texture(
        &mut self,
        context: &GpuContextHandle<NullDevice>,
    ) -> CoreResult<TextureId> {
        Ok(context.register_texture(FrameSize::new(1, 1)))
    }

    fn resize_display(&mut self, _size: FrameSize) {}

    fn import_frame(
        &mut self,
        context: &GpuContextHandle<NullDevice>,
        texture: TextureId,
        frame: &CameraFrame,
    ) -> CoreResult<TextureId> {
        if context.texture(texture) == Some(frame.size()) {
            Ok(texture)
        } else {
            Ok(context.register_texture(frame.size()))
        }
    }

    fn use_program(&mut self, _filter: &'static FilterDescriptor) -> CoreResult<()> {
        Ok(())
    }

    fn set_texture_size(&mut self, _size: FrameSize) {}

    fn draw(
        &mut self,
        _context: &GpuContextHandle<NullDevice>,
        _texture: TextureId,
        _transform: &FrameTransform,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

// ===== Camera =====

/// Two sensors: a back camera with a torch and a front camera without
pub struct FakeCameraBackend {
    devices: Vec<CameraDevice>,
    held: Arc<Mutex<HashSet<String>>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakeCameraBackend {
    pub fn new() -> Self {
        Self {
            devices: vec![
                CameraDevice {
                    name: "Back Camera".to_string(),
                    path: "back".to_string(),
                    facing: Facing::Back,
                    rotation: SensorRotation::Rotate90,
                },
                CameraDevice {
                    name: "Front Camera".to_string(),
                    path: "front".to_string(),
                    facing: Facing::Front,
                    rotation: SensorRotation::Rotate270,
                },
            ],
            held: Arc::new(Mutex::new(HashSet::new())),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Device calls in order, e.g. `"torch on back"`, `"close back"`
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn is_held(&self, path: &str) -> bool {
        self.held.lock().unwrap().contains(path)
    }
}

impl CameraBackend for FakeCameraBackend {
    fn enumerate(&self) -> Vec<CameraDevice> {
        self.devices.clone()
    }

    fn open(&self, device: &CameraDevice) -> BackendResult<Box<dyn CameraSession>> {
        if !self.held.lock().unwrap().insert(device.path.clone()) {
            return Err(BackendError::DeviceBusy);
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("open {}", device.path));

        let capabilities = CameraCapabilities {
            sizes: SENSOR_SIZES.to_vec(),
            frame_rates: vec![15, 30],
            focus_modes: vec![FocusMode::ContinuousVideo],
            white_balance_modes: vec![WhiteBalanceMode::Auto],
            stabilization: false,
            torch: device.facing == Facing::Back,
        };
        Ok(Box::new(FakeCameraSession {
            device: device.clone(),
            capabilities,
            params: None,
            stream: None,
            held: Arc::clone(&self.held),
            events: Arc::clone(&self.events),
        }))
    }
}

struct Stream {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct FakeCameraSession {
    device: CameraDevice,
    capabilities: CameraCapabilities,
    params: Option<CaptureParameters>,
    stream: Option<Stream>,
    held: Arc<Mutex<HashSet<String>>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakeCameraSession {
    fn log(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{} {}", event, self.device.path));
    }
}

impl CameraSession for FakeCameraSession {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &self.capabilities
    }

    fn apply(&mut self, params: &CaptureParameters) -> BackendResult<()> {
        let was_lit = self.params.as_ref().is_some_and(|p| p.torch);
        if params.torch != was_lit {
            self.log(if params.torch { "torch on" } else { "torch off" });
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn start_streaming(
        &mut self,
        writer: SurfaceWriter,
        transform: FrameTransform,
    ) -> BackendResult<()> {
        if self.stream.is_some() {
            return Err(BackendError::DeviceBusy);
        }
        let size = self
            .params
            .as_ref()
            .map(|p| p.size)
            .unwrap_or(SENSOR_SIZES[0]);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let pixels: Arc<[u8]> = Arc::from(vec![128u8; (size.width * size.height * 4) as usize]);
            while !thread_stop.load(Ordering::SeqCst) {
                writer.publish(CameraFrame {
                    width: size.width,
                    height: size.height,
                    data: FrameData::Copied(Arc::clone(&pixels)),
                    stride: size.width * 4,
                    timestamp_ns: monotonic_ns(),
                    transform,
                });
                std::thread::sleep(FRAME_INTERVAL);
            }
        });
        self.stream = Some(Stream { stop, handle });
        self.log("stream");
        Ok(())
    }

    fn stop_streaming(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            let _ = stream.handle.join();
            self.log("stop");
        }
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for FakeCameraSession {
    fn drop(&mut self) {
        self.stop_streaming();
        self.held.lock().unwrap().remove(&self.device.path);
        self.log("close");
    }
}

// ===== Encoder =====

/// Writes `"<width> <height> <duration_ms>"` into the output file on finish
#[derive(Default)]
pub struct FakeEncoder {
    /// Fail `encode_frame` for this frame number, counting from 1
    pub fail_on_frame: Option<u64>,
}

impl FakeEncoder {
    pub fn failing_on(frame: u64) -> Self {
        Self {
            fail_on_frame: Some(frame),
        }
    }
}

impl EncoderBackend<NullDevice> for FakeEncoder {
    fn open(
        &self,
        config: &RecordingConfig,
        _context: GpuContextHandle<NullDevice>,
    ) -> CoreResult<Box<dyn EncoderSession<NullDevice>>> {
        std::fs::File::create(&config.output_path)
            .map_err(|e| CoreError::EncodingFailed(e.to_string()))?;
        Ok(Box::new(FakeEncoderSession {
            config: config.clone(),
            last_pts: None,
            frames: 0,
            fail_on_frame: self.fail_on_frame,
        }))
    }
}

struct FakeEncoderSession {
    config: RecordingConfig,
    last_pts: Option<u64>,
    frames: u64,
    fail_on_frame: Option<u64>,
}

impl EncoderSession<NullDevice> for FakeEncoderSession {
    fn encode_frame(
        &mut self,
        _frame: &ForwardedFrame,
        _texture: &FrameSize,
        pts_ns: u64,
    ) -> CoreResult<()> {
        self.frames += 1;
        if self.fail_on_frame == Some(self.frames) {
            return Err(CoreError::EncodingFailed(format!(
                "encoder rejected frame {}",
                self.frames
            )));
        }
        self.last_pts = Some(pts_ns);
        Ok(())
    }

    fn drain(&mut self, _end_of_stream: bool) -> CoreResult<()> {
        Ok(())
    }

    fn rebind(&mut self, _context: GpuContextHandle<NullDevice>) -> CoreResult<()> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> CoreResult<()> {
        let duration_ms = self
            .last_pts
            .map(|pts| (pts + self.config.frame_interval_ns()) / 1_000_000)
            .unwrap_or(0);
        std::fs::write(
            &self.config.output_path,
            format!("{} {} {}", self.config.width, self.config.height, duration_ms),
        )
        .map_err(|e| CoreError::EncodingFailed(e.to_string()))
    }

    fn abort(self: Box<Self>) {
        let _ = std::fs::remove_file(&self.config.output_path);
    }
}

// ===== Media =====

/// Reads what [`FakeEncoder`] wrote
pub struct FakeInspector;

impl MediaInspector for FakeInspector {
    fn probe(&self, path: &Path) -> CoreResult<MediaInfo> {
        let text = std::fs::read_to_string(path)?;
        let fields: Vec<u64> = text
            .split_whitespace()
            .filter_map(|field| field.parse().ok())
            .collect();
        match fields.as_slice() {
            [width, height, duration_ms] => Ok(MediaInfo {
                width: *width as u32,
                height: *height as u32,
                duration_ms: *duration_ms,
            }),
            _ => Err(CoreError::StorageUnavailable("unreadable recording".to_string())),
        }
    }

    fn extract_frame(&self, path: &Path, _position: Duration) -> CoreResult<image::RgbaImage> {
        let info = self.probe(path)?;
        Ok(image::RgbaImage::from_pixel(
            info.width.max(1),
            info.height.max(1),
            image::Rgba([200, 100, 50, 255]),
        ))
    }
}

/// Decoders yielding a short clip of gray frames
pub struct FakeDecoders;

impl DecoderFactory for FakeDecoders {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn MediaDecoder>> {
        let info = FakeInspector.probe(path)?;
        Ok(Box::new(FakeDecoder {
            size: FrameSize::new(info.width, info.height),
            remaining: 5,
        }))
    }
}

struct FakeDecoder {
    size: FrameSize,
    remaining: u32,
}

impl MediaDecoder for FakeDecoder {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn next_frame(&mut self, _timeout: Duration) -> CoreResult<DecodedFrame> {
        if self.remaining == 0 {
            return Ok(DecodedFrame::EndOfStream);
        }
        self.remaining -= 1;
        std::thread::sleep(Duration::from_millis(10));
        Ok(DecodedFrame::Frame(CameraFrame {
            width: self.size.width,
            height: self.size.height,
            data: FrameData::Copied(Arc::from(vec![
                0u8;
                (self.size.width * self.size.height * 4)
                    as usize
            ])),
            stride: self.size.width * 4,
            timestamp_ns: monotonic_ns(),
            transform: FrameTransform::IDENTITY,
        }))
    }

    fn rewind(&mut self) -> CoreResult<()> {
        self.remaining = 5;
        Ok(())
    }
}

// ===== Session =====

#[derive(Default)]
pub struct RecordingListener {
    pub previews: Mutex<Vec<(u32, u32)>>,
    pub errors: Mutex<Vec<ErrorKind>>,
}

impl RecordingListener {
    pub fn errors(&self) -> Vec<ErrorKind> {
        self.errors.lock().unwrap().clone()
    }

    pub fn previews(&self) -> Vec<(u32, u32)> {
        self.previews.lock().unwrap().clone()
    }
}

impl SessionListener for RecordingListener {
    fn on_preview_ready(&self, width: u32, height: u32) {
        self.previews.lock().unwrap().push((width, height));
    }

    fn on_error(&self, kind: ErrorKind, _detail: &str) {
        self.errors.lock().unwrap().push(kind);
    }
}

/// Fresh directory under the system temp dir
pub fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("camera-recorder-test-{}", uuid::Uuid::new_v4()))
}

pub fn test_config(root: &Path) -> Config {
    Config {
        output_root: Some(root.to_path_buf()),
        ..Config::default()
    }
}

pub fn session(
    camera: &Arc<FakeCameraBackend>,
    config: Config,
) -> (SessionController<NullDevice>, Arc<RecordingListener>) {
    session_with_encoder(camera, config, FakeEncoder::default())
}

pub fn session_with_encoder(
    camera: &Arc<FakeCameraBackend>,
    config: Config,
    encoder: FakeEncoder,
) -> (SessionController<NullDevice>, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::default());
    let backends = SessionBackends::<NullDevice> {
        camera: Arc::clone(camera) as Arc<dyn CameraBackend>,
        encoder: Arc::new(encoder),
        inspector: Arc::new(FakeInspector),
        decoders: Arc::new(FakeDecoders),
    };
    let session = SessionController::new(
        NullRenderBackend,
        backends,
        config,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    )
    .expect("session");
    (session, listener)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Block until the renderer has drawn at least one more frame
pub fn wait_for_frames(session: &SessionController<NullDevice>) {
    let start = session.render().frames_drawn();
    assert!(
        wait_until(Duration::from_secs(3), || session.render().frames_drawn() > start),
        "renderer never drew a frame"
    );
}
