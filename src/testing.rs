//! In-memory stand-ins for capture, OCR, translation and display

use image::DynamicImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CaptureError, Frame, FrameSource, WindowBounds};
use crate::display::DisplaySink;
use crate::translation::{TranslationBackend, TranslationError};
use crate::vision::{EngineError, RecognitionEngine, Recognized};

/// Counters shared with a [`FakeEngine`] after it has been boxed
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    pub loads: Arc<AtomicUsize>,
    pub recognitions: Arc<AtomicUsize>,
    pub unloads: Arc<AtomicUsize>,
    /// Dimensions of the last image handed to `recognize`
    pub last_size: Arc<Mutex<Option<(u32, u32)>>>,
}

pub struct FakeEngine {
    name: String,
    text: String,
    script: VecDeque<Result<String, String>>,
    hardware: bool,
    preprocess: bool,
    fail_load: bool,
    fail_recognition: bool,
    fail_unload: bool,
    delay: Option<Duration>,
    probe: EngineProbe,
}

impl FakeEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            text: String::new(),
            script: VecDeque::new(),
            hardware: false,
            preprocess: true,
            fail_load: false,
            fail_recognition: false,
            fail_unload: false,
            delay: None,
            probe: EngineProbe::default(),
        }
    }

    /// Text returned by every recognition
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Responses consumed one per recognition before falling back to `with_text`
    pub fn with_script(mut self, script: Vec<Result<&str, &str>>) -> Self {
        self.script = script
            .into_iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        self
    }

    pub fn specialized_hardware(mut self) -> Self {
        self.hardware = true;
        self
    }

    pub fn without_preprocessing(mut self) -> Self {
        self.preprocess = false;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_recognition(mut self) -> Self {
        self.fail_recognition = true;
        self
    }

    pub fn failing_unload(mut self) -> Self {
        self.fail_unload = true;
        self
    }

    /// Sleep this long inside every recognition
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

impl RecognitionEngine for FakeEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_specialized_hardware(&self) -> bool {
        self.hardware
    }

    fn preprocess_by_default(&self) -> bool {
        self.preprocess
    }

    fn load(&mut self) -> Result<(), EngineError> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(EngineError::Backend("model file missing".to_string()));
        }
        Ok(())
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognized, EngineError> {
        self.probe.recognitions.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_size.lock() = Some((image.width(), image.height()));

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_recognition {
            return Err(EngineError::Backend("device lost".to_string()));
        }

        match self.script.pop_front() {
            Some(Ok(text)) => Ok(Recognized::new(text, 0.9)),
            Some(Err(reason)) => Err(EngineError::Backend(reason)),
            None => Ok(Recognized::new(self.text.clone(), 0.9)),
        }
    }

    fn unload(&mut self) -> Result<(), EngineError> {
        if self.fail_unload {
            return Err(EngineError::Backend("unload refused".to_string()));
        }
        self.probe.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps its input as `EN[...]`
pub struct FakeTranslator {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeTranslator {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl TranslationBackend for FakeTranslator {
    fn name(&self) -> &str {
        "fake"
    }

    fn translate(&self, text: &str) -> Result<String, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TranslationError::Backend("connection refused".to_string()));
        }
        Ok(format!("EN[{text}]"))
    }
}

#[derive(Debug, Default)]
struct SinkLog {
    texts: Vec<String>,
    closed: bool,
}

/// Records every update; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.log.lock().texts.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().closed
    }
}

impl DisplaySink for RecordingSink {
    fn update_text(&mut self, text: &str) {
        self.log.lock().texts.push(text.to_string());
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

#[derive(Debug)]
struct SourceState {
    image: DynamicImage,
    origin: (i32, i32),
    available: bool,
    delay: Option<Duration>,
    captures: usize,
}

/// Serves a fixed image as the target window; clones share state
#[derive(Debug, Clone)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new(image: DynamicImage, origin: (i32, i32)) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState {
                image,
                origin,
                available: true,
                delay: None,
                captures: 0,
            })),
        }
    }

    pub fn set_image(&self, image: DynamicImage) {
        self.state.lock().image = image;
    }

    pub fn set_unavailable(&self) {
        self.state.lock().available = false;
    }

    /// Block every capture for `delay`
    pub fn set_capture_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Successful captures so far
    pub fn captures(&self) -> usize {
        self.state.lock().captures
    }
}

impl FrameSource for FakeSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if !state.available {
            return Err(CaptureError::Unavailable("window is minimized".to_string()));
        }
        state.captures += 1;
        let size = (state.image.width(), state.image.height());
        Ok(Frame::new(state.image.clone(), state.origin, size))
    }

    fn target_bounds(&mut self) -> Result<WindowBounds, CaptureError> {
        let state = self.state.lock();
        if !state.available {
            return Err(CaptureError::Unavailable("window is minimized".to_string()));
        }
        Ok((
            state.origin.0,
            state.origin.1,
            state.image.width(),
            state.image.height(),
        ))
    }

    fn describe(&self) -> String {
        "fake window".to_string()
    }
}
