//! Application Coordinator
//!
//! Wires preferences, recognition engines and the display channel together,
//! and owns the running pipeline thread.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;
use tracing::info;

use crate::capture::{FrameSource, ScreenRect};
use crate::config::{AppConfig, Preferences};
use crate::display::{ChannelSink, DisplayEvent, DisplaySink};
use crate::pipeline::{PipelineOrchestrator, RegionId, Scheduler, SchedulerHandle};
use crate::translation::TranslationService;
use crate::vision::{EngineId, EngineInfo, EngineRegistry, SharedRegistry, VlmEngine};

/// Registry holding every engine this platform supports
pub fn default_registry(config: &AppConfig) -> EngineRegistry {
    let mut registry = EngineRegistry::default();

    #[cfg(windows)]
    registry.register(
        EngineId::lightweight(),
        Box::new(crate::vision::WindowsOcrEngine::new(
            config.ocr.windows_language.clone(),
        )),
    );

    registry.register(EngineId::vlm(), Box::new(VlmEngine::new(config.ocr.vlm.clone())));
    registry
}

/// Main application coordinator
pub struct TranslatorApp {
    prefs: Preferences,
    registry: SharedRegistry,
    display_tx: Sender<DisplayEvent>,
    display_rx: Receiver<DisplayEvent>,
    pipeline: Option<SchedulerHandle>,
}

impl TranslatorApp {
    /// Coordinator using the platform's engines
    pub fn new(prefs: Preferences) -> Self {
        let registry = default_registry(prefs.config());
        Self::with_registry(prefs, registry)
    }

    /// Coordinator around an already populated registry; stored preferences
    /// are applied to it
    pub fn with_registry(prefs: Preferences, mut registry: EngineRegistry) -> Self {
        prefs.apply_to_registry(&mut registry);
        if let Some(id) = registry.active_id() {
            info!("Active OCR engine: {}", id);
        }

        let (display_tx, display_rx) = unbounded();
        Self {
            prefs,
            registry: registry.into_shared(),
            display_tx,
            display_rx,
            pipeline: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.prefs.config()
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn available_engines(&self) -> Vec<EngineInfo> {
        self.registry.read().available_engines()
    }

    /// Translated text for every region, in delivery order
    pub fn display_events(&self) -> &Receiver<DisplayEvent> {
        &self.display_rx
    }

    /// Switch engines and remember the choice
    pub fn set_active_engine(&mut self, id: &EngineId) -> Result<()> {
        self.registry.write().set_active(id)?;
        self.prefs
            .set_active_engine(id)
            .context("Failed to save active engine")?;
        info!("Switched OCR engine to {}", id);
        Ok(())
    }

    /// Toggle preprocessing for the active engine and remember it
    pub fn set_preprocess(&mut self, enabled: bool) -> Result<()> {
        let active = {
            let mut registry = self.registry.write();
            registry.set_should_preprocess(enabled);
            registry.active_id().cloned()
        };
        if let Some(id) = active {
            self.prefs
                .set_engine_preprocess(&id, enabled)
                .context("Failed to save preprocessing policy")?;
        }
        Ok(())
    }

    /// Orchestrator configured from the current preferences
    pub fn build_orchestrator(
        &self,
        source: Box<dyn FrameSource>,
        translator: TranslationService,
    ) -> PipelineOrchestrator {
        let config = self.prefs.config();
        let budget = match config.general.cycle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        PipelineOrchestrator::new(source, self.registry.clone(), translator)
            .with_change_threshold(config.detection.change_threshold)
            .with_max_display_chars(config.general.max_display_chars)
            .with_cycle_budget(budget)
    }

    /// Sink that forwards a region's text to [`display_events`](Self::display_events)
    pub fn sink_for(&self, id: &RegionId) -> Box<dyn DisplaySink> {
        Box::new(ChannelSink::new(id.as_str(), self.display_tx.clone()))
    }

    /// Start polling on a background thread
    pub fn start(&mut self, orchestrator: PipelineOrchestrator) -> Result<()> {
        if self.pipeline.is_some() {
            anyhow::bail!("Pipeline is already running");
        }
        let interval = Duration::from_millis(self.prefs.config().general.pipeline_interval_ms);
        self.pipeline = Some(Scheduler::spawn(orchestrator, interval)?);
        Ok(())
    }

    /// Track a region on the running pipeline
    pub fn add_region(&self, rect: ScreenRect) -> Result<RegionId> {
        let pipeline = self.pipeline.as_ref().context("Pipeline is not running")?;
        let tx = self.display_tx.clone();
        pipeline.add_region_with(
            rect,
            Box::new(move |id: &RegionId| -> Box<dyn DisplaySink> {
                Box::new(ChannelSink::new(id.as_str(), tx))
            }),
        )
    }

    pub fn remove_region(&self, id: &RegionId) -> Result<()> {
        self.pipeline
            .as_ref()
            .context("Pipeline is not running")?
            .remove_region(id)
    }

    /// Change the polling interval and remember it
    pub fn set_interval(&mut self, interval_ms: u64) -> Result<()> {
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_interval(Duration::from_millis(interval_ms));
        }
        self.prefs
            .set_pipeline_interval_ms(interval_ms)
            .context("Failed to save polling interval")
    }

    /// Check if the pipeline thread is running
    pub fn is_running(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| p.is_running())
    }

    /// Stop the pipeline thread and persist the engine setup
    pub fn stop(&mut self) -> Result<()> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
        let registry = self.registry.read();
        self.prefs
            .capture_registry(&registry)
            .context("Failed to save preferences")
    }
}

impl Drop for TranslatorApp {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
    }
}
