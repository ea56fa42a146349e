//! Capture → diff → OCR → translate → display pipeline
//!
//! [`PipelineOrchestrator::run_cycle`] performs one pass over every tracked
//! region using a single captured frame. Regions are independent: whatever
//! goes wrong with one is logged and counted, and the cycle moves on.
//! Nothing inside a cycle propagates as an error.

pub mod perf;
pub mod region;
pub mod scheduler;

pub use perf::{CycleTimings, PerfCounters, PerfLogger};
pub use region::{Region, RegionError, RegionId, RegionSnapshot, RegionStore};
pub use scheduler::{PipelineCommand, Scheduler, SchedulerHandle, SinkFactory};

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, Frame, FrameSource};
use crate::display::{truncate_for_display, DEFAULT_MAX_CHARS};
use crate::translation::TranslationService;
use crate::vision::{ChangeDetector, SharedRegistry};

use perf::StageTimer;

/// Why a cycle did nothing
#[derive(Debug, Clone, PartialEq)]
pub enum IdleReason {
    NoEnabledRegions,
    EngineNotReady,
    TargetUnavailable(String),
}

/// What happened to one region during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    Disabled,
    OutOfBounds,
    Unchanged,
    Empty,
    RecognitionFailed,
    Delivered,
    /// Region was removed while it was being processed
    Removed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub outcomes: Vec<(RegionId, RegionOutcome)>,
    /// Regions left unprocessed because the cycle ran over its budget
    pub aborted: usize,
}

impl CycleReport {
    pub fn count(&self, outcome: RegionOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn outcome_of(&self, id: &RegionId) -> Option<RegionOutcome> {
        self.outcomes
            .iter()
            .find(|(rid, _)| rid == id)
            .map(|(_, o)| *o)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Idle(IdleReason),
    Ran(CycleReport),
}

pub struct PipelineOrchestrator {
    source: Box<dyn FrameSource>,
    registry: SharedRegistry,
    translator: TranslationService,
    regions: RegionStore,
    detector: ChangeDetector,
    perf: PerfLogger,
    max_display_chars: usize,
    cycle_budget: Option<Duration>,
}

impl PipelineOrchestrator {
    pub fn new(
        source: Box<dyn FrameSource>,
        registry: SharedRegistry,
        translator: TranslationService,
    ) -> Self {
        Self {
            source,
            registry,
            translator,
            regions: RegionStore::new(),
            detector: ChangeDetector::default(),
            perf: PerfLogger::new(),
            max_display_chars: DEFAULT_MAX_CHARS,
            cycle_budget: None,
        }
    }

    pub fn with_change_threshold(mut self, threshold: f64) -> Self {
        self.detector = ChangeDetector::new(threshold);
        self
    }

    pub fn with_max_display_chars(mut self, max_chars: usize) -> Self {
        self.max_display_chars = max_chars.max(1);
        self
    }

    /// Abort the remaining regions once a cycle has run this long
    pub fn with_cycle_budget(mut self, budget: Option<Duration>) -> Self {
        self.cycle_budget = budget;
        self
    }

    pub fn regions(&self) -> &RegionStore {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut RegionStore {
        &mut self.regions
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn perf(&self) -> &PerfLogger {
        &self.perf
    }

    pub fn change_threshold(&self) -> f64 {
        self.detector.threshold()
    }

    pub fn max_display_chars(&self) -> usize {
        self.max_display_chars
    }

    pub fn cycle_budget(&self) -> Option<Duration> {
        self.cycle_budget
    }

    /// Run one pass over all regions
    pub fn run_cycle(&mut self) -> CycleOutcome {
        if self.regions.enabled_count() == 0 {
            return CycleOutcome::Idle(IdleReason::NoEnabledRegions);
        }
        if !self.registry.read().is_ready() {
            return CycleOutcome::Idle(IdleReason::EngineNotReady);
        }

        let cycle_start = Instant::now();
        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(CaptureError::Unavailable(reason)) => {
                debug!("Capture skipped: {}", reason);
                return CycleOutcome::Idle(IdleReason::TargetUnavailable(reason));
            }
            Err(e) => {
                warn!("Capture of {} failed: {}", self.source.describe(), e);
                return CycleOutcome::Idle(IdleReason::TargetUnavailable(e.to_string()));
            }
        };

        self.perf.count_cycle();
        let snapshot = self.regions.snapshot();
        let mut report = CycleReport::default();

        for (idx, region) in snapshot.iter().enumerate() {
            if let Some(budget) = self.cycle_budget {
                if cycle_start.elapsed() >= budget {
                    report.aborted = snapshot.len() - idx;
                    warn!(
                        "Cycle exceeded {}ms budget, skipping {} region(s)",
                        budget.as_millis(),
                        report.aborted
                    );
                    break;
                }
            }

            let outcome = self.process_region(region, &frame, cycle_start);
            report.outcomes.push((region.id.clone(), outcome));
        }

        debug!(
            "Cycle done in {}ms: {} delivered, {} unchanged, {} empty",
            cycle_start.elapsed().as_millis(),
            report.count(RegionOutcome::Delivered),
            report.count(RegionOutcome::Unchanged),
            report.count(RegionOutcome::Empty)
        );

        CycleOutcome::Ran(report)
    }

    fn process_region(
        &mut self,
        snap: &RegionSnapshot,
        frame: &Frame,
        cycle_start: Instant,
    ) -> RegionOutcome {
        if !snap.enabled {
            return RegionOutcome::Disabled;
        }

        let rel = frame.relative_rect(&snap.rect);
        if !frame.contains(&rel) {
            debug!("Region {} lies outside the {:?} frame", snap.id, frame.size());
            return RegionOutcome::OutOfBounds;
        }
        let Some(crop) = frame.crop(&rel) else {
            debug!("Region {} could not be cropped", snap.id);
            return RegionOutcome::OutOfBounds;
        };

        let Some(region) = self.regions.get_mut(&snap.id) else {
            return RegionOutcome::Removed;
        };

        let score = ChangeDetector::score(&crop, region.last_image());
        if !self.detector.is_significant(score) {
            self.perf.count_skipped();
            return RegionOutcome::Unchanged;
        }

        // Adopt before OCR so a failing recognition is not retried on the same pixels
        region.adopt_image(crop);
        let Some(image) = region.last_image() else {
            return RegionOutcome::Removed;
        };

        let mut timer = StageTimer::new(cycle_start);
        timer.start_ocr();
        let result = match self.registry.read().process(image) {
            Ok(result) => result,
            Err(e) => {
                warn!("Region {}: recognition failed: {}", snap.id, e);
                self.perf.count_recognition_failure();
                return RegionOutcome::RecognitionFailed;
            }
        };

        if result.is_empty() {
            self.perf.count_empty();
            return RegionOutcome::Empty;
        }

        timer.start_translation();
        let translated = self.translator.translate(&result.text);
        if translated.failed {
            warn!("Region {}: showing translation error", snap.id);
            self.perf.count_translation_failure();
        }
        let timings = timer.finish();

        let Some(region) = self.regions.get_mut(&snap.id) else {
            return RegionOutcome::Removed;
        };
        region.deliver(truncate_for_display(&translated.text, self.max_display_chars));

        info!("[{}] {}", snap.id, timings);
        self.perf.record(snap.id.clone(), timings);
        RegionOutcome::Delivered
    }

    /// Close every region's sink and unload all engines
    pub fn shutdown(&mut self) {
        self.regions.clear();
        self.registry.read().unload_all();
        let c = self.perf.counters();
        info!(
            "Pipeline stopped after {} cycles ({} delivered, {} unchanged, {} empty, {} OCR / {} translation failures)",
            c.cycles,
            c.delivered,
            c.skipped_unchanged,
            c.empty_results,
            c.recognition_failures,
            c.translation_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScreenRect;
    use crate::testing::{EngineProbe, FakeEngine, FakeSource, FakeTranslator, RecordingSink};
    use crate::translation::TRANSLATION_ERROR;
    use crate::vision::{EngineId, EngineRegistry};
    use image::{DynamicImage, GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 800x600 window at screen (100, 100)
    fn window_image(fill: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(800, 600, Luma([fill])))
    }

    fn rect(left: i32, top: i32, width: u32, height: u32) -> ScreenRect {
        ScreenRect {
            left,
            top,
            width,
            height,
        }
    }

    struct Harness {
        orchestrator: PipelineOrchestrator,
        source: FakeSource,
        engine: EngineProbe,
        translations: Arc<AtomicUsize>,
    }

    fn harness(engine: FakeEngine, translator: FakeTranslator) -> Harness {
        harness_with(engine, translator, None)
    }

    fn harness_with(
        engine: FakeEngine,
        translator: FakeTranslator,
        budget: Option<Duration>,
    ) -> Harness {
        let source = FakeSource::new(window_image(40), (100, 100));
        let probe = engine.probe();
        let translations = translator.calls();

        let mut registry = EngineRegistry::default();
        registry.register(EngineId::lightweight(), Box::new(engine));
        registry.set_should_preprocess(false);

        let orchestrator = PipelineOrchestrator::new(
            Box::new(source.clone()),
            registry.into_shared(),
            TranslationService::new(Box::new(translator)),
        )
        .with_cycle_budget(budget);

        Harness {
            orchestrator,
            source,
            engine: probe,
            translations,
        }
    }

    fn add_region(h: &mut Harness, r: ScreenRect) -> (RegionId, RecordingSink) {
        let sink = RecordingSink::new();
        let id = h
            .orchestrator
            .regions_mut()
            .add(r, Box::new(sink.clone()))
            .unwrap();
        (id, sink)
    }

    fn report(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Ran(report) => report,
            other => panic!("expected a cycle to run, got {other:?}"),
        }
    }

    #[test]
    fn test_crop_uses_frame_relative_coordinates() {
        let mut h = harness(FakeEngine::new("Fake").with_text("テキスト"), FakeTranslator::new());
        let (id, sink) = add_region(&mut h, rect(150, 150, 200, 80));

        let r = report(h.orchestrator.run_cycle());
        assert_eq!(r.outcome_of(&id), Some(RegionOutcome::Delivered));
        assert_eq!(*h.engine.last_size.lock(), Some((200, 80)));
        assert_eq!(sink.texts(), vec!["EN[テキスト]".to_string()]);
        assert_eq!(h.source.captures(), 1);
    }

    #[test]
    fn test_out_of_bounds_region_is_skipped() {
        let mut h = harness(FakeEngine::new("Fake").with_text("x"), FakeTranslator::new());
        // Relative x = 750, so the right edge lands at 950 > 800
        let (id, sink) = add_region(&mut h, rect(850, 150, 200, 80));

        let r = report(h.orchestrator.run_cycle());
        assert_eq!(r.outcome_of(&id), Some(RegionOutcome::OutOfBounds));
        assert_eq!(h.engine.recognitions.load(Ordering::SeqCst), 0);
        assert!(sink.texts().is_empty());
    }

    #[test]
    fn test_identical_crops_recognized_once() {
        let mut h = harness(FakeEngine::new("Fake").with_text("同じ"), FakeTranslator::new());
        let (id, _sink) = add_region(&mut h, rect(150, 150, 200, 80));

        h.orchestrator.run_cycle();
        let second = report(h.orchestrator.run_cycle());

        assert_eq!(second.outcome_of(&id), Some(RegionOutcome::Unchanged));
        assert_eq!(h.engine.recognitions.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.perf().counters().skipped_unchanged, 1);
    }

    #[test]
    fn test_changed_crop_is_reprocessed() {
        let mut h = harness(FakeEngine::new("Fake").with_text("a"), FakeTranslator::new());
        add_region(&mut h, rect(150, 150, 200, 80));

        h.orchestrator.run_cycle();
        h.source.set_image(window_image(200));
        h.orchestrator.run_cycle();

        assert_eq!(h.engine.recognitions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_result_keeps_previous_text() {
        let engine = FakeEngine::new("Fake").with_script(vec![Ok("最初"), Ok("   ")]);
        let mut h = harness(engine, FakeTranslator::new());
        let (id, sink) = add_region(&mut h, rect(150, 150, 200, 80));

        h.orchestrator.run_cycle();
        h.source.set_image(window_image(220));
        let r = report(h.orchestrator.run_cycle());

        assert_eq!(r.outcome_of(&id), Some(RegionOutcome::Empty));
        assert_eq!(sink.texts(), vec!["EN[最初]".to_string()]);
        assert_eq!(h.translations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_region_does_not_stop_others() {
        let engine = FakeEngine::new("Fake").with_script(vec![Err("boom"), Ok("二番目")]);
        let mut h = harness(engine, FakeTranslator::new());
        let (first, first_sink) = add_region(&mut h, rect(150, 150, 200, 80));
        let (second, second_sink) = add_region(&mut h, rect(150, 300, 200, 80));

        let r = report(h.orchestrator.run_cycle());
        assert_eq!(r.outcome_of(&first), Some(RegionOutcome::RecognitionFailed));
        assert_eq!(r.outcome_of(&second), Some(RegionOutcome::Delivered));
        assert!(first_sink.texts().is_empty());
        assert_eq!(second_sink.texts(), vec!["EN[二番目]".to_string()]);
    }

    #[test]
    fn test_failed_recognition_is_not_retried_on_same_pixels() {
        let engine = FakeEngine::new("Fake").failing_recognition();
        let mut h = harness(engine, FakeTranslator::new());
        add_region(&mut h, rect(150, 150, 200, 80));

        h.orchestrator.run_cycle();
        h.orchestrator.run_cycle();
        assert_eq!(h.engine.recognitions.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.perf().counters().recognition_failures, 1);
    }

    #[test]
    fn test_translation_failure_delivers_sentinel() {
        let mut h = harness(FakeEngine::new("Fake").with_text("文"), FakeTranslator::failing());
        let (_, sink) = add_region(&mut h, rect(150, 150, 200, 80));

        h.orchestrator.run_cycle();
        assert_eq!(sink.texts(), vec![TRANSLATION_ERROR.to_string()]);
        assert_eq!(h.orchestrator.perf().counters().translation_failures, 1);
    }

    #[test]
    fn test_long_translation_is_truncated() {
        let long = "長".repeat(1200);
        let mut h = harness(FakeEngine::new("Fake").with_text(&long), FakeTranslator::new());
        let (_, sink) = add_region(&mut h, rect(150, 150, 200, 80));

        h.orchestrator.run_cycle();
        assert_eq!(sink.texts()[0].chars().count(), DEFAULT_MAX_CHARS);
    }

    #[test]
    fn test_idle_cycles() {
        let mut h = harness(FakeEngine::new("Fake").with_text("x"), FakeTranslator::new());
        assert_eq!(
            h.orchestrator.run_cycle(),
            CycleOutcome::Idle(IdleReason::NoEnabledRegions)
        );

        let (id, _) = add_region(&mut h, rect(150, 150, 200, 80));
        h.source.set_unavailable();
        assert!(matches!(
            h.orchestrator.run_cycle(),
            CycleOutcome::Idle(IdleReason::TargetUnavailable(_))
        ));

        h.orchestrator.regions_mut().set_enabled(&id, false).unwrap();
        assert_eq!(
            h.orchestrator.run_cycle(),
            CycleOutcome::Idle(IdleReason::NoEnabledRegions)
        );
        assert_eq!(h.engine.recognitions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_idle_without_engine() {
        let source = FakeSource::new(window_image(40), (100, 100));
        let mut orchestrator = PipelineOrchestrator::new(
            Box::new(source.clone()),
            EngineRegistry::default().into_shared(),
            TranslationService::new(Box::new(FakeTranslator::new())),
        );
        orchestrator
            .regions_mut()
            .add(rect(150, 150, 10, 10), Box::new(RecordingSink::new()))
            .unwrap();

        assert_eq!(
            orchestrator.run_cycle(),
            CycleOutcome::Idle(IdleReason::EngineNotReady)
        );
        assert_eq!(source.captures(), 0);
    }

    #[test]
    fn test_disabled_region_is_skipped() {
        let mut h = harness(FakeEngine::new("Fake").with_text("x"), FakeTranslator::new());
        let (off, off_sink) = add_region(&mut h, rect(150, 150, 200, 80));
        let (on, _) = add_region(&mut h, rect(150, 300, 200, 80));
        h.orchestrator.regions_mut().set_enabled(&off, false).unwrap();

        let r = report(h.orchestrator.run_cycle());
        assert_eq!(r.outcome_of(&off), Some(RegionOutcome::Disabled));
        assert_eq!(r.outcome_of(&on), Some(RegionOutcome::Delivered));
        assert!(off_sink.texts().is_empty());
    }

    #[test]
    fn test_cycle_budget_aborts_remaining_regions() {
        let engine = FakeEngine::new("Slow")
            .with_text("x")
            .with_delay(Duration::from_millis(30));
        let mut h = harness_with(engine, FakeTranslator::new(), Some(Duration::from_millis(10)));
        let (first, _) = add_region(&mut h, rect(150, 150, 200, 80));
        let (second, _) = add_region(&mut h, rect(150, 300, 200, 80));

        let r = report(h.orchestrator.run_cycle());
        assert_eq!(r.outcome_of(&first), Some(RegionOutcome::Delivered));
        assert_eq!(r.outcome_of(&second), None);
        assert_eq!(r.aborted, 1);
    }
}
