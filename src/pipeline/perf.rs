//! Per-stage timing and pipeline counters

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use super::region::RegionId;

/// Number of delivery records kept
pub const HISTORY_LEN: usize = 64;

/// Stage durations of one region's trip through the pipeline, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTimings {
    /// From the start of the cycle (capture) until OCR began
    pub capture_to_ocr_ms: u64,
    pub ocr_ms: u64,
    pub translation_ms: u64,
    pub total_ms: u64,
}

impl fmt::Display for CycleTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OCR: {}ms | Trans: {}ms | Total: {}ms",
            self.ocr_ms, self.translation_ms, self.total_ms
        )
    }
}

/// Stopwatch for the stages of a single region
#[derive(Debug, Clone, Copy)]
pub struct StageTimer {
    cycle_start: Instant,
    ocr_start: Option<Instant>,
    translation_start: Option<Instant>,
}

impl StageTimer {
    pub fn new(cycle_start: Instant) -> Self {
        Self {
            cycle_start,
            ocr_start: None,
            translation_start: None,
        }
    }

    pub fn start_ocr(&mut self) {
        self.ocr_start = Some(Instant::now());
    }

    pub fn start_translation(&mut self) {
        self.translation_start = Some(Instant::now());
    }

    /// Close the timer; stages that never started count as zero
    pub fn finish(&self) -> CycleTimings {
        let end = Instant::now();
        let ms = |from: Instant, to: Instant| to.saturating_duration_since(from).as_millis() as u64;

        let ocr_start = self.ocr_start.unwrap_or(end);
        let translation_start = self.translation_start.unwrap_or(end);

        CycleTimings {
            capture_to_ocr_ms: ms(self.cycle_start, ocr_start),
            ocr_ms: ms(ocr_start, translation_start),
            translation_ms: ms(translation_start, end),
            total_ms: ms(self.cycle_start, end),
        }
    }
}

/// Running totals since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfCounters {
    pub cycles: u64,
    pub skipped_unchanged: u64,
    pub empty_results: u64,
    pub recognition_failures: u64,
    pub translation_failures: u64,
    pub delivered: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerfRecord {
    pub region: RegionId,
    pub timings: CycleTimings,
}

#[derive(Debug)]
pub struct PerfLogger {
    records: VecDeque<PerfRecord>,
    counters: PerfCounters,
}

impl Default for PerfLogger {
    fn default() -> Self {
        Self {
            records: VecDeque::with_capacity(HISTORY_LEN),
            counters: PerfCounters::default(),
        }
    }
}

impl PerfLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery
    pub fn record(&mut self, region: RegionId, timings: CycleTimings) {
        if self.records.len() == HISTORY_LEN {
            self.records.pop_front();
        }
        self.records.push_back(PerfRecord { region, timings });
        self.counters.delivered += 1;
    }

    pub fn count_cycle(&mut self) {
        self.counters.cycles += 1;
    }

    pub fn count_skipped(&mut self) {
        self.counters.skipped_unchanged += 1;
    }

    pub fn count_empty(&mut self) {
        self.counters.empty_results += 1;
    }

    pub fn count_recognition_failure(&mut self) {
        self.counters.recognition_failures += 1;
    }

    pub fn count_translation_failure(&mut self) {
        self.counters.translation_failures += 1;
    }

    pub fn counters(&self) -> PerfCounters {
        self.counters
    }

    /// Newest first
    pub fn recent(&self) -> impl Iterator<Item = &PerfRecord> {
        self.records.iter().rev()
    }

    /// Mean of the kept records
    pub fn average(&self) -> Option<CycleTimings> {
        let n = self.records.len() as u64;
        if n == 0 {
            return None;
        }

        let sum = self.records.iter().fold(CycleTimings::default(), |acc, r| CycleTimings {
            capture_to_ocr_ms: acc.capture_to_ocr_ms + r.timings.capture_to_ocr_ms,
            ocr_ms: acc.ocr_ms + r.timings.ocr_ms,
            translation_ms: acc.translation_ms + r.timings.translation_ms,
            total_ms: acc.total_ms + r.timings.total_ms,
        });

        Some(CycleTimings {
            capture_to_ocr_ms: sum.capture_to_ocr_ms / n,
            ocr_ms: sum.ocr_ms / n,
            translation_ms: sum.translation_ms / n,
            total_ms: sum.total_ms / n,
        })
    }
}
