//! Timer-driven pipeline thread
//!
//! The orchestrator lives on its own thread and is only touched from there.
//! Region edits arrive as [`PipelineCommand`]s and are applied between
//! cycles, so no cycle ever sees a half-applied change. Ticks that fire while
//! a cycle is running are dropped rather than queued.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::region::{RegionError, RegionId};
use super::{CycleOutcome, IdleReason, PipelineOrchestrator};
use crate::capture::ScreenRect;
use crate::display::DisplaySink;

/// Shortest accepted polling interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

type Reply<T> = Sender<Result<T, RegionError>>;

/// Builds a region's display sink once its id is known
pub type SinkFactory = Box<dyn FnOnce(&RegionId) -> Box<dyn DisplaySink> + Send>;

/// Requests handled on the pipeline thread between cycles
pub enum PipelineCommand {
    Add {
        rect: ScreenRect,
        make_sink: SinkFactory,
        reply: Reply<RegionId>,
    },
    Remove {
        id: RegionId,
        reply: Reply<()>,
    },
    SetRect {
        id: RegionId,
        rect: ScreenRect,
        reply: Reply<()>,
    },
    SetEnabled {
        id: RegionId,
        enabled: bool,
        reply: Reply<()>,
    },
    SetInterval(Duration),
    Shutdown,
}

/// Owns the orchestrator and its polling loop
pub struct Scheduler;

impl Scheduler {
    /// Move `orchestrator` onto a new thread and start polling
    pub fn spawn(orchestrator: PipelineOrchestrator, interval: Duration) -> Result<SchedulerHandle> {
        let (commands, rx) = unbounded();
        let interval = interval.max(MIN_INTERVAL);

        let thread = std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || {
                info!("Pipeline thread starting ({}ms interval)", interval.as_millis());
                let orchestrator = run_loop(orchestrator, rx, interval);
                info!("Pipeline thread exiting");
                orchestrator
            })
            .context("Failed to spawn pipeline thread")?;

        Ok(SchedulerHandle {
            commands,
            thread: Some(thread),
        })
    }
}

fn run_loop(
    mut orchestrator: PipelineOrchestrator,
    commands: Receiver<PipelineCommand>,
    mut interval: Duration,
) -> PipelineOrchestrator {
    let mut ticker = tick(interval);
    let mut last_idle: Option<IdleReason> = None;

    loop {
        let mut reschedule = None;

        select! {
            recv(commands) -> msg => match msg {
                Ok(PipelineCommand::Shutdown) | Err(_) => break,
                Ok(PipelineCommand::SetInterval(new)) => {
                    reschedule = Some(new.max(MIN_INTERVAL));
                }
                Ok(cmd) => apply(&mut orchestrator, cmd),
            },
            recv(ticker) -> _ => {
                match orchestrator.run_cycle() {
                    CycleOutcome::Idle(reason) => {
                        if last_idle.as_ref() != Some(&reason) {
                            debug!("Pipeline idle: {:?}", reason);
                        }
                        last_idle = Some(reason);
                    }
                    CycleOutcome::Ran(_) => last_idle = None,
                }

                let dropped = ticker.try_iter().count();
                if dropped > 0 {
                    debug!("Dropped {} late tick(s)", dropped);
                }
            },
        }

        if let Some(new) = reschedule {
            if new != interval {
                info!("Pipeline interval set to {}ms", new.as_millis());
                interval = new;
                ticker = tick(interval);
            }
        }
    }

    orchestrator.shutdown();
    orchestrator
}

fn apply(orchestrator: &mut PipelineOrchestrator, cmd: PipelineCommand) {
    let regions = orchestrator.regions_mut();
    let delivered = match cmd {
        PipelineCommand::Add {
            rect,
            make_sink,
            reply,
        } => reply.send(regions.add_with(rect, make_sink)).is_ok(),
        PipelineCommand::Remove { id, reply } => reply.send(regions.remove(&id)).is_ok(),
        PipelineCommand::SetRect { id, rect, reply } => reply.send(regions.set_rect(&id, rect)).is_ok(),
        PipelineCommand::SetEnabled { id, enabled, reply } => {
            reply.send(regions.set_enabled(&id, enabled)).is_ok()
        }
        PipelineCommand::SetInterval(_) | PipelineCommand::Shutdown => true,
    };
    if !delivered {
        debug!("Command issuer went away before the reply");
    }
}

/// Control handle for a running [`Scheduler`]
pub struct SchedulerHandle {
    commands: Sender<PipelineCommand>,
    thread: Option<JoinHandle<PipelineOrchestrator>>,
}

impl SchedulerHandle {
    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> PipelineCommand) -> Result<T> {
        let (reply, rx) = bounded(1);
        self.commands
            .send(build(reply))
            .map_err(|_| crossbeam_channel::SendError(()))
            .context("Pipeline thread is not running")?;
        let result = rx.recv().context("Pipeline thread dropped the request")?;
        Ok(result?)
    }

    /// Track a new region; returns its id once the pipeline has accepted it
    pub fn add_region(&self, rect: ScreenRect, sink: Box<dyn DisplaySink>) -> Result<RegionId> {
        self.add_region_with(rect, Box::new(move |_: &RegionId| sink))
    }

    /// Like [`add_region`](Self::add_region), building the sink from the new id
    pub fn add_region_with(&self, rect: ScreenRect, make_sink: SinkFactory) -> Result<RegionId> {
        self.request(|reply| PipelineCommand::Add {
            rect,
            make_sink,
            reply,
        })
    }

    pub fn remove_region(&self, id: &RegionId) -> Result<()> {
        let id = id.clone();
        self.request(|reply| PipelineCommand::Remove { id, reply })
    }

    pub fn set_region_rect(&self, id: &RegionId, rect: ScreenRect) -> Result<()> {
        let id = id.clone();
        self.request(|reply| PipelineCommand::SetRect { id, rect, reply })
    }

    pub fn set_region_enabled(&self, id: &RegionId, enabled: bool) -> Result<()> {
        let id = id.clone();
        self.request(|reply| PipelineCommand::SetEnabled { id, enabled, reply })
    }

    pub fn set_interval(&self, interval: Duration) {
        if self.commands.send(PipelineCommand::SetInterval(interval)).is_err() {
            warn!("Pipeline thread is not running; interval not changed");
        }
    }

    /// Check if the pipeline thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and hand back the orchestrator
    pub fn shutdown(mut self) -> Option<PipelineOrchestrator> {
        self.stop()
    }

    fn stop(&mut self) -> Option<PipelineOrchestrator> {
        let _ = self.commands.send(PipelineCommand::Shutdown);
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(orchestrator) => Some(orchestrator),
            Err(_) => {
                warn!("Pipeline thread panicked");
                None
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, FakeSource, FakeTranslator, RecordingSink};
    use crate::translation::TranslationService;
    use crate::vision::{EngineId, EngineRegistry};
    use image::{DynamicImage, GrayImage, Luma};
    use std::time::Instant;

    fn orchestrator(source: &FakeSource) -> PipelineOrchestrator {
        let mut registry = EngineRegistry::default();
        registry.register(
            EngineId::lightweight(),
            Box::new(FakeEngine::new("Fake").with_text("字幕")),
        );
        registry.set_should_preprocess(false);

        PipelineOrchestrator::new(
            Box::new(source.clone()),
            registry.into_shared(),
            TranslationService::new(Box::new(FakeTranslator::new())),
        )
    }

    fn source() -> FakeSource {
        FakeSource::new(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(400, 300, Luma([90]))),
            (0, 0),
        )
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_added_region_receives_text() {
        let source = source();
        let handle = Scheduler::spawn(orchestrator(&source), Duration::from_millis(10)).unwrap();

        let sink = RecordingSink::new();
        let id = handle
            .add_region(ScreenRect::new(10, 10, 100, 40).unwrap(), Box::new(sink.clone()))
            .unwrap();
        assert_eq!(id.as_str().len(), 8);
        assert!(wait_for(|| !sink.texts().is_empty()));
        assert_eq!(sink.texts()[0], "EN[字幕]");

        let orchestrator = handle.shutdown().unwrap();
        assert!(orchestrator.perf().counters().delivered >= 1);
        assert!(orchestrator.regions().is_empty());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_region_commands_report_errors() {
        let source = source();
        let handle = Scheduler::spawn(orchestrator(&source), Duration::from_millis(10)).unwrap();

        let bad = ScreenRect {
            left: 0,
            top: 0,
            width: 0,
            height: 10,
        };
        assert!(handle.add_region(bad, Box::new(RecordingSink::new())).is_err());

        let missing = RegionId::from("00000000");
        assert!(handle.remove_region(&missing).is_err());
        assert!(handle.set_region_enabled(&missing, false).is_err());

        let sink = RecordingSink::new();
        let id = handle
            .add_region(ScreenRect::new(0, 0, 50, 50).unwrap(), Box::new(sink.clone()))
            .unwrap();
        handle
            .set_region_rect(&id, ScreenRect::new(5, 5, 50, 50).unwrap())
            .unwrap();
        handle.remove_region(&id).unwrap();
        assert!(sink.is_closed());
    }

    #[test]
    fn test_late_ticks_are_dropped() {
        let source = source();
        source.set_capture_delay(Duration::from_millis(40));
        let handle = Scheduler::spawn(orchestrator(&source), Duration::from_millis(10)).unwrap();
        handle
            .add_region(ScreenRect::new(0, 0, 50, 50).unwrap(), Box::new(RecordingSink::new()))
            .unwrap();

        std::thread::sleep(Duration::from_millis(250));
        let orchestrator = handle.shutdown().unwrap();

        // 250ms of 40ms captures leaves room for at most ~7 cycles
        let cycles = orchestrator.perf().counters().cycles;
        assert!(cycles >= 1);
        assert!(cycles <= 8, "ran {cycles} cycles");
    }

    #[test]
    fn test_drop_stops_thread() {
        let source = source();
        let handle = Scheduler::spawn(orchestrator(&source), Duration::from_millis(10)).unwrap();
        assert!(handle.is_running());
        handle.set_interval(Duration::from_millis(1));
        drop(handle);
    }
}
