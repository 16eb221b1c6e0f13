//! Frame-budget cooperative task runner and the fetch pump.
//!
//! One [`FrameScheduler::run_frame`] call per rendered frame drains the
//! tier queues in priority order until 70% of the frame budget has
//! elapsed; the last 30% is reserved for rendering work outside this
//! scheduler. The [`FetchPump`] paces loader dispatch on its own smaller
//! budget so fetches trickle out instead of bursting.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use vantage_octree::{MAX_STREAM_DEPTH, MIN_STREAM_DEPTH};

use crate::clock::Clock;

/// Priority tiers, highest first. Lower tiers only run with budget left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskTier {
    Camera,
    LodUpdate,
    MeshCreation,
    Background,
}

impl TaskTier {
    const ALL: [TaskTier; 4] = [
        TaskTier::Camera,
        TaskTier::LodUpdate,
        TaskTier::MeshCreation,
        TaskTier::Background,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// A task failed; the frame continues.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

/// What a task asks the scheduler to do with it after running.
pub enum TaskOutcome<T> {
    /// Finished; discard.
    Done,
    /// Not finished; run again next frame with this payload.
    Requeue(T),
}

struct ScheduledTask<T> {
    tier: TaskTier,
    description: &'static str,
    payload: T,
}

/// Handed to each running task so it can queue follow-up work.
///
/// Spawned tasks join their tier's queue immediately, so a camera-tier
/// task can queue an LOD update that still runs later in the same frame.
pub struct TaskSpawner<T> {
    spawned: Vec<ScheduledTask<T>>,
}

impl<T> TaskSpawner<T> {
    /// Queue a follow-up task.
    pub fn spawn(&mut self, tier: TaskTier, description: &'static str, payload: T) {
        self.spawned.push(ScheduledTask {
            tier,
            description,
            payload,
        });
    }
}

/// Accounting for one frame's scheduler run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Tasks run to a terminal outcome.
    pub executed: usize,
    /// Tasks whose execute returned an error.
    pub failed: usize,
    /// Tasks that yielded and were carried to the next frame.
    pub requeued: usize,
    /// Tasks left queued because the ceiling was reached.
    pub deferred: usize,
}

/// Cooperative tiered task queue with an explicit per-frame ceiling.
///
/// Tasks are plain data; the caller supplies the execute function each
/// frame, so all mutation happens in one place under `&mut self` of the
/// owner.
pub struct FrameScheduler<T> {
    queues: [VecDeque<ScheduledTask<T>>; 4],
    budget: Duration,
    ceiling: Duration,
}

impl<T> FrameScheduler<T> {
    /// `budget` is the full frame allowance; `ceiling_fraction` the share
    /// of it this scheduler may consume (the rest belongs to rendering).
    pub fn new(budget: Duration, ceiling_fraction: f32) -> Self {
        Self {
            queues: [const { VecDeque::new() }; 4],
            budget,
            ceiling: budget.mul_f32(ceiling_fraction),
        }
    }

    /// Queue a task for the next `run_frame`.
    pub fn enqueue(&mut self, tier: TaskTier, description: &'static str, payload: T) {
        self.queues[tier.index()].push_back(ScheduledTask {
            tier,
            description,
            payload,
        });
    }

    /// Tasks waiting at `tier`.
    pub fn queued_at(&self, tier: TaskTier) -> usize {
        self.queues[tier.index()].len()
    }

    /// Total tasks waiting across all tiers.
    pub fn queued_total(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Full frame allowance.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Drain the tiers in priority order until the ceiling elapses.
    ///
    /// The ceiling is checked before every task, so no new task starts
    /// past it; an already-running task is never interrupted (tasks that
    /// need interruption yield via [`TaskOutcome::Requeue`]). Requeued
    /// payloads land in a carry buffer and only rejoin their tier queue
    /// after the frame, so a yielding task cannot run twice in one frame.
    /// A task error is logged and counted; it never aborts the frame.
    pub fn run_frame<F>(&mut self, clock: &dyn Clock, mut execute: F) -> FrameReport
    where
        F: FnMut(TaskTier, T, &mut TaskSpawner<T>) -> Result<TaskOutcome<T>, TaskError>,
    {
        let deadline = clock.now() + self.ceiling;
        let mut report = FrameReport::default();
        let mut carry: Vec<ScheduledTask<T>> = Vec::new();
        let mut spawner = TaskSpawner {
            spawned: Vec::new(),
        };

        'tiers: for tier in TaskTier::ALL {
            while let Some(task) = self.queues[tier.index()].pop_front() {
                if clock.now() >= deadline {
                    self.queues[tier.index()].push_front(task);
                    break 'tiers;
                }
                let outcome = execute(task.tier, task.payload, &mut spawner);
                for spawned in spawner.spawned.drain(..) {
                    self.queues[spawned.tier.index()].push_back(spawned);
                }
                match outcome {
                    Ok(TaskOutcome::Done) => report.executed += 1,
                    Ok(TaskOutcome::Requeue(payload)) => {
                        report.requeued += 1;
                        carry.push(ScheduledTask {
                            tier: task.tier,
                            description: task.description,
                            payload,
                        });
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(task = task.description, %err, "frame task failed");
                    }
                }
            }
        }

        report.deferred = self.queued_total();
        if report.deferred > 0 {
            debug!(deferred = report.deferred, "frame ceiling reached");
        }
        for task in carry {
            self.queues[task.tier.index()].push_back(task);
        }
        report
    }
}

/// What the fetch pump asks its owner to dispatch this iteration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchPlan {
    /// Depth whose queue to drain this iteration.
    pub depth: u8,
    /// Maximum entries to dequeue for that depth.
    pub max_batch: usize,
}

/// Independently-paced drain of the load queues.
///
/// Each iteration serves exactly one depth, rotating 2 → 3 → 4, with a
/// small batch cap, so loader dispatch stays smooth under its own fetch
/// budget rather than bursting inside the frame loop.
pub struct FetchPump {
    budget: Duration,
    max_batch: usize,
    next_depth: u8,
    last_run: Option<Duration>,
}

impl FetchPump {
    pub fn new(budget: Duration, max_batch: usize) -> Self {
        Self {
            budget,
            max_batch,
            next_depth: MIN_STREAM_DEPTH,
            last_run: None,
        }
    }

    /// Per-iteration fetch allowance.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Decide the depth and batch size for this iteration, advancing the
    /// rotation. Returns `None` while the previous iteration's budget
    /// window has not elapsed.
    pub fn next_plan(&mut self, now: Duration) -> Option<FetchPlan> {
        if let Some(last) = self.last_run {
            if now - last < self.budget {
                return None;
            }
        }
        self.last_run = Some(now);

        let depth = self.next_depth;
        self.next_depth = if depth >= MAX_STREAM_DEPTH {
            MIN_STREAM_DEPTH
        } else {
            depth + 1
        };
        Some(FetchPlan {
            depth,
            max_batch: self.max_batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    /// Higher tiers fully drain before lower tiers start.
    #[test]
    fn test_tier_ordering() {
        let clock = ManualClock::new();
        let mut scheduler = FrameScheduler::new(Duration::from_millis(16), 0.7);
        scheduler.enqueue(TaskTier::Background, "bg", 4u32);
        scheduler.enqueue(TaskTier::MeshCreation, "mesh", 3);
        scheduler.enqueue(TaskTier::Camera, "camera", 1);
        scheduler.enqueue(TaskTier::LodUpdate, "lod", 2);

        let mut order = Vec::new();
        let report = scheduler.run_frame(&clock, |_, payload, _| {
            order.push(payload);
            Ok(TaskOutcome::Done)
        });
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(report.executed, 4);
        assert_eq!(report.deferred, 0);
    }

    /// No new task starts once 70% of a 16 ms budget has elapsed.
    #[test]
    fn test_ceiling_stops_new_tasks() {
        let clock = ManualClock::new();
        let mut scheduler = FrameScheduler::new(Duration::from_millis(16), 0.7);
        for _ in 0..20 {
            scheduler.enqueue(TaskTier::LodUpdate, "lod", ());
        }

        // Each task takes 1 ms; the ceiling is 11.2 ms, so tasks start at
        // t = 0..=11 and the twelfth check (t = 12 ms) refuses.
        let report = scheduler.run_frame(&clock, |_, (), _| {
            clock.advance_ms(1);
            Ok(TaskOutcome::Done)
        });
        assert_eq!(report.executed, 12);
        assert_eq!(report.deferred, 8);
        assert_eq!(scheduler.queued_total(), 8);
    }

    /// A requeued task does not run again within the same frame.
    #[test]
    fn test_requeue_carries_to_next_frame() {
        let clock = ManualClock::new();
        let mut scheduler = FrameScheduler::new(Duration::from_millis(16), 0.7);
        scheduler.enqueue(TaskTier::MeshCreation, "mesh", 0u32);

        let mut runs = 0;
        scheduler.run_frame(&clock, |_, payload, _| {
            runs += 1;
            Ok(TaskOutcome::Requeue(payload))
        });
        assert_eq!(runs, 1);
        assert_eq!(scheduler.queued_at(TaskTier::MeshCreation), 1);

        scheduler.run_frame(&clock, |_, _, _| {
            runs += 1;
            Ok(TaskOutcome::Done)
        });
        assert_eq!(runs, 2);
        assert_eq!(scheduler.queued_total(), 0);
    }

    /// A failing task is isolated; later tasks still run.
    #[test]
    fn test_task_error_does_not_abort_frame() {
        let clock = ManualClock::new();
        let mut scheduler = FrameScheduler::new(Duration::from_millis(16), 0.7);
        scheduler.enqueue(TaskTier::LodUpdate, "bad", 1u32);
        scheduler.enqueue(TaskTier::LodUpdate, "good", 2);

        let mut seen = Vec::new();
        let report = scheduler.run_frame(&clock, |_, payload, _| {
            seen.push(payload);
            if payload == 1 {
                Err(TaskError("boom".into()))
            } else {
                Ok(TaskOutcome::Done)
            }
        });
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
    }

    /// A task spawned into a lower tier runs later in the same frame.
    #[test]
    fn test_spawned_task_runs_same_frame() {
        let clock = ManualClock::new();
        let mut scheduler = FrameScheduler::new(Duration::from_millis(16), 0.7);
        scheduler.enqueue(TaskTier::Camera, "camera", 1u32);

        let mut order = Vec::new();
        scheduler.run_frame(&clock, |tier, payload, spawner| {
            order.push(payload);
            if tier == TaskTier::Camera {
                spawner.spawn(TaskTier::LodUpdate, "lod", 2);
            }
            Ok(TaskOutcome::Done)
        });
        assert_eq!(order, vec![1, 2]);
        assert_eq!(scheduler.queued_total(), 0);
    }

    /// The pump serves one depth per iteration, rotating 2, 3, 4.
    #[test]
    fn test_fetch_pump_rotates_depths() {
        let mut pump = FetchPump::new(Duration::from_millis(8), 2);
        let mut now = Duration::ZERO;
        let mut depths = Vec::new();
        for _ in 0..4 {
            let plan = pump.next_plan(now).unwrap();
            assert_eq!(plan.max_batch, 2);
            depths.push(plan.depth);
            now += Duration::from_millis(8);
        }
        assert_eq!(depths, vec![2, 3, 4, 2]);
    }

    /// The pump refuses to run again inside its budget window.
    #[test]
    fn test_fetch_pump_rate_limited() {
        let mut pump = FetchPump::new(Duration::from_millis(8), 2);
        assert!(pump.next_plan(Duration::ZERO).is_some());
        assert!(pump.next_plan(Duration::from_millis(3)).is_none());
        assert!(pump.next_plan(Duration::from_millis(8)).is_some());
    }
}
