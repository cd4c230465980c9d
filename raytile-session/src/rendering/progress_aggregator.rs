//! Merges progress reports from independently running workers.
//!
//! Samples are keyed by worker, event name and task. The first report for a
//! key fixes its start time; later reports refresh the timer but only move
//! the fraction forward.
//! Ray counts arrive as each worker's cumulative total, so the latest value
//! per worker replaces the previous one and the pool total is summed on read.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct EventRecord {
    start: Instant,
    last_update: Instant,
    progress: f64,
}

#[derive(Debug, Default)]
struct WorkerRecord {
    events: BTreeMap<(String, Option<u64>), EventRecord>,
    rays: u64,
}

#[derive(Debug, Default)]
pub struct ProgressAggregator {
    workers: BTreeMap<usize, WorkerRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventProgress {
    pub event: String,
    pub task_id: Option<u64>,
    /// In `[0, 1]`
    pub progress: f64,
    /// Time from the first report of this key to its latest one.
    pub timer_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkerProgress {
    pub worker_id: usize,
    /// Latest cumulative ray count reported by this worker.
    pub rays: u64,
    /// Sum of the timers of every event this worker reported.
    pub timer_ms: f64,
    pub events: Vec<EventProgress>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub workers: Vec<WorkerProgress>,
    pub total_rays: u64,
}

impl ProgressSnapshot {
    pub fn rays_per_second(&self, elapsed: Duration) -> f64 {
        let seconds = elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.total_rays as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn worker(&self, worker_id: usize) -> Option<&WorkerProgress> {
        self.workers.iter().find(|w| w.worker_id == worker_id)
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        worker_id: usize,
        event: &str,
        task_id: Option<u64>,
        progress: f64,
        rays: u64,
    ) {
        self.record_at(worker_id, event, task_id, progress, rays, Instant::now());
    }

    pub fn record_at(
        &mut self,
        worker_id: usize,
        event: &str,
        task_id: Option<u64>,
        progress: f64,
        rays: u64,
        now: Instant,
    ) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };

        let worker = self.workers.entry(worker_id).or_default();
        worker.rays = rays;

        let record = worker
            .events
            .entry((event.to_string(), task_id))
            .or_insert(EventRecord {
                start: now,
                last_update: now,
                progress,
            });
        record.last_update = record.last_update.max(now);
        record.progress = record.progress.max(progress);
    }

    pub fn total_rays(&self) -> u64 {
        self.workers.values().map(|w| w.rays).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn clear(&mut self) {
        self.workers.clear();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let workers: Vec<WorkerProgress> = self
            .workers
            .iter()
            .map(|(&worker_id, record)| {
                let events: Vec<EventProgress> = record
                    .events
                    .iter()
                    .map(|((event, task_id), sample)| EventProgress {
                        event: event.clone(),
                        task_id: *task_id,
                        progress: sample.progress,
                        timer_ms: sample
                            .last_update
                            .saturating_duration_since(sample.start)
                            .as_secs_f64()
                            * 1000.0,
                    })
                    .collect();
                WorkerProgress {
                    worker_id,
                    rays: record.rays,
                    timer_ms: events.iter().map(|e| e.timer_ms).sum(),
                    events,
                }
            })
            .collect();

        ProgressSnapshot {
            total_rays: workers.iter().map(|w| w.rays).sum(),
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_fixed_at_first_sample() {
        let mut agg = ProgressAggregator::new();
        let t0 = Instant::now();

        agg.record_at(0, "render", Some(1), 0.1, 10, t0);
        agg.record_at(0, "render", Some(1), 0.5, 50, t0 + Duration::from_millis(300));

        let snap = agg.snapshot();
        let event = &snap.workers[0].events[0];
        assert!((event.timer_ms - 300.0).abs() < 1e-6);
        assert_eq!(event.progress, 0.5);
    }

    #[test]
    fn fraction_never_decreases() {
        let mut agg = ProgressAggregator::new();
        let t0 = Instant::now();

        agg.record_at(2, "render", Some(4), 0.8, 10, t0);
        agg.record_at(2, "render", Some(4), 0.3, 20, t0 + Duration::from_millis(5));

        let snap = agg.snapshot();
        let event = &snap.workers[0].events[0];
        assert_eq!(event.progress, 0.8);
        // The late report still refreshes the timer and the ray count.
        assert!((event.timer_ms - 5.0).abs() < 1e-6);
        assert_eq!(snap.workers[0].rays, 20);
    }

    #[test]
    fn progress_is_clamped() {
        let mut agg = ProgressAggregator::new();
        agg.record(0, "render", None, 7.5, 0);
        agg.record(1, "render", None, f64::NAN, 0);

        let snap = agg.snapshot();
        assert_eq!(snap.workers[0].events[0].progress, 1.0);
        assert_eq!(snap.workers[1].events[0].progress, 0.0);
    }

    #[test]
    fn rays_take_latest_cumulative_value_per_worker() {
        let mut agg = ProgressAggregator::new();

        agg.record(0, "render", Some(0), 0.5, 100);
        agg.record(0, "render", Some(0), 1.0, 250);
        agg.record(0, "render", Some(5), 0.2, 300);
        agg.record(1, "render", Some(1), 0.5, 40);

        let snap = agg.snapshot();
        assert_eq!(snap.worker(0).unwrap().rays, 300);
        assert_eq!(snap.worker(1).unwrap().rays, 40);
        assert_eq!(snap.total_rays, 340);
        assert_eq!(agg.total_rays(), 340);
    }

    #[test]
    fn keys_are_independent_per_event_and_task() {
        let mut agg = ProgressAggregator::new();
        agg.record(0, "buildIndex", None, 1.0, 0);
        agg.record(0, "render", Some(0), 0.25, 0);
        agg.record(0, "render", Some(1), 0.75, 0);

        let snap = agg.snapshot();
        assert_eq!(snap.workers.len(), 1);
        assert_eq!(snap.workers[0].events.len(), 3);
    }

    #[test]
    fn worker_timer_sums_event_timers() {
        let mut agg = ProgressAggregator::new();
        let t0 = Instant::now();
        agg.record_at(0, "render", Some(0), 0.0, 0, t0);
        agg.record_at(0, "render", Some(0), 1.0, 0, t0 + Duration::from_millis(100));
        agg.record_at(0, "render", Some(1), 0.0, 0, t0 + Duration::from_millis(100));
        agg.record_at(0, "render", Some(1), 1.0, 0, t0 + Duration::from_millis(150));

        let snap = agg.snapshot();
        assert!((snap.workers[0].timer_ms - 150.0).abs() < 1e-6);
    }

    #[test]
    fn rays_per_second_handles_zero_elapsed() {
        let snap = ProgressSnapshot {
            workers: Vec::new(),
            total_rays: 1000,
        };
        assert_eq!(snap.rays_per_second(Duration::ZERO), 0.0);
        assert_eq!(snap.rays_per_second(Duration::from_secs(2)), 500.0);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut agg = ProgressAggregator::new();
        agg.record(0, "render", Some(0), 0.5, 10);
        agg.clear();
        assert!(agg.is_empty());
        assert_eq!(agg.snapshot(), ProgressSnapshot::default());
    }
}
