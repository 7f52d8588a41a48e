use std::fmt;
use std::time::{Duration, Instant};

use crate::OutcomeKind;

/// Weight of the newest sample in the exponentially weighted rate.
pub const SMOOTHING_ALPHA: f64 = 0.3;
/// Rates below this (items/sec) are treated as a stall.
pub const MIN_RATE: f64 = 0.001;
pub const MAX_ETA: Duration = Duration::from_secs(7 * 24 * 3600);

const LOG_INTERVAL: Duration = Duration::from_secs(15);
// Floor for the gap between two completions; bursts of cache hits land in the same instant.
const MIN_SAMPLE_GAP: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    Unknown,
    Remaining(Duration),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Unknown => write!(f, "unknown"),
            Eta::Remaining(left) => write!(f, "{}", format_duration(*left)),
        }
    }
}

/// Read-only view of the tracker after the latest outcome.
///
/// `succeeded`, `failed`, `cache_hits` and `cache_misses` accumulate across
/// phases; `completed` and `total` belong to the current phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub phase: String,
    pub completed: u64,
    pub total: u64,
    /// Items that ended with a result, whether fetched or served from cache.
    pub succeeded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Smoothed items per second.
    pub rate: f64,
    pub eta: Eta,
}

impl ProgressSnapshot {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        percentage(self.succeeded, self.succeeded + self.failed)
    }

    pub fn failure_rate(&self) -> f64 {
        percentage(self.failed, self.succeeded + self.failed)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        percentage(self.cache_hits, self.cache_hits + self.cache_misses)
    }
}

/// Totals for the final report, accumulated over every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub succeeded: u64,
    pub cached: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total(&self) -> u64 {
        self.succeeded + self.cached + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        percentage(self.succeeded + self.cached, self.total())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        let speed = if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        };
        write!(
            f,
            "{} items in {} | {:.1} items/sec | {} fetched, {} cached, {} failed | {:.1}% success",
            self.total(),
            format_duration(self.elapsed),
            speed,
            self.succeeded,
            self.cached,
            self.failed,
            self.success_rate()
        )
    }
}

/// Running statistics over terminal outcomes.
///
/// Mutated only through [`ProgressTracker::on_outcome`] and
/// [`ProgressTracker::set_phase`]; callers sharing a tracker wrap it in a lock.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    phase: String,
    total: u64,
    completed: u64,
    report: RunReport,
    cache_misses: u64,
    rate: Option<f64>,
    run_started: Instant,
    phase_started: Instant,
    last_completion: Option<Instant>,
    last_logged: Instant,
    last_logged_step: u64,
}

impl ProgressTracker {
    pub fn new(phase: impl Into<String>, total: u64) -> Self {
        Self::new_at(phase, total, Instant::now())
    }

    pub fn new_at(phase: impl Into<String>, total: u64, now: Instant) -> Self {
        Self {
            phase: phase.into(),
            total,
            completed: 0,
            report: RunReport::default(),
            cache_misses: 0,
            rate: None,
            run_started: now,
            phase_started: now,
            last_completion: None,
            last_logged: now,
            last_logged_step: 0,
        }
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn set_phase(&mut self, phase: impl Into<String>, total: u64) {
        self.set_phase_at(phase, total, Instant::now());
    }

    /// Starts a new phase: the rate estimate and phase counters reset, run totals carry over.
    pub fn set_phase_at(&mut self, phase: impl Into<String>, total: u64, now: Instant) {
        self.phase = phase.into();
        self.total = total;
        self.completed = 0;
        self.rate = None;
        self.phase_started = now;
        self.last_completion = None;
        self.last_logged = now;
        self.last_logged_step = 0;
    }

    /// Grows or shrinks the current phase total, e.g. when a resumed run already has items done.
    pub fn set_completed(&mut self, completed: u64, total: u64) {
        self.completed = completed;
        self.total = total;
    }

    /// Replaces the run totals with outcomes recorded before this tracker
    /// existed, e.g. the terminal items of a restored session. Every earlier
    /// non-cached outcome counts as a cache miss.
    pub fn seed_totals(&mut self, totals: RunReport) {
        self.report.succeeded = totals.succeeded;
        self.report.cached = totals.cached;
        self.report.failed = totals.failed;
        self.cache_misses = totals.succeeded + totals.failed;
    }

    pub fn on_outcome(&mut self, kind: OutcomeKind) {
        self.on_outcome_at(kind, Instant::now());
    }

    pub fn on_outcome_at(&mut self, kind: OutcomeKind, now: Instant) {
        self.completed += 1;
        match kind {
            OutcomeKind::Cached => self.report.cached += 1,
            OutcomeKind::Succeeded => {
                self.report.succeeded += 1;
                self.cache_misses += 1;
            }
            OutcomeKind::Failed => {
                self.report.failed += 1;
                self.cache_misses += 1;
            }
        }

        let reference = self.last_completion.unwrap_or(self.phase_started);
        let gap = now
            .saturating_duration_since(reference)
            .as_secs_f64()
            .max(MIN_SAMPLE_GAP);
        let instant_rate = 1.0 / gap;
        self.rate = Some(match self.rate {
            Some(previous) => SMOOTHING_ALPHA * instant_rate + (1.0 - SMOOTHING_ALPHA) * previous,
            None => instant_rate,
        });
        self.last_completion = Some(now);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        let rate = self.effective_rate(now);
        ProgressSnapshot {
            phase: self.phase.clone(),
            completed: self.completed,
            total: self.total,
            succeeded: self.report.succeeded + self.report.cached,
            failed: self.report.failed,
            cache_hits: self.report.cached,
            cache_misses: self.cache_misses,
            rate,
            eta: self.eta(rate),
        }
    }

    pub fn report(&self) -> RunReport {
        self.report_at(Instant::now())
    }

    pub fn report_at(&self, now: Instant) -> RunReport {
        RunReport {
            elapsed: now.saturating_duration_since(self.run_started),
            ..self.report
        }
    }

    /// Returns a log line when progress crossed a 5% step, 15 seconds passed
    /// since the last line, or the phase completed.
    pub fn progress_line(&mut self, now: Instant) -> Option<String> {
        let step = (self.total / 20).max(1);
        let current_step = self.completed / step;
        let due = current_step > self.last_logged_step
            || now.saturating_duration_since(self.last_logged) >= LOG_INTERVAL
            || (self.total > 0 && self.completed == self.total);
        if !due {
            return None;
        }
        self.last_logged = now;
        self.last_logged_step = current_step;

        let snap = self.snapshot_at(now);
        Some(format!(
            "{}: {}/{} ({:.1}%) | {:.1}% success | {:.1}% cached | {:.1}/sec | ETA {}",
            snap.phase,
            snap.completed,
            snap.total,
            snap.percent_complete(),
            snap.success_rate(),
            snap.cache_hit_rate(),
            snap.rate,
            snap.eta
        ))
    }

    fn effective_rate(&self, now: Instant) -> f64 {
        let (Some(rate), Some(last)) = (self.rate, self.last_completion) else {
            return 0.0;
        };
        let quiet = now.saturating_duration_since(last).as_secs_f64();
        // No completion for longer than the smoothed interval: the rate cannot be higher than 1/quiet.
        if quiet > 1.0 / rate {
            rate.min(1.0 / quiet)
        } else {
            rate
        }
    }

    fn eta(&self, rate: f64) -> Eta {
        let remaining = self.total.saturating_sub(self.completed);
        if remaining == 0 {
            return Eta::Remaining(Duration::ZERO);
        }
        if !rate.is_finite() || rate < MIN_RATE {
            return Eta::Unknown;
        }
        let secs = remaining as f64 / rate;
        if secs > MAX_ETA.as_secs_f64() {
            Eta::Unknown
        } else {
            Eta::Remaining(Duration::from_secs_f64(secs))
        }
    }
}

/// Formats as `42s`, `3m 5s` or `2h 10m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_like_a_clock() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 5s");
        assert_eq!(format_duration(Duration::from_secs(7800)), "2h 10m");
    }

    #[test]
    fn progress_lines_are_throttled_to_steps() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::new_at("fetching", 100, t0);
        tracker.on_outcome_at(OutcomeKind::Succeeded, t0 + Duration::from_millis(10));
        assert!(tracker
            .progress_line(t0 + Duration::from_millis(10))
            .is_none());

        for i in 2..=5 {
            tracker.on_outcome_at(OutcomeKind::Succeeded, t0 + Duration::from_millis(10 * i));
        }
        let line = tracker
            .progress_line(t0 + Duration::from_millis(50))
            .expect("5% step reached");
        assert!(line.starts_with("fetching: 5/100"));
        assert!(tracker
            .progress_line(t0 + Duration::from_millis(60))
            .is_none());
        assert!(tracker.progress_line(t0 + Duration::from_secs(20)).is_some());
    }
}
