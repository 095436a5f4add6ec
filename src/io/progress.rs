//! Progress and cooperative cancellation.
//!
//! The worker reports through [`ProgressReporter`]: `update(ratio)` returns
//! `false` once cancellation has been requested, and `log` carries phase
//! messages. Cancellation is only observed at chunk and tile boundaries.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Result, TileError};

pub trait ProgressReporter: Send + Sync {
    /// Report completion in `[0, 1]`. Returns `false` when the run should stop.
    fn update(&self, ratio: f32) -> bool;

    fn log(&self, message: &str) {
        log::info!("{}", message);
    }
}

/// Report `ratio` and turn a cancellation request into [`TileError::Cancelled`].
pub fn report(progress: &dyn ProgressReporter, ratio: f32) -> Result<()> {
    if progress.update(ratio.clamp(0.0, 1.0)) {
        Ok(())
    } else {
        Err(TileError::Cancelled)
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Reporter that never cancels and discards updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn update(&self, _ratio: f32) -> bool {
        true
    }

    fn log(&self, message: &str) {
        log::debug!("{}", message);
    }
}

/// Reporter that writes to the `log` facade in 10% steps.
#[derive(Debug, Default)]
pub struct LogProgress {
    token: CancellationToken,
    last_step: Mutex<i32>,
}

impl LogProgress {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            last_step: Mutex::new(-1),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl ProgressReporter for LogProgress {
    fn update(&self, ratio: f32) -> bool {
        let step = (ratio * 10.0).floor() as i32;
        let mut last = self.last_step.lock();
        if step > *last {
            *last = step;
            log::info!("progress {:>3.0}%", ratio * 100.0);
        }
        !self.token.is_cancelled()
    }
}

/// Messages delivered to an interactive thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(f32),
    Log(String),
}

/// Reporter that forwards events over a channel to another thread.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: Sender<ProgressEvent>,
    token: CancellationToken,
}

impl ChannelProgress {
    pub fn new(token: CancellationToken) -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender, token }, receiver)
    }
}

impl ProgressReporter for ChannelProgress {
    fn update(&self, ratio: f32) -> bool {
        // a dropped receiver means nobody is listening, not a cancel request
        let _ = self.sender.send(ProgressEvent::Progress(ratio));
        !self.token.is_cancelled()
    }

    fn log(&self, message: &str) {
        log::info!("{}", message);
        let _ = self.sender.send(ProgressEvent::Log(message.to_string()));
    }
}

/// Maps a child's `[0, 1]` onto `[base, base + span]` of its parent.
pub struct ScopedProgress<'a> {
    parent: &'a dyn ProgressReporter,
    base: f32,
    span: f32,
}

impl<'a> ScopedProgress<'a> {
    pub fn new(parent: &'a dyn ProgressReporter, base: f32, span: f32) -> Self {
        Self { parent, base, span }
    }
}

impl ProgressReporter for ScopedProgress<'_> {
    fn update(&self, ratio: f32) -> bool {
        self.parent.update(self.base + ratio.clamp(0.0, 1.0) * self.span)
    }

    fn log(&self, message: &str) {
        self.parent.log(message);
    }
}

/// Combines per-part progress into `Σ share × fraction`.
///
/// Parts may report from different worker threads.
pub struct WeightedProgress<'a> {
    parent: &'a dyn ProgressReporter,
    shares: Vec<f32>,
    fractions: Mutex<Vec<f32>>,
}

impl<'a> WeightedProgress<'a> {
    /// `weights` are normalized to shares summing to one.
    pub fn new(parent: &'a dyn ProgressReporter, weights: &[u64]) -> Self {
        let total: u64 = weights.iter().sum();
        let shares = weights
            .iter()
            .map(|w| {
                if total == 0 {
                    1.0 / weights.len().max(1) as f32
                } else {
                    *w as f32 / total as f32
                }
            })
            .collect();
        Self {
            parent,
            shares,
            fractions: Mutex::new(vec![0.0; weights.len()]),
        }
    }

    pub fn part(&self, index: usize) -> WeightedPart<'_, 'a> {
        WeightedPart { owner: self, index }
    }

    fn update_part(&self, index: usize, ratio: f32) -> bool {
        let combined = {
            let mut fractions = self.fractions.lock();
            if let Some(slot) = fractions.get_mut(index) {
                *slot = ratio.clamp(0.0, 1.0);
            }
            fractions
                .iter()
                .zip(&self.shares)
                .map(|(fraction, share)| fraction * share)
                .sum::<f32>()
        };
        self.parent.update(combined)
    }
}

pub struct WeightedPart<'w, 'a> {
    owner: &'w WeightedProgress<'a>,
    index: usize,
}

impl ProgressReporter for WeightedPart<'_, '_> {
    fn update(&self, ratio: f32) -> bool {
        self.owner.update_part(self.index, ratio)
    }

    fn log(&self, message: &str) {
        self.owner.parent.log(message);
    }
}

/// Logs "`<event>` in `<seconds>`s" when a phase completes.
#[derive(Debug)]
pub struct PhaseTimer {
    started: Instant,
}

impl PhaseTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self, progress: &dyn ProgressReporter, event: &str) {
        progress.log(&format!(
            "{} in {:.3}s",
            event,
            self.started.elapsed().as_secs_f64()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording {
        values: Mutex<Vec<f32>>,
        stop_after: usize,
    }

    impl ProgressReporter for Recording {
        fn update(&self, ratio: f32) -> bool {
            let mut values = self.values.lock();
            values.push(ratio);
            values.len() < self.stop_after
        }
    }

    #[test]
    fn test_report_maps_cancel_to_error() {
        let progress = Recording {
            values: Mutex::new(Vec::new()),
            stop_after: 2,
        };
        assert!(report(&progress, 0.1).is_ok());
        assert!(matches!(report(&progress, 0.2), Err(TileError::Cancelled)));
    }

    #[test]
    fn test_log_progress_observes_token() {
        let token = CancellationToken::new();
        let progress = LogProgress::new(token.clone());
        assert!(progress.update(0.5));
        token.cancel();
        assert!(!progress.update(0.6));
    }

    #[test]
    fn test_channel_progress_delivers_events() {
        let token = CancellationToken::new();
        let (progress, receiver) = ChannelProgress::new(token.clone());
        let handle = std::thread::spawn(move || {
            progress.log("estimating");
            progress.update(0.25)
        });
        assert!(handle.join().unwrap());
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![
                ProgressEvent::Log("estimating".to_string()),
                ProgressEvent::Progress(0.25)
            ]
        );
    }

    #[test]
    fn test_scoped_progress_maps_range() {
        let parent = Recording {
            values: Mutex::new(Vec::new()),
            stop_after: usize::MAX,
        };
        let scoped = ScopedProgress::new(&parent, 0.5, 0.25);
        scoped.update(0.0);
        scoped.update(1.0);
        scoped.update(2.0);
        assert_eq!(*parent.values.lock(), vec![0.5, 0.75, 0.75]);
    }

    #[test]
    fn test_weighted_progress_sums_shares() {
        let parent = Recording {
            values: Mutex::new(Vec::new()),
            stop_after: usize::MAX,
        };
        let weighted = WeightedProgress::new(&parent, &[300, 100]);
        weighted.part(0).update(1.0);
        weighted.part(1).update(0.5);
        let values = parent.values.lock();
        assert!((values[0] - 0.75).abs() < 1e-6);
        assert!((values[1] - 0.875).abs() < 1e-6);
    }
}
