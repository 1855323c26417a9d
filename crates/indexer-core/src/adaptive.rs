//! Adaptive receipt-fetch concurrency — spec §4.4 ("detail floor").
//!
//! The limit is only re-evaluated every `adjustment_interval` (default 60s),
//! over the last `window` (default 20) completed blocks: +5 (capped) when
//! blocks are fast and sparsely matching, -3 (floored) when blocks are slow,
//! -1 on a milder slowdown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub struct AdaptiveConcurrencyConfig {
    pub initial_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub window: usize,
    pub adjustment_interval: Duration,
}

impl Default for AdaptiveConcurrencyConfig {
    fn default() -> Self {
        AdaptiveConcurrencyConfig {
            initial_limit: 10,
            min_limit: 2,
            max_limit: 50,
            window: 20,
            adjustment_interval: Duration::from_secs(60),
        }
    }
}

struct BlockSample {
    duration: Duration,
    total_txs: usize,
    filtered_txs: usize,
}

pub struct AdaptiveConcurrency {
    config: AdaptiveConcurrencyConfig,
    limit: AtomicUsize,
    samples: std::sync::Mutex<VecDeque<BlockSample>>,
    last_adjusted: std::sync::Mutex<Instant>,
}

impl AdaptiveConcurrency {
    pub fn new(config: AdaptiveConcurrencyConfig) -> Self {
        AdaptiveConcurrency {
            limit: AtomicUsize::new(config.initial_limit),
            samples: std::sync::Mutex::new(VecDeque::with_capacity(config.window)),
            last_adjusted: std::sync::Mutex::new(Instant::now()),
            config,
        }
    }

    pub fn current_limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Record a just-completed block's processing duration and its
    /// filtered/total transaction ratio, then adjust the limit if the
    /// configured interval has elapsed since the last adjustment.
    pub fn record_block(&self, duration: Duration, total_txs: usize, filtered_txs: usize) {
        {
            let mut samples = self.samples.lock().expect("adaptive concurrency mutex poisoned");
            if samples.len() == self.config.window {
                samples.pop_front();
            }
            samples.push_back(BlockSample {
                duration,
                total_txs,
                filtered_txs,
            });
        }
        self.maybe_adjust();
    }

    fn maybe_adjust(&self) {
        let mut last_adjusted = self
            .last_adjusted
            .lock()
            .expect("adaptive concurrency mutex poisoned");
        if last_adjusted.elapsed() < self.config.adjustment_interval {
            return;
        }
        let samples = self.samples.lock().expect("adaptive concurrency mutex poisoned");
        if samples.is_empty() {
            return;
        }
        let count = samples.len() as f64;
        let mean_duration_secs: f64 =
            samples.iter().map(|s| s.duration.as_secs_f64()).sum::<f64>() / count;
        let mean_success_rate: f64 = samples
            .iter()
            .map(|s| {
                if s.total_txs == 0 {
                    0.0
                } else {
                    s.filtered_txs as f64 / s.total_txs as f64
                }
            })
            .sum::<f64>()
            / count;
        drop(samples);

        let current = self.limit.load(Ordering::Relaxed);
        let next = Self::next_limit(current, mean_duration_secs, mean_success_rate, &self.config);
        self.limit.store(next, Ordering::Relaxed);
        *last_adjusted = Instant::now();
    }

    /// Pure adjustment rule from spec §4.4, isolated so it can be unit
    /// tested without racing real wall-clock timers.
    fn next_limit(
        current: usize,
        mean_duration_secs: f64,
        mean_success_rate: f64,
        config: &AdaptiveConcurrencyConfig,
    ) -> usize {
        if mean_duration_secs < 1.0 && mean_success_rate < 0.1 {
            (current + 5).min(config.max_limit)
        } else if mean_duration_secs > 5.0 {
            current.saturating_sub(3).max(config.min_limit)
        } else if mean_duration_secs > 2.0 {
            current.saturating_sub(1).max(config.min_limit)
        } else {
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_limit_when_fast_and_sparse() {
        let config = AdaptiveConcurrencyConfig::default();
        let next = AdaptiveConcurrency::next_limit(10, 0.2, 0.0125, &config);
        assert_eq!(next, 15);
    }

    #[test]
    fn lowers_limit_sharply_when_very_slow() {
        let config = AdaptiveConcurrencyConfig::default();
        let next = AdaptiveConcurrency::next_limit(10, 6.0, 0.5, &config);
        assert_eq!(next, 7);
    }

    #[test]
    fn lowers_limit_mildly_when_moderately_slow() {
        let config = AdaptiveConcurrencyConfig::default();
        let next = AdaptiveConcurrency::next_limit(10, 3.0, 0.5, &config);
        assert_eq!(next, 9);
    }

    #[test]
    fn limit_floors_and_caps() {
        let config = AdaptiveConcurrencyConfig::default();
        assert_eq!(
            AdaptiveConcurrency::next_limit(config.min_limit, 6.0, 0.5, &config),
            config.min_limit
        );
        assert_eq!(
            AdaptiveConcurrency::next_limit(config.max_limit, 0.2, 0.0, &config),
            config.max_limit
        );
    }

    #[test]
    fn record_block_adjusts_once_interval_elapses() {
        let config = AdaptiveConcurrencyConfig {
            adjustment_interval: Duration::from_secs(0),
            ..Default::default()
        };
        let adaptive = AdaptiveConcurrency::new(config);
        adaptive.record_block(Duration::from_millis(200), 400, 5);
        assert_eq!(adaptive.current_limit(), 15);
    }
}
