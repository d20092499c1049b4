//! Throughput meters and the registry the metrics reporter reads from.
//!
//! A [`Meter`] is written from the hot path (`mark`) and read from the reporter's
//! schedule (`tick`, `snapshot`). Every field is atomic so neither side locks.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

/// Interval the moving averages expect `tick` to be called at.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Exponentially weighted moving average over a fixed window.
#[derive(Debug)]
struct Ewma {
    alpha: f64,
    uncounted: AtomicU64,
    /// f64 bits of the per-second rate
    rate: AtomicU64,
    initialized: AtomicBool,
}

impl Ewma {
    fn with_window_minutes(minutes: f64) -> Self {
        let tick = TICK_INTERVAL.as_secs_f64();
        Ewma {
            alpha: 1.0 - (-tick / 60.0 / minutes).exp(),
            uncounted: AtomicU64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
        }
    }

    fn update(&self, n: u64) {
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::Relaxed);
        let instant_rate = count as f64 / TICK_INTERVAL.as_secs_f64();

        if self.initialized.swap(true, Ordering::AcqRel) {
            let current = self.rate();
            let next = current + self.alpha * (instant_rate - current);
            self.rate.store(next.to_bits(), Ordering::Release);
        } else {
            self.rate.store(instant_rate.to_bits(), Ordering::Release);
        }
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }
}

/// Point-in-time view of a meter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub count: u64,
    pub rate1: f64,
    pub rate5: f64,
    pub rate15: f64,
    pub rate_mean: f64,
}

/// Counts events and tracks their rate since creation.
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    started: Instant,
}

impl Default for Meter {
    fn default() -> Self {
        Meter::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Meter {
            count: AtomicU64::new(0),
            m1: Ewma::with_window_minutes(1.0),
            m5: Ewma::with_window_minutes(5.0),
            m15: Ewma::with_window_minutes(15.0),
            started: Instant::now(),
        }
    }

    /// Record `n` events.
    pub fn mark(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Fold the events seen since the last tick into the moving averages.
    /// Must only be driven from one place, every [`TICK_INTERVAL`].
    pub fn tick(&self) {
        self.m1.tick();
        self.m5.tick();
        self.m15.tick();
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        let count = self.count();
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate_mean = if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        };

        MeterSnapshot {
            count,
            rate1: self.m1.rate(),
            rate5: self.m5.rate(),
            rate15: self.m15.rate(),
            rate_mean,
        }
    }
}

/// Named meters shared between the components that mark them and the reporter.
#[derive(Debug, Default)]
pub struct MeterRegistry {
    meters: RwLock<BTreeMap<String, Arc<Meter>>>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        MeterRegistry::default()
    }

    /// Return the meter registered under `name`, registering a new one if there is none.
    pub fn get_or_register(&self, name: &str) -> Arc<Meter> {
        if let Some(meter) = self
            .meters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            return meter.clone();
        }

        self.meters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Meter::new()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Meter>> {
        self.meters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn tick_all(&self) {
        for meter in self
            .meters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
        {
            meter.tick();
        }
    }

    /// Snapshots of every registered meter, ordered by name.
    pub fn snapshots(&self) -> Vec<(String, MeterSnapshot)> {
        self.meters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, meter)| (name.clone(), meter.snapshot()))
            .collect()
    }
}

/// The process-wide registry.
pub fn default_registry() -> Arc<MeterRegistry> {
    static REGISTRY: OnceLock<Arc<MeterRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(MeterRegistry::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_accumulates_count() {
        let meter = Meter::new();
        meter.mark(1);
        meter.mark(4);
        assert_eq!(meter.count(), 5);
        assert_eq!(meter.snapshot().count, 5);
    }

    #[test]
    fn first_tick_seeds_the_rate() {
        let meter = Meter::new();
        meter.mark(50);
        meter.tick();

        let snapshot = meter.snapshot();
        assert!((snapshot.rate1 - 10.0).abs() < 1e-9);
        assert!((snapshot.rate5 - 10.0).abs() < 1e-9);
        assert!((snapshot.rate15 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn idle_ticks_decay_the_rate() {
        let meter = Meter::new();
        meter.mark(50);
        meter.tick();
        meter.tick();

        let snapshot = meter.snapshot();
        assert!(snapshot.rate1 < 10.0);
        assert!(snapshot.rate1 > 0.0);
        // the longer window forgets more slowly
        assert!(snapshot.rate15 > snapshot.rate1);
        assert_eq!(snapshot.count, 50);
    }

    #[test]
    fn concurrent_marks_are_not_lost() {
        let meter = Arc::new(Meter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let meter = meter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        meter.mark(1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(meter.count(), 8000);
    }

    #[test]
    fn registry_returns_the_same_meter_for_a_name() {
        let registry = MeterRegistry::new();
        let first = registry.get_or_register("ProduceRate");
        let second = registry.get_or_register("ProduceRate");
        first.mark(3);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.get("ProduceRate").unwrap().count(), 3);
        assert!(registry.get("Other").is_none());
    }

    #[test]
    fn snapshots_are_sorted_by_name() {
        let registry = MeterRegistry::new();
        registry.get_or_register("b").mark(2);
        registry.get_or_register("a").mark(1);

        let names: Vec<_> = registry.snapshots().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
