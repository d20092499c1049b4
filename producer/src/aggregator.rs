//! Drains delivery outcomes, keeps the throughput meter current and prints a
//! rolling per-second success count.

use crate::channel::Outcomes;
use crate::message::{DeliveryFailure, SendOutcome};
use drizzle::Meter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Length of one reporting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Success count since the window opened.
///
/// The boundary is only checked when a success arrives, so a window is reported
/// late when successes are sparse and a window without successes is never
/// reported at all.
#[derive(Debug)]
pub struct RollingWindow {
    count: u64,
    started: Instant,
}

impl RollingWindow {
    pub fn starting_at(now: Instant) -> Self {
        RollingWindow {
            count: 0,
            started: now,
        }
    }

    /// Count one success arriving at `now`. Returns the closed window's total,
    /// including this success, once a full window has elapsed.
    pub fn record(&mut self, now: Instant) -> Option<u64> {
        self.count += 1;

        if now.saturating_duration_since(self.started) >= WINDOW {
            let closed = self.count;
            self.count = 0;
            self.started = now;
            Some(closed)
        } else {
            None
        }
    }

    /// Successes counted in the window that is still open.
    pub fn pending(&self) -> u64 {
        self.count
    }
}

/// Where the aggregator sends its human-readable progress.
pub trait ProgressSink: Send + 'static {
    fn window_closed(&mut self, successes: u64);
    fn delivery_failed(&mut self, failure: &DeliveryFailure);
}

/// Plain text lines on stdout.
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn window_closed(&mut self, successes: u64) {
        println!("Per Second {successes}");
    }

    fn delivery_failed(&mut self, failure: &DeliveryFailure) {
        println!("{failure}");
    }
}

impl ProgressSink for Box<dyn ProgressSink> {
    fn window_closed(&mut self, successes: u64) {
        (**self).window_closed(successes)
    }

    fn delivery_failed(&mut self, failure: &DeliveryFailure) {
        (**self).delivery_failed(failure)
    }
}

pub struct AckAggregator<S: ProgressSink = ConsoleProgress> {
    outcomes: Outcomes,
    meter: Arc<Meter>,
    window: RollingWindow,
    progress: S,
}

impl<S: ProgressSink> AckAggregator<S> {
    pub fn new(outcomes: Outcomes, meter: Arc<Meter>, progress: S) -> Self {
        AckAggregator {
            outcomes,
            meter,
            window: RollingWindow::starting_at(Instant::now()),
            progress,
        }
    }

    /// Wait for whichever outcome channel is ready first. Neither channel is
    /// polled with priority. `None` once both channels are closed.
    pub async fn next_outcome(&mut self) -> Option<SendOutcome> {
        tokio::select! {
            Some(failure) = self.outcomes.failures.recv() => Some(SendOutcome::Failure(failure)),
            Some(delivered) = self.outcomes.successes.recv() => Some(SendOutcome::Success(delivered)),
            else => None,
        }
    }

    /// Account for one outcome observed at `now`.
    ///
    /// Failures count toward the throughput meter but not toward the printed
    /// per-second figure, which only counts successes.
    pub fn record(&mut self, outcome: SendOutcome, now: Instant) {
        self.meter.mark(1);

        match outcome {
            SendOutcome::Failure(failure) => {
                debug!(key = failure.message.key, "{failure}");
                self.progress.delivery_failed(&failure);
            }
            SendOutcome::Success(_) => {
                if let Some(successes) = self.window.record(now) {
                    debug!("Per Second {successes}");
                    self.progress.window_closed(successes);
                }
            }
        }
    }

    /// Successes counted in the still-open window.
    pub fn pending(&self) -> u64 {
        self.window.pending()
    }

    /// Drain outcomes for the life of the process. A failure never ends the loop;
    /// only both channels closing does.
    pub async fn run(mut self) {
        while let Some(outcome) = self.next_outcome().await {
            self.record(outcome, Instant::now());
        }
        debug!("Outcome channels closed, aggregator exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::publish_channel;
    use crate::message::{Delivered, ProduceMessage};
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorded {
        windows: Arc<Mutex<Vec<u64>>>,
        failures: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressSink for Recorded {
        fn window_closed(&mut self, successes: u64) {
            self.windows.lock().unwrap().push(successes);
        }

        fn delivery_failed(&mut self, failure: &DeliveryFailure) {
            self.failures.lock().unwrap().push(failure.error.clone());
        }
    }

    fn success(key: u64) -> SendOutcome {
        SendOutcome::Success(Delivered {
            message: ProduceMessage::new("t1", key),
            partition: 0,
            offset: key as i64,
        })
    }

    fn failure(key: u64) -> SendOutcome {
        SendOutcome::Failure(DeliveryFailure {
            message: ProduceMessage::new("t1", key),
            error: format!("rejected {key}"),
        })
    }

    #[test]
    fn window_closes_at_exactly_one_second() {
        let start = Instant::now();
        let mut window = RollingWindow::starting_at(start);

        assert_eq!(window.record(start + Duration::from_millis(999)), None);
        assert_eq!(window.record(start + Duration::from_secs(1)), Some(2));
        assert_eq!(window.pending(), 0);
    }

    #[test]
    fn sparse_window_reports_late_and_idle_windows_never_report() {
        let start = Instant::now();
        let mut window = RollingWindow::starting_at(start);

        // nothing arrives for five seconds, then one success closes one window
        assert_eq!(window.record(start + Duration::from_secs(5)), Some(1));
        assert_eq!(window.record(start + Duration::from_millis(5500)), None);
    }

    #[tokio::test]
    async fn failures_mark_the_meter_but_not_the_window() {
        let (client, _broker) = publish_channel(1);
        let meter = Arc::new(Meter::new());
        let recorded = Recorded::default();
        let mut aggregator = AckAggregator::new(client.outcomes, meter.clone(), recorded.clone());

        let start = Instant::now();
        aggregator.record(failure(0), start + Duration::from_millis(10));
        aggregator.record(success(1), start + Duration::from_millis(20));
        aggregator.record(failure(2), start + Duration::from_millis(1500));
        aggregator.record(success(3), start + Duration::from_millis(1600));

        assert_eq!(meter.count(), 4);
        assert_eq!(*recorded.windows.lock().unwrap(), vec![2]);
        assert_eq!(
            *recorded.failures.lock().unwrap(),
            vec!["rejected 0".to_string(), "rejected 2".to_string()]
        );
    }

    #[tokio::test]
    async fn neither_channel_starves_the_other() {
        let (client, broker) = publish_channel(1);
        let meter = Arc::new(Meter::new());
        let mut aggregator = AckAggregator::new(client.outcomes, meter, Recorded::default());

        for key in 0..200 {
            broker.reports.report(success(key));
            broker.reports.report(failure(key));
        }

        let mut seen_failure_early = false;
        for _ in 0..100 {
            if let Some(SendOutcome::Failure(_)) = aggregator.next_outcome().await {
                seen_failure_early = true;
            }
        }
        assert!(seen_failure_early);
    }

    #[tokio::test]
    async fn run_exits_once_both_channels_close() {
        let (client, broker) = publish_channel(1);
        let meter = Arc::new(Meter::new());
        let aggregator = AckAggregator::new(client.outcomes, meter.clone(), Recorded::default());

        broker.reports.report(success(0));
        broker.reports.report(failure(1));
        drop(broker);

        aggregator.run().await;
        assert_eq!(meter.count(), 2);
    }

    proptest! {
        #[test]
        fn reported_plus_pending_equals_successes(
            arrivals in proptest::collection::vec((0u64..400, any::<bool>()), 0..300)
        ) {
            let (client, _broker) = publish_channel(1);
            let meter = Arc::new(Meter::new());
            let recorded = Recorded::default();
            let mut aggregator = AckAggregator::new(client.outcomes, meter.clone(), recorded.clone());

            let mut now = Instant::now();
            let mut successes = 0u64;
            for (gap_ms, ok) in &arrivals {
                now += Duration::from_millis(*gap_ms);
                if *ok {
                    successes += 1;
                    aggregator.record(success(successes), now);
                } else {
                    aggregator.record(failure(0), now);
                }
            }

            let reported: u64 = recorded.windows.lock().unwrap().iter().sum();
            prop_assert_eq!(reported + aggregator.pending(), successes);
            prop_assert_eq!(meter.count(), arrivals.len() as u64);
        }
    }
}
