pub mod meter;
pub mod reporter;
pub mod settings;

pub use meter::{default_registry, Meter, MeterRegistry, MeterSnapshot};
pub use settings::ProducerSettings;

/// Name the delivery throughput meter is registered under.
/// Dashboards key off of this, so it should remain constant.
pub const PRODUCE_RATE_METER: &str = "ProduceRate";

/// Registry name of the metrics reporter actor.
pub const METRICS_REPORTER_NAME: &str = "drizzle.metrics.reporter";

/// Environment variable holding the log filter directives, e.g. `DRIZZLE_LOG=debug`.
pub const LOG_FILTER_ENV: &str = "DRIZZLE_LOG";

pub fn init_logging() {
    use std::io::stderr;
    use std::io::IsTerminal;
    use tracing_glog::Glog;
    use tracing_glog::GlogFields;
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Registry;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt = tracing_subscriber::fmt::Layer::default()
        .with_ansi(stderr().is_terminal())
        .with_writer(std::io::stderr)
        .event_format(Glog::default().with_timer(tracing_glog::LocalTime::default()))
        .fmt_fields(GlogFields::default().compact());

    if Registry::default().with(filter).with(fmt).try_init().is_err() {
        eprintln!("Logging registry already initialized");
    }
}
