//! Resolution of the `producers.properties` file into typed producer settings.
//!
//! The file is a flat list of `key=value` lines. Everything the load loop needs
//! is resolved up front; any failure here is fatal to startup.

use anyhow::{anyhow, bail, Context};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PROPERTIES_FILE: &str = "producers.properties";

/// Upper bound on `num_partitions`.
pub const MAX_PARTITIONS: u32 = 100_000;

pub const BROKER_CONNECT_KEY: &str = "broker_connect";
pub const TOPIC_KEY: &str = "topic";
pub const NUM_PARTITIONS_KEY: &str = "num_partitions";
pub const SLEEP_TIME_KEY: &str = "sleep_time";
pub const GRAPHITE_CONNECT_KEY: &str = "graphite_connect";
pub const FLUSH_INTERVAL_KEY: &str = "flush_interval";
pub const GENERATORS_KEY: &str = "generators";
pub const QUEUE_CAPACITY_KEY: &str = "queue_capacity";
pub const FLUSH_MSG_COUNT_KEY: &str = "flush_msg_count";
pub const FLUSH_FREQUENCY_KEY: &str = "flush_frequency";
pub const METRICS_PREFIX_KEY: &str = "metrics_prefix";

const KNOWN_KEYS: [&str; 11] = [
    BROKER_CONNECT_KEY,
    TOPIC_KEY,
    NUM_PARTITIONS_KEY,
    SLEEP_TIME_KEY,
    GRAPHITE_CONNECT_KEY,
    FLUSH_INTERVAL_KEY,
    GENERATORS_KEY,
    QUEUE_CAPACITY_KEY,
    FLUSH_MSG_COUNT_KEY,
    FLUSH_FREQUENCY_KEY,
    METRICS_PREFIX_KEY,
];

/// Raw key/value pairs read from a properties source.
pub type Properties = BTreeMap<String, String>;

/// Fully resolved configuration for a producer run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProducerSettings {
    pub broker_connect: String,
    pub topic: String,
    pub num_partitions: u32,
    /// Pause between two submissions of one generator. Zero means no pause.
    #[serde(serialize_with = "human_duration")]
    pub sleep_time: Duration,
    pub graphite_connect: String,
    #[serde(serialize_with = "human_duration")]
    pub flush_interval: Duration,
    pub generators: usize,
    pub queue_capacity: usize,
    pub flush_msg_count: usize,
    #[serde(serialize_with = "human_duration")]
    pub flush_frequency: Duration,
    pub metrics_prefix: String,
}

fn human_duration<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

/// Parse properties text. Blank lines and lines starting with `#` or `!` are skipped,
/// and only the first `=` separates key from value.
pub fn parse_properties(text: &str) -> anyhow::Result<Properties> {
    let mut properties = Properties::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("line {}: expected key=value, found \"{line}\"", index + 1))?;

        let key = key.trim();
        if key.is_empty() {
            bail!("line {}: property has an empty key", index + 1);
        }

        properties.insert(key.to_string(), value.trim().to_string());
    }

    Ok(properties)
}

pub fn load_properties<P: AsRef<Path>>(path: P) -> anyhow::Result<Properties> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Expected to find properties at {}", path.display()))?;

    parse_properties(&text).with_context(|| format!("Malformed properties file {}", path.display()))
}

fn required<'a>(properties: &'a Properties, key: &str) -> anyhow::Result<&'a str> {
    match properties.get(key) {
        Some(value) if !value.is_empty() => Ok(value.as_str()),
        Some(_) => bail!("property \"{key}\" must not be empty"),
        None => bail!("missing required property \"{key}\""),
    }
}

fn parse_duration(key: &str, value: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("property \"{key}\" is not a valid duration: \"{value}\""))
}

fn parse_positive(key: &str, value: &str) -> anyhow::Result<usize> {
    let parsed: usize = value
        .parse()
        .with_context(|| format!("property \"{key}\" is not an integer: \"{value}\""))?;
    if parsed == 0 {
        bail!("property \"{key}\" must be greater than zero");
    }
    Ok(parsed)
}

fn optional<T>(
    properties: &Properties,
    key: &str,
    default: T,
    parse: impl Fn(&str, &str) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    match properties.get(key) {
        Some(value) => parse(key, value),
        None => Ok(default),
    }
}

impl ProducerSettings {
    pub fn from_properties(properties: &Properties) -> anyhow::Result<Self> {
        for key in properties.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("Ignoring unknown property \"{key}\"");
            }
        }

        let num_partitions = parse_positive(
            NUM_PARTITIONS_KEY,
            required(properties, NUM_PARTITIONS_KEY)?,
        )?;
        let num_partitions = u32::try_from(num_partitions)
            .ok()
            .filter(|n| *n <= MAX_PARTITIONS)
            .ok_or_else(|| {
                anyhow!("property \"{NUM_PARTITIONS_KEY}\" must be at most {MAX_PARTITIONS}")
            })?;

        let flush_interval = parse_duration(
            FLUSH_INTERVAL_KEY,
            required(properties, FLUSH_INTERVAL_KEY)?,
        )?;
        if flush_interval.is_zero() {
            bail!("property \"{FLUSH_INTERVAL_KEY}\" must be greater than zero");
        }

        Ok(ProducerSettings {
            broker_connect: required(properties, BROKER_CONNECT_KEY)?.to_string(),
            topic: required(properties, TOPIC_KEY)?.to_string(),
            num_partitions,
            sleep_time: parse_duration(SLEEP_TIME_KEY, required(properties, SLEEP_TIME_KEY)?)?,
            graphite_connect: required(properties, GRAPHITE_CONNECT_KEY)?.to_string(),
            flush_interval,
            generators: optional(properties, GENERATORS_KEY, 1, parse_positive)?,
            queue_capacity: optional(properties, QUEUE_CAPACITY_KEY, 1024, parse_positive)?,
            flush_msg_count: optional(properties, FLUSH_MSG_COUNT_KEY, 8000, parse_positive)?,
            flush_frequency: optional(
                properties,
                FLUSH_FREQUENCY_KEY,
                Duration::from_millis(30),
                parse_duration,
            )?,
            metrics_prefix: optional(properties, METRICS_PREFIX_KEY, "metrics".to_string(), |_, v| {
                Ok(v.to_string())
            })?,
        })
    }

    /// Read and resolve the properties file at `path`.
    pub fn resolve<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let properties = load_properties(&path)?;
        Self::from_properties(&properties)
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# producer settings
zookeeper_connect=localhost:2181
broker_connect = localhost:9092
topic=t1
num_partitions=1
sleep_time=10ms
graphite_connect=localhost:2003
flush_interval=1s
";

    #[test]
    fn resolves_required_keys_and_defaults() {
        let properties = parse_properties(SAMPLE).unwrap();
        let settings = ProducerSettings::from_properties(&properties).unwrap();

        assert_eq!(settings.broker_connect, "localhost:9092");
        assert_eq!(settings.topic, "t1");
        assert_eq!(settings.num_partitions, 1);
        assert_eq!(settings.sleep_time, Duration::from_millis(10));
        assert_eq!(settings.flush_interval, Duration::from_secs(1));
        assert_eq!(settings.generators, 1);
        assert_eq!(settings.queue_capacity, 1024);
        assert_eq!(settings.flush_msg_count, 8000);
        assert_eq!(settings.flush_frequency, Duration::from_millis(30));
        assert_eq!(settings.metrics_prefix, "metrics");
    }

    #[test]
    fn zero_sleep_time_is_allowed() {
        let text = SAMPLE.replace("sleep_time=10ms", "sleep_time=0s");
        let settings = ProducerSettings::from_properties(&parse_properties(&text).unwrap()).unwrap();
        assert!(settings.sleep_time.is_zero());
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let text = SAMPLE.replace("topic=t1\n", "");
        let err = ProducerSettings::from_properties(&parse_properties(&text).unwrap()).unwrap_err();
        assert!(err.to_string().contains("\"topic\""), "{err}");
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let text = SAMPLE.replace("sleep_time=10ms", "sleep_time=soon");
        let err = ProducerSettings::from_properties(&parse_properties(&text).unwrap()).unwrap_err();
        assert!(err.to_string().contains("sleep_time"), "{err}");
    }

    #[test]
    fn zero_partitions_are_rejected() {
        let text = SAMPLE.replace("num_partitions=1", "num_partitions=0");
        assert!(ProducerSettings::from_properties(&parse_properties(&text).unwrap()).is_err());
    }

    #[test]
    fn partition_count_is_bounded() {
        let text = SAMPLE.replace("num_partitions=1", &format!("num_partitions={MAX_PARTITIONS}"));
        let settings = ProducerSettings::from_properties(&parse_properties(&text).unwrap()).unwrap();
        assert_eq!(settings.num_partitions, MAX_PARTITIONS);

        for too_many in ["100001", "4294967296", "18446744073709551615"] {
            let text = SAMPLE.replace("num_partitions=1", &format!("num_partitions={too_many}"));
            let err = ProducerSettings::from_properties(&parse_properties(&text).unwrap()).unwrap_err();
            assert!(err.to_string().contains("num_partitions"), "{err}");
        }
    }

    #[test]
    fn line_without_separator_is_a_parse_error() {
        let err = parse_properties("topic=t1\nnot a property\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn resolve_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = ProducerSettings::resolve(file.path()).unwrap();
        assert_eq!(settings.topic, "t1");
    }

    #[test]
    fn resolve_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProducerSettings::resolve(dir.path().join("absent.properties")).is_err());
    }

    #[test]
    fn durations_serialize_in_human_form() {
        let settings = ProducerSettings::from_properties(&parse_properties(SAMPLE).unwrap()).unwrap();
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["sleep_time"], "10ms");
        assert_eq!(json["flush_interval"], "1s");
    }

    proptest! {
        #[test]
        fn value_keeps_everything_after_first_separator(
            key in "[a-z_]{1,12}",
            value in "[a-zA-Z0-9:=/._-]{0,24}",
        ) {
            let properties = parse_properties(&format!("{key}={value}")).unwrap();
            prop_assert_eq!(properties.get(&key).map(String::as_str), Some(value.trim()));
        }
    }
}
