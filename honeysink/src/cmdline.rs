use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use honeysink_core::{DEFAULT_API_HOST, DEFAULT_WRITE_KEY_HEADER, Error, Result, SinkConfig};

/// Everything the binary runs with.
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) sink: SinkConfig,
    /// Serve `/metrics` on this port when set.
    pub(crate) metrics_port: Option<u16>,
}

pub(crate) fn root_cli() -> Command {
    Command::new("honeysink")
        .about("Ships newline-delimited JSON events read from stdin to Honeycomb in batches")
        .arg(
            Arg::new("write-key")
                .long("write-key")
                .env("HONEYSINK_WRITE_KEY")
                .hide_env_values(true)
                .required(true)
                .help("Team write key sent with every request"),
        )
        .arg(
            Arg::new("dataset")
                .long("dataset")
                .env("HONEYSINK_DATASET")
                .required(true)
                .help("Dataset the events are written to"),
        )
        .arg(
            Arg::new("api-host")
                .long("api-host")
                .env("HONEYSINK_API_HOST")
                .help(format!("Base URL of the ingestion API [default: {DEFAULT_API_HOST}]")),
        )
        .arg(
            Arg::new("flush-size")
                .long("flush-size")
                .env("HONEYSINK_FLUSH_SIZE")
                .value_parser(value_parser!(usize))
                .help("Records per batch [default: 50]"),
        )
        .arg(
            Arg::new("idle-flush-time")
                .long("idle-flush-time")
                .env("HONEYSINK_IDLE_FLUSH_TIME")
                .value_parser(value_parser!(f64))
                .help("Seconds a non-empty batch may wait before it is flushed [default: 5]"),
        )
        .arg(
            Arg::new("retry-individual")
                .long("retry-individual")
                .env("HONEYSINK_RETRY_INDIVIDUAL")
                .action(ArgAction::Set)
                .value_parser(value_parser!(bool))
                .help("Resubmit failed records of a rejected batch one by one [default: true]"),
        )
        .arg(
            Arg::new("pool-max")
                .long("pool-max")
                .env("HONEYSINK_POOL_MAX")
                .value_parser(value_parser!(usize))
                .help("Maximum number of requests in flight [default: 10]"),
        )
        .arg(
            Arg::new("request-timeout")
                .long("request-timeout")
                .env("HONEYSINK_REQUEST_TIMEOUT")
                .value_parser(value_parser!(f64))
                .help("Per-request timeout in seconds [default: 30]"),
        )
        .arg(
            Arg::new("drain-timeout")
                .long("drain-timeout")
                .env("HONEYSINK_DRAIN_TIMEOUT")
                .value_parser(value_parser!(f64))
                .help("Seconds to wait for in-flight requests on shutdown [default: 10]"),
        )
        .arg(
            Arg::new("write-key-header")
                .long("write-key-header")
                .env("HONEYSINK_WRITE_KEY_HEADER")
                .help(format!(
                    "Header carrying the write key [default: {DEFAULT_WRITE_KEY_HEADER}]"
                )),
        )
        .arg(
            Arg::new("metrics-port")
                .long("metrics-port")
                .env("HONEYSINK_METRICS_PORT")
                .value_parser(value_parser!(u16))
                .help("Serve Prometheus metrics at /metrics on this port"),
        )
}

impl TryFrom<&ArgMatches> for Settings {
    type Error = Error;

    fn try_from(matches: &ArgMatches) -> Result<Self> {
        let required = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .ok_or_else(|| Error::Config(format!("--{id} is required")))
        };
        let mut sink = SinkConfig::new(required("write-key")?, required("dataset")?);

        if let Some(api_host) = matches.get_one::<String>("api-host") {
            sink = sink.with_api_host(api_host.clone());
        }
        if let Some(&flush_size) = matches.get_one::<usize>("flush-size") {
            sink = sink.with_flush_size(flush_size);
        }
        if let Some(idle) = seconds(matches, "idle-flush-time")? {
            sink = sink.with_idle_flush_time(idle);
        }
        if let Some(&retry) = matches.get_one::<bool>("retry-individual") {
            sink = sink.with_retry_individual(retry);
        }
        if let Some(&pool_max) = matches.get_one::<usize>("pool-max") {
            sink = sink.with_pool_max(pool_max);
        }
        if let Some(timeout) = seconds(matches, "request-timeout")? {
            sink = sink.with_request_timeout(timeout);
        }
        if let Some(timeout) = seconds(matches, "drain-timeout")? {
            sink = sink.with_drain_timeout(timeout);
        }
        if let Some(header) = matches.get_one::<String>("write-key-header") {
            sink = sink.with_write_key_header(header.clone());
        }

        Ok(Self {
            sink: sink.validate()?,
            metrics_port: matches.get_one::<u16>("metrics-port").copied(),
        })
    }
}

fn seconds(matches: &ArgMatches, id: &str) -> Result<Option<Duration>> {
    matches
        .get_one::<f64>(id)
        .map(|&secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| Error::Config(format!("--{id} {secs}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_settings_from_args() {
        let matches = root_cli()
            .try_get_matches_from([
                "honeysink",
                "--write-key",
                "abc",
                "--dataset",
                "web",
                "--api-host",
                "localhost:8080/",
                "--flush-size",
                "10",
                "--idle-flush-time",
                "0.5",
                "--retry-individual",
                "false",
                "--pool-max",
                "4",
                "--metrics-port",
                "9090",
            ])
            .unwrap();
        let settings = Settings::try_from(&matches).unwrap();

        assert_eq!(settings.sink.write_key, "abc");
        assert_eq!(settings.sink.dataset, "web");
        assert_eq!(settings.sink.batch_url(), "http://localhost:8080/1/batch");
        assert_eq!(settings.sink.flush_size, 10);
        assert_eq!(settings.sink.idle_flush_time, Duration::from_millis(500));
        assert!(!settings.sink.retry_individual);
        assert_eq!(settings.sink.pool_max, 4);
        assert_eq!(settings.metrics_port, Some(9090));
    }

    #[test]
    fn test_defaults() {
        let matches = root_cli()
            .try_get_matches_from(["honeysink", "--write-key", "abc", "--dataset", "web"])
            .unwrap();
        let settings = Settings::try_from(&matches).unwrap();
        assert_eq!(settings.sink, SinkConfig::new("abc", "web").validate().unwrap());
        assert_eq!(settings.metrics_port, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let matches = root_cli()
            .try_get_matches_from([
                "honeysink",
                "--write-key",
                "abc",
                "--dataset",
                "web",
                "--drain-timeout=-1",
            ])
            .unwrap();
        assert!(matches!(
            Settings::try_from(&matches),
            Err(Error::Config(_))
        ));

        let matches = root_cli()
            .try_get_matches_from([
                "honeysink",
                "--write-key",
                "abc",
                "--dataset",
                "web",
                "--flush-size",
                "0",
            ])
            .unwrap();
        assert!(Settings::try_from(&matches).is_err());
    }
}
