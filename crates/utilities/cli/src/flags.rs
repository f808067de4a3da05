//! Logging and metrics flags shared by the tally binaries.

use crate::{CliResult, init_prometheus_server, init_tracing_subscriber};
use clap::{ArgAction, Args};
use std::net::{IpAddr, Ipv4Addr};

/// Logging arguments.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogArgs {
    /// Verbosity level: -v info, -vv debug, -vvv trace. `RUST_LOG` takes precedence.
    #[arg(short = 'v', long = "verbosity", action = ArgAction::Count, global = true)]
    pub verbosity: u8,
    /// Emit structured JSON logs.
    #[arg(long = "log.json", env = "STRUCTURED_LOGS", global = true)]
    pub json: bool,
}

impl LogArgs {
    /// Installs the global tracing subscriber.
    pub fn init_tracing(&self) -> CliResult<()> {
        init_tracing_subscriber(self.verbosity, self.json, None)
    }
}

/// Prometheus exporter arguments.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Serve metrics over HTTP in the Prometheus text format.
    #[arg(long = "metrics.enabled", env = "METRICS_ENABLED")]
    pub enabled: bool,
    /// Address the metrics server listens on.
    #[arg(long = "metrics.addr", env = "METRICS_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub addr: IpAddr,
    /// Port the metrics server listens on.
    #[arg(long = "metrics.port", env = "METRICS_PORT", default_value_t = 9090)]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Installs the Prometheus recorder if enabled.
    pub fn init_metrics(&self) -> CliResult<()> {
        if self.enabled {
            init_prometheus_server(self.addr, self.port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        log: LogArgs,
        #[command(flatten)]
        metrics: MetricsArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["tally"]).unwrap();
        assert_eq!(cli.log, LogArgs::default());
        assert_eq!(cli.metrics, MetricsArgs::default());
    }

    #[test]
    fn test_flags() {
        let cli = TestCli::try_parse_from([
            "tally",
            "-vvv",
            "--log.json",
            "--metrics.enabled",
            "--metrics.addr",
            "127.0.0.1",
            "--metrics.port",
            "9300",
        ])
        .unwrap();
        assert_eq!(cli.log, LogArgs { verbosity: 3, json: true });
        assert!(cli.metrics.enabled);
        assert_eq!(cli.metrics.addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(cli.metrics.port, 9300);
    }
}
