//! Command-line utilities shared by the tally binaries: tracing and Prometheus setup, common
//! flags, styles and the backtrace helper.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod backtrace;

mod error;
pub use error::{CliError, CliResult, PrometheusError};

mod flags;
pub use flags::{LogArgs, MetricsArgs};

mod prometheus;
pub use prometheus::init_prometheus_server;

mod styles;
pub use styles::cli_styles;

mod log;
pub use log::{init_tracing_subscriber, verbosity_level};
