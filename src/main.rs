//! gcp-vpc-move-vip -- floating alias IP resource agent.
//!
//! Invoked by the cluster resource manager with a single verb. Every run
//! is a fresh process: it observes the alias state, converges it, and
//! reports the outcome through its exit status.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info_span, Instrument};

use vipmove::agent::{self, Action};
use vipmove::config::LoggingConfig;
use vipmove::errors::OcfStatus;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "gcp-vpc-move-vip",
    version,
    about = "Floating IP address on Google Cloud Platform using alias IP ranges"
)]
struct Cli {
    /// start | stop | monitor | status | validate-all | meta-data
    action: String,
}

fn init_tracing(logging: &LoggingConfig) {
    // stdout carries the meta-data document; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);

    if logging.forward {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logging = LoggingConfig::from_env();
    init_tracing(&logging);

    let action: Action = match cli.action.parse() {
        Ok(action) => action,
        Err(e) => {
            error!("{}", e);
            return OcfStatus::ErrUnimplemented.into();
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return OcfStatus::ErrGeneric.into();
        }
    };

    let span = info_span!(
        "gcp-vpc-move-vip",
        resource = logging.resource_instance.as_deref().unwrap_or("-"),
        action = %action,
    );
    runtime.block_on(agent::run(action).instrument(span)).into()
}
