//! Runtime configuration for an NSQ consumer (ambient stack: generalizes the
//! teacher's `bin/server.rs` `Cli` struct into a reusable `Config` plus a
//! `clap` CLI on top of it).

use std::time::Duration;

use clap::Parser;

/// Default nsqd TCP port, analogous to the teacher's `DEFAULT_PORT`.
pub const DEFAULT_NSQD_PORT: u16 = 4150;

/// Everything needed to stand up a consumer: which topic/channel to read,
/// which nsqd instances to dial, and the flow-control knobs `ReaderRdy`
/// needs at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    pub topic: String,
    pub channel: String,
    pub nsqd_addresses: Vec<String>,
    pub client_id: String,
    pub max_in_flight: u64,
    /// Per-connection ceiling nsqd is willing to honor; `set_connection_rdy_max`
    /// clamps every request against it.
    pub max_rdy_count: u64,
    /// Passed through to the backoff timer (spec §6's `maxBackoffDuration`
    /// constructor parameter).
    pub max_backoff_duration: Duration,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Config {
        let client_id = cli.client_id.unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "nsq-consumer".to_string())
        });

        Config {
            topic: cli.topic,
            channel: cli.channel,
            nsqd_addresses: cli.nsqd_tcp_address,
            client_id,
            max_in_flight: cli.max_in_flight,
            max_rdy_count: cli.max_rdy_count,
            max_backoff_duration: Duration::from_secs(cli.max_backoff_duration_secs),
        }
    }
}

/// Command-line arguments for the `nsq-consumer` binary.
#[derive(Parser, Debug)]
#[clap(
    name = "nsq-consumer",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "An NSQ consumer that shares RDY credit across many nsqd connections"
)]
pub struct Cli {
    /// Topic to subscribe to.
    #[clap(long)]
    pub topic: String,

    /// Channel to subscribe on.
    #[clap(long)]
    pub channel: String,

    /// One or more `host:port` nsqd TCP addresses to connect to directly.
    #[clap(long = "nsqd-tcp-address", required = true)]
    pub nsqd_tcp_address: Vec<String>,

    /// Identifier this client presents during `IDENTIFY`. Defaults to
    /// `$HOSTNAME`.
    #[clap(long)]
    pub client_id: Option<String>,

    /// Total in-flight message budget shared across every connection.
    #[clap(long, default_value = "2500")]
    pub max_in_flight: u64,

    /// Per-connection RDY ceiling.
    #[clap(long, default_value = "2500")]
    pub max_rdy_count: u64,

    /// Ceiling, in seconds, on the global backoff interval.
    #[clap(long = "max-backoff-duration", default_value = "128")]
    pub max_backoff_duration_secs: u64,
}
