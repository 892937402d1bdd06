use anyhow::bail;
use batchgate::{BlockedPolicy, DispatcherConfig};
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `batchgate-server` binary.
///
/// These settings describe the downstream acceptor's limits and how the
/// dispatcher reacts when it is overloaded. All values are parsed from CLI
/// arguments or environment variables (a `.env` file is honored), with
/// defaults matching the reference acceptor.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "batchgate-server",
    version,
    about = "An HTTP service that feeds batches into a rate-limited acceptor"
)]
pub struct CliArgs {
    /// Maximum number of items the acceptor takes per call.
    ///
    /// Submissions larger than this are split into chunks of at most this
    /// many items.
    ///
    /// Environment variable: `MAX_ITEMS`
    #[arg(long, env = "MAX_ITEMS", default_value_t = 70)]
    pub max_items: usize,

    /// Minimum spacing between two acceptor calls, in milliseconds.
    ///
    /// Environment variable: `MIN_PERIOD_MS`
    #[arg(long, env = "MIN_PERIOD_MS", default_value_t = 100)]
    pub min_period_ms: u64,

    /// How long the acceptor stays frozen after a rejection, in milliseconds.
    ///
    /// Environment variable: `FREEZE_WINDOW_MS`
    #[arg(long, env = "FREEZE_WINDOW_MS", default_value_t = 5_000)]
    pub freeze_window_ms: u64,

    /// Extra wait after a refused chunk, in milliseconds. Defaults to the
    /// freeze window.
    ///
    /// Environment variable: `BACKOFF_MS`
    #[arg(long, env = "BACKOFF_MS")]
    pub backoff_ms: Option<u64>,

    /// What to do with a refused chunk: `skip` drops it, `retry` offers it
    /// again after the backoff.
    ///
    /// Environment variable: `ON_BLOCKED`
    #[arg(long, env = "ON_BLOCKED", default_value_t = BlockedPolicy::Skip)]
    pub on_blocked: BlockedPolicy,

    /// Largest batch a single `/send` request may ask for.
    ///
    /// Environment variable: `MAX_REQUEST_ITEMS`
    #[arg(long, env = "MAX_REQUEST_ITEMS", default_value_t = 1_000_000)]
    pub max_request_items: usize,

    /// Longest `deadline_ms` a single `/send` request may set, in
    /// milliseconds.
    ///
    /// Environment variable: `MAX_DEADLINE_MS`
    #[arg(long, env = "MAX_DEADLINE_MS", default_value_t = 300_000)]
    pub max_deadline_ms: u64,

    /// Seconds to wait for queued work to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_items: usize,
    pub min_period: Duration,
    pub freeze_window: Duration,
    pub backoff: Duration,
    pub on_blocked: BlockedPolicy,
    pub max_request_items: usize,
    pub max_deadline: Duration,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
}

impl ServerConfig {
    pub const fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            backoff: self.backoff,
            on_blocked: self.on_blocked,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_items == 0 {
            bail!("MAX_ITEMS must be greater than 0");
        }

        if args.max_request_items == 0 {
            bail!("MAX_REQUEST_ITEMS must be greater than 0");
        }

        let freeze_window = Duration::from_millis(args.freeze_window_ms);
        let backoff = args
            .backoff_ms
            .map_or(freeze_window, Duration::from_millis);

        Ok(Self {
            max_items: args.max_items,
            min_period: Duration::from_millis(args.min_period_ms),
            freeze_window,
            backoff,
            on_blocked: args.on_blocked,
            max_request_items: args.max_request_items,
            max_deadline: Duration::from_millis(args.max_deadline_ms),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
        })
    }
}
