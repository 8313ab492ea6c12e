//! CLI surface and process-wide configuration
//!
//! `clap` derive-based argument parsing building a single immutable
//! [`Config`] value once at process start. There is no global mutable
//! configuration state; `Config` is constructed here and then moved into
//! whichever top-level operation (stream or poll) is selected.

use std::os::unix::io::RawFd;
use std::time::Duration;

use clap::Parser;

use crate::errors::ReplicationError;

#[derive(Parser, Debug)]
#[command(name = "walrecv", about = "Logical replication streaming client")]
pub struct Args {
    /// Logical replication slot name.
    #[arg(long)]
    pub slot: String,

    /// Plugin option, KEY or KEY=VALUE. May be repeated.
    #[arg(long = "option", short = 'o')]
    pub option: Vec<String>,

    /// Create the slot if it does not already exist.
    #[arg(long = "create-slot")]
    pub create_slot: bool,

    /// Plugin used when creating a slot.
    #[arg(long, default_value = "test_decoding")]
    pub plugin: String,

    /// Run the slot-availability poll instead of streaming.
    #[arg(long = "poll-mode")]
    pub poll_mode: bool,

    /// Total deadline in poll mode, in seconds. Unlimited if omitted.
    #[arg(long = "poll-duration")]
    pub poll_duration: Option<f64>,

    /// Probe interval in poll mode, in seconds.
    #[arg(long = "poll-interval", default_value_t = 1.0)]
    pub poll_interval: f64,

    /// Output descriptor number.
    #[arg(long = "fd", default_value_t = 1)]
    pub fd: i32,

    /// Minimum delay between feedback sends, in seconds.
    #[arg(long = "feedback-interval", default_value_t = 0.0)]
    pub feedback_interval: f64,

    /// Maximum delay between standby messages, in seconds. 0 disables.
    #[arg(long = "status-interval", default_value_t = 5.0)]
    pub status_interval: f64,

    /// Advance next_feedback_lsn from the server-reported walEnd.
    #[arg(long = "auto-feedback")]
    pub auto_feedback: bool,

    /// Emit a `w <lsn> <len>` header before each record.
    #[arg(long = "write-header")]
    pub write_header: bool,

    /// Emit a trailing newline after each record.
    #[arg(long = "write-nl")]
    pub write_nl: bool,

    /// Shorthand for `-o format-version=1 -o include-lsn=true`.
    #[arg(long = "wal2json1")]
    pub wal2json1: bool,

    /// Shorthand for `-o format-version=2` plus `--write-header`.
    #[arg(long = "wal2json2")]
    pub wal2json2: bool,

    #[arg(long)]
    pub dbname: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub username: Option<String>,

    /// Extra connection parameter, KEY=VALUE. May be repeated.
    #[arg(long = "param")]
    pub param: Vec<String>,

    /// Raise log verbosity.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stream,
    Poll,
}

pub struct Config {
    pub mode: Mode,
    pub slot: String,
    pub plugin: String,
    pub plugin_options: Vec<(String, String)>,
    pub create_slot: bool,
    pub poll_duration: Option<Duration>,
    pub poll_interval: Duration,
    pub out_fd: RawFd,
    pub feedback_interval_ms: u64,
    pub standby_message_interval_ms: u64,
    pub auto_feedback: bool,
    pub write_header: bool,
    pub write_nl: bool,
    pub verbose: bool,
    pub conninfo: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ReplicationError> {
        if args.fd == 0 {
            return Err(ReplicationError::InvalidArgs(
                "--fd 0 is reserved for the command channel".to_string(),
            ));
        }
        if args.fd < 0 {
            return Err(ReplicationError::InvalidArgs(
                "--fd must not be negative".to_string(),
            ));
        }

        let mut plugin_options = parse_kv_list(&args.option)?;
        let mut write_header = args.write_header;

        if args.wal2json1 {
            plugin_options.push(("format-version".to_string(), "1".to_string()));
            plugin_options.push(("include-lsn".to_string(), "true".to_string()));
        }
        if args.wal2json2 {
            plugin_options.push(("format-version".to_string(), "2".to_string()));
            write_header = true;
        }

        validate_non_negative_secs("--poll-interval", args.poll_interval)?;
        validate_non_negative_secs("--feedback-interval", args.feedback_interval)?;
        validate_non_negative_secs("--status-interval", args.status_interval)?;
        if let Some(poll_duration) = args.poll_duration {
            validate_non_negative_secs("--poll-duration", poll_duration)?;
        }

        let poll_duration = args.poll_duration.map(Duration::from_secs_f64);
        let poll_interval = Duration::from_secs_f64(args.poll_interval);

        let conninfo = build_conninfo(&args)?;

        Ok(Config {
            mode: if args.poll_mode { Mode::Poll } else { Mode::Stream },
            slot: args.slot,
            plugin: args.plugin,
            plugin_options,
            create_slot: args.create_slot,
            poll_duration,
            poll_interval,
            out_fd: args.fd,
            feedback_interval_ms: (args.feedback_interval * 1000.0) as u64,
            standby_message_interval_ms: (args.status_interval * 1000.0) as u64,
            auto_feedback: args.auto_feedback,
            write_header,
            write_nl: args.write_nl,
            verbose: args.verbose,
            conninfo,
        })
    }
}

/// Reject non-finite or negative durations given as CLI seconds, the way
/// the source's `getopt_long` handlers reject `< 0` with `ECODE_INVALID_ARGS`
/// rather than let them reach `Duration::from_secs_f64`, which panics on
/// negative or NaN input.
fn validate_non_negative_secs(flag: &str, secs: f64) -> Result<(), ReplicationError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ReplicationError::InvalidArgs(format!(
            "{flag} must be a non-negative number, got {secs}"
        )));
    }
    Ok(())
}

fn parse_kv_list(items: &[String]) -> Result<Vec<(String, String)>, ReplicationError> {
    items
        .iter()
        .map(|item| match item.split_once('=') {
            Some((k, v)) => Ok((k.to_string(), v.to_string())),
            None => Ok((item.clone(), "true".to_string())),
        })
        .collect()
}

fn build_conninfo(args: &Args) -> Result<String, ReplicationError> {
    let mut parts = Vec::new();

    if let Some(dbname) = &args.dbname {
        parts.push(format!("dbname={}", escape_conninfo_value(dbname)));
    }
    if let Some(host) = &args.host {
        parts.push(format!("host={}", escape_conninfo_value(host)));
    }
    if let Some(port) = args.port {
        parts.push(format!("port={port}"));
    }
    if let Some(username) = &args.username {
        parts.push(format!("user={}", escape_conninfo_value(username)));
    }
    for param in &args.param {
        let (k, v) = param.split_once('=').ok_or_else(|| {
            ReplicationError::InvalidArgs(format!("--param {param} is not KEY=VALUE"))
        })?;
        parts.push(format!("{k}={}", escape_conninfo_value(v)));
    }

    parts.push("replication=database".to_string());

    Ok(parts.join(" "))
}

fn escape_conninfo_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
