//! Logical replication streaming client
//!
//! Connects to a server's streaming-replication copy-both protocol, decodes
//! keepalive and XLogData frames, emits decoded payloads to an output
//! descriptor, and periodically reports progress back to the server via
//! standby status updates. A separate poll mode inspects slot availability
//! without streaming.

mod command;
mod config;
mod errors;
mod event_loop;
mod feedback;
mod nonblocking;
mod output;
mod pgconn;
mod session;
mod signals;
mod wire;

use std::fs::File;
use std::os::unix::io::FromRawFd;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config, Mode};
use crate::errors::ReplicationError;
use crate::event_loop::LoopConfig;
use crate::output::OutputWriter;
use crate::pgconn::PgConnection;

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match Config::from_args(args).and_then(run) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!(error = %err, "fatal error");
            eprintln!("walrecv: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cfg: Config) -> Result<i32, ReplicationError> {
    let conn = PgConnection::connect(&cfg.conninfo)?;
    let abort = signals::install_abort_handler()?;

    match cfg.mode {
        Mode::Poll => run_poll(&conn, &cfg),
        Mode::Stream => run_stream(&conn, &cfg, abort),
    }
}

fn run_poll(conn: &PgConnection, cfg: &Config) -> Result<i32, ReplicationError> {
    use crate::session::PollOutcome;

    let outcome = session::poll_slot(
        conn,
        &cfg.slot,
        &cfg.plugin,
        cfg.poll_interval,
        cfg.poll_duration,
        cfg.create_slot,
    )?;

    Ok(match outcome {
        PollOutcome::Success => 0,
        PollOutcome::SlotNotExist => 8,
        PollOutcome::SlotInUse => 9,
    })
}

fn run_stream(
    conn: &PgConnection,
    cfg: &Config,
    abort: std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<i32, ReplicationError> {
    session::identify(conn)?;

    if cfg.create_slot {
        session::create_slot(conn, &cfg.slot, &cfg.plugin)?;
    }

    match session::start_replication(
        conn,
        &cfg.slot,
        wire::Lsn::INVALID,
        &cfg.plugin_options,
    ) {
        Ok(()) => {}
        Err(ReplicationError::SlotNotExist) => return Ok(8),
        Err(ReplicationError::SlotInUse) => return Ok(9),
        Err(e) => return Err(e),
    }

    let descriptor_setup = nonblocking::configure(cfg.out_fd, libc::STDIN_FILENO)?;

    let out_file = unsafe { File::from_raw_fd(cfg.out_fd) };
    let out = OutputWriter::new(out_file, cfg.write_header, cfg.write_nl);

    let loop_cfg = LoopConfig {
        auto_feedback: cfg.auto_feedback,
        feedback: feedback::FeedbackConfig {
            feedback_interval_ms: cfg.feedback_interval_ms,
            standby_message_interval_ms: cfg.standby_message_interval_ms,
        },
    };

    let exit = event_loop::run(
        conn,
        libc::STDIN_FILENO,
        descriptor_setup,
        out,
        loop_cfg,
        abort,
    )?;

    Ok(exit.exit_code())
}
