//! Signal wiring
//!
//! Installs a `SIGINT`-equivalent handler that performs no I/O beyond a
//! single atomic store, per the single-writer async-signal-safe flag
//! pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::ReplicationError;

/// Install the interrupt handler and return the shared abort flag the event
/// loop polls.
pub fn install_abort_handler() -> Result<Arc<AtomicBool>, ReplicationError> {
    let abort = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&abort);

    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| ReplicationError::InitFailure(format!("failed to install signal handler: {e}")))?;

    Ok(abort)
}
