use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use twine::errors::TwineError;

/// Raises `shutdown_flag` on SIGINT or SIGTERM (Ctrl+C / Ctrl+Break on
/// Windows). The main loop is expected to poll the flag.
pub fn install_signal_handlers(shutdown_flag: &Arc<AtomicBool>) -> Result<(), TwineError> {
    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(shutdown_flag))
            .map_err(|e| TwineError::Custom(format!("Failed to register signal {signal}: {e}")))?;
    }
    Ok(())
}
