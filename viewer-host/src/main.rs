use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use log::info;

use shared::config::StreamConfig;
use shared::constants::CONFIG_ENV_VAR;
use viewer_host::adapter::{self, NullViewerAdapter};
use viewer_host::cleanup::CleanupGuard;
use viewer_host::dispatcher::Dispatcher;
use viewer_host::logger;

/// Entry point for the viewer host.
/// Initializes logging and configuration, binds the batch dispatcher, and
/// parks the main thread while connection workers ingest producer batches.
///
/// Concrete viewer integrations register their adapter factory in place of
/// the inert default when they embed this host.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Keep logger alive for the duration of the process.
    let _logger = logger::init_logger()?;

    let config_path = find_config_file();
    let config = Arc::new(StreamConfig::load(&config_path)?);
    info!("Configuration file loaded successfully");

    let factory = adapter::factory_from_env(NullViewerAdapter::factory());
    let dispatcher = Arc::new(Dispatcher::bind(Arc::clone(&config), factory)?);
    info!("Dispatcher bound on {}", dispatcher.addr());

    let stopper = Arc::clone(&dispatcher);
    let _cleanup = CleanupGuard::new(move || stopper.stop());

    // The host stays resident; a future control plane can unpark/shutdown.
    thread::park();
    // Unreachable under normal operation.
    #[allow(unreachable_code)]
    Ok(())
}

/// Find the `config.toml` path by checking an override environment variable
/// first and falling back to a file next to the running executable.
///
/// This function never panics; it returns a path even if the file is missing
/// so the caller can surface a clean configuration error.
fn find_config_file() -> PathBuf {
    if let Some(cfg) = env::var_os(CONFIG_ENV_VAR) {
        return PathBuf::from(cfg);
    }

    let mut exe_path = env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    exe_path.pop();
    exe_path.push("config.toml");
    exe_path
}
