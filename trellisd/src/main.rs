use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use trellisd::control::{PowerShellControl, ServiceControl};
use trellisd::ipc_server::run_ipc_server;
use trellisd::logs::{FsLogArchiver, LogArchiver};
use trellisd::manager::ServiceManager;
use trellisd::responder::{CommandNotifier, LogNotifier, Notifier};
use trellisd::signal::install_signal_handlers;

use twine::config::Config;
use twine::errors::TwineError;
use twine::log::{ConsoleLogger, ConsoleLoggerImpl, FileLogger, FileLoggerImpl, Logger, SharedLogger};
use twine::status::LogLevel;

// Get the Cargo package version set at compile time
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    if let Err(e) = run() {
        eprintln!("trellisd: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), TwineError> {
    let config_path = Config::resolve_path();
    let config = Config::from_file(&config_path)?;

    let level = LogLevel::from_str(&config.daemon.log_level).unwrap_or(LogLevel::Info);
    let mut console_logger = ConsoleLoggerImpl::new(level);
    let mut file_logger = FileLoggerImpl::new(level, config.daemon.log_file.clone());

    console_logger.banner(&format!(
        "Trellis Service Orchestrator v{} - Keeping Services In Line",
        VERSION
    ));

    if let Err(e) = file_logger.initialize(&mut console_logger) {
        console_logger.message(
            LogLevel::Warn,
            &format!("File logging disabled: {e}"),
            Duration::ZERO,
        );
    }

    let logger: Arc<dyn Logger> = Arc::new(SharedLogger::new(
        Arc::new(Mutex::new(console_logger)),
        Arc::new(Mutex::new(file_logger)),
    ));
    logger.info(&format!("Loaded config from {config_path}"));

    let notifier: Arc<dyn Notifier> = match &config.notify.command {
        Some(command) => Arc::new(CommandNotifier::new(command.clone())),
        None => Arc::new(LogNotifier::new(Arc::clone(&logger))),
    };
    let archiver: Arc<dyn LogArchiver> = Arc::new(FsLogArchiver);

    let (manager, monitor) = ServiceManager::from_config(
        &config,
        Arc::clone(&logger),
        |svc| {
            PowerShellControl::new(&svc.service_name, svc.machine.as_deref())
                .map(|control| Box::new(control) as Box<dyn ServiceControl>)
        },
        archiver,
        notifier,
    )?;

    logger.info(&format!(
        "Service loading complete: {} monitored, {} configured.",
        manager.handles().len(),
        config.services.len()
    ));

    let manager = Arc::new(manager);
    let shutdown_flag = manager.shutdown_flag();
    install_signal_handlers(&shutdown_flag)?;

    let monitor_flag = Arc::clone(&shutdown_flag);
    let monitor_thread = thread::Builder::new()
        .name("trellis-monitor".into())
        .spawn(move || monitor.run(monitor_flag))?;

    let listener = TcpListener::bind(&config.daemon.control_addr)?;
    let (ready_tx, ready_rx) = mpsc::channel();
    let ipc_manager = Arc::clone(&manager);
    let ipc_flag = Arc::clone(&shutdown_flag);
    let ipc_thread = thread::Builder::new()
        .name("trellis-ipc".into())
        .spawn(move || run_ipc_server(listener, ipc_manager, ipc_flag, Some(ready_tx)))?;

    if ready_rx.recv_timeout(Duration::from_secs(5)).is_err() {
        logger.warn("IPC server did not report ready");
    }

    while !manager.is_shutting_down() {
        thread::sleep(Duration::from_millis(100));
    }

    logger.info("Shutting down...");

    if monitor_thread.join().is_err() {
        logger.error("Status monitor thread panicked");
    }
    match ipc_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => logger.error_exception(&e, "IPC server failed"),
        Err(_) => logger.error("IPC server thread panicked"),
    }

    if manager.is_busy() {
        logger.warn("Exiting while a toggle is still in progress");
    }

    logger.log(LogLevel::Ok, "Trellis stopped cleanly.");
    Ok(())
}
