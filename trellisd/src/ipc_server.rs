use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use twine::errors::TwineError;
use twine::ipc::{deserialize_request, serialize_response, IpcCommand, IpcResponse};
use twine::status::ToggleAction;
use twine::time::format_duration;

use crate::manager::ServiceManager;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// How long a client gets to send its request line.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves control requests until the shutdown flag is raised.
///
/// Each client is handled on its own thread since toggle requests are only
/// answered after the whole batch completes.
pub fn run_ipc_server(
    listener: TcpListener,
    manager: Arc<ServiceManager>,
    shutdown_flag: Arc<AtomicBool>,
    ready_tx: Option<mpsc::Sender<()>>,
) -> Result<(), TwineError> {
    let logger = manager.logger();

    listener.set_nonblocking(true)?;
    logger.info(&format!("IPC server listening on {}", listener.local_addr()?));

    if let Some(tx) = ready_tx {
        let _ = tx.send(());
    }

    while !shutdown_flag.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let sm = Arc::clone(&manager);
                let flag = Arc::clone(&shutdown_flag);
                let spawned = thread::Builder::new()
                    .name("trellis-ipc-client".into())
                    .spawn(move || {
                        if let Err(e) = handle_client(stream, &sm, &flag, REQUEST_READ_TIMEOUT) {
                            sm.logger()
                                .error_exception(&e, &format!("Error handling IPC client {peer}"));
                        }
                    });
                if let Err(e) = spawned {
                    logger.error_exception(&e, "Failed to spawn IPC client thread");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => logger.error_exception(&e, "Failed to accept IPC connection"),
        }
    }

    logger.info("IPC server stopped");
    Ok(())
}

fn handle_client(
    mut stream: TcpStream,
    manager: &ServiceManager,
    shutdown_flag: &AtomicBool,
    read_timeout: Duration,
) -> Result<(), TwineError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(read_timeout))?;

    let mut buf = Vec::new();
    let mut reader = BufReader::new(stream.try_clone()?);
    reader.read_until(b'\n', &mut buf)?;

    let response = match deserialize_request(&buf) {
        Ok(request) => dispatch(request.command, manager, shutdown_flag),
        Err(_) => IpcResponse::fail("Invalid IPC request"),
    };

    stream.write_all(&serialize_response(&response)?)?;
    stream.flush()?;
    Ok(())
}

fn dispatch(command: IpcCommand, manager: &ServiceManager, shutdown_flag: &AtomicBool) -> IpcResponse {
    match command {
        IpcCommand::Start(names) => toggle(manager, ToggleAction::Start, &names),
        IpcCommand::Stop(names) => toggle(manager, ToggleAction::Stop, &names),
        IpcCommand::Restart(names) => toggle(manager, ToggleAction::Restart, &names),

        IpcCommand::Status => match serde_json::to_value(manager.snapshot()) {
            Ok(data) => IpcResponse {
                data: Some(data),
                ..IpcResponse::ok(format!("{} service(s)", manager.handles().len()))
            },
            Err(e) => IpcResponse::fail(format!("Failed to encode status: {e}")),
        },

        IpcCommand::Shutdown => {
            manager.logger().info("Shutdown requested over IPC");
            manager.shutdown();
            shutdown_flag.store(true, Ordering::SeqCst);
            IpcResponse::ok("Shutdown initiated")
        }
    }
}

fn toggle(manager: &ServiceManager, action: ToggleAction, names: &[String]) -> IpcResponse {
    let rx = match manager.toggle(action, names) {
        Ok(rx) => rx,
        Err(e) => return IpcResponse::fail(e.to_string()),
    };

    let Ok(done) = rx.recv() else {
        return IpcResponse::fail(format!("{} did not report back", action.as_str()));
    };

    let message = format!(
        "{} finished: {} {}",
        action.as_str(),
        done.status.as_str(),
        format_duration(done.elapsed)
    );

    IpcResponse {
        success: done.succeeded(),
        message,
        data: Some(json!({
            "action": done.action,
            "status": done.status,
            "elapsed_ms": done.elapsed.as_millis() as u64,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ServiceControl;
    use crate::logs::LogArchiver;
    use crate::responder::Notifier;
    use crate::testing::{FakeControl, MemoryLogger, RecordingArchiver, RecordingNotifier};
    use twine::config::Config;
    use twine::ipc::{send_ipc_request, IpcRequest, ServiceSnapshot};
    use twine::status::ServiceStatus;

    struct Server {
        addr: String,
        flag: Arc<AtomicBool>,
        fake: FakeControl,
        thread: thread::JoinHandle<Result<(), TwineError>>,
    }

    fn manager() -> (Arc<ServiceManager>, FakeControl) {
        let config = Config::parse(
            r#"
            [[service]]
            name = "Spooler"
            service_name = "Spooler"
            "#,
        )
        .unwrap();

        let fake = FakeControl::new("Spooler", ServiceStatus::Stopped);
        let control = fake.clone();
        let archiver: Arc<dyn LogArchiver> = Arc::new(RecordingArchiver::default());
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
        let (manager, _monitor) = ServiceManager::from_config(
            &config,
            Arc::new(MemoryLogger::default()),
            move |_| Ok(Box::new(control.clone()) as Box<dyn ServiceControl>),
            archiver,
            notifier,
        )
        .unwrap();

        (Arc::new(manager), fake)
    }

    fn serve() -> Server {
        let (manager, fake) = manager();
        let flag = manager.shutdown_flag();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (tx, rx) = mpsc::channel();
        let server_flag = Arc::clone(&flag);
        let thread = thread::spawn(move || run_ipc_server(listener, manager, server_flag, Some(tx)));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        Server { addr, flag, fake, thread }
    }

    fn send(addr: &str, command: IpcCommand) -> IpcResponse {
        send_ipc_request(addr, &IpcRequest { command }, Some(Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn start_then_status_over_tcp() {
        let server = serve();

        let resp = send(&server.addr, IpcCommand::Start(vec!["spooler".into()]));
        assert!(resp.success, "{}", resp.message);
        assert_eq!(server.fake.state().start_calls, 1);

        let resp = send(&server.addr, IpcCommand::Status);
        let snapshot: Vec<ServiceSnapshot> = serde_json::from_value(resp.data.unwrap()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, ServiceStatus::Running);

        send(&server.addr, IpcCommand::Shutdown);
        server.thread.join().unwrap().unwrap();
    }

    #[test]
    fn unknown_service_is_rejected() {
        let server = serve();

        let resp = send(&server.addr, IpcCommand::Stop(vec!["Nope".into()]));
        assert!(!resp.success);
        assert!(resp.message.contains("Nope"));
        assert_eq!(server.fake.state().stop_calls, 0);

        server.flag.store(true, Ordering::SeqCst);
        server.thread.join().unwrap().unwrap();
    }

    #[test]
    fn failed_toggle_reports_failure() {
        let server = serve();
        server.fake.state().fail_start = true;

        let resp = send(&server.addr, IpcCommand::Start(vec![]));
        assert!(!resp.success);
        assert_eq!(resp.data.unwrap()["action"], "Start");

        send(&server.addr, IpcCommand::Shutdown);
        server.thread.join().unwrap().unwrap();
    }

    #[test]
    fn silent_client_is_dropped_after_read_timeout() {
        let (manager, fake) = manager();
        let flag = AtomicBool::new(false);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();

        // Connected but never sends a request line.
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let result = handle_client(stream, &manager, &flag, Duration::from_millis(100));

        assert!(matches!(result, Err(TwineError::Io(_))));
        assert_eq!(fake.state().start_calls, 0);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn garbage_request_gets_a_failure() {
        let server = serve();

        let mut stream = TcpStream::connect(&server.addr).unwrap();
        stream.write_all(b"hello\n").unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        assert!(line.contains("Invalid IPC request"));

        server.flag.store(true, Ordering::SeqCst);
        server.thread.join().unwrap().unwrap();
    }
}
