use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::TwineError;
use crate::status::ServiceStatus;

//
// ─── MESSAGES ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcCommand {
    // Service control; an empty list targets every monitored service
    Start(Vec<String>),
    Stop(Vec<String>),
    Restart(Vec<String>),

    Status,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IpcRequest {
    pub command: IpcCommand,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// One row of the `Status` reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub service_name: String,
    pub status: ServiceStatus,
    pub can_toggle: bool,
    pub is_restarting: bool,
}

//
// ─── SERIALIZATION HELPERS ───────────────────────────────────────────────

pub fn serialize_request(req: &IpcRequest) -> Result<Vec<u8>, TwineError> {
    let mut vec = serde_json::to_vec(req)?;
    vec.push(b'\n');
    Ok(vec)
}

pub fn deserialize_request(buf: &[u8]) -> Result<IpcRequest, TwineError> {
    Ok(serde_json::from_slice(buf)?)
}

pub fn serialize_response(resp: &IpcResponse) -> Result<Vec<u8>, TwineError> {
    let mut vec = serde_json::to_vec(resp)?;
    vec.push(b'\n');
    Ok(vec)
}

pub fn deserialize_response(buf: &[u8]) -> Result<IpcResponse, TwineError> {
    Ok(serde_json::from_slice(buf)?)
}

//
// ─── IPC TRANSPORT CLIENT ────────────────────────────────────────────

/// Sends an IPC request and waits for a response.
///
/// Toggle requests are answered only once the whole batch has finished, so
/// `read_timeout` should cover the slowest expected wait-for-status.
pub fn send_ipc_request(
    addr: &str,
    request: &IpcRequest,
    read_timeout: Option<Duration>,
) -> Result<IpcResponse, TwineError> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(read_timeout)?;

    stream.write_all(&serialize_request(request)?)?;

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf)?;

    deserialize_response(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_newline_terminated_json() {
        let req = IpcRequest {
            command: IpcCommand::Restart(vec!["Web".into()]),
        };
        let bytes = serialize_request(&req).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let back = deserialize_request(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(back.command, IpcCommand::Restart(vec!["Web".into()]));
    }

    #[test]
    fn garbage_response_is_a_parse_error() {
        let err = deserialize_response(b"not json").unwrap_err();
        assert!(matches!(err, TwineError::Parse(_)));
    }
}
