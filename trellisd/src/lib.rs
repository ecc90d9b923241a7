pub mod control;
pub mod dispatcher;
pub mod gateway;
pub mod ipc_server;
pub mod logs;
pub mod manager;
pub mod monitor;
pub mod ordering;
pub mod responder;
pub mod service;
pub mod signal;
pub mod toggle;

#[cfg(test)]
mod testing;
