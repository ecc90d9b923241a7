pub mod colour;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod log;
pub mod status;
pub mod time;
