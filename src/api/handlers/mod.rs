//! HTTP request handlers.

pub mod assignment;
pub mod diagnostics;
pub mod health;
pub mod heartbeat;
pub mod maintenance;
pub mod session_hosts;
