//! Web status API
//!
//! Small HTTP/JSON interface next to the RESP port: host and key statistics,
//! cluster layout and a one-shot command endpoint.

mod handlers;
mod server;

pub use handlers::{CommandRequest, CommandResponse, SystemStats};
pub use server::{router, run_web};
