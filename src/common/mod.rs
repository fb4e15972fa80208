//! Common module
//!
//! Errors, logging setup, endpoint resolution and file helpers shared by the rest of the crate.

pub mod error;
pub mod fs;
pub mod log;
pub mod net;

pub use error::{ProxyError, Result};
pub use fs::check_file_exists;
pub use log::init_logger;
pub use net::{resolve_listen_addr, resolve_target_addr, Endpoints};
