//! Logging setup.
//!
//! The library itself only talks to the `log` facade. Binaries and tests call
//! [`init_logging`] to route records through `env_logger`.

mod init;

pub use init::{init_logging, LoggingConfig};
