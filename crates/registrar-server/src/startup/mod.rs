//! Process startup: logging, HTTP server and shutdown wiring

mod http;
mod logging;
mod shutdown;

pub use http::{http_server, track_requests};
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, shutdown_node, wait_for_shutdown_signal};
