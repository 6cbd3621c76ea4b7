//! Process execution: the monitor, the init shim handshake, hooks,
//! signals and the console.

pub mod console;
pub mod hooks;
pub mod init;
pub mod monitor;
pub mod signal;
pub mod sync;

pub use monitor::{MonitorCommand, MonitorExit, MonitorHandle, MonitorStdio};
pub use signal::{Signal, process_exited, send_signal};
