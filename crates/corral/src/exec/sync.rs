//! Start handshake over the sync FIFO.
//!
//! The FIFO is created in the runtime directory during `create`. The init
//! shim opens it for writing inside the container and blocks until
//! `start` opens it for reading; the shim writes the container ID and then
//! executes the user command. Each FIFO carries exactly one handshake and
//! is unlinked afterwards.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use corral_common::{CorralError, CorralResult};
use rustix::fs::{CWD, FileType, Mode, mknodat};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;

/// Creates the sync FIFO with exactly `mode` permissions.
///
/// # Errors
///
/// Returns an error if the FIFO exists already or cannot be created.
pub fn create_fifo(path: &Path, mode: u32) -> CorralResult<()> {
    mknodat(CWD, path, FileType::Fifo, Mode::from_bits_truncate(mode), 0).map_err(|e| {
        CorralError::configuration_with(
            format!("failed to create sync fifo {}", path.display()),
            std::io::Error::from(e),
        )
    })?;
    // mknod is subject to the umask
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    tracing::debug!(path = %path.display(), mode = format_args!("{mode:o}"), "created sync fifo");
    Ok(())
}

/// Waits for the init shim to announce itself on the FIFO.
///
/// The FIFO is first opened read-write, so the open never blocks and the
/// wait for the shim is cancelled by the caller's deadline alone. Once the
/// shim has written, a read-only descriptor takes over: a shim that wrote a
/// short payload and closed its end then shows up as end-of-file.
///
/// # Errors
///
/// Returns [`CorralError::Protocol`] if the payload is not exactly
/// `expected`, or an I/O error if the FIFO cannot be read.
pub async fn wait_for_peer(path: &Path, expected: &str) -> CorralResult<()> {
    let open_error = |e: std::io::Error| {
        CorralError::configuration_with(format!("failed to open sync fifo {}", path.display()), e)
    };
    let waiting = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
        .map_err(open_error)?;
    waiting.readable().await?;

    let mut receiver = pipe::OpenOptions::new().open_receiver(path).map_err(open_error)?;
    drop(waiting);

    let mut payload = vec![0u8; expected.len()];
    match receiver.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(CorralError::Protocol {
                message: format!("short handshake on {}", path.display()),
            });
        }
        Err(e) => return Err(e.into()),
    }

    let mut extra = [0u8; 1];
    match receiver.try_read(&mut extra) {
        Ok(0) => {}
        Ok(_) => {
            return Err(CorralError::Protocol {
                message: format!("unexpected data after handshake on {}", path.display()),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e.into()),
    }

    if payload != expected.as_bytes() {
        return Err(CorralError::Protocol {
            message: format!(
                "expected {expected:?} on sync fifo, got {:?}",
                String::from_utf8_lossy(&payload)
            ),
        });
    }

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tracing::debug!(path = %path.display(), "sync handshake completed");
    Ok(())
}
