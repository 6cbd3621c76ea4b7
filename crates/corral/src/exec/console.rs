//! Console socket support.
//!
//! When the orchestrator passes `--console-socket`, the monitor runs on a
//! fresh PTY and the master side is sent to the socket peer with
//! `SCM_RIGHTS`. The peer owns the terminal from then on.

#![allow(unsafe_code)]

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;

use corral_common::{CorralError, CorralResult};
use rustix::pty::{OpenptFlags, grantpt, openpt, ptsname, unlockpt};

/// Both ends of a freshly allocated PTY.
#[derive(Debug)]
pub struct PtyPair {
    /// Master side, sent to the console socket.
    pub master: OwnedFd,
    /// Slave side, becomes the monitor's stdio.
    pub slave: OwnedFd,
}

/// Allocates a PTY.
///
/// # Errors
///
/// Returns an error if no PTY can be allocated.
pub fn allocate_pty() -> CorralResult<PtyPair> {
    let master = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY | OpenptFlags::CLOEXEC)
        .map_err(std::io::Error::from)?;
    grantpt(&master).map_err(std::io::Error::from)?;
    unlockpt(&master).map_err(std::io::Error::from)?;
    let name = ptsname(&master, Vec::new()).map_err(std::io::Error::from)?;
    let name = name.to_string_lossy().into_owned();

    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
        .open(&name)?;

    tracing::debug!(pts = %name, "allocated pty");
    Ok(PtyPair {
        master,
        slave: slave.into(),
    })
}

/// Connects to the console socket and sends the PTY master.
///
/// # Errors
///
/// Returns an error if the socket cannot be reached or the descriptor
/// cannot be sent.
pub fn send_console(socket: &Path, master: &OwnedFd) -> CorralResult<()> {
    let stream = UnixStream::connect(socket).map_err(|e| {
        CorralError::configuration_with(
            format!("failed to connect to console socket {}", socket.display()),
            e,
        )
    })?;
    send_fd(&stream, b"terminal", master.as_raw_fd())?;
    tracing::debug!(socket = %socket.display(), "sent pty master to console socket");
    Ok(())
}

/// Sends one file descriptor with `payload` as regular data.
fn send_fd(stream: &UnixStream, payload: &[u8], fd: RawFd) -> CorralResult<()> {
    use std::mem;
    use std::ptr;

    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let mut cmsg_buf = [0u8; 64];

    // SAFETY: msghdr is plain data; every pointer set below outlives the call.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) as usize };

    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    if cmsg.is_null() {
        return Err(CorralError::Internal {
            message: "control buffer too small for SCM_RIGHTS".to_string(),
        });
    }
    unsafe {
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as usize;
        ptr::write(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd);
    }

    let n = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, 0) };
    if n < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
