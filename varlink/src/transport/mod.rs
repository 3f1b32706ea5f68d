// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! Listen, connect and accept for the supported transports. All returned
//! descriptors are non-blocking and close-on-exec.

mod device;
mod tcp;
mod unix;

use crate::error::{Error, Result};
use crate::uri::{Protocol, Uri};
use nix::errno::Errno;
use nix::libc;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

/// Credentials of a unix-socket peer, from `SO_PEERCRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// A bound, listening socket. `unlink_path` is the filesystem socket path
/// the owner removes on shutdown.
pub struct Listener {
    pub fd: OwnedFd,
    pub unlink_path: Option<PathBuf>,
}

pub fn listen(uri: &Uri) -> Result<Listener> {
    match uri.protocol {
        Protocol::Unix => unix::listen(uri.path.as_deref(), uri.mode),
        Protocol::Tcp => tcp::listen(uri),
        Protocol::Device | Protocol::None => Err(Error::InvalidAddress),
    }
}

pub fn connect(uri: &Uri) -> Result<OwnedFd> {
    match uri.protocol {
        Protocol::Unix => unix::connect(uri.path.as_deref().ok_or(Error::InvalidAddress)?),
        Protocol::Tcp => tcp::connect(uri),
        Protocol::Device => device::open_device(uri.path.as_deref().ok_or(Error::InvalidAddress)?),
        Protocol::None => Err(Error::InvalidAddress),
    }
}

/// Accept one pending connection. Unix sockets return peer credentials and
/// apply the access policy; a denied peer is closed before any bytes move.
pub fn accept(protocol: Protocol, listen_fd: RawFd) -> Result<(OwnedFd, Option<PeerCredentials>)> {
    match protocol {
        Protocol::Unix => unix::accept(listen_fd),
        Protocol::Tcp => Ok((accept4(listen_fd)?, None)),
        Protocol::Device | Protocol::None => Err(Error::CannotAccept),
    }
}

pub(crate) fn accept4(listen_fd: RawFd) -> Result<OwnedFd> {
    let fd = unsafe {
        libc::accept4(
            listen_fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if fd < 0 {
        tracing::debug!(errno = %Errno::last(), "accept4 failed");
        return Err(Error::CannotAccept);
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Incoming unix connections are checked against the mode and ownership of
/// the listen socket:
/// world-writable sockets admit everyone; root is always admitted; the
/// listener's own uid is admitted; a group-writable socket admits the
/// listener's gid.
pub(crate) fn check_credentials(
    listen_mode: u32,
    listen_uid: u32,
    listen_gid: u32,
    connection_uid: u32,
    connection_gid: u32,
) -> bool {
    if listen_mode & 0o002 != 0 {
        return true;
    }

    if connection_uid == 0 || connection_gid == 0 {
        return true;
    }

    if connection_uid == listen_uid {
        return true;
    }

    if listen_mode & 0o020 != 0 && connection_gid == listen_gid {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_writable_admits_everyone() {
        assert!(check_credentials(0o666, 1000, 1000, 4321, 4321));
    }

    #[test]
    fn root_is_always_admitted() {
        assert!(check_credentials(0o600, 1000, 1000, 0, 4321));
        assert!(check_credentials(0o600, 1000, 1000, 4321, 0));
    }

    #[test]
    fn owner_is_admitted() {
        assert!(check_credentials(0o600, 1000, 1000, 1000, 1000));
    }

    #[test]
    fn group_writable_admits_the_group() {
        assert!(check_credentials(0o620, 1000, 2000, 1001, 2000));
        assert!(!check_credentials(0o600, 1000, 2000, 1001, 2000));
    }

    #[test]
    fn everyone_else_is_denied() {
        assert!(!check_credentials(0o600, 1000, 1000, 1001, 1001));
        assert!(!check_credentials(0o640, 1000, 1000, 1001, 1001));
    }
}
