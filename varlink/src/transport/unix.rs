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

//! Unix stream sockets: filesystem paths, the `@name` abstract namespace,
//! and kernel autobind for empty paths. Listen sockets carry the requested
//! mode both on the filesystem node and on the socket inode itself, so the
//! accept path can consult it.

use super::{accept4, check_credentials, Listener, PeerCredentials};
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{getsockopt, sockopt};
use nix::sys::stat::{fchmod, fstat, Mode};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

fn socket() -> Result<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(Error::Panic);
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// `sockaddr_un` for a path; a leading `@` selects the abstract namespace
/// (the path then begins with a NUL byte on the wire).
fn sockaddr(path: &str) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut sa: libc::sockaddr_un = unsafe { mem::zeroed() };
    sa.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_bytes();
    if bytes.is_empty() || bytes.len() + 1 > sa.sun_path.len() {
        return Err(Error::InvalidAddress);
    }

    for (i, &b) in bytes.iter().enumerate() {
        sa.sun_path[i] = b as libc::c_char;
    }

    let header = mem::size_of::<libc::sa_family_t>();
    let len = if bytes[0] == b'@' {
        sa.sun_path[0] = 0;
        header + bytes.len()
    } else {
        header + bytes.len() + 1
    };

    Ok((sa, len as libc::socklen_t))
}

pub(crate) fn connect(path: &str) -> Result<OwnedFd> {
    let fd = socket()?;
    let (sa, len) = sockaddr(path)?;

    let r = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &sa as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if r < 0 {
        tracing::debug!(path, errno = %Errno::last(), "unix connect failed");
        return Err(Error::CannotConnect);
    }

    Ok(fd)
}

pub(crate) fn listen(path: Option<&str>, mode: Option<u32>) -> Result<Listener> {
    let fd = socket().map_err(|_| Error::CannotListen)?;
    let mut unlink_path = None;

    match path {
        None => {
            // Ask the kernel for a unique abstract address by binding with
            // nothing but the address family.
            let mut sa: libc::sockaddr_un = unsafe { mem::zeroed() };
            sa.sun_family = libc::AF_UNIX as libc::sa_family_t;
            let r = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sa as *const libc::sockaddr_un as *const libc::sockaddr,
                    mem::size_of::<libc::sa_family_t>() as libc::socklen_t,
                )
            };
            if r < 0 {
                return Err(Error::CannotListen);
            }
        }
        Some(path) => {
            let (sa, len) = sockaddr(path)?;

            if !path.starts_with('@') {
                let _ = std::fs::remove_file(path);
            }

            let r = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sa as *const libc::sockaddr_un as *const libc::sockaddr,
                    len,
                )
            };
            if r < 0 {
                tracing::debug!(path, errno = %Errno::last(), "unix bind failed");
                return Err(Error::CannotListen);
            }

            if !path.starts_with('@') {
                unlink_path = Some(PathBuf::from(path));
            }
        }
    }

    if let Some(mode) = mode {
        let permissions = Mode::from_bits_truncate(mode);

        // Filesystem permissions are checked by the kernel; abstract
        // namespace sockets have none.
        if let Some(path) = &unlink_path {
            if nix::sys::stat::fchmodat(
                None,
                path.as_path(),
                permissions,
                nix::sys::stat::FchmodatFlags::FollowSymlink,
            )
            .is_err()
            {
                return Err(Error::CannotListen);
            }
        }

        // Also store the mode at the listen socket's inode; accept reads
        // it back to run the access policy, abstract sockets included.
        if fchmod(fd.as_raw_fd(), permissions).is_err() {
            return Err(Error::CannotListen);
        }
    }

    if unsafe { libc::listen(fd.as_raw_fd(), libc::SOMAXCONN) } < 0 {
        return Err(Error::CannotListen);
    }

    Ok(Listener { fd, unlink_path })
}

pub(crate) fn accept(listen_fd: RawFd) -> Result<(OwnedFd, Option<PeerCredentials>)> {
    let fd = accept4(listen_fd)?;

    let stat = fstat(listen_fd).map_err(|_| Error::CannotAccept)?;

    let ucred =
        getsockopt(&fd, sockopt::PeerCredentials).map_err(|_| Error::CannotAccept)?;
    let credentials = PeerCredentials {
        pid: ucred.pid(),
        uid: ucred.uid(),
        gid: ucred.gid(),
    };

    if !check_credentials(
        stat.st_mode,
        stat.st_uid,
        stat.st_gid,
        credentials.uid,
        credentials.gid,
    ) {
        tracing::debug!(
            uid = credentials.uid,
            gid = credentials.gid,
            "peer denied by socket permissions"
        );
        return Err(Error::AccessDenied);
    }

    Ok((fd, Some(credentials)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport;
    use crate::uri::Uri;

    fn socket_path(name: &str) -> String {
        format!(
            "{}/varlink-test-{}-{}.socket",
            std::env::temp_dir().display(),
            std::process::id(),
            name
        )
    }

    #[test]
    fn filesystem_listen_connect_accept() {
        let path = socket_path("fs");
        let uri = Uri::parse(&format!("unix:{path}"), false).unwrap();

        let listener = transport::listen(&uri).unwrap();
        assert_eq!(
            listener.unlink_path.as_deref(),
            Some(std::path::Path::new(&path))
        );

        let _client = transport::connect(&uri).unwrap();
        let (_conn, credentials) = accept(listener.fd.as_raw_fd()).unwrap();

        // same process, so the peer is ourselves
        let credentials = credentials.unwrap();
        assert_eq!(credentials.pid, std::process::id() as i32);
        assert_eq!(credentials.uid, nix::unistd::getuid().as_raw());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn abstract_listen_connect() {
        let name = format!("@varlink-test-{}-abstract", std::process::id());
        let uri = Uri::parse(&format!("unix:{name}"), false).unwrap();

        let listener = transport::listen(&uri).unwrap();
        assert!(listener.unlink_path.is_none());

        let _client = transport::connect(&uri).unwrap();
        let (_conn, credentials) = accept(listener.fd.as_raw_fd()).unwrap();
        assert!(credentials.is_some());
    }

    #[test]
    fn autobind_listen() {
        let uri = Uri::parse("unix:", false).unwrap();
        let listener = transport::listen(&uri).unwrap();
        assert!(listener.unlink_path.is_none());
    }

    #[test]
    fn requested_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;

        let path = socket_path("mode");
        let uri = Uri::parse(&format!("unix:{path};mode=0600"), false).unwrap();

        let listener = transport::listen(&uri).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        let stat = fstat(listener.fd.as_raw_fd()).unwrap();
        assert_eq!(stat.st_mode & 0o777, 0o600);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn connect_to_missing_path_fails() {
        let uri = Uri::parse("unix:/nonexistent/varlink-test.socket", false).unwrap();
        assert!(matches!(
            transport::connect(&uri),
            Err(Error::CannotConnect)
        ));
    }
}
