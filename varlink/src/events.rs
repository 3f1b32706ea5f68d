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

//! Readiness multiplexing. The core loops consume `(token, Readiness)`
//! pairs; this epoll-backed poller is the Linux source of them. The poller
//! fd itself can be registered with an outer event loop, which is how a
//! whole server nests into a foreign application.

use crate::error::{Error, Result};
use crate::stream::Readiness;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

pub struct Poller {
    epoll: Epoll,
}

fn flags_of(readiness: Readiness) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if readiness.readable {
        flags |= EpollFlags::EPOLLIN;
    }
    if readiness.writable {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

fn readiness_of(flags: EpollFlags) -> Readiness {
    Readiness {
        readable: flags
            .intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
        writable: flags.intersects(EpollFlags::EPOLLOUT),
        hang_up: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
    }
}

impl Poller {
    pub fn new() -> Result<Poller> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(|_| Error::Panic)?;
        Ok(Poller { epoll })
    }

    pub fn fd(&self) -> RawFd {
        self.epoll.0.as_raw_fd()
    }

    pub fn add(&self, fd: BorrowedFd, readiness: Readiness, token: u64) -> Result<()> {
        self.epoll
            .add(fd, EpollEvent::new(flags_of(readiness), token))
            .map_err(|_| Error::Panic)
    }

    pub fn modify(&self, fd: BorrowedFd, readiness: Readiness, token: u64) -> Result<()> {
        let mut event = EpollEvent::new(flags_of(readiness), token);
        self.epoll.modify(fd, &mut event).map_err(|_| Error::Panic)
    }

    pub fn remove(&self, fd: BorrowedFd) -> Result<()> {
        self.epoll.delete(fd).map_err(|_| Error::Panic)
    }

    /// One readiness event, or `None` when the timeout expires first.
    /// `None` as the timeout blocks until something is ready.
    pub fn wait(&self, timeout_ms: Option<u16>) -> Result<Option<(u64, Readiness)>> {
        let timeout: isize = match timeout_ms {
            Some(ms) => ms as isize,
            None => -1,
        };

        let mut events = [EpollEvent::empty()];
        let n = self.epoll.wait(&mut events, timeout).map_err(|_| Error::Panic)?;
        if n == 0 {
            return Ok(None);
        }

        Ok(Some((events[0].data(), readiness_of(events[0].events()))))
    }
}

impl AsFd for Poller {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.epoll.0.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn readable_after_write() {
        let (mut a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        let poller = Poller::new().unwrap();
        poller.add(b.as_fd(), Readiness::READABLE, 7).unwrap();

        assert_eq!(poller.wait(Some(0)).unwrap(), None);

        a.write_all(b"x").unwrap();
        let (token, readiness) = poller.wait(Some(1000)).unwrap().unwrap();
        assert_eq!(token, 7);
        assert!(readiness.readable);

        poller.remove(b.as_fd()).unwrap();
        assert_eq!(poller.wait(Some(0)).unwrap(), None);
    }

    #[test]
    fn modify_changes_interest() {
        let (_a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        let poller = Poller::new().unwrap();
        poller.add(b.as_fd(), Readiness::READABLE, 1).unwrap();

        // a socket with room in its send buffer is immediately writable
        let both = Readiness::READ_WRITE;
        poller.modify(b.as_fd(), both, 1).unwrap();

        let (_, readiness) = poller.wait(Some(1000)).unwrap().unwrap();
        assert!(readiness.writable);
    }
}
