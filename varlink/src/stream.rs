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

//! NUL-delimited message framing over one non-blocking file descriptor,
//! with fixed-size read and write buffers and partial-write tracking.

use crate::error::{Error, Result};
use crate::value::Object;
use nix::errno::Errno;
use nix::libc;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

pub const BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Platform-free readiness interest, translated to and from the poller's
/// native event flags at the edges. `hang_up` is only ever reported by the
/// poller, never registered as interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hang_up: bool,
}

impl Readiness {
    pub const READABLE: Readiness = Readiness {
        readable: true,
        writable: false,
        hang_up: false,
    };

    pub const READ_WRITE: Readiness = Readiness {
        readable: true,
        writable: true,
        hang_up: false,
    };
}

pub struct Stream {
    fd: OwnedFd,
    in_buf: Vec<u8>,
    in_start: usize,
    in_end: usize,
    out_buf: Vec<u8>,
    out_start: usize,
    out_end: usize,
    hup: bool,
}

fn move_rest(buffer: &mut [u8], start: &mut usize, end: &mut usize) {
    let rest = *end - *start;
    if rest > 0 {
        buffer.copy_within(*start..*end, 0);
    }
    *start = 0;
    *end = rest;
}

/// Write to a socket without raising SIGPIPE; falls back to plain write for
/// non-socket fds such as character devices.
fn raw_write(fd: RawFd, buf: &[u8]) -> isize {
    let n = unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if n == -1 && Errno::last() == Errno::ENOTSOCK {
        return unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    }
    n
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) }
}

impl Stream {
    pub fn new(fd: OwnedFd) -> Stream {
        Stream {
            fd,
            in_buf: vec![0; BUFFER_SIZE],
            in_start: 0,
            in_end: 0,
            out_buf: vec![0; BUFFER_SIZE],
            out_start: 0,
            out_end: 0,
            hup: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn hup(&self) -> bool {
        self.hup
    }

    pub fn has_pending_out(&self) -> bool {
        self.out_end > self.out_start
    }

    /// The interest mask for a readiness multiplexer: always readable,
    /// writable only while output is queued.
    pub fn events(&self) -> Readiness {
        Readiness {
            readable: true,
            writable: self.has_pending_out(),
            hang_up: false,
        }
    }

    pub fn dispatch(&mut self, events: Readiness) -> Result<()> {
        if events.hang_up {
            self.hup = true;
        }
        if events.writable && self.has_pending_out() {
            self.flush()?;
        }
        Ok(())
    }

    /// Extract the next message. `Ok(None)` means no complete frame is
    /// buffered and the descriptor has nothing more to give right now; a
    /// full buffer with no terminator in sight is fatal.
    pub fn read(&mut self) -> Result<Option<Object>> {
        loop {
            let nul = self.in_buf[self.in_start..self.in_end]
                .iter()
                .position(|&b| b == 0);

            if let Some(offset) = nul {
                let end = self.in_start + offset;
                let text = std::str::from_utf8(&self.in_buf[self.in_start..end])
                    .map_err(|_| Error::InvalidMessage)?;
                let message = Object::from_json(text)?;
                self.in_start = end + 1;
                return Ok(Some(message));
            }

            move_rest(&mut self.in_buf, &mut self.in_start, &mut self.in_end);

            if self.in_end == BUFFER_SIZE {
                return Err(Error::InvalidMessage);
            }

            let fd = self.fd.as_raw_fd();
            match raw_read(fd, &mut self.in_buf[self.in_end..]) {
                -1 => match Errno::last() {
                    Errno::EAGAIN => return Ok(None),
                    Errno::ECONNRESET => {
                        self.hup = true;
                        return Ok(None);
                    }
                    _ => return Err(Error::ReceivingMessage),
                },
                0 => {
                    self.hup = true;
                    return Ok(None);
                }
                n => self.in_end += n as usize,
            }
        }
    }

    /// Queue one message and try to flush it. `Ok(true)` when the whole
    /// message left the buffer.
    pub fn write(&mut self, message: &Object) -> Result<bool> {
        let json = message.to_json();
        let length = json.len();

        if length + 1 > BUFFER_SIZE {
            return Err(Error::InvalidMessage);
        }

        if self.out_end + length + 1 > BUFFER_SIZE {
            return Err(Error::SendingMessage);
        }

        self.out_buf[self.out_end..self.out_end + length].copy_from_slice(json.as_bytes());
        self.out_buf[self.out_end + length] = 0;
        self.out_end += length + 1;

        Ok(self.flush()? == 0)
    }

    /// Push queued bytes to the kernel; returns how many are still queued.
    pub fn flush(&mut self) -> Result<usize> {
        if self.has_pending_out() {
            let fd = self.fd.as_raw_fd();
            match raw_write(fd, &self.out_buf[self.out_start..self.out_end]) {
                -1 => match Errno::last() {
                    Errno::EAGAIN => {}
                    Errno::EPIPE => {
                        self.hup = true;
                        return Err(Error::ConnectionClosed);
                    }
                    _ => return Err(Error::SendingMessage),
                },
                n => self.out_start += n as usize,
            }
        }

        move_rest(&mut self.out_buf, &mut self.out_start, &mut self.out_end);
        Ok(self.out_end - self.out_start)
    }
}
