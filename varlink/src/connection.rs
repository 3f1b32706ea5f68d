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

//! The client side: one outbound stream and a FIFO of pending reply
//! callbacks. Replies are delivered in the order the calls were issued; a
//! `continues` reply keeps its callback queued, the terminating reply
//! removes it.

use crate::error::{Error, Result};
use crate::message::{self, CALL_MORE, CALL_ONEWAY, REPLY_CONTINUES};
use crate::stream::{Readiness, Stream};
use crate::transport;
use crate::uri::Uri;
use crate::value::Object;
use std::collections::VecDeque;
use std::os::fd::{OwnedFd, RawFd};

/// Invoked once per reply: the connection, the error name (None on
/// success), the reply parameters and the reply flags.
pub type ReplyCallback = Box<dyn FnMut(&mut Connection, Option<&str>, &Object, u64)>;

pub type CloseCallback = Box<dyn FnMut(&mut Connection)>;

struct PendingReply {
    call_flags: u64,
    callback: ReplyCallback,
}

pub struct Connection {
    address: String,
    stream: Option<Stream>,
    pending: VecDeque<PendingReply>,
    close_callback: Option<CloseCallback>,
}

impl Connection {
    pub fn new(address: &str) -> Result<Connection> {
        let uri = Uri::parse(address, false)?;
        let fd = transport::connect(&uri)?;
        tracing::debug!(address, "connected");
        Ok(Connection::with_fd(address.to_string(), fd))
    }

    /// Adopt an already-connected descriptor, e.g. one set up by a
    /// process activator. It must be non-blocking.
    pub fn from_fd(fd: OwnedFd) -> Connection {
        Connection::with_fd(String::new(), fd)
    }

    fn with_fd(address: String, fd: OwnedFd) -> Connection {
        Connection {
            address,
            stream: Some(Stream::new(fd)),
            pending: VecDeque::new(),
            close_callback: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn fd(&self) -> Result<RawFd> {
        Ok(self.stream.as_ref().ok_or(Error::ConnectionClosed)?.fd())
    }

    /// The interest mask to register with a readiness multiplexer.
    pub fn events(&self) -> Readiness {
        self.stream
            .as_ref()
            .map(|s| s.events())
            .unwrap_or_default()
    }

    pub fn set_close_callback(&mut self, callback: impl FnMut(&mut Connection) + 'static) {
        self.close_callback = Some(Box::new(callback));
    }

    pub fn close(&mut self) {
        self.stream = None;
        if let Some(mut callback) = self.close_callback.take() {
            callback(self);
        }
    }

    /// Issue a call. The callback is queued unless the call is one-way.
    /// Parameters default to the empty object on the wire.
    pub fn call(
        &mut self,
        qualified_method: &str,
        parameters: Option<Object>,
        flags: u64,
        callback: impl FnMut(&mut Connection, Option<&str>, &Object, u64) + 'static,
    ) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;

        if flags & CALL_MORE != 0 && flags & CALL_ONEWAY != 0 {
            return Err(Error::InvalidCall);
        }

        let call = message::pack_call(
            qualified_method,
            Some(parameters.unwrap_or_default()),
            flags,
        )?;

        if flags & CALL_ONEWAY == 0 {
            self.pending.push_back(PendingReply {
                call_flags: flags,
                callback: Box::new(callback),
            });
        }

        tracing::debug!(method = qualified_method, flags, "call");
        stream.write(&call)?;
        Ok(())
    }

    /// Flush pending output and deliver every buffered reply to its
    /// callback, in call order.
    pub fn process_events(&mut self, events: Readiness) -> Result<()> {
        self.stream
            .as_mut()
            .ok_or(Error::ConnectionClosed)?
            .dispatch(events)?;

        loop {
            // a callback may have closed the connection
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };

            let message = match stream.read()? {
                Some(message) => message,
                None => break,
            };

            let (error, parameters, reply_flags) = message::unpack_reply(&message)?;
            let continues = reply_flags & REPLY_CONTINUES != 0;

            let front = self.pending.front().ok_or(Error::InvalidMessage)?;
            if continues && front.call_flags & CALL_MORE == 0 {
                return Err(Error::InvalidMessage);
            }

            let mut reply = self.pending.pop_front().ok_or(Error::InvalidMessage)?;
            (reply.callback)(self, error.as_deref(), &parameters, reply_flags);
            if continues {
                self.pending.push_front(reply);
            }
        }

        if self.stream.as_ref().is_some_and(|s| s.hup()) {
            self.close();
            return Err(Error::ConnectionClosed);
        }

        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.close();
        }
    }
}
