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

//! TCP over IPv4 and IPv6. Host resolution goes through the system
//! resolver with a numeric port; listeners get `SO_REUSEADDR`.

use super::Listener;
use crate::error::{Error, Result};
use crate::uri::Uri;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::OwnedFd;

fn endpoint(uri: &Uri) -> Result<(&str, u16)> {
    match (&uri.host, uri.port) {
        (Some(host), Some(port)) => Ok((host.as_str(), port)),
        _ => Err(Error::InvalidAddress),
    }
}

pub(crate) fn listen(uri: &Uri) -> Result<Listener> {
    let endpoint = endpoint(uri)?;
    let addr = endpoint
        .to_socket_addrs()
        .map_err(|_| Error::CannotListen)?
        .next()
        .ok_or(Error::CannotListen)?;

    let listener = TcpListener::bind(addr).map_err(|e| {
        tracing::debug!(?addr, error = %e, "tcp bind failed");
        Error::CannotListen
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|_| Error::CannotListen)?;

    Ok(Listener {
        fd: OwnedFd::from(listener),
        unlink_path: None,
    })
}

pub(crate) fn connect(uri: &Uri) -> Result<OwnedFd> {
    let endpoint = endpoint(uri)?;
    let stream = TcpStream::connect(endpoint).map_err(|e| {
        tracing::debug!(host = endpoint.0, port = endpoint.1, error = %e, "tcp connect failed");
        Error::CannotConnect
    })?;
    stream
        .set_nonblocking(true)
        .map_err(|_| Error::CannotConnect)?;

    Ok(OwnedFd::from(stream))
}
