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

//! Varlink: a JSON-over-stream IPC protocol for local services.
//!
//! Interfaces are declared in a small description language, calls and
//! replies travel as NUL-delimited JSON objects over unix, tcp or device
//! transports, and both the server and the client run as readiness-driven
//! state machines that plug into any event loop.

pub mod avl;
pub mod connection;
pub mod error;
pub mod events;
pub mod idl;
pub mod message;
pub mod scanner;
pub mod service;
pub mod stream;
pub mod transport;
pub mod uri;
pub mod value;

pub use connection::Connection;
pub use error::{Error, Result};
pub use events::Poller;
pub use idl::{IdlMarkup, Interface};
pub use message::{CALL_MORE, CALL_ONEWAY, REPLY_CONTINUES};
pub use service::{Call, InterfaceRegistration, Service};
pub use stream::Readiness;
pub use transport::PeerCredentials;
pub use uri::{Protocol, Uri};
pub use value::{Array, Kind, Markup, Object, Value};
