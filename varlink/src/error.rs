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
use crate::scanner::ParseError;
use thiserror::Error;

/// Every failure the library can report. Each variant carries a stable
/// numeric code and a canonical name; operations at the protocol boundary
/// translate into well-known `org.varlink.service` error replies instead of
/// surfacing these directly to peers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("out of memory or unexpected internal failure")]
    Panic,
    #[error("invalid interface definition: {0}")]
    InvalidInterface(ParseError),
    #[error("malformed or unsupported address")]
    InvalidAddress,
    #[error("invalid qualified method name")]
    InvalidMethod,
    #[error("interface is already registered")]
    DuplicateInterface,
    #[error("interface not found")]
    InterfaceNotFound,
    #[error("method not found")]
    MethodNotFound,
    #[error("cannot connect")]
    CannotConnect,
    #[error("cannot listen")]
    CannotListen,
    #[error("cannot accept")]
    CannotAccept,
    #[error("value has the wrong kind for this operation")]
    TypeMismatch,
    #[error("array index out of range")]
    InvalidIndex,
    #[error("unknown object field")]
    UnknownField,
    #[error("value is write-protected")]
    ReadOnly,
    #[error("invalid JSON: {0}")]
    InvalidJson(ParseError),
    #[error("failed to send message")]
    SendingMessage,
    #[error("failed to receive message")]
    ReceivingMessage,
    #[error("invalid message")]
    InvalidMessage,
    #[error("call flags are inconsistent")]
    InvalidCall,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("access denied")]
    AccessDenied,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable numeric code; failing C-ABI style interfaces return it negated.
    pub fn code(&self) -> i32 {
        match self {
            Error::Panic => 1,
            Error::InvalidInterface(_) => 2,
            Error::InvalidAddress => 3,
            Error::InvalidMethod => 4,
            Error::DuplicateInterface => 5,
            Error::InterfaceNotFound => 6,
            Error::MethodNotFound => 7,
            Error::CannotConnect => 8,
            Error::CannotListen => 9,
            Error::CannotAccept => 10,
            Error::TypeMismatch => 11,
            Error::InvalidIndex => 12,
            Error::UnknownField => 13,
            Error::ReadOnly => 14,
            Error::InvalidJson(_) => 15,
            Error::SendingMessage => 16,
            Error::ReceivingMessage => 17,
            Error::InvalidMessage => 18,
            Error::InvalidCall => 19,
            Error::ConnectionClosed => 20,
            Error::AccessDenied => 21,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Error::Panic => "Panic",
            Error::InvalidInterface(_) => "InvalidInterface",
            Error::InvalidAddress => "InvalidAddress",
            Error::InvalidMethod => "InvalidMethod",
            Error::DuplicateInterface => "DuplicateInterface",
            Error::InterfaceNotFound => "InterfaceNotFound",
            Error::MethodNotFound => "MethodNotFound",
            Error::CannotConnect => "CannotConnect",
            Error::CannotListen => "CannotListen",
            Error::CannotAccept => "CannotAccept",
            Error::TypeMismatch => "TypeMismatch",
            Error::InvalidIndex => "InvalidIndex",
            Error::UnknownField => "UnknownField",
            Error::ReadOnly => "ReadOnly",
            Error::InvalidJson(_) => "InvalidJson",
            Error::SendingMessage => "SendingMessage",
            Error::ReceivingMessage => "ReceivingMessage",
            Error::InvalidMessage => "InvalidMessage",
            Error::InvalidCall => "InvalidCall",
            Error::ConnectionClosed => "ConnectionClosed",
            Error::AccessDenied => "AccessDenied",
        }
    }

    /// Position of the first parse failure, when this error came out of a
    /// parser.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            Error::InvalidInterface(e) | Error::InvalidJson(e) => Some((e.line, e.column)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ScanErrorKind;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Panic.code(), 1);
        assert_eq!(Error::TypeMismatch.code(), 11);
        assert_eq!(Error::AccessDenied.code(), 21);
        assert_eq!(Error::ConnectionClosed.name(), "ConnectionClosed");
        assert_eq!(Error::TypeMismatch.name(), "TypeMismatch");
    }

    #[test]
    fn parse_errors_carry_positions() {
        let err = Error::InvalidJson(ParseError {
            kind: ScanErrorKind::JsonExpected,
            line: 3,
            column: 14,
        });
        assert_eq!(err.code(), 15);
        assert_eq!(err.position(), Some((3, 14)));
        assert_eq!(Error::ReadOnly.position(), None);
    }
}
