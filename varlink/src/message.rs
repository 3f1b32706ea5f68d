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

//! The call and reply envelopes of the wire protocol.

use crate::error::{Error, Result};
use crate::value::Object;

/// Ask for a stream of replies instead of a single one.
pub const CALL_MORE: u64 = 1;
/// Expect no reply at all.
pub const CALL_ONEWAY: u64 = 2;
/// More replies follow this one.
pub const REPLY_CONTINUES: u64 = 1;

pub fn pack_call(method: &str, parameters: Option<Object>, flags: u64) -> Result<Object> {
    if flags & CALL_MORE != 0 && flags & CALL_ONEWAY != 0 {
        return Err(Error::InvalidCall);
    }

    let call = Object::new();
    call.set("method", method)?;

    if let Some(parameters) = parameters {
        call.set("parameters", parameters)?;
    }

    if flags & CALL_MORE != 0 {
        call.set("more", true)?;
    }

    if flags & CALL_ONEWAY != 0 {
        call.set("oneway", true)?;
    }

    Ok(call)
}

/// Returns method, parameters (an empty object when absent) and flags.
pub fn unpack_call(call: &Object) -> Result<(String, Object, u64)> {
    let method = call.get_string("method").map_err(|_| Error::InvalidMessage)?;

    let parameters = match call.get_object("parameters") {
        Ok(parameters) => parameters,
        Err(Error::UnknownField) => Object::new(),
        Err(_) => return Err(Error::InvalidMessage),
    };

    let more = match call.get_bool("more") {
        Ok(more) => more,
        Err(Error::UnknownField) => false,
        Err(_) => return Err(Error::InvalidMessage),
    };

    let oneway = match call.get_bool("oneway") {
        Ok(oneway) => oneway,
        Err(Error::UnknownField) => false,
        Err(_) => return Err(Error::InvalidMessage),
    };

    if more && oneway {
        return Err(Error::InvalidCall);
    }

    let mut flags = 0;
    if more {
        flags |= CALL_MORE;
    }
    if oneway {
        flags |= CALL_ONEWAY;
    }

    Ok((method, parameters, flags))
}

pub fn pack_reply(error: Option<&str>, parameters: Option<Object>, flags: u64) -> Result<Object> {
    let reply = Object::new();

    if let Some(error) = error {
        reply.set("error", error)?;
    }

    if let Some(parameters) = parameters {
        reply.set("parameters", parameters)?;
    }

    if flags & REPLY_CONTINUES != 0 {
        reply.set("continues", true)?;
    }

    Ok(reply)
}

/// Returns the error name (None on success), parameters and flags.
pub fn unpack_reply(reply: &Object) -> Result<(Option<String>, Object, u64)> {
    let error = match reply.get_string("error") {
        Ok(error) => Some(error),
        Err(Error::UnknownField) => None,
        Err(_) => return Err(Error::InvalidMessage),
    };

    let parameters = match reply.get_object("parameters") {
        Ok(parameters) => parameters,
        Err(Error::UnknownField) => Object::new(),
        Err(_) => return Err(Error::InvalidMessage),
    };

    let continues = match reply.get_bool("continues") {
        Ok(continues) => continues,
        Err(Error::UnknownField) => false,
        Err(_) => return Err(Error::InvalidMessage),
    };

    let flags = if continues { REPLY_CONTINUES } else { 0 };

    Ok((error, parameters, flags))
}
