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

//! Service address parsing.
//!
//! Accepted forms:
//! - `unix:<path>[;mode=<octal>]` with `@name` for the abstract namespace
//!   and an empty path for kernel autobind
//! - `tcp:<host>:<port>`, bracketed IPv6 hosts
//! - `device:<path>`
//! - `varlink://<percent-encoded-address>[/Interface[.Member]][?query][#fragment]`
//! - bare `interface[.Member]` when the caller asks for interface parsing

use crate::error::{Error, Result};
use crate::scanner::{interface_name_valid, member_name_valid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Unix,
    Tcp,
    Device,
    /// Interface-only address, nothing to connect to.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub protocol: Protocol,
    /// unix or device path; `@name` selects the abstract namespace; `None`
    /// on a unix address requests kernel autobind.
    pub path: Option<String>,
    /// Requested socket file mode for unix listeners.
    pub mode: Option<u32>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub qualified_member: Option<String>,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl Default for Protocol {
    fn default() -> Protocol {
        Protocol::None
    }
}

impl Uri {
    /// `has_interface` tells the parser whether a bare string (or the path
    /// part of a `varlink://` URI) names an interface; the caller knows
    /// from context, the address alone is ambiguous.
    pub fn parse(address: &str, has_interface: bool) -> Result<Uri> {
        if let Some(rest) = address.strip_prefix("varlink://") {
            return Uri::parse_container(rest);
        }

        let mut uri = Uri::parse_plain(address, has_interface)?;
        uri.qualify();
        Ok(uri)
    }

    /// The `varlink://` container: fragment, query, an optional
    /// `/Interface[.Member]` segment, then the percent-encoded address.
    fn parse_container(rest: &str) -> Result<Uri> {
        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (rest, None),
        };

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query.to_string())),
            None => (rest, None),
        };

        let (address, interface) = match rest.rsplit_once('/') {
            Some((address, interface)) => (address, Some(interface.to_string())),
            None => (rest, None),
        };

        let decoded = percent_decode(address)?;
        let mut uri = Uri::parse_plain(&decoded, false)?;
        uri.interface = interface;
        uri.query = query;
        uri.fragment = fragment;
        uri.qualify();
        Ok(uri)
    }

    fn parse_plain(address: &str, has_interface: bool) -> Result<Uri> {
        if let Some(rest) = address.strip_prefix("unix:") {
            let (path, mode) = parse_unix_parameters(rest)?;
            Ok(Uri {
                protocol: Protocol::Unix,
                path,
                mode,
                ..Uri::default()
            })
        } else if let Some(rest) = address.strip_prefix("tcp:") {
            let (host, port) = rest.rsplit_once(':').ok_or(Error::InvalidAddress)?;
            let host = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);
            if host.is_empty() || host.contains(':') && !rest.starts_with('[') {
                return Err(Error::InvalidAddress);
            }
            let port: u16 = port.parse().map_err(|_| Error::InvalidAddress)?;
            Ok(Uri {
                protocol: Protocol::Tcp,
                host: Some(host.to_string()),
                port: Some(port),
                ..Uri::default()
            })
        } else if let Some(rest) = address.strip_prefix("device:") {
            if rest.is_empty() {
                return Err(Error::InvalidAddress);
            }
            Ok(Uri {
                protocol: Protocol::Device,
                path: Some(rest.to_string()),
                ..Uri::default()
            })
        } else if has_interface {
            Ok(Uri {
                protocol: Protocol::None,
                interface: Some(address.to_string()),
                ..Uri::default()
            })
        } else {
            Err(Error::InvalidAddress)
        }
    }

    /// Split the interface part into interface and member and validate the
    /// names. A trailing lone dot is tolerated and stripped.
    fn qualify(&mut self) {
        let Some(mut interface) = self.interface.take() else {
            return;
        };

        if interface.ends_with('.') {
            interface.pop();
        }

        if let Some((prefix, member)) = interface.rsplit_once('.') {
            if member.starts_with(|c: char| c.is_ascii_uppercase()) {
                self.qualified_member = Some(interface.clone());
                self.member = Some(member.to_string());
                interface = prefix.to_string();
            }
        }

        self.interface = Some(interface);
    }

    /// Check the names the address carries; parsing keeps whatever it saw
    /// so that error messages can echo it back.
    pub fn validate_interface(&self) -> Result<()> {
        match &self.interface {
            Some(interface) if interface_name_valid(interface) => {}
            _ => return Err(Error::InvalidAddress),
        }
        match &self.member {
            None => Ok(()),
            Some(member) if member_name_valid(member) => Ok(()),
            Some(_) => Err(Error::InvalidAddress),
        }
    }
}

fn parse_unix_parameters(rest: &str) -> Result<(Option<String>, Option<u32>)> {
    let (path, parameter) = match rest.split_once(';') {
        Some((path, parameter)) => (path, Some(parameter)),
        None => (rest, None),
    };

    // An empty path asks the kernel to assign a unique abstract address.
    let path = if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    };

    let mode = match parameter {
        None => None,
        Some(parameter) => {
            let digits = parameter
                .strip_prefix("mode=")
                .ok_or(Error::InvalidAddress)?;
            Some(parse_mode(digits)?)
        }
    };

    Ok((path, mode))
}

/// Like strtoul with base 0: `0x` is hex, a leading `0` octal, else decimal.
fn parse_mode(digits: &str) -> Result<u32> {
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u32::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse()
    };

    parsed.map_err(|_| Error::InvalidAddress)
}

fn percent_decode(encoded: &str) -> Result<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3).ok_or(Error::InvalidAddress)?;
            let value = u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidAddress)?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| Error::InvalidAddress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_addresses() {
        let uri = Uri::parse("unix:/run/test.socket", false).unwrap();
        assert_eq!(uri.protocol, Protocol::Unix);
        assert_eq!(uri.path.as_deref(), Some("/run/test.socket"));
        assert_eq!(uri.mode, None);

        let uri = Uri::parse("unix:@test.socket", false).unwrap();
        assert_eq!(uri.path.as_deref(), Some("@test.socket"));

        let uri = Uri::parse("unix:/run/test.socket;mode=0660", false).unwrap();
        assert_eq!(uri.mode, Some(0o660));

        let uri = Uri::parse("unix:;mode=0666", false).unwrap();
        assert_eq!(uri.path, None);
        assert_eq!(uri.mode, Some(0o666));

        let uri = Uri::parse("unix:", false).unwrap();
        assert_eq!(uri.path, None);

        assert!(Uri::parse("unix:/run/x;badparam=1", false).is_err());
        assert!(Uri::parse("unix:/run/x;mode=99z", false).is_err());
    }

    #[test]
    fn tcp_addresses() {
        let uri = Uri::parse("tcp:127.0.0.1:1234", false).unwrap();
        assert_eq!(uri.protocol, Protocol::Tcp);
        assert_eq!(uri.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(uri.port, Some(1234));

        let uri = Uri::parse("tcp:[::1]:555", false).unwrap();
        assert_eq!(uri.host.as_deref(), Some("::1"));
        assert_eq!(uri.port, Some(555));

        assert!(Uri::parse("tcp:127.0.0.1", false).is_err());
        assert!(Uri::parse("tcp:host:notaport", false).is_err());
        assert!(Uri::parse("tcp:::1:555", false).is_err());
    }

    #[test]
    fn device_addresses() {
        let uri = Uri::parse("device:/dev/ttyS0", false).unwrap();
        assert_eq!(uri.protocol, Protocol::Device);
        assert_eq!(uri.path.as_deref(), Some("/dev/ttyS0"));

        assert!(Uri::parse("device:", false).is_err());
    }

    #[test]
    fn bare_interfaces() {
        let uri = Uri::parse("org.example.test", true).unwrap();
        assert_eq!(uri.protocol, Protocol::None);
        assert_eq!(uri.interface.as_deref(), Some("org.example.test"));
        assert_eq!(uri.member, None);
        uri.validate_interface().unwrap();

        let uri = Uri::parse("org.example.test.Echo", true).unwrap();
        assert_eq!(uri.interface.as_deref(), Some("org.example.test"));
        assert_eq!(uri.member.as_deref(), Some("Echo"));
        assert_eq!(uri.qualified_member.as_deref(), Some("org.example.test.Echo"));
        uri.validate_interface().unwrap();

        // trailing lone dot is stripped
        let uri = Uri::parse("org.example.test.", true).unwrap();
        assert_eq!(uri.interface.as_deref(), Some("org.example.test"));
        assert_eq!(uri.member, None);

        assert!(Uri::parse("nodots", true)
            .unwrap()
            .validate_interface()
            .is_err());
        assert!(Uri::parse("nodots", false).is_err());
    }

    #[test]
    fn container_uris() {
        let encoded = "varlink://unix%3A%2Frun%2Ftest/org.example.test.Echo?key=value#frag";
        let uri = Uri::parse(encoded, false).unwrap();
        assert_eq!(uri.protocol, Protocol::Unix);
        assert_eq!(uri.path.as_deref(), Some("/run/test"));
        assert_eq!(uri.interface.as_deref(), Some("org.example.test"));
        assert_eq!(uri.member.as_deref(), Some("Echo"));
        assert_eq!(uri.query.as_deref(), Some("key=value"));
        assert_eq!(uri.fragment.as_deref(), Some("frag"));

        let uri = Uri::parse("varlink://tcp%3Ahost%3A42", false).unwrap();
        assert_eq!(uri.protocol, Protocol::Tcp);
        assert_eq!(uri.port, Some(42));

        assert!(Uri::parse("varlink://unix%3A%zz", false).is_err());
    }

    #[test]
    fn unsupported_schemes() {
        assert!(Uri::parse("ssh://example.com", false).is_err());
        assert!(Uri::parse("", false).is_err());
    }
}
