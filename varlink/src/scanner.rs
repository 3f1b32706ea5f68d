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

//! Single-pass scanner shared by the JSON reader and the interface
//! description parser. The interface mode recognizes `#` comments and
//! collects docstrings; the plain mode treats `#` as an invalid character,
//! which is what makes comments illegal in wire JSON.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanErrorKind {
    InterfaceKeywordExpected,
    KeywordExpected,
    DuplicateFieldName,
    InterfaceNameInvalid,
    ObjectExpected,
    DuplicateMemberName,
    MemberNameInvalid,
    UnknownType(String),
    FieldNameInvalid,
    TypeNameInvalid,
    InvalidCharacter,
    OperatorExpected,
    TypeExpected,
    JsonExpected,
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InterfaceKeywordExpected => write!(f, "InterfaceKeywordExpected"),
            Self::KeywordExpected => write!(f, "KeywordExpected"),
            Self::DuplicateFieldName => write!(f, "DuplicateFieldName"),
            Self::InterfaceNameInvalid => write!(f, "InterfaceNameInvalid"),
            Self::ObjectExpected => write!(f, "ObjectExpected"),
            Self::DuplicateMemberName => write!(f, "DuplicateMemberName"),
            Self::MemberNameInvalid => write!(f, "MemberNameInvalid"),
            Self::UnknownType(name) => write!(f, "UnknownType: {name}"),
            Self::FieldNameInvalid => write!(f, "FieldNameInvalid"),
            Self::TypeNameInvalid => write!(f, "TypeNameInvalid"),
            Self::InvalidCharacter => write!(f, "InvalidCharacter"),
            Self::OperatorExpected => write!(f, "OperatorExpected"),
            Self::TypeExpected => write!(f, "TypeExpected"),
            Self::JsonExpected => write!(f, "JsonExpected"),
        }
    }
}

/// First failure observed by a scanner, with 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ScanErrorKind,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    line_start: usize,
    line_nr: usize,
    last_comment_start: Option<usize>,
    comments: bool,
    error: Option<ParseError>,
}

impl<'a> Scanner<'a> {
    pub fn new_interface(input: &'a str) -> Scanner<'a> {
        Scanner::new(input, true)
    }

    pub fn new_plain(input: &'a str) -> Scanner<'a> {
        Scanner::new(input, false)
    }

    fn new(input: &'a str, comments: bool) -> Scanner<'a> {
        Scanner {
            input,
            pos: 0,
            line_start: 0,
            line_nr: 1,
            last_comment_start: None,
            comments,
            error: None,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn byte_at(&self, pos: usize) -> u8 {
        *self.bytes().get(pos).unwrap_or(&0)
    }

    pub fn line(&self) -> usize {
        self.line_nr
    }

    pub fn column(&self) -> usize {
        1 + self.pos - self.line_start
    }

    /// Record a failure; only the first one sticks.
    pub fn record_error(&mut self, kind: ScanErrorKind) {
        if self.error.is_none() {
            self.error = Some(ParseError {
                kind,
                line: self.line_nr,
                column: self.column(),
            });
        }
    }

    /// The recorded first error, or one of `fallback` at the current
    /// position when a failure path did not record anything specific.
    pub fn take_error(&mut self, fallback: ScanErrorKind) -> ParseError {
        self.error.take().unwrap_or(ParseError {
            kind: fallback,
            line: self.line_nr,
            column: self.column(),
        })
    }

    /// Skip whitespace and, in interface mode, comments. A completely empty
    /// line detaches any comment block seen so far from the next element.
    fn advance(&mut self) {
        loop {
            match self.byte_at(self.pos) {
                b' ' | b'\t' => self.pos += 1,
                b'\n' => {
                    if self.line_start == self.pos {
                        self.last_comment_start = None;
                    }
                    self.pos += 1;
                    self.line_start = self.pos;
                    self.line_nr += 1;
                }
                b'#' if self.comments => {
                    if self.last_comment_start.is_none() {
                        self.last_comment_start = Some(self.pos);
                    }
                    while self.byte_at(self.pos) != b'\n' && self.pos < self.input.len() {
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    /// Next significant byte without consuming it; NUL at end of input.
    pub fn peek(&mut self) -> u8 {
        self.advance();
        self.byte_at(self.pos)
    }

    /// The run of `#` comment lines directly preceding the current lexeme,
    /// stripped of the leading `#` and one optional space, joined with
    /// newlines. Consuming it resets the comment marker.
    pub fn get_last_docstring(&mut self) -> Option<String> {
        self.advance();

        let start = self.last_comment_start?;
        let bytes = self.bytes();
        let mut lines = Vec::new();
        let mut p = start;

        while p < bytes.len() && bytes[p] == b'#' {
            let mut s = p + 1;
            if s < bytes.len() && bytes[s] == b' ' {
                s += 1;
            }
            let end = self.input[s..]
                .find('\n')
                .map(|i| s + i)
                .unwrap_or(self.input.len());
            lines.push(&self.input[s..end]);

            p = end + 1;
            while p < bytes.len() && (bytes[p] == b' ' || bytes[p] == b'\t') {
                p += 1;
            }
        }

        self.last_comment_start = None;
        Some(lines.join("\n"))
    }

    /// Length of the word at the cursor: a leading ASCII letter followed by
    /// letters, digits, `_`, `-` and `.`. Zero when the cursor is not at a
    /// word.
    fn word_len(&mut self) -> usize {
        self.advance();

        if !self.byte_at(self.pos).is_ascii_alphabetic() {
            return 0;
        }

        let mut len = 1;
        loop {
            match self.byte_at(self.pos + len) {
                b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'-' | b'.' => len += 1,
                _ => return len,
            }
        }
    }

    fn word(&mut self) -> &'a str {
        let len = self.word_len();
        &self.input[self.pos..self.pos + len]
    }

    pub fn read_keyword(&mut self, keyword: &str) -> bool {
        let word = self.word();
        if word != keyword {
            return false;
        }

        self.pos += word.len();
        true
    }

    pub fn expect_operator(&mut self, op: &str) -> bool {
        self.advance();

        if !self.input[self.pos..].starts_with(op) {
            self.record_error(ScanErrorKind::OperatorExpected);
            return false;
        }

        self.pos += op.len();
        true
    }

    pub fn expect_interface_name(&mut self) -> Option<String> {
        let word = self.word();
        if !interface_name_valid(word) {
            self.record_error(ScanErrorKind::InterfaceNameInvalid);
            return None;
        }

        self.pos += word.len();
        Some(word.to_string())
    }

    pub fn expect_member_name(&mut self) -> Option<String> {
        let word = self.word();
        if !member_name_valid(word) {
            self.record_error(ScanErrorKind::MemberNameInvalid);
            return None;
        }

        self.pos += word.len();
        Some(word.to_string())
    }

    pub fn expect_field_name(&mut self) -> Option<String> {
        let word = self.word();
        if !field_name_valid(word) {
            self.record_error(ScanErrorKind::FieldNameInvalid);
            return None;
        }

        self.pos += word.len();
        Some(word.to_string())
    }

    /// A member name, or an `interface.Member` reference into another
    /// interface.
    pub fn expect_type_name(&mut self) -> Option<String> {
        let word = self.word();

        if member_name_valid(word) {
            self.pos += word.len();
            return Some(word.to_string());
        }

        let valid = word.bytes().position(|c| c.is_ascii_uppercase()).map_or(false, |i| {
            i >= 2
                && word.as_bytes()[i - 1] == b'.'
                && interface_name_valid(&word[..i - 1])
                && member_name_valid(&word[i..])
        });
        if !valid {
            self.record_error(ScanErrorKind::TypeNameInvalid);
            return None;
        }

        self.pos += word.len();
        Some(word.to_string())
    }

    /// JSON string literal. The decoded bytes must be valid UTF-8 and free
    /// of NUL.
    pub fn expect_string(&mut self) -> Option<String> {
        self.advance();

        if self.byte_at(self.pos) != b'"' {
            return None;
        }

        let bytes = self.bytes();
        let mut p = self.pos + 1;
        let mut out: Vec<u8> = Vec::new();

        loop {
            if p >= bytes.len() {
                return None;
            }

            match bytes[p] {
                b'\t' | b'\n' => return None,
                b'"' => {
                    p += 1;
                    break;
                }
                b'\\' => {
                    p += 1;
                    match *bytes.get(p)? {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let size = match read_unicode_char(&bytes[p + 1..], &mut out) {
                                Some(size) => size,
                                None => {
                                    self.record_error(ScanErrorKind::InvalidCharacter);
                                    return None;
                                }
                            };
                            p += size;
                        }
                        _ => {
                            self.record_error(ScanErrorKind::InvalidCharacter);
                            return None;
                        }
                    }
                    p += 1;
                }
                c => {
                    out.push(c);
                    p += 1;
                }
            }
        }

        if out.contains(&0) {
            self.record_error(ScanErrorKind::InvalidCharacter);
            return None;
        }

        let string = match String::from_utf8(out) {
            Ok(string) => string,
            Err(_) => {
                self.record_error(ScanErrorKind::InvalidCharacter);
                return None;
            }
        };

        self.pos = p;
        Some(string)
    }

    /// An ECMA-404 numeric literal; a `.`, `e` or `E` makes it a float.
    /// Out-of-range literals fail the scan.
    pub fn read_number(&mut self) -> Option<Number> {
        self.advance();

        let bytes = self.bytes();
        let start = self.pos;
        let mut p = start;

        if bytes.get(p) == Some(&b'-') {
            p += 1;
        }

        match bytes.get(p).copied() {
            Some(b'0') => p += 1,
            Some(b'1'..=b'9') => {
                while bytes.get(p).is_some_and(|c| c.is_ascii_digit()) {
                    p += 1;
                }
            }
            _ => return None,
        }

        let mut is_float = false;

        if bytes.get(p) == Some(&b'.') {
            is_float = true;
            p += 1;
            if !bytes.get(p).is_some_and(|c| c.is_ascii_digit()) {
                return None;
            }
            while bytes.get(p).is_some_and(|c| c.is_ascii_digit()) {
                p += 1;
            }
        }

        if matches!(bytes.get(p).copied(), Some(b'e' | b'E')) {
            is_float = true;
            p += 1;
            if matches!(bytes.get(p).copied(), Some(b'+' | b'-')) {
                p += 1;
            }
            if !bytes.get(p).is_some_and(|c| c.is_ascii_digit()) {
                return None;
            }
            while bytes.get(p).is_some_and(|c| c.is_ascii_digit()) {
                p += 1;
            }
        }

        let token = &self.input[start..p];
        let number = if is_float {
            let f: f64 = token.parse().ok()?;
            if !f.is_finite() {
                return None;
            }
            Number::Float(f)
        } else {
            Number::Int(token.parse().ok()?)
        };

        self.pos = p;
        Some(number)
    }
}

/// Combine `\uXXXX` escapes, including UTF-16 surrogate pairs, into UTF-8
/// bytes. Returns how many input bytes were consumed (4 or 10, counted from
/// the first hex digit).
fn read_unicode_char(p: &[u8], out: &mut Vec<u8>) -> Option<usize> {
    fn hex4(p: &[u8]) -> Option<u32> {
        if p.len() < 4 {
            return None;
        }
        let mut value = 0u32;
        for &c in &p[..4] {
            value = value << 4 | (c as char).to_digit(16)?;
        }
        Some(value)
    }

    let unit = hex4(p)?;
    let (cp, size) = match unit {
        0xD800..=0xDBFF => {
            if p.get(4) != Some(&b'\\') || p.get(5) != Some(&b'u') {
                return None;
            }
            let low = hex4(&p[6..])?;
            if !(0xDC00..=0xDFFF).contains(&low) {
                return None;
            }
            (0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00), 10)
        }
        0xDC00..=0xDFFF => return None,
        _ => (unit, 4),
    };

    let c = char::from_u32(cp)?;
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    Some(size)
}

/// Interface names: 3–255 ASCII characters of lower-case letters, digits,
/// `-` and `.`; at least two dot-separated sections, each starting with a
/// letter; no `-` adjacent to a dot; ends alphanumeric.
pub fn interface_name_valid(name: &str) -> bool {
    let bytes = name.as_bytes();

    if bytes.len() < 3 || bytes.len() > 255 {
        return false;
    }

    let mut sections = 1;
    for (i, &c) in bytes.iter().enumerate() {
        let first_of_section = i == 0 || bytes[i - 1] == b'.';
        match c {
            b'a'..=b'z' => {}
            b'0'..=b'9' => {
                if first_of_section {
                    return false;
                }
            }
            b'-' => {
                if first_of_section {
                    return false;
                }
            }
            b'.' => {
                if i == 0 || i == bytes.len() - 1 || matches!(bytes[i - 1], b'.' | b'-') {
                    return false;
                }
                sections += 1;
            }
            _ => return false,
        }
    }

    sections >= 2 && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}

/// Member names: an upper-case letter followed by letters and digits.
pub fn member_name_valid(name: &str) -> bool {
    let bytes = name.as_bytes();

    match bytes.first() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }

    bytes[1..].iter().all(|c| c.is_ascii_alphanumeric())
}

/// Field names: a letter followed by letters, digits and `_`; no doubled
/// and no trailing underscore.
pub fn field_name_valid(name: &str) -> bool {
    let bytes = name.as_bytes();

    match bytes.first() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    for (i, &c) in bytes.iter().enumerate().skip(1) {
        match c {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' => {}
            b'_' => {
                if bytes[i - 1] == b'_' {
                    return false;
                }
            }
            _ => return false,
        }
    }

    bytes[bytes.len() - 1] != b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_and_operators() {
        let mut scanner = Scanner::new_interface("interface org.example.ping");
        assert!(!scanner.read_keyword("type"));
        assert!(scanner.read_keyword("interface"));
        assert_eq!(
            scanner.expect_interface_name().as_deref(),
            Some("org.example.ping")
        );
        assert_eq!(scanner.peek(), 0);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let mut scanner = Scanner::new_plain("{\n  \"a\": nope\n}");
        assert!(scanner.expect_operator("{"));
        assert!(scanner.expect_string().is_some());
        assert!(scanner.expect_operator(":"));
        assert!(scanner.read_number().is_none());
        scanner.record_error(ScanErrorKind::JsonExpected);

        let error = scanner.take_error(ScanErrorKind::JsonExpected);
        assert_eq!(error.line, 2);
        assert_eq!(error.column, 8);
    }

    #[test]
    fn first_error_wins() {
        let mut scanner = Scanner::new_plain("x");
        scanner.record_error(ScanErrorKind::JsonExpected);
        scanner.record_error(ScanErrorKind::InvalidCharacter);
        assert_eq!(
            scanner.take_error(ScanErrorKind::InvalidCharacter).kind,
            ScanErrorKind::JsonExpected
        );
    }

    #[test]
    fn docstring_capture() {
        let text = "# A service.\n# Second line.\ninterface org.example.ping";
        let mut scanner = Scanner::new_interface(text);
        assert_eq!(
            scanner.get_last_docstring().as_deref(),
            Some("A service.\nSecond line.")
        );
        assert!(scanner.get_last_docstring().is_none());
        assert!(scanner.read_keyword("interface"));
    }

    #[test]
    fn blank_line_detaches_docstring() {
        let text = "# Unrelated.\n\ninterface org.example.ping";
        let mut scanner = Scanner::new_interface(text);
        assert!(scanner.get_last_docstring().is_none());
        assert!(scanner.read_keyword("interface"));
    }

    #[test]
    fn docstring_strips_hash_and_one_space() {
        let mut scanner = Scanner::new_interface("#bare\n#  two spaces\n#\nx");
        assert_eq!(
            scanner.get_last_docstring().as_deref(),
            Some("bare\n two spaces\n")
        );
    }

    #[test]
    fn strings_with_escapes() {
        let mut scanner = Scanner::new_plain(r#""a\"b\\c\/d\b\f\n\r\t""#);
        assert_eq!(
            scanner.expect_string().as_deref(),
            Some("a\"b\\c/d\u{8}\u{c}\n\r\t")
        );
    }

    #[test]
    fn strings_with_unicode_escapes() {
        let mut scanner = Scanner::new_plain(r#""Aä€😀""#);
        assert_eq!(scanner.expect_string().as_deref(), Some("Aä€😀"));
    }

    #[test]
    fn lone_surrogates_are_rejected() {
        for text in [r#""\ud800""#, r#""\udc00""#, r#""\ud800A""#] {
            let mut scanner = Scanner::new_plain(text);
            assert!(scanner.expect_string().is_none());
        }
    }

    #[test]
    fn embedded_nul_is_rejected() {
        let mut scanner = Scanner::new_plain(r#""a\u0000b""#);
        assert!(scanner.expect_string().is_none());
    }

    #[test]
    fn raw_control_characters_terminate_strings() {
        let mut scanner = Scanner::new_plain("\"a\tb\"");
        assert!(scanner.expect_string().is_none());
        let mut scanner = Scanner::new_plain("\"a\nb\"");
        assert!(scanner.expect_string().is_none());
    }

    #[test]
    fn numbers() {
        let mut scanner = Scanner::new_plain("17");
        assert_eq!(scanner.read_number(), Some(Number::Int(17)));

        let mut scanner = Scanner::new_plain("-42");
        assert_eq!(scanner.read_number(), Some(Number::Int(-42)));

        let mut scanner = Scanner::new_plain("4.5");
        assert_eq!(scanner.read_number(), Some(Number::Float(4.5)));

        let mut scanner = Scanner::new_plain("1e3");
        assert_eq!(scanner.read_number(), Some(Number::Float(1000.0)));

        let mut scanner = Scanner::new_plain("-1.25E-2");
        assert_eq!(scanner.read_number(), Some(Number::Float(-0.0125)));
    }

    #[test]
    fn numbers_out_of_range_fail() {
        let mut scanner = Scanner::new_plain("9223372036854775808");
        assert!(scanner.read_number().is_none());

        let mut scanner = Scanner::new_plain("1e999");
        assert!(scanner.read_number().is_none());
    }

    #[test]
    fn numbers_with_broken_fractions_fail() {
        let mut scanner = Scanner::new_plain("1.");
        assert!(scanner.read_number().is_none());

        let mut scanner = Scanner::new_plain("1e");
        assert!(scanner.read_number().is_none());

        let mut scanner = Scanner::new_plain(".5");
        assert!(scanner.read_number().is_none());
    }

    #[test]
    fn interface_names() {
        for name in ["a.b", "a.b.c", "a1.b1.c1", "a--1.b--1.c--1", "org.varlink.service"] {
            assert!(interface_name_valid(name), "{name}");
        }

        for name in [
            "ab", ".a.b.c", "a.b.c.", "a..b.c", "21.b.c", "a.21.c", "-a.b.c", "a.b.c-", "a.b-.c",
            "a.-.c", "a.*.c", "a.?", "A.b.c",
        ] {
            assert!(!interface_name_valid(name), "{name}");
        }
    }

    #[test]
    fn member_names() {
        for name in ["A", "AFoo", "A565465"] {
            assert!(member_name_valid(name), "{name}");
        }
        for name in ["a", "5a", "_a", "A_b", "A.b", ""] {
            assert!(!member_name_valid(name), "{name}");
        }
    }

    #[test]
    fn field_names() {
        for name in ["a", "word", "camelCase", "with_underscore", "x1"] {
            assert!(field_name_valid(name), "{name}");
        }
        for name in ["", "_a", "1a", "a__b", "a_", "a-b"] {
            assert!(!field_name_valid(name), "{name}");
        }
    }

    #[test]
    fn type_names() {
        let mut scanner = Scanner::new_interface("Foo");
        assert_eq!(scanner.expect_type_name().as_deref(), Some("Foo"));

        let mut scanner = Scanner::new_interface("org.example.more.Type");
        assert_eq!(
            scanner.expect_type_name().as_deref(),
            Some("org.example.more.Type")
        );

        for text in ["foo", "org.example.type", "Org.example.Type", "a.B"] {
            let mut scanner = Scanner::new_interface(text);
            assert!(scanner.expect_type_name().is_none(), "{text}");
        }
    }

    #[test]
    fn comments_only_in_interface_mode() {
        let mut scanner = Scanner::new_interface("# note\n42");
        assert_eq!(scanner.read_number(), Some(Number::Int(42)));

        let mut scanner = Scanner::new_plain("# note\n42");
        assert_eq!(scanner.peek(), b'#');
        assert!(scanner.read_number().is_none());
    }
}
