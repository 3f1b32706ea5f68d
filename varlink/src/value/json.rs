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

//! Strict JSON reader and writer for the value model. Parsed containers
//! come back write-protected. The writer emits canonical single-line JSON,
//! or indented multi-line JSON, with optional markup tags around keys and
//! scalar values.

use super::{Array, Object, Value};
use crate::error::{Error, Result};
use crate::scanner::{Number, ScanErrorKind, Scanner};

/// Tag pairs the writer wraps around keys and scalar values. For strings
/// the tags land inside the quotes; consumers strip them before re-parsing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Markup<'a> {
    pub key_pre: &'a str,
    pub key_post: &'a str,
    pub value_pre: &'a str,
    pub value_post: &'a str,
}

fn invalid_json(scanner: &mut Scanner) -> Error {
    Error::InvalidJson(scanner.take_error(ScanErrorKind::JsonExpected))
}

pub(crate) fn object_from_json(text: &str) -> Result<Object> {
    let mut scanner = Scanner::new_plain(text);
    let object = read_object(&mut scanner)?;

    if scanner.peek() != 0 {
        scanner.record_error(ScanErrorKind::JsonExpected);
        return Err(invalid_json(&mut scanner));
    }

    Ok(object)
}

pub(crate) fn read_value(scanner: &mut Scanner) -> Result<Value> {
    if scanner.peek() == b'{' {
        Ok(Value::Object(read_object(scanner)?))
    } else if scanner.peek() == b'[' {
        Ok(Value::Array(read_array(scanner)?))
    } else if scanner.read_keyword("null") {
        Ok(Value::Null)
    } else if scanner.read_keyword("true") {
        Ok(Value::Bool(true))
    } else if scanner.read_keyword("false") {
        Ok(Value::Bool(false))
    } else if scanner.peek() == b'"' {
        match scanner.expect_string() {
            Some(string) => Ok(Value::String(string)),
            None => Err(invalid_json(scanner)),
        }
    } else if let Some(number) = scanner.read_number() {
        Ok(match number {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        })
    } else {
        scanner.record_error(ScanErrorKind::JsonExpected);
        Err(invalid_json(scanner))
    }
}

pub(crate) fn read_object(scanner: &mut Scanner) -> Result<Object> {
    if !scanner.expect_operator("{") {
        return Err(invalid_json(scanner));
    }

    let object = Object::new();
    let mut first = true;

    while scanner.peek() != b'}' {
        if !first && !scanner.expect_operator(",") {
            return Err(invalid_json(scanner));
        }

        let name = match scanner.expect_string() {
            Some(name) => name,
            None => return Err(invalid_json(scanner)),
        };

        if !scanner.expect_operator(":") {
            return Err(invalid_json(scanner));
        }

        let value = read_value(scanner)?;

        // `null` is treated the same as a non-existent key.
        object.set(&name, value).map_err(|_| Error::Panic)?;

        first = false;
    }

    if !scanner.expect_operator("}") {
        return Err(invalid_json(scanner));
    }

    object.freeze();
    Ok(object)
}

pub(crate) fn read_array(scanner: &mut Scanner) -> Result<Array> {
    if !scanner.expect_operator("[") {
        return Err(invalid_json(scanner));
    }

    let array = Array::new();
    let mut first = true;

    while scanner.peek() != b']' {
        if !first && !scanner.expect_operator(",") {
            return Err(invalid_json(scanner));
        }

        let value = read_value(scanner)?;
        if array.append(value).is_err() {
            scanner.record_error(ScanErrorKind::JsonExpected);
            return Err(invalid_json(scanner));
        }

        first = false;
    }

    if !scanner.expect_operator("]") {
        return Err(invalid_json(scanner));
    }

    array.freeze();
    Ok(array)
}

/// Round-trip float text in the shape C's `%.17e` produces.
fn push_float(out: &mut String, f: f64) {
    if !f.is_finite() {
        out.push_str(&format!("{f}"));
        return;
    }

    let formatted = format!("{f:.17e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            out.push_str(&format!("{}e{}{:02}", mantissa, sign, exponent.abs()));
        }
        None => out.push_str(&formatted),
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
}

fn push_indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

pub(crate) fn write_value(out: &mut String, value: &Value, indent: Option<usize>, markup: &Markup) {
    match value {
        Value::Null => {
            out.push_str(markup.value_pre);
            out.push_str("null");
            out.push_str(markup.value_post);
        }
        Value::Bool(b) => {
            out.push_str(markup.value_pre);
            out.push_str(if *b { "true" } else { "false" });
            out.push_str(markup.value_post);
        }
        Value::Int(i) => {
            out.push_str(markup.value_pre);
            out.push_str(&i.to_string());
            out.push_str(markup.value_post);
        }
        Value::Float(f) => {
            out.push_str(markup.value_pre);
            push_float(out, *f);
            out.push_str(markup.value_post);
        }
        Value::String(s) => {
            out.push('"');
            out.push_str(markup.value_pre);
            push_escaped(out, s);
            out.push_str(markup.value_post);
            out.push('"');
        }
        Value::Array(array) => write_array(out, array, indent, markup),
        Value::Object(object) => write_object(out, object, indent, markup),
    }
}

pub(crate) fn write_object(
    out: &mut String,
    object: &Object,
    indent: Option<usize>,
    markup: &Markup,
) {
    let inner = object.inner.borrow();

    if inner.fields.is_empty() {
        out.push_str("{}");
        return;
    }

    out.push('{');
    if indent.is_some() {
        out.push('\n');
    }

    for (i, (name, value)) in inner.fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
            if indent.is_some() {
                out.push('\n');
            }
        }

        if let Some(level) = indent {
            push_indent(out, level + 1);
        }

        out.push('"');
        out.push_str(markup.key_pre);
        push_escaped(out, name);
        out.push_str(markup.key_post);
        out.push('"');
        out.push(':');
        if indent.is_some() {
            out.push(' ');
        }

        write_value(out, value, indent.map(|level| level + 1), markup);
    }

    if let Some(level) = indent {
        out.push('\n');
        push_indent(out, level);
    }
    out.push('}');
}

pub(crate) fn write_array(
    out: &mut String,
    array: &Array,
    indent: Option<usize>,
    markup: &Markup,
) {
    let inner = array.inner.borrow();

    if inner.elements.is_empty() {
        out.push_str("[]");
        return;
    }

    out.push('[');
    if indent.is_some() {
        out.push('\n');
    }

    for (i, value) in inner.elements.iter().enumerate() {
        if i > 0 {
            out.push(',');
            if indent.is_some() {
                out.push('\n');
            }
        }

        if let Some(level) = indent {
            push_indent(out, level + 1);
        }

        write_value(out, value, indent.map(|level| level + 1), markup);
    }

    if let Some(level) = indent {
        out.push('\n');
        push_indent(out, level);
    }
    out.push(']');
}
