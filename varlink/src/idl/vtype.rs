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

//! The type language of interface descriptions: primitives, arrays, maps,
//! maybe-types, inline objects and enums, and named references to other
//! type definitions.

use super::IdlMarkup;
use crate::avl::AvlTree;
use crate::error::{Error, Result};
use crate::scanner::{ScanErrorKind, Scanner};

#[derive(Debug, Clone, PartialEq)]
pub struct TypeField {
    pub name: String,
    pub description: Option<String>,
    pub field_type: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumEntry {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Bool,
    Int,
    Float,
    String,
    /// An untyped JSON object, spelled `object`.
    ForeignObject,
    Array(Box<Type>),
    Map(Box<Type>),
    Maybe(Box<Type>),
    Object(Vec<TypeField>),
    Enum(Vec<EnumEntry>),
    /// A named type, possibly qualified as `interface.Member`.
    Alias(String),
}

fn invalid(scanner: &mut Scanner) -> Error {
    Error::InvalidInterface(scanner.take_error(ScanErrorKind::TypeExpected))
}

pub(crate) fn read_type(scanner: &mut Scanner) -> Result<Type> {
    if scanner.peek() == b'[' {
        if !scanner.expect_operator("[") {
            return Err(invalid(scanner));
        }

        let map = scanner.read_keyword("string");

        if !scanner.expect_operator("]") {
            return Err(invalid(scanner));
        }

        let element = Box::new(read_type(scanner)?);
        Ok(if map { Type::Map(element) } else { Type::Array(element) })
    } else if scanner.peek() == b'?' {
        if !scanner.expect_operator("?") {
            return Err(invalid(scanner));
        }

        let element = read_type(scanner)?;

        // Do not nest maybes.
        if matches!(element, Type::Maybe(_)) {
            scanner.record_error(ScanErrorKind::TypeExpected);
            return Err(invalid(scanner));
        }

        Ok(Type::Maybe(Box::new(element)))
    } else if scanner.read_keyword("bool") {
        Ok(Type::Bool)
    } else if scanner.read_keyword("int") {
        Ok(Type::Int)
    } else if scanner.read_keyword("float") {
        Ok(Type::Float)
    } else if scanner.read_keyword("string") {
        Ok(Type::String)
    } else if scanner.read_keyword("object") {
        Ok(Type::ForeignObject)
    } else if scanner.peek() == b'(' {
        read_compound(scanner)
    } else {
        match scanner.expect_type_name() {
            Some(name) => Ok(Type::Alias(name)),
            None => {
                scanner.record_error(ScanErrorKind::TypeExpected);
                Err(invalid(scanner))
            }
        }
    }
}

/// `( field: Type, ... )`, `( Name, ... )` or `()`. An enum is detected by
/// the absence of `:` after the first name.
fn read_compound(scanner: &mut Scanner) -> Result<Type> {
    if !scanner.expect_operator("(") {
        return Err(invalid(scanner));
    }

    let mut seen: AvlTree<String, ()> = AvlTree::new();
    let mut fields = Vec::new();
    let mut entries = Vec::new();
    let mut is_enum = false;

    for i in 0.. {
        if scanner.peek() == b')' {
            break;
        }

        if i > 0 && !scanner.expect_operator(",") {
            return Err(invalid(scanner));
        }

        let description = scanner.get_last_docstring();
        let name = match scanner.expect_field_name() {
            Some(name) => name,
            None => return Err(invalid(scanner)),
        };

        if i == 0 && scanner.peek() != b':' {
            is_enum = true;
        }

        if seen.insert(name.clone(), ()).is_err() {
            scanner.record_error(ScanErrorKind::DuplicateFieldName);
            return Err(invalid(scanner));
        }

        if is_enum {
            entries.push(EnumEntry { name, description });
        } else {
            if !scanner.expect_operator(":") {
                return Err(invalid(scanner));
            }
            let field_type = read_type(scanner)?;
            fields.push(TypeField {
                name,
                description,
                field_type,
            });
        }
    }

    if !scanner.expect_operator(")") {
        return Err(invalid(scanner));
    }

    Ok(if is_enum {
        Type::Enum(entries)
    } else {
        Type::Object(fields)
    })
}

impl Type {
    #[cfg(test)]
    pub(crate) fn parse(text: &str) -> Result<Type> {
        let mut scanner = Scanner::new_interface(text);
        let vtype = read_type(&mut scanner)?;

        if scanner.peek() != 0 {
            scanner.record_error(ScanErrorKind::TypeExpected);
            return Err(invalid(&mut scanner));
        }

        Ok(vtype)
    }

    /// The single-line rendition, markup-free.
    pub fn typestring(&self) -> String {
        let mut out = String::new();
        write_type(&mut out, self, None, &IdlMarkup::default());
        out
    }

    fn is_multiline(&self) -> bool {
        let (n_fields, is_object) = match self {
            Type::Object(fields) => (fields.len(), true),
            Type::Enum(entries) => (entries.len(), false),
            _ => return false,
        };

        if n_fields == 0 {
            return false;
        }

        // A maximum of two object fields.
        if is_object && n_fields > 2 {
            return true;
        }

        // No documentation, no nested complex types.
        match self {
            Type::Object(fields) => {
                for field in fields {
                    if field.description.is_some() {
                        return true;
                    }
                    if matches!(field.field_type, Type::Object(_) | Type::Enum(_)) {
                        return true;
                    }
                }
            }
            Type::Enum(entries) => {
                if entries.iter().any(|e| e.description.is_some()) {
                    return true;
                }
            }
            _ => {}
        }

        // No longer than half a line.
        self.typestring().len() > 40
    }
}

fn push_indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn push_field_docstring(out: &mut String, level: usize, description: &str, markup: &IdlMarkup) {
    for line in description.split('\n') {
        push_indent(out, level);
        out.push_str(markup.comment_pre);
        out.push('#');
        if !line.is_empty() {
            out.push(' ');
            out.push_str(line);
        }
        out.push_str(markup.comment_post);
        out.push('\n');
    }
}

pub(crate) fn write_type(
    out: &mut String,
    vtype: &Type,
    indent: Option<usize>,
    markup: &IdlMarkup,
) {
    match vtype {
        Type::Bool => push_plain(out, "bool", markup),
        Type::Int => push_plain(out, "int", markup),
        Type::Float => push_plain(out, "float", markup),
        Type::String => push_plain(out, "string", markup),
        Type::ForeignObject => push_plain(out, "object", markup),
        Type::Alias(name) => push_plain(out, name, markup),
        Type::Map(element) => {
            out.push('[');
            push_plain(out, "string", markup);
            out.push(']');
            write_type(out, element, indent, markup);
        }
        Type::Array(element) => {
            out.push_str("[]");
            write_type(out, element, indent, markup);
        }
        Type::Maybe(element) => {
            out.push('?');
            write_type(out, element, indent, markup);
        }
        Type::Object(_) | Type::Enum(_) => write_compound(out, vtype, indent, markup),
    }
}

fn push_plain(out: &mut String, text: &str, markup: &IdlMarkup) {
    out.push_str(markup.type_pre);
    out.push_str(text);
    out.push_str(markup.type_post);
}

fn write_compound(out: &mut String, vtype: &Type, indent: Option<usize>, markup: &IdlMarkup) {
    struct Entry<'a> {
        name: &'a str,
        description: Option<&'a str>,
        field_type: Option<&'a Type>,
    }

    let entries: Vec<Entry> = match vtype {
        Type::Object(fields) => fields
            .iter()
            .map(|f| Entry {
                name: &f.name,
                description: f.description.as_deref(),
                field_type: Some(&f.field_type),
            })
            .collect(),
        Type::Enum(enum_entries) => enum_entries
            .iter()
            .map(|e| Entry {
                name: &e.name,
                description: e.description.as_deref(),
                field_type: None,
            })
            .collect(),
        _ => unreachable!(),
    };

    let multiline = indent.is_some() && vtype.is_multiline();
    let mut docstring_printed = false;

    out.push('(');

    for (i, entry) in entries.iter().enumerate() {
        if multiline {
            out.push('\n');

            if let Some(description) = entry.description {
                if i > 0 && !docstring_printed {
                    out.push('\n');
                }
                push_field_docstring(out, indent.unwrap_or(0) + 1, description, markup);
                docstring_printed = true;
            } else {
                docstring_printed = false;
            }

            push_indent(out, indent.unwrap_or(0) + 1);
        }

        out.push_str(entry.name);

        if let Some(field_type) = entry.field_type {
            out.push_str(": ");
            write_type(out, field_type, indent.map(|l| l + 1), markup);
        }

        if i + 1 < entries.len() {
            out.push(',');
            if !multiline {
                out.push(' ');
            }
            if multiline && entry.description.is_some() {
                out.push('\n');
            }
        }
    }

    if multiline {
        out.push('\n');
        push_indent(out, indent.unwrap_or(0));
    }

    out.push(')');
}
