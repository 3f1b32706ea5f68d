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

//! Interface descriptions: parsing, validation, member lookup and the
//! canonical pretty-printer that tooling round-trips through.

pub mod vtype;

use crate::avl::AvlTree;
use crate::error::{Error, Result};
use crate::scanner::{interface_name_valid, member_name_valid, ScanErrorKind, Scanner};
use std::fmt;

pub use vtype::{EnumEntry, Type, TypeField};

/// Markup tag pairs for colorized interface output; all empty by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdlMarkup<'a> {
    pub comment_pre: &'a str,
    pub comment_post: &'a str,
    pub keyword_pre: &'a str,
    pub keyword_post: &'a str,
    pub method_pre: &'a str,
    pub method_post: &'a str,
    pub type_pre: &'a str,
    pub type_post: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub input: Type,
    pub output: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKind {
    Alias(Type),
    Method(Method),
    Error(Option<Type>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub description: Option<String>,
    pub kind: MemberKind,
}

/// A parsed and validated interface: a name, an optional docstring, and an
/// ordered list of type, method and error members sharing one namespace.
#[derive(Debug)]
pub struct Interface {
    name: String,
    description: Option<String>,
    members: Vec<Member>,
    index: AvlTree<String, usize>,
}

impl Interface {
    pub fn parse(text: &str) -> Result<Interface> {
        let mut scanner = Scanner::new_interface(text);
        let interface = Interface::parse_from_scanner(&mut scanner)?;

        if let Some(symbol) = interface.first_unresolved() {
            scanner.record_error(ScanErrorKind::UnknownType(symbol));
            return Err(fail(&mut scanner));
        }

        Ok(interface)
    }

    fn parse_from_scanner(scanner: &mut Scanner) -> Result<Interface> {
        let description = scanner.get_last_docstring();

        if !scanner.read_keyword("interface") {
            scanner.record_error(ScanErrorKind::InterfaceKeywordExpected);
            return Err(fail(scanner));
        }

        let name = match scanner.expect_interface_name() {
            Some(name) => name,
            None => return Err(fail(scanner)),
        };

        let mut interface = Interface {
            name,
            description,
            members: Vec::new(),
            index: AvlTree::new(),
        };

        while scanner.peek() != 0 {
            let member = if scanner.read_keyword("type") {
                let description = scanner.get_last_docstring();
                let name = match scanner.expect_member_name() {
                    Some(name) => name,
                    None => return Err(fail(scanner)),
                };
                let alias = vtype::read_type(scanner)?;

                if !matches!(alias, Type::Object(_) | Type::Enum(_)) {
                    scanner.record_error(ScanErrorKind::ObjectExpected);
                    return Err(fail(scanner));
                }

                Member {
                    name,
                    description,
                    kind: MemberKind::Alias(alias),
                }
            } else if scanner.read_keyword("method") {
                let description = scanner.get_last_docstring();
                let name = match scanner.expect_member_name() {
                    Some(name) => name,
                    None => return Err(fail(scanner)),
                };
                let input = vtype::read_type(scanner)?;

                if !scanner.expect_operator("->") {
                    return Err(fail(scanner));
                }

                let output = vtype::read_type(scanner)?;

                // Method input and output parameters must be literal objects.
                if !matches!(input, Type::Object(_)) || !matches!(output, Type::Object(_)) {
                    scanner.record_error(ScanErrorKind::ObjectExpected);
                    return Err(fail(scanner));
                }

                Member {
                    name,
                    description,
                    kind: MemberKind::Method(Method { input, output }),
                }
            } else if scanner.read_keyword("error") {
                let description = scanner.get_last_docstring();
                let name = match scanner.expect_member_name() {
                    Some(name) => name,
                    None => return Err(fail(scanner)),
                };

                let payload = if scanner.peek() == b'(' {
                    let payload = vtype::read_type(scanner)?;
                    if !matches!(payload, Type::Object(_)) {
                        scanner.record_error(ScanErrorKind::ObjectExpected);
                        return Err(fail(scanner));
                    }
                    Some(payload)
                } else {
                    None
                };

                Member {
                    name,
                    description,
                    kind: MemberKind::Error(payload),
                }
            } else {
                scanner.record_error(ScanErrorKind::KeywordExpected);
                return Err(fail(scanner));
            };

            if interface
                .index
                .insert(member.name.clone(), interface.members.len())
                .is_err()
            {
                scanner.record_error(ScanErrorKind::DuplicateMemberName);
                return Err(fail(scanner));
            }

            interface.members.push(member);
        }

        Ok(interface)
    }

    /// The first alias that does not resolve to a type defined in this
    /// interface. Qualified references into other interfaces are not
    /// checked here.
    fn first_unresolved(&self) -> Option<String> {
        fn try_resolve(interface: &Interface, vtype: &Type) -> Option<String> {
            match vtype {
                Type::Bool
                | Type::Int
                | Type::Float
                | Type::String
                | Type::ForeignObject
                | Type::Enum(_) => None,
                Type::Array(element) | Type::Map(element) | Type::Maybe(element) => {
                    try_resolve(interface, element)
                }
                Type::Object(fields) => fields
                    .iter()
                    .find_map(|field| try_resolve(interface, &field.field_type)),
                Type::Alias(name) => {
                    if name.contains('.') || interface.get_alias(name).is_some() {
                        None
                    } else {
                        Some(name.clone())
                    }
                }
            }
        }

        self.members.iter().find_map(|member| match &member.kind {
            MemberKind::Alias(alias) => try_resolve(self, alias),
            MemberKind::Method(method) => try_resolve(self, &method.input)
                .or_else(|| try_resolve(self, &method.output)),
            MemberKind::Error(payload) => payload
                .as_ref()
                .and_then(|payload| try_resolve(self, payload)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn get_member(&self, name: &str) -> Option<&Member> {
        let index = *self.index.get(name)?;
        self.members.get(index)
    }

    pub fn get_alias(&self, name: &str) -> Option<&Type> {
        match &self.get_member(name)?.kind {
            MemberKind::Alias(alias) => Some(alias),
            _ => None,
        }
    }

    pub fn get_method(&self, name: &str) -> Option<&Method> {
        match &self.get_member(name)?.kind {
            MemberKind::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn get_error(&self, name: &str) -> Option<&Option<Type>> {
        match &self.get_member(name)?.kind {
            MemberKind::Error(payload) => Some(payload),
            _ => None,
        }
    }

    /// The canonical form: one blank line between members, docstrings as
    /// `#` lines, objects wrapped per the layout rule. This text is what
    /// `GetInterfaceDescription` returns and what `format` emits.
    pub fn write_description(&self, indent: usize, markup: &IdlMarkup) -> String {
        let mut out = String::new();

        if let Some(description) = &self.description {
            write_docstring(&mut out, indent, description, markup);
        }

        push_indent(&mut out, indent);
        out.push_str(markup.keyword_pre);
        out.push_str("interface");
        out.push_str(markup.keyword_post);
        out.push(' ');
        out.push_str(&self.name);

        for member in &self.members {
            out.push_str("\n\n");

            if let Some(description) = &member.description {
                write_docstring(&mut out, indent, description, markup);
            }

            push_indent(&mut out, indent);

            match &member.kind {
                MemberKind::Alias(alias) => {
                    out.push_str(markup.keyword_pre);
                    out.push_str("type");
                    out.push_str(markup.keyword_post);
                    out.push(' ');
                    out.push_str(markup.type_pre);
                    out.push_str(&member.name);
                    out.push_str(markup.type_post);
                    out.push(' ');
                    vtype::write_type(&mut out, alias, Some(indent), markup);
                }
                MemberKind::Method(method) => {
                    out.push_str(markup.keyword_pre);
                    out.push_str("method");
                    out.push_str(markup.keyword_post);
                    out.push(' ');
                    out.push_str(markup.method_pre);
                    out.push_str(&member.name);
                    out.push_str(markup.method_post);
                    vtype::write_type(&mut out, &method.input, Some(indent), markup);
                    out.push(' ');
                    out.push_str(markup.keyword_pre);
                    out.push_str("->");
                    out.push_str(markup.keyword_post);
                    out.push(' ');
                    vtype::write_type(&mut out, &method.output, Some(indent), markup);
                }
                MemberKind::Error(payload) => {
                    out.push_str(markup.keyword_pre);
                    out.push_str("error");
                    out.push_str(markup.keyword_post);
                    out.push(' ');
                    out.push_str(markup.type_pre);
                    out.push_str(&member.name);
                    out.push_str(markup.type_post);
                    if let Some(payload) = payload {
                        out.push(' ');
                        vtype::write_type(&mut out, payload, Some(indent), markup);
                    }
                }
            }
        }

        out.push('\n');
        out
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.write_description(0, &IdlMarkup::default()))
    }
}

fn fail(scanner: &mut Scanner) -> Error {
    Error::InvalidInterface(scanner.take_error(ScanErrorKind::KeywordExpected))
}

fn push_indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn write_docstring(out: &mut String, indent: usize, description: &str, markup: &IdlMarkup) {
    for line in description.split('\n') {
        push_indent(out, indent);
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

/// Split `interface.Member` at the last dot, validating both halves.
pub fn parse_qualified_name(qualified: &str) -> Result<(&str, &str)> {
    let (interface, member) = qualified.rsplit_once('.').ok_or(Error::InvalidMethod)?;

    if !interface_name_valid(interface) || !member_name_valid(member) {
        return Err(Error::InvalidMethod);
    }

    Ok((interface, member))
}
