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

//! The JSON value model used for call and reply parameters. Arrays and
//! objects are shared-ownership containers; values parsed from JSON are
//! write-protected, values built in memory stay mutable until published.

pub mod json;
pub mod ser;

use crate::avl::AvlTree;
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;

pub use json::Markup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Array),
    Object(Object),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::String(_) => Kind::String,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Value {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Value {
        Value::Array(array)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Value {
        Value::Object(object)
    }
}

#[derive(Debug)]
struct ArrayInner {
    elements: Vec<Value>,
    element_kind: Option<Kind>,
    writable: bool,
}

/// An ordered container whose elements all share one kind. The kind is
/// undefined until the first non-null element arrives and fixed afterwards;
/// `null` elements are accepted for any kind. Cloning shares the storage.
#[derive(Debug, Clone)]
pub struct Array {
    inner: Rc<RefCell<ArrayInner>>,
}

impl Array {
    pub fn new() -> Array {
        Array {
            inner: Rc::new(RefCell::new(ArrayInner {
                elements: Vec::new(),
                element_kind: None,
                writable: true,
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_kind(&self) -> Option<Kind> {
        self.inner.borrow().element_kind
    }

    pub(crate) fn freeze(&self) {
        self.inner.borrow_mut().writable = false;
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        self.inner
            .borrow()
            .elements
            .get(index)
            .cloned()
            .ok_or(Error::InvalidIndex)
    }

    pub fn get_bool(&self, index: usize) -> Result<bool> {
        match self.get(index)? {
            Value::Bool(b) => Ok(b),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_int(&self, index: usize) -> Result<i64> {
        match self.get(index)? {
            Value::Int(i) => Ok(i),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_float(&self, index: usize) -> Result<f64> {
        match self.get(index)? {
            Value::Float(f) => Ok(f),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_string(&self, index: usize) -> Result<String> {
        match self.get(index)? {
            Value::String(s) => Ok(s),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_array(&self, index: usize) -> Result<Array> {
        match self.get(index)? {
            Value::Array(a) => Ok(a),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_object(&self, index: usize) -> Result<Object> {
        match self.get(index)? {
            Value::Object(o) => Ok(o),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn append(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut inner = self.inner.borrow_mut();

        if !inner.writable {
            return Err(Error::ReadOnly);
        }

        if value.kind() != Kind::Null {
            match inner.element_kind {
                None => inner.element_kind = Some(value.kind()),
                Some(kind) if kind == value.kind() => {}
                Some(_) => return Err(Error::TypeMismatch),
            }
        }

        inner.elements.push(value);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().elements.clone()
    }
}

impl Default for Array {
    fn default() -> Array {
        Array::new()
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Array) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.borrow().elements == other.inner.borrow().elements
    }
}

#[derive(Debug)]
struct ObjectInner {
    fields: AvlTree<String, Value>,
    writable: bool,
}

/// A field-name-to-value map ordered lexicographically by name. Setting a
/// field to `null` removes it, which is also why JSON `null` fields vanish
/// on parse. Cloning shares the storage.
#[derive(Debug, Clone)]
pub struct Object {
    inner: Rc<RefCell<ObjectInner>>,
}

impl Object {
    pub fn new() -> Object {
        Object {
            inner: Rc::new(RefCell::new(ObjectInner {
                fields: AvlTree::new(),
                writable: true,
            })),
        }
    }

    /// Parse one JSON object, write-protected, strict: no trailing commas,
    /// no comments, nothing but whitespace after the closing brace.
    pub fn from_json(text: &str) -> Result<Object> {
        json::object_from_json(text)
    }

    /// Compact single-line JSON.
    pub fn to_json(&self) -> String {
        let mut out = String::new();
        json::write_object(&mut out, self, None, &Markup::default());
        out
    }

    /// Multi-line JSON indented with two spaces per level.
    pub fn to_json_indented(&self) -> String {
        let mut out = String::new();
        json::write_object(&mut out, self, Some(0), &Markup::default());
        out
    }

    /// JSON with caller-provided markup around keys and scalar values, for
    /// colorized output. The markup does not alter what a reader sees after
    /// stripping the tags.
    pub fn to_json_markup(&self, indent: Option<usize>, markup: &Markup) -> String {
        let mut out = String::new();
        json::write_object(&mut out, self, indent, markup);
        out
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.borrow().fields.contains_key(name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.inner
            .borrow()
            .fields
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn freeze(&self) {
        self.inner.borrow_mut().writable = false;
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.borrow().fields.get(name).cloned()
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name).ok_or(Error::UnknownField)? {
            Value::Bool(b) => Ok(b),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.get(name).ok_or(Error::UnknownField)? {
            Value::Int(i) => Ok(i),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Integer fields coerce to float here; JSON writers are free to drop
    /// the decimal point from a float-typed field.
    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.get(name).ok_or(Error::UnknownField)? {
            Value::Int(i) => Ok(i as f64),
            Value::Float(f) => Ok(f),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.get(name).ok_or(Error::UnknownField)? {
            Value::String(s) => Ok(s),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_array(&self, name: &str) -> Result<Array> {
        match self.get(name).ok_or(Error::UnknownField)? {
            Value::Array(a) => Ok(a),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_object(&self, name: &str) -> Result<Object> {
        match self.get(name).ok_or(Error::UnknownField)? {
            Value::Object(o) => Ok(o),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Replace a field. `Value::Null` removes it.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut inner = self.inner.borrow_mut();

        if !inner.writable {
            return Err(Error::ReadOnly);
        }

        let _ = inner.fields.remove(name);
        if value.kind() != Kind::Null {
            inner
                .fields
                .insert(name.to_string(), value)
                .map_err(|_| Error::Panic)?;
        }
        Ok(())
    }

    pub fn set_null(&self, name: &str) -> Result<()> {
        self.set(name, Value::Null)
    }
}

impl Default for Object {
    fn default() -> Object {
        Object::new()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }

        let a = self.inner.borrow();
        let b = other.inner.borrow();
        if a.fields.len() != b.fields.len() {
            return false;
        }
        a.fields
            .iter()
            .zip(b.fields.iter())
            .all(|((ak, av), (bk, bv))| ak == bk && av == bv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_set_and_get() {
        let object = Object::new();
        object.set("b", true).unwrap();
        object.set("i", 42i64).unwrap();
        object.set("f", 4.5f64).unwrap();
        object.set("s", "hello").unwrap();

        assert!(object.get_bool("b").unwrap());
        assert_eq!(object.get_int("i").unwrap(), 42);
        assert_eq!(object.get_float("f").unwrap(), 4.5);
        assert_eq!(object.get_float("i").unwrap(), 42.0);
        assert_eq!(object.get_string("s").unwrap(), "hello");

        assert_eq!(object.get_bool("missing"), Err(Error::UnknownField));
        assert_eq!(object.get_string("i"), Err(Error::TypeMismatch));
    }

    #[test]
    fn object_field_names_are_sorted() {
        let object = Object::new();
        for name in ["zeta", "alpha", "mid"] {
            object.set(name, 1i64).unwrap();
        }
        assert_eq!(object.field_names(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn setting_null_removes() {
        let object = Object::new();
        object.set("a", 1i64).unwrap();
        object.set_null("a").unwrap();
        assert!(!object.contains("a"));
        assert_eq!(object.len(), 0);

        // Removing an absent field is fine.
        object.set_null("b").unwrap();
    }

    #[test]
    fn set_replaces_existing_field() {
        let object = Object::new();
        object.set("a", 1i64).unwrap();
        object.set("a", "now a string").unwrap();
        assert_eq!(object.get_string("a").unwrap(), "now a string");
        assert_eq!(object.len(), 1);
    }

    #[test]
    fn array_element_kind_is_fixed_by_first_value() {
        let array = Array::new();
        assert_eq!(array.element_kind(), None);

        array.append(Value::Null).unwrap();
        assert_eq!(array.element_kind(), None);

        array.append(7i64).unwrap();
        assert_eq!(array.element_kind(), Some(Kind::Int));

        array.append(Value::Null).unwrap();
        array.append(8i64).unwrap();
        assert_eq!(array.append("nope"), Err(Error::TypeMismatch));
        assert_eq!(array.len(), 4);
    }

    #[test]
    fn array_indexing() {
        let array = Array::new();
        array.append("one").unwrap();
        array.append("two").unwrap();

        assert_eq!(array.get_string(1).unwrap(), "two");
        assert_eq!(array.get(2), Err(Error::InvalidIndex));
        assert_eq!(array.get_int(0), Err(Error::TypeMismatch));
    }

    #[test]
    fn containers_are_shared() {
        let inner = Object::new();
        inner.set("n", 1i64).unwrap();

        let outer = Object::new();
        outer.set("child", inner.clone()).unwrap();

        inner.set("n", 2i64).unwrap();
        assert_eq!(outer.get_object("child").unwrap().get_int("n").unwrap(), 2);
    }

    #[test]
    fn frozen_containers_reject_mutation() {
        let object = Object::new();
        object.set("a", 1i64).unwrap();
        object.freeze();
        assert_eq!(object.set("b", 2i64), Err(Error::ReadOnly));
        assert_eq!(object.set_null("a"), Err(Error::ReadOnly));

        let array = Array::new();
        array.freeze();
        assert_eq!(array.append(1i64), Err(Error::ReadOnly));
    }

    #[test]
    fn deep_equality() {
        let a = Object::new();
        a.set("x", 1i64).unwrap();
        let b = Object::new();
        b.set("x", 1i64).unwrap();
        assert_eq!(a, b);

        b.set("x", 2i64).unwrap();
        assert_ne!(a, b);
    }
}
