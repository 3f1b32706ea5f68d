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

//! Bridge between the value model and the serde ecosystem. Handlers that
//! want typed parameters convert a call's `Object` to a `serde_json::Value`
//! and deserialize from there; replies go the other way. There is no serde
//! `Deserialize` into the value model itself: parsed values must come
//! through the freezing JSON reader.

use super::{Array, Object, Value};
use crate::error::{Error, Result};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(array) => array.serialize(serializer),
            Value::Object(object) => object.serialize(serializer),
        }
    }
}

impl Serialize for Array {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let inner = self.inner.borrow();
        let mut seq = serializer.serialize_seq(Some(inner.elements.len()))?;
        for element in &inner.elements {
            seq.serialize_element(element)?;
        }
        seq.end()
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let inner = self.inner.borrow();
        let mut map = serializer.serialize_map(Some(inner.fields.len()))?;
        for (name, value) in inner.fields.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Value {
    pub fn to_serde(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(array) => {
                serde_json::Value::Array(array.to_vec().iter().map(Value::to_serde).collect())
            }
            Value::Object(object) => object.to_serde(),
        }
    }

    pub fn from_serde(value: &serde_json::Value) -> Result<Value> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(Error::TypeMismatch)
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(elements) => {
                let array = Array::new();
                for element in elements {
                    array.append(Value::from_serde(element)?)?;
                }
                Ok(Value::Array(array))
            }
            serde_json::Value::Object(_) => Ok(Value::Object(Object::from_serde(value)?)),
        }
    }
}

impl Object {
    pub fn to_serde(&self) -> serde_json::Value {
        let inner = self.inner.borrow();
        let mut map = serde_json::Map::new();
        for (name, value) in inner.fields.iter() {
            map.insert(name.clone(), value.to_serde());
        }
        serde_json::Value::Object(map)
    }

    /// Build a mutable object from a `serde_json` object. Null fields are
    /// dropped and arrays must hold one kind, as in the JSON reader.
    pub fn from_serde(value: &serde_json::Value) -> Result<Object> {
        let map = match value {
            serde_json::Value::Object(map) => map,
            _ => return Err(Error::TypeMismatch),
        };

        let object = Object::new();
        for (name, value) in map {
            object.set(name, Value::from_serde(value)?)?;
        }
        Ok(object)
    }
}
