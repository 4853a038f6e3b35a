// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The wire-shape description that drives the codec.
//!
//! A [`ValueDescriptor`] stands in for whatever a real code generator would emit from a
//! user-authored interface file: it tells [`crate::codec`] how to lay a [`crate::value::Value`]
//! out on the wire without either side needing a type tag in the byte stream itself.

use crate::value::Value;

/// A primitive wire type. Sizes are fixed and values are always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    I8,
    /// A UTF-16 code unit, carried as an unsigned 16-bit quantity.
    U16Char,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl Primitive {
    /// Size in bytes of this primitive's encoded body.
    pub const fn size(self) -> usize {
        match self {
            Primitive::Bool => 1,
            Primitive::I8 => 1,
            Primitive::U16Char => 2,
            Primitive::I16 => 2,
            Primitive::I32 => 4,
            Primitive::I64 => 8,
            Primitive::F32 => 4,
            Primitive::F64 => 8,
        }
    }
}

/// The shape of a single value slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDescriptor {
    Primitive(Primitive),
    Utf8String,
    Array(Box<ValueDescriptor>),
    Record(RecordDescriptor),
}

impl ValueDescriptor {
    pub fn array(element: ValueDescriptor) -> Self {
        ValueDescriptor::Array(Box::new(element))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, ValueDescriptor::Primitive(_))
    }
}

/// A single field of a [`RecordDescriptor`], in the declaration order used by both peers.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub descriptor: ValueDescriptor,
    /// Immutable fields occupy a slot in the in-memory [`Value::Record`] but never appear on the
    /// wire: they are skipped by both `encode` and `decode`.
    pub immutable: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, descriptor: ValueDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            immutable: false,
        }
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

/// The shape of a composite record, plus the host-supplied factory that stands in for
/// reflection-based default construction.
#[derive(Clone)]
pub struct RecordDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    /// `None` if the host declined to provide a zero-argument constructor; decoding such a
    /// record raises [`crate::Error::UnconstructibleRecord`].
    pub factory: Option<fn() -> Value>,
}

impl std::fmt::Debug for RecordDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("factory", &self.factory.map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for RecordDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields
    }
}

impl RecordDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>, factory: fn() -> Value) -> Self {
        Self {
            name: name.into(),
            fields,
            factory: Some(factory),
        }
    }

    /// A record descriptor with no factory: legal to build, but [`crate::codec::decode`] of it
    /// always fails with `UnconstructibleRecord`.
    pub fn without_factory(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
            factory: None,
        }
    }
}
