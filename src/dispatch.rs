// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Resolving `(operation name, argument bytes)` into a decoded call against a host-supplied
//! target, and the registry the host uses to describe that target.
//!
//! The registry and the per-operation typed stub a real deployment would generate from an
//! interface file are the out-of-scope collaborators this module is written against; `dispatch`
//! and the `Target` trait are the deliverable.

use std::collections::HashMap;
use std::io::Cursor;

use log::*;

use crate::codec;
use crate::descriptor::ValueDescriptor;
use crate::value::Value;
use crate::Error;

/// An operation's return shape. `Void` suppresses any reply on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnDescriptor {
    Void,
    Value(ValueDescriptor),
}

/// The registry a server dispatches against: given an operation name, produce its argument
/// descriptors and return descriptor, and be able to invoke it.
///
/// Overloading is not supported -- a registry that maps more than one signature to the same name
/// must pick the first one and ignore the rest, per the specification.
pub trait Target {
    /// Looks up an operation by name, returning its argument descriptors (in the order
    /// `dispatch` must decode them) and its return descriptor.
    fn lookup(&self, name: &str) -> Option<(&[ValueDescriptor], &ReturnDescriptor)>;

    /// Invokes the named operation, which must have already been resolved via `lookup`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `name` was not previously confirmed present via `lookup`;
    /// `dispatch` never calls `invoke` without first calling `lookup`.
    fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// The decoded result of dispatching one request message.
pub struct Response {
    pub returns: ReturnDescriptor,
    pub value: Value,
}

/// Decodes the operation name from the front of `bytes`, resolves it against `target`, decodes
/// its arguments, invokes it, and returns the typed response envelope.
pub fn dispatch<T: Target + ?Sized>(target: &mut T, bytes: &[u8]) -> Result<Response, Error> {
    let mut cursor = Cursor::new(bytes);

    let name_value = codec::decode(&mut cursor, &ValueDescriptor::Utf8String)?;
    let name = name_value.as_str().ok_or(Error::MalformedTag)?.to_string();

    let (args_descriptors, returns) = target
        .lookup(&name)
        .map(|(args, returns)| (args.to_vec(), returns.clone()))
        .ok_or_else(|| Error::UnknownOperation(name.clone()))?;

    debug!("dispatching {name} with {} argument(s)", args_descriptors.len());

    let mut args = Vec::with_capacity(args_descriptors.len());
    for descriptor in &args_descriptors {
        args.push(codec::decode(&mut cursor, descriptor)?);
    }

    let value = target.invoke(&name, args).map_err(Error::InvocationFailure)?;

    Ok(Response { returns, value })
}

/// An operation entry: its signature plus the function that implements it. Mirrors a plain
/// name-to-function-pointer table rather than trait objects, since that's the shape a generated
/// client/server binding would populate at construction time.
pub struct OperationEntry<T> {
    pub args: Vec<ValueDescriptor>,
    pub returns: ReturnDescriptor,
    pub call: fn(&mut T, Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>,
}

/// A minimal in-process `Target` implementation: a name-keyed table of operations closing over
/// one piece of host state `T`. This is the registry the demo binaries (and most tests) use; a
/// real deployment's code generator would build the equivalent from an interface description.
pub struct Registry<T> {
    operations: HashMap<String, OperationEntry<T>>,
    state: T,
}

impl<T> Registry<T> {
    pub fn new(state: T) -> Self {
        Self {
            operations: HashMap::new(),
            state,
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        args: Vec<ValueDescriptor>,
        returns: ReturnDescriptor,
        call: fn(&mut T, Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>,
    ) -> &mut Self {
        let name = name.into();
        // First match wins: overloading by name is not supported, mirroring the spec's pick for
        // ambiguity. A later `register` call for the same name is a no-op.
        self.operations.entry(name).or_insert(OperationEntry { args, returns, call });
        self
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

impl<T> Target for Registry<T> {
    fn lookup(&self, name: &str) -> Option<(&[ValueDescriptor], &ReturnDescriptor)> {
        self.operations.get(name).map(|op| (op.args.as_slice(), &op.returns))
    }

    fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let call = self
            .operations
            .get(name)
            .unwrap_or_else(|| panic!("invoke called for unresolved operation {name}"))
            .call;
        call(&mut self.state, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Primitive;

    fn echo(_state: &mut (), mut args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Ok(args.remove(0))
    }

    fn failing(_state: &mut (), _args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Err("boom".into())
    }

    fn registry_with_echo() -> Registry<()> {
        let mut registry = Registry::new(());
        registry.register(
            "echo",
            vec![ValueDescriptor::Utf8String],
            ReturnDescriptor::Value(ValueDescriptor::Utf8String),
            echo,
        );
        registry.register("fail", vec![], ReturnDescriptor::Void, failing);
        registry
    }

    fn encode_request(name: &str, args: &[(ValueDescriptor, Value)]) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::encode(&mut buf, &ValueDescriptor::Utf8String, &Value::Str(name.to_string())).unwrap();
        for (descriptor, value) in args {
            codec::encode(&mut buf, descriptor, value).unwrap();
        }
        buf
    }

    #[test]
    fn dispatch_echo_round_trips_argument() {
        let mut registry = registry_with_echo();
        let request = encode_request("echo", &[(ValueDescriptor::Utf8String, Value::Str("hi".into()))]);

        let response = dispatch(&mut registry, &request).unwrap();
        assert_eq!(response.value, Value::Str("hi".into()));
        assert_eq!(response.returns, ReturnDescriptor::Value(ValueDescriptor::Utf8String));
    }

    #[test]
    fn unknown_operation_is_reported() {
        let mut registry = registry_with_echo();
        let request = encode_request("nope", &[]);

        let err = dispatch(&mut registry, &request).unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(name) if name == "nope"));
    }

    #[test]
    fn invocation_failure_is_wrapped() {
        let mut registry = registry_with_echo();
        let request = encode_request("fail", &[]);

        let err = dispatch(&mut registry, &request).unwrap_err();
        assert!(matches!(err, Error::InvocationFailure(_)));
    }

    #[test]
    fn first_match_wins_on_duplicate_registration() {
        let mut registry: Registry<()> = Registry::new(());
        registry.register("same", vec![], ReturnDescriptor::Void, |_s, _a| Ok(Value::I32(1)));
        registry.register(
            "same",
            vec![ValueDescriptor::Primitive(Primitive::I32)],
            ReturnDescriptor::Void,
            |_s, _a| Ok(Value::I32(2)),
        );

        let (args, _) = registry.lookup("same").unwrap();
        assert!(args.is_empty(), "second registration for the same name must be ignored");
    }
}
