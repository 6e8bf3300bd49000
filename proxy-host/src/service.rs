// Copyright (C) 2021  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Service-side dispatch surface.
//!
//! There is no runtime code generation here: a service exposes a static
//! method table ([`ServiceDescriptor`]) and an async [`ServiceObject::call`]
//! dispatcher. The host resolves an incoming method descriptor against the
//! table and hands over decoded arguments. Per-interface tables are the kind
//! of thing a build-time stub generator would emit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rp_remoting::{MethodDesc, Value};

use crate::error::{InvokeFault, LocatorError, MethodResolutionError};
use crate::proxy::ProxyHandle;
use crate::serializer::CallArg;

/// One row of a service method table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSig {
    pub name: &'static str,
    /// Parameter type names, in declaration order
    pub param_types: &'static [&'static str],
    /// Number of generic arguments the method expects
    pub generic_arity: usize,
    /// The declared return type is an asynchronous completion
    pub returns_future: bool,
}

impl MethodSig {
    /// Builds the wire descriptor selecting this method on `declaring_type`
    pub fn desc(&self, declaring_type: &str) -> MethodDesc {
        let desc = MethodDesc::new(declaring_type, self.name)
            .with_params(self.param_types.iter().copied());
        if self.returns_future {
            desc.returning_future()
        } else {
            desc
        }
    }
}

/// Static description of a service type: its qualified name, the interfaces
/// it implements and its method table
#[derive(Debug, Clone, Copy)]
pub struct ServiceDescriptor {
    pub type_name: &'static str,
    pub interfaces: &'static [&'static str],
    pub methods: &'static [MethodSig],
}

impl ServiceDescriptor {
    /// Selects the unique method satisfying all three filters of the
    /// incoming descriptor: name, generic arity and parameter type-name
    /// sequence. More than one or no match fails the call.
    pub fn resolve(&self, desc: &MethodDesc) -> Result<&'static MethodSig, MethodResolutionError> {
        let mut matched = self.methods.iter().filter(|sig| {
            desc.matches(sig.name, sig.param_types, sig.generic_arity)
        });

        match (matched.next(), matched.next()) {
            (Some(sig), None) => Ok(sig),
            (Some(_), Some(_)) => Err(MethodResolutionError::Ambiguous(desc.name.clone())),
            (None, _) => Err(MethodResolutionError::NotFound(format!(
                "{}.{}({})",
                desc.declaring_type,
                desc.name,
                desc.param_types.join(", ")
            ))),
        }
    }
}

/// An interface-typed parameter, resolved to whatever side owns the object
#[derive(Clone)]
pub enum ProxyParam {
    /// The referenced object lives on this host; identity is preserved
    Local(Arc<dyn ServiceObject>),
    /// The referenced object lives at the peer; calls route back over the
    /// wire
    Remote(ProxyHandle),
}

/// A single decoded argument handed to a service method
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Proxy(ProxyParam),
    Token(CancellationToken),
}

impl Arg {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn int32(&self) -> Option<i32> {
        match self {
            Arg::Value(Value::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match self {
            Arg::Value(Value::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn proxy(&self) -> Option<&ProxyParam> {
        match self {
            Arg::Proxy(param) => Some(param),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        match self {
            Arg::Token(token) => Some(token),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Arg::Value(Value::Null))
    }
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Arg::Proxy(ProxyParam::Local(instance)) => f
                .debug_tuple("LocalProxy")
                .field(&instance.descriptor().type_name)
                .finish(),
            Arg::Proxy(ProxyParam::Remote(handle)) => {
                f.debug_tuple("RemoteProxy").field(&handle.id()).finish()
            }
            Arg::Token(token) => f.debug_tuple("Token").field(token).finish(),
        }
    }
}

/// Decoded argument list of one inbound call
#[derive(Debug, Clone, Default)]
pub struct Args {
    args: Vec<Arg>,
}

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.args.iter()
    }

    pub fn into_vec(self) -> Vec<Arg> {
        self.args
    }

    fn arg(&self, index: usize) -> Result<&Arg, InvokeFault> {
        self.args
            .get(index)
            .ok_or_else(|| InvokeFault::argument(format!("missing argument {}", index)))
    }

    pub fn int32(&self, index: usize) -> Result<i32, InvokeFault> {
        self.arg(index)?
            .int32()
            .ok_or_else(|| InvokeFault::argument(format!("argument {} is not an Int32", index)))
    }

    pub fn string(&self, index: usize) -> Result<&str, InvokeFault> {
        self.arg(index)?
            .string()
            .ok_or_else(|| InvokeFault::argument(format!("argument {} is not a String", index)))
    }

    pub fn value(&self, index: usize) -> Result<&Value, InvokeFault> {
        self.arg(index)?
            .value()
            .ok_or_else(|| InvokeFault::argument(format!("argument {} is not a plain value", index)))
    }

    pub fn proxy(&self, index: usize) -> Result<&ProxyParam, InvokeFault> {
        self.arg(index)?
            .proxy()
            .ok_or_else(|| InvokeFault::argument(format!("argument {} is not a proxy", index)))
    }

    pub fn token(&self, index: usize) -> Result<CancellationToken, InvokeFault> {
        self.arg(index)?
            .token()
            .cloned()
            .ok_or_else(|| {
                InvokeFault::argument(format!("argument {} is not a cancellation token", index))
            })
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self::new(args)
    }
}

/// An object this host can expose to the peer.
///
/// Implementations are usually hand written or generated per interface;
/// `call` dispatches on the resolved method table row.
#[async_trait]
pub trait ServiceObject: Send + Sync + 'static {
    fn descriptor(&self) -> &'static ServiceDescriptor;

    /// Invokes `method` with `args`. Every dispatch is asynchronous; the
    /// settled return value is what travels back to the caller (return
    /// [`CallArg::Value(Value::Null)`] for void methods).
    async fn call(&self, method: &MethodSig, args: Args) -> Result<CallArg, InvokeFault>;

    /// Releases resources held by the instance. Invoked at most once by the
    /// owning proxy.
    fn dispose(&self) {}
}

/// Resolves type names to instances.
///
/// `construct` implements constructor-injection semantics for Create
/// activations; `resolve` returns preregistered instances for Load
/// activations.
pub trait ServiceLocator: Send + Sync + 'static {
    fn construct(
        &self,
        type_name: &str,
        args: Args,
    ) -> Result<Arc<dyn ServiceObject>, LocatorError>;

    fn resolve(&self, type_name: &str) -> Result<Arc<dyn ServiceObject>, LocatorError>;

    /// Optional type metadata used for proxy cast checks
    fn descriptor(&self, type_name: &str) -> Option<&'static ServiceDescriptor> {
        let _ = type_name;
        None
    }
}

type ConstructorFn =
    Box<dyn Fn(Args) -> Result<Arc<dyn ServiceObject>, LocatorError> + Send + Sync>;

/// A plain map-backed [`ServiceLocator`]: constructors for Create,
/// preregistered instances for Load.
#[derive(Default)]
pub struct StaticServiceLocator {
    constructors: HashMap<String, ConstructorFn>,
    instances: HashMap<String, Arc<dyn ServiceObject>>,
    descriptors: HashMap<String, &'static ServiceDescriptor>,
}

impl StaticServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for `descriptor.type_name`
    pub fn register_type<F>(&mut self, descriptor: &'static ServiceDescriptor, constructor: F)
    where
        F: Fn(Args) -> Result<Arc<dyn ServiceObject>, LocatorError> + Send + Sync + 'static,
    {
        self.descriptors
            .insert(descriptor.type_name.to_string(), descriptor);
        self.constructors
            .insert(descriptor.type_name.to_string(), Box::new(constructor));
    }

    /// Registers an already built instance for Load activations
    pub fn register_instance(&mut self, instance: Arc<dyn ServiceObject>) {
        let descriptor = instance.descriptor();
        self.descriptors
            .insert(descriptor.type_name.to_string(), descriptor);
        self.instances
            .insert(descriptor.type_name.to_string(), instance);
    }
}

impl ServiceLocator for StaticServiceLocator {
    fn construct(
        &self,
        type_name: &str,
        args: Args,
    ) -> Result<Arc<dyn ServiceObject>, LocatorError> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| LocatorError::NotRegistered(type_name.to_string()))?;
        constructor(args)
    }

    fn resolve(&self, type_name: &str) -> Result<Arc<dyn ServiceObject>, LocatorError> {
        self.instances
            .get(type_name)
            .cloned()
            .ok_or_else(|| LocatorError::NotRegistered(type_name.to_string()))
    }

    fn descriptor(&self, type_name: &str) -> Option<&'static ServiceDescriptor> {
        self.descriptors.get(type_name).copied()
    }
}
