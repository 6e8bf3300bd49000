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

//! Argument marshalling between API-level [`CallArg`]s and wire
//! [`Value`]s.
//!
//! Whether something travels by value or by reference is explicit in the
//! argument, never inferred from type flags: plain values and structured
//! data go by value, instances and proxy handles by reference (instances
//! are interned into the local proxy table on the way out), and
//! cancellation tokens become per-call token ids.

use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use rp_remoting::messages::{ExceptionKind, WireException};
use rp_remoting::value::TOKEN_NONE;
use rp_remoting::{Ownership, ProxyRef, Value};

use crate::cancel::CallScope;
use crate::error::{Error, Result};
use crate::host::HostCore;
use crate::proxy::{ProxyHandle, ProxyShared};
use crate::registry::ProxyRegistry;
use crate::service::{Arg, Args, ProxyParam, ServiceObject};

/// One outbound argument or return value
#[derive(Clone)]
pub enum CallArg {
    /// Plain data passed by value (including structured `Other` documents)
    Value(Value),
    /// A local instance passed by reference; promoted to a local proxy and
    /// serialized as a proxy reference
    Instance(Arc<dyn ServiceObject>),
    /// An existing proxy handle, forwarded as-is
    Proxy(ProxyHandle),
    /// A caller-supplied cancellation token; `None` marks an argument that
    /// cannot be cancelled
    Token(Option<CancellationToken>),
}

impl CallArg {
    pub fn value<V: Into<Value>>(value: V) -> Self {
        CallArg::Value(value.into())
    }

    pub fn null() -> Self {
        CallArg::Value(Value::Null)
    }

    /// Structured data passed by value under the `Other` tag
    pub fn other<T: Serialize>(value: &T) -> Result<Self> {
        Ok(CallArg::Value(Value::other(value)?))
    }

    pub fn instance(instance: Arc<dyn ServiceObject>) -> Self {
        CallArg::Instance(instance)
    }

    pub fn token(token: CancellationToken) -> Self {
        CallArg::Token(Some(token))
    }

    pub fn no_token() -> Self {
        CallArg::Token(None)
    }
}

impl std::fmt::Debug for CallArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            CallArg::Instance(instance) => f
                .debug_tuple("Instance")
                .field(&instance.descriptor().type_name)
                .finish(),
            CallArg::Proxy(handle) => f.debug_tuple("Proxy").field(&handle.id()).finish(),
            CallArg::Token(token) => f.debug_tuple("Token").field(&token.is_some()).finish(),
        }
    }
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self {
        CallArg::Value(value)
    }
}

/// Wire form of an argument list plus the cancellable tokens collected
/// while encoding; token ids are indices into `tokens`.
pub(crate) struct EncodedArgs {
    pub values: Vec<Value>,
    pub tokens: Vec<CancellationToken>,
}

/// Wire reference describing a local proxy to the peer
pub(crate) fn local_proxy_ref(shared: &ProxyShared) -> ProxyRef {
    ProxyRef {
        ownership: Ownership::Local,
        remote_type: shared.remote_type.clone(),
        object_type: shared.object_type(),
        id: shared.id,
    }
}

/// Encodes outbound arguments, interning instances into the local proxy
/// table and accumulating the cancellable token list of the call.
pub(crate) fn encode_call_args(
    registry: &ProxyRegistry,
    host: &Weak<HostCore>,
    args: Vec<CallArg>,
) -> Result<EncodedArgs> {
    let mut values = Vec::with_capacity(args.len());
    let mut tokens = Vec::new();

    for arg in args {
        let value = match arg {
            CallArg::Value(value) => value,
            CallArg::Instance(instance) => {
                let remote_type = instance.descriptor().type_name.to_string();
                // Reuse an existing proxy for a known instance, register
                // otherwise. Implicitly promoted proxies do not own the
                // instance.
                let shared = registry.register_local(host, instance, false, remote_type)?;
                Value::Proxy(local_proxy_ref(&shared))
            }
            CallArg::Proxy(handle) => {
                let shared = handle.shared();
                if !Weak::ptr_eq(&shared.host, host) {
                    return Err(Error::ForeignProxy(shared.id));
                }
                if handle.is_disposed() {
                    return Err(Error::ProxyDisposed(shared.id));
                }
                match shared.ownership {
                    // We keep owning the object, the receiver sees a remote
                    // proxy
                    Ownership::Local => Value::Proxy(local_proxy_ref(shared)),
                    // Forwarding a handle we received from the peer
                    Ownership::Remote => Value::Proxy(ProxyRef {
                        ownership: Ownership::Remote,
                        remote_type: shared.remote_type.clone(),
                        object_type: shared.object_type(),
                        id: shared.id,
                    }),
                }
            }
            CallArg::Token(Some(token)) => {
                let token_id = tokens.len() as i32;
                tokens.push(token);
                Value::CancellationToken(token_id)
            }
            CallArg::Token(None) => Value::CancellationToken(TOKEN_NONE),
        };
        values.push(value);
    }

    Ok(EncodedArgs { values, tokens })
}

/// Resolves inbound wire values into service-facing arguments. Proxy
/// references resolve against the registry; token ids register in the
/// call's cancellation scope.
pub(crate) fn resolve_args(
    registry: &ProxyRegistry,
    host: &Weak<HostCore>,
    values: Vec<Value>,
    scope: &CallScope,
) -> std::result::Result<Args, WireException> {
    let mut args = Vec::with_capacity(values.len());

    for value in values {
        let arg = match value {
            Value::Proxy(proxy_ref) => match proxy_ref.ownership {
                // The sender forwarded a handle to an object living here
                Ownership::Remote => {
                    let shared = registry.get_local(proxy_ref.id).ok_or_else(|| {
                        WireException::new(
                            ExceptionKind::ProxyNotFound,
                            "ProxyNotFound",
                            format!("no local proxy with id {}", proxy_ref.id),
                        )
                    })?;
                    let instance = shared
                        .instance
                        .clone()
                        .expect("BUG: local proxy without an instance");
                    Arg::Proxy(ProxyParam::Local(instance))
                }
                // The sender owns the object; materialize (or reuse) the
                // remote proxy record
                Ownership::Local => {
                    let shared = registry.get_or_insert_remote(host, &proxy_ref);
                    Arg::Proxy(ProxyParam::Remote(ProxyHandle::from_shared(shared)))
                }
            },
            Value::CancellationToken(token_id) => {
                if token_id >= 0 {
                    Arg::Token(scope.token(token_id))
                } else {
                    // Not cancellable: a fresh token nobody ever fires
                    Arg::Token(CancellationToken::new())
                }
            }
            other => Arg::Value(other),
        };
        args.push(arg);
    }

    Ok(Args::new(args))
}

/// Resolves a single reply value. Replies have no cancellation scope; stray
/// token ids degrade to inert tokens.
pub(crate) fn resolve_reply(
    registry: &ProxyRegistry,
    host: &Weak<HostCore>,
    value: Value,
) -> std::result::Result<Arg, WireException> {
    let args = resolve_args(registry, host, vec![value], &CallScope::default())?;
    Ok(args
        .into_vec()
        .pop()
        .expect("BUG: single-value resolution yielded no argument"))
}

/// Converts outbound-style arguments for a direct local dispatch, with no
/// wire round trip and no registry effects
pub(crate) fn local_args(args: Vec<CallArg>) -> Args {
    let converted = args
        .into_iter()
        .map(|arg| match arg {
            CallArg::Value(value) => Arg::Value(value),
            CallArg::Instance(instance) => Arg::Proxy(ProxyParam::Local(instance)),
            CallArg::Proxy(handle) => match handle.shared().instance.clone() {
                Some(instance) => Arg::Proxy(ProxyParam::Local(instance)),
                None => Arg::Proxy(ProxyParam::Remote(handle)),
            },
            CallArg::Token(Some(token)) => Arg::Token(token),
            CallArg::Token(None) => Arg::Token(CancellationToken::new()),
        })
        .collect();
    Args::new(converted)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::InvokeFault;
    use crate::service::{MethodSig, ServiceDescriptor};
    use async_trait::async_trait;

    static ECHO_DESC: ServiceDescriptor = ServiceDescriptor {
        type_name: "test.Echo",
        interfaces: &["test.IEcho"],
        methods: &[],
    };

    struct Echo;

    #[async_trait]
    impl ServiceObject for Echo {
        fn descriptor(&self) -> &'static ServiceDescriptor {
            &ECHO_DESC
        }

        async fn call(&self, _method: &MethodSig, _args: Args) -> std::result::Result<CallArg, InvokeFault> {
            Ok(CallArg::null())
        }
    }

    fn no_host() -> Weak<HostCore> {
        Weak::new()
    }

    #[test]
    fn plain_values_pass_through() {
        let registry = ProxyRegistry::new();
        let encoded = encode_call_args(
            &registry,
            &no_host(),
            vec![CallArg::value(5), CallArg::value("x"), CallArg::null()],
        )
        .expect("BUG: encoding failed");

        assert_eq!(
            encoded.values,
            vec![Value::Int32(5), Value::String("x".into()), Value::Null]
        );
        assert!(encoded.tokens.is_empty());
    }

    #[test]
    fn tokens_number_from_zero() {
        let registry = ProxyRegistry::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let encoded = encode_call_args(
            &registry,
            &no_host(),
            vec![
                CallArg::token(first),
                CallArg::no_token(),
                CallArg::token(second),
            ],
        )
        .expect("BUG: encoding failed");

        assert_eq!(
            encoded.values,
            vec![
                Value::CancellationToken(0),
                Value::CancellationToken(TOKEN_NONE),
                Value::CancellationToken(1),
            ]
        );
        assert_eq!(encoded.tokens.len(), 2);
    }

    #[test]
    fn instance_is_interned_once() {
        let registry = ProxyRegistry::new();
        let instance: Arc<dyn ServiceObject> = Arc::new(Echo);

        let encoded = encode_call_args(
            &registry,
            &no_host(),
            vec![
                CallArg::instance(instance.clone()),
                CallArg::instance(instance),
            ],
        )
        .expect("BUG: encoding failed");

        // Both references carry the same freshly allocated id
        match (&encoded.values[0], &encoded.values[1]) {
            (Value::Proxy(a), Value::Proxy(b)) => {
                assert_eq!(a.id, b.id);
                assert_eq!(a.ownership, Ownership::Local);
                assert_eq!(a.object_type, "test.Echo");
            }
            other => panic!("BUG: expected two proxy refs, got: {:?}", other),
        }
        assert_eq!(registry.counts(), (1, 0));
    }

    #[test]
    fn forwarded_remote_handle_resolves_to_local_instance() {
        // Host A side: an inbound proxy reference owned by the sender
        let registry = ProxyRegistry::new();
        let scope = CallScope::default();
        let proxy_ref = ProxyRef {
            ownership: Ownership::Local,
            remote_type: "test.IEcho".into(),
            object_type: "test.Echo".into(),
            id: 3,
        };

        let args = resolve_args(
            &registry,
            &no_host(),
            vec![Value::Proxy(proxy_ref)],
            &scope,
        )
        .expect("BUG: argument resolution failed");

        match args.get(0) {
            Some(Arg::Proxy(ProxyParam::Remote(handle))) => assert_eq!(handle.id(), 3),
            other => panic!("BUG: expected a remote proxy param, got: {:?}", other),
        }
        assert_eq!(registry.counts(), (0, 1));
    }

    #[test]
    fn unknown_local_reference_is_proxy_not_found() {
        let registry = ProxyRegistry::new();
        let scope = CallScope::default();
        let proxy_ref = ProxyRef {
            ownership: Ownership::Remote,
            remote_type: "test.IEcho".into(),
            object_type: "test.Echo".into(),
            id: 17,
        };

        match resolve_args(&registry, &no_host(), vec![Value::Proxy(proxy_ref)], &scope) {
            Err(exception) => assert_eq!(exception.kind, ExceptionKind::ProxyNotFound),
            Ok(_) => panic!("BUG: resolution should have failed"),
        }
    }

    #[test]
    fn identity_round_trip() {
        // The full loop: intern an instance, serialize it, decode the
        // resulting reference as the peer's forwarded handle; the original
        // instance must come back.
        let registry = ProxyRegistry::new();
        let instance: Arc<dyn ServiceObject> = Arc::new(Echo);

        let encoded = encode_call_args(
            &registry,
            &no_host(),
            vec![CallArg::instance(instance.clone())],
        )
        .expect("BUG: encoding failed");

        let mut forwarded = match &encoded.values[0] {
            Value::Proxy(proxy_ref) => proxy_ref.clone(),
            other => panic!("BUG: expected a proxy ref, got: {:?}", other),
        };
        // What the peer sends back when forwarding our handle
        forwarded.ownership = Ownership::Remote;

        let args = resolve_args(
            &registry,
            &no_host(),
            vec![Value::Proxy(forwarded)],
            &CallScope::default(),
        )
        .expect("BUG: argument resolution failed");

        match args.get(0) {
            Some(Arg::Proxy(ProxyParam::Local(returned))) => {
                assert!(Arc::ptr_eq(returned, &instance));
            }
            other => panic!("BUG: expected the original instance, got: {:?}", other),
        }
    }

    #[test]
    fn inbound_token_ids_map_into_scope() {
        let registry = ProxyRegistry::new();
        let scope = CallScope::default();

        let args = resolve_args(
            &registry,
            &no_host(),
            vec![
                Value::CancellationToken(0),
                Value::CancellationToken(TOKEN_NONE),
            ],
            &scope,
        )
        .expect("BUG: argument resolution failed");

        scope.cancel(0);
        assert!(args.token(0).expect("BUG: not a token").is_cancelled());
        assert!(!args.token(1).expect("BUG: not a token").is_cancelled());
    }
}
