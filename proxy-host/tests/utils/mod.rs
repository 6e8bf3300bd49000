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

//! Shared fixtures for the host pair tests: two sample services with
//! method tables, type markers and locator setup.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use rp_proxy_host::{
    Arg, Args, CallArg, InvokeFault, LocatorError, MethodDesc, MethodSig, ProxyHost, ProxyParam,
    RemoteType, ServiceDescriptor, ServiceLocator, ServiceObject, StaticServiceLocator,
};

pub static FOO_DESC: ServiceDescriptor = ServiceDescriptor {
    type_name: "test.Foo",
    interfaces: &["test.IFoo"],
    methods: &[
        MethodSig {
            name: "Add",
            param_types: &["Int32", "Int32"],
            generic_arity: 0,
            returns_future: false,
        },
        MethodSig {
            name: "AddAsync",
            param_types: &["Int32", "Int32"],
            generic_arity: 0,
            returns_future: true,
        },
        MethodSig {
            name: "Set",
            param_types: &["Int32"],
            generic_arity: 0,
            returns_future: false,
        },
        MethodSig {
            name: "ReadValue",
            param_types: &["test.IValue"],
            generic_arity: 0,
            returns_future: true,
        },
        MethodSig {
            name: "Loopback",
            param_types: &["test.IValue"],
            generic_arity: 0,
            returns_future: false,
        },
        MethodSig {
            name: "SumList",
            param_types: &["test.IntList"],
            generic_arity: 0,
            returns_future: false,
        },
        MethodSig {
            name: "WaitCancel",
            param_types: &["CancellationToken"],
            generic_arity: 0,
            returns_future: true,
        },
        MethodSig {
            name: "Fail",
            param_types: &[],
            generic_arity: 0,
            returns_future: false,
        },
    ],
};

pub static VALUE_DESC: ServiceDescriptor = ServiceDescriptor {
    type_name: "test.Value",
    interfaces: &["test.IValue"],
    methods: &[MethodSig {
        name: "GetValue",
        param_types: &[],
        generic_arity: 0,
        returns_future: false,
    }],
};

/// Type markers binding the test services to their remoting type names
pub struct Foo;

impl RemoteType for Foo {
    const TYPE_NAME: &'static str = "test.Foo";
}

pub struct ValueObj;

impl RemoteType for ValueObj {
    const TYPE_NAME: &'static str = "test.Value";
}

pub struct IValue;

impl RemoteType for IValue {
    const TYPE_NAME: &'static str = "test.IValue";
}

pub struct FooService {
    pub last_set: AtomicI32,
    pub disposed: Arc<AtomicBool>,
}

impl FooService {
    pub fn new(disposed: Arc<AtomicBool>) -> Self {
        Self {
            last_set: AtomicI32::new(0),
            disposed,
        }
    }
}

#[async_trait]
impl ServiceObject for FooService {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &FOO_DESC
    }

    async fn call(&self, method: &MethodSig, args: Args) -> Result<CallArg, InvokeFault> {
        match method.name {
            "Add" | "AddAsync" => {
                let a = args.int32(0)?;
                let b = args.int32(1)?;
                Ok(CallArg::value(a + b))
            }
            "Set" => {
                self.last_set.store(args.int32(0)?, Ordering::SeqCst);
                Ok(CallArg::null())
            }
            "ReadValue" => match args.proxy(0)? {
                ProxyParam::Remote(handle) => {
                    let ret = handle
                        .invoke(&get_value_desc(), vec![])
                        .await
                        .map_err(|e| InvokeFault::new("ReadValueError", e.to_string()))?;
                    ret.int32()
                        .map(CallArg::value)
                        .ok_or_else(|| InvokeFault::new("ReadValueError", "non-integer value"))
                }
                ProxyParam::Local(instance) => {
                    let sig = &VALUE_DESC.methods[0];
                    let ret = instance.call(sig, Args::default()).await?;
                    Ok(ret)
                }
            },
            "Loopback" => match args.proxy(0)? {
                // Hand the received reference straight back to the caller
                ProxyParam::Remote(handle) => Ok(CallArg::Proxy(handle.clone())),
                ProxyParam::Local(instance) => Ok(CallArg::Instance(instance.clone())),
            },
            "SumList" => {
                let items: Vec<i32> = args
                    .value(0)?
                    .decode_other()
                    .map_err(|e| InvokeFault::argument(e.to_string()))?;
                Ok(CallArg::value(items.iter().sum::<i32>()))
            }
            "WaitCancel" => {
                let token = args.token(0)?;
                token.cancelled().await;
                Err(InvokeFault::cancelled())
            }
            "Fail" => Err(InvokeFault::new("test.Boom", "kaboom")),
            other => Err(InvokeFault::new("MissingMethod", other)),
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

pub struct ValueService {
    pub value: i32,
}

#[async_trait]
impl ServiceObject for ValueService {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &VALUE_DESC
    }

    async fn call(&self, method: &MethodSig, _args: Args) -> Result<CallArg, InvokeFault> {
        match method.name {
            "GetValue" => Ok(CallArg::value(self.value)),
            other => Err(InvokeFault::new("MissingMethod", other)),
        }
    }
}

// Wire descriptors as a generated stub would build them

pub fn add_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "Add").with_params(vec!["Int32", "Int32"])
}

pub fn add_async_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "AddAsync")
        .with_params(vec!["Int32", "Int32"])
        .returning_future()
}

pub fn set_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "Set").with_params(vec!["Int32"])
}

pub fn read_value_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "ReadValue")
        .with_params(vec!["test.IValue"])
        .returning_future()
}

pub fn loopback_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "Loopback").with_params(vec!["test.IValue"])
}

pub fn sum_list_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "SumList").with_params(vec!["test.IntList"])
}

pub fn wait_cancel_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "WaitCancel")
        .with_params(vec!["CancellationToken"])
        .returning_future()
}

pub fn fail_desc() -> MethodDesc {
    MethodDesc::new("test.IFoo", "Fail").with_params(Vec::<String>::new())
}

pub fn get_value_desc() -> MethodDesc {
    MethodDesc::new("test.IValue", "GetValue").with_params(Vec::<String>::new())
}

/// A locator exposing the Foo constructor and the Value constructor;
/// `foo_disposed` observes disposal of any Foo built by it
pub fn test_locator(foo_disposed: Arc<AtomicBool>) -> StaticServiceLocator {
    let mut locator = StaticServiceLocator::new();
    locator.register_type(&FOO_DESC, move |_args| {
        Ok(Arc::new(FooService::new(foo_disposed.clone())))
    });
    locator.register_type(&VALUE_DESC, |args| {
        let value = args.int32(0).map_err(|e| LocatorError::Construction {
            type_name: "test.Value".to_string(),
            message: e.to_string(),
        })?;
        Ok(Arc::new(ValueService { value }))
    });
    locator
}

/// Two hosts wired back-to-back over an in-memory duplex stream
pub fn host_pair(left: Arc<dyn ServiceLocator>, right: Arc<dyn ServiceLocator>) -> (ProxyHost, ProxyHost) {
    let (l_stream, r_stream) = tokio::io::duplex(64 * 1024);
    (ProxyHost::new(l_stream, left), ProxyHost::new(r_stream, right))
}

/// Extracts an Int32 result or panics with context
pub fn expect_i32(arg: &Arg) -> i32 {
    arg.int32()
        .unwrap_or_else(|| panic!("BUG: expected an Int32 result, got: {:?}", arg))
}
