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

//! Proxy handles.
//!
//! A [`ProxyHandle`] is the untyped handle over one proxy record;
//! [`Proxy<T>`] is its typed wrapper. Disposal is explicit at the API
//! boundary: dropping an undisposed remote proxy logs a warning and sends
//! nothing.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use rp_logging::macros::*;
use rp_remoting::{MethodDesc, Ownership, Value};

use crate::error::{Error, Result};
use crate::host::HostCore;
use crate::serializer::{local_args, CallArg};
use crate::service::{Arg, ServiceObject};

/// Marker trait binding a Rust-side type marker to a remoting type name
pub trait RemoteType {
    const TYPE_NAME: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Remote proxy awaiting the activation reply
    Pending,
    Activated,
    /// Terminal; no operation other than querying this state succeeds
    Disposed,
}

/// Shared state of one proxy record, referenced by the registry and by any
/// number of handles
pub(crate) struct ProxyShared {
    pub(crate) id: u32,
    pub(crate) ownership: Ownership,
    /// Declared static type name
    pub(crate) remote_type: String,
    /// Dynamic type name of the actual instance; filled in by the
    /// activation reply for remote proxies
    object_type: Mutex<String>,
    state: Mutex<ActivationState>,
    /// The actual object, present iff the proxy is Local
    pub(crate) instance: Option<Arc<dyn ServiceObject>>,
    /// Whether disposing the proxy disposes the underlying object; only
    /// meaningful for Local proxies
    pub(crate) owns_instance: bool,
    pub(crate) host: Weak<HostCore>,
}

impl ProxyShared {
    pub(crate) fn new_local(
        host: Weak<HostCore>,
        id: u32,
        remote_type: String,
        object_type: String,
        instance: Arc<dyn ServiceObject>,
        owns_instance: bool,
    ) -> Self {
        Self {
            id,
            ownership: Ownership::Local,
            remote_type,
            object_type: Mutex::new(object_type),
            state: Mutex::new(ActivationState::Activated),
            instance: Some(instance),
            owns_instance,
            host,
        }
    }

    pub(crate) fn new_remote(
        host: Weak<HostCore>,
        id: u32,
        remote_type: String,
        object_type: String,
        state: ActivationState,
    ) -> Self {
        Self {
            id,
            ownership: Ownership::Remote,
            remote_type,
            object_type: Mutex::new(object_type),
            state: Mutex::new(state),
            instance: None,
            owns_instance: false,
            host,
        }
    }

    pub(crate) fn state(&self) -> ActivationState {
        *self.state.lock().expect("BUG: proxy state mutex poisoned")
    }

    pub(crate) fn object_type(&self) -> String {
        self.object_type
            .lock()
            .expect("BUG: proxy state mutex poisoned")
            .clone()
    }

    /// Fills in the dynamic type and flips a Pending record to Activated
    pub(crate) fn complete_activation(&self, object_type: &str) {
        let mut state = self.state.lock().expect("BUG: proxy state mutex poisoned");
        if *state == ActivationState::Pending {
            *state = ActivationState::Activated;
            *self
                .object_type
                .lock()
                .expect("BUG: proxy state mutex poisoned") = object_type.to_string();
        }
    }

    /// Transitions to Disposed; returns false when already there
    pub(crate) fn mark_disposed(&self) -> bool {
        let mut state = self.state.lock().expect("BUG: proxy state mutex poisoned");
        if *state == ActivationState::Disposed {
            return false;
        }
        *state = ActivationState::Disposed;
        true
    }
}

impl fmt::Debug for ProxyShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyShared")
            .field("id", &self.id)
            .field("ownership", &self.ownership)
            .field("remote_type", &self.remote_type)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ProxyShared {
    fn drop(&mut self) {
        // Disposal is mandatory at the API boundary; no wire message is
        // sent on a bare drop
        if self.ownership == Ownership::Remote && self.state() != ActivationState::Disposed {
            warn!(
                "proxy {}: dropped without dispose(), peer object not deactivated",
                self.id
            );
        }
    }
}

/// Untyped handle to a proxy record
#[derive(Clone, Debug)]
pub struct ProxyHandle {
    shared: Arc<ProxyShared>,
}

impl ProxyHandle {
    pub(crate) fn from_shared(shared: Arc<ProxyShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ProxyShared> {
        &self.shared
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn ownership(&self) -> Ownership {
        self.shared.ownership
    }

    /// Declared static type name
    pub fn remote_type(&self) -> &str {
        &self.shared.remote_type
    }

    /// Dynamic type name of the actual instance
    pub fn object_type(&self) -> String {
        self.shared.object_type()
    }

    pub fn state(&self) -> ActivationState {
        self.shared.state()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.state() == ActivationState::Disposed
    }

    /// The wrapped object iff the proxy is Local
    pub fn local_instance(&self) -> Option<Arc<dyn ServiceObject>> {
        self.shared.instance.clone()
    }

    /// The unified invocation operation. Calls on a Remote proxy travel as
    /// MethodCall frames; calls on a Local proxy dispatch directly.
    pub async fn invoke(&self, method: &MethodDesc, args: Vec<CallArg>) -> Result<Arg> {
        if self.is_disposed() {
            return Err(Error::ProxyDisposed(self.id()));
        }
        match self.shared.ownership {
            Ownership::Local => {
                let instance = self
                    .shared
                    .instance
                    .clone()
                    .expect("BUG: local proxy without an instance");
                let sig = instance.descriptor().resolve(method)?;
                let ret = instance.call(sig, local_args(args)).await?;
                Ok(local_args(vec![ret])
                    .into_vec()
                    .pop()
                    .unwrap_or(Arg::Value(Value::Null)))
            }
            Ownership::Remote => {
                let core = self.host()?;
                core.send_call(&self.shared, method, args).await
            }
        }
    }

    /// Returns an alias handle after validating that the referenced object
    /// is assignable to `target`. No frame is sent.
    pub fn cast_to(&self, target: &str) -> Result<ProxyHandle> {
        if self.is_disposed() {
            return Err(Error::ProxyDisposed(self.id()));
        }
        let object_type = self.object_type();
        if target == object_type || target == self.shared.remote_type {
            return Ok(self.clone());
        }
        if let Some(core) = self.shared.host.upgrade() {
            if let Some(descriptor) = core.descriptor_of(&object_type) {
                if descriptor.interfaces.iter().any(|name| *name == target) {
                    return Ok(self.clone());
                }
            }
        }
        Err(Error::InvalidCast {
            object_type,
            target: target.to_string(),
        })
    }

    /// Disposes the proxy: Deactivation for a Remote proxy, instance
    /// disposal (when owned) for a Local one. Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        if !self.shared.mark_disposed() {
            return Ok(());
        }
        let core = match self.shared.host.upgrade() {
            Some(core) => core,
            // The host is gone; its teardown already swept the tables
            None => return Ok(()),
        };
        match self.shared.ownership {
            Ownership::Local => core.release_local(&self.shared),
            Ownership::Remote => core.release_remote(&self.shared).await,
        }
        Ok(())
    }

    fn host(&self) -> Result<Arc<HostCore>> {
        self.shared.host.upgrade().ok_or(Error::HostDisposed)
    }
}

/// Typed wrapper over a [`ProxyHandle`]
pub struct Proxy<T: RemoteType> {
    handle: ProxyHandle,
    _type: PhantomData<fn() -> T>,
}

impl<T: RemoteType> Proxy<T> {
    pub(crate) fn from_handle(handle: ProxyHandle) -> Self {
        Self {
            handle,
            _type: PhantomData,
        }
    }

    pub fn handle(&self) -> &ProxyHandle {
        &self.handle
    }

    pub fn into_handle(self) -> ProxyHandle {
        self.handle
    }

    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_disposed()
    }

    pub fn local_instance(&self) -> Option<Arc<dyn ServiceObject>> {
        self.handle.local_instance()
    }

    pub async fn invoke(&self, method: &MethodDesc, args: Vec<CallArg>) -> Result<Arg> {
        self.handle.invoke(method, args).await
    }

    /// Returns a proxy alias constrained to `U`. Fails when the referenced
    /// object type is not assignable to `U`; sends no frame.
    pub fn cast<U: RemoteType>(&self) -> Result<Proxy<U>> {
        self.handle.cast_to(U::TYPE_NAME).map(Proxy::from_handle)
    }

    pub async fn dispose(&self) -> Result<()> {
        self.handle.dispose().await
    }
}

impl<T: RemoteType> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _type: PhantomData,
        }
    }
}

impl<T: RemoteType> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("type", &T::TYPE_NAME)
            .field("id", &self.handle.id())
            .finish()
    }
}
