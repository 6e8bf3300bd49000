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

//! The two proxy tables of a host: local proxies (objects this host owns
//! and has exposed) and remote proxies (handles to peer-owned objects),
//! plus the id allocators. One mutex guards all indices; the reverse lookup
//! keys on instance identity, not equality.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use rp_remoting::{Ownership, ProxyRef};

use crate::error::Error;
use crate::host::HostCore;
use crate::proxy::{ActivationState, ProxyShared};
use crate::service::ServiceObject;

/// The high bit reserved for caller-preallocated activation ids; a locally
/// allocated id must never carry it.
pub(crate) const PREALLOCATED_ID_BIT: u32 = 1 << 31;

/// Identity key of an instance: the data pointer of its `Arc`
fn instance_key(instance: &Arc<dyn ServiceObject>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

#[derive(Default)]
struct Tables {
    local_by_id: HashMap<u32, Arc<ProxyShared>>,
    local_by_instance: HashMap<usize, u32>,
    remote_by_id: HashMap<u32, Arc<ProxyShared>>,
    next_local_id: u32,
    next_preallocated_id: u32,
}

pub(crate) struct ProxyRegistry {
    tables: Mutex<Tables>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("BUG: proxy registry mutex poisoned")
    }

    /// Registers `instance` as a local proxy under a freshly allocated id.
    /// If the instance is already registered the pre-existing proxy is
    /// returned unchanged.
    pub fn register_local(
        &self,
        host: &Weak<HostCore>,
        instance: Arc<dyn ServiceObject>,
        owns_instance: bool,
        remote_type: String,
    ) -> Result<Arc<ProxyShared>, Error> {
        let mut tables = self.lock();

        if let Some(id) = tables.local_by_instance.get(&instance_key(&instance)) {
            let existing = tables.local_by_id[id].clone();
            return Ok(existing);
        }

        if tables.next_local_id & PREALLOCATED_ID_BIT != 0 {
            return Err(Error::IdSpaceExhausted);
        }
        let id = tables.next_local_id;
        tables.next_local_id += 1;

        Ok(Self::insert_local(
            &mut tables,
            host,
            id,
            instance,
            owns_instance,
            remote_type,
        ))
    }

    /// Registers `instance` under a caller-supplied (preallocated) id so
    /// that the same numeric id identifies the object on both sides.
    /// Instance deduplication still dominates: a known instance yields its
    /// existing proxy, id notwithstanding.
    pub fn register_local_with_id(
        &self,
        host: &Weak<HostCore>,
        id: u32,
        instance: Arc<dyn ServiceObject>,
        owns_instance: bool,
        remote_type: String,
    ) -> Result<Arc<ProxyShared>, Error> {
        let mut tables = self.lock();

        if let Some(existing_id) = tables.local_by_instance.get(&instance_key(&instance)) {
            let existing = tables.local_by_id[existing_id].clone();
            return Ok(existing);
        }

        if tables.local_by_id.contains_key(&id) {
            return Err(Error::DuplicateProxyId(id));
        }

        Ok(Self::insert_local(
            &mut tables,
            host,
            id,
            instance,
            owns_instance,
            remote_type,
        ))
    }

    fn insert_local(
        tables: &mut Tables,
        host: &Weak<HostCore>,
        id: u32,
        instance: Arc<dyn ServiceObject>,
        owns_instance: bool,
        remote_type: String,
    ) -> Arc<ProxyShared> {
        let object_type = instance.descriptor().type_name.to_string();
        let key = instance_key(&instance);
        let shared = Arc::new(ProxyShared::new_local(
            host.clone(),
            id,
            remote_type,
            object_type,
            instance,
            owns_instance,
        ));
        tables.local_by_id.insert(id, shared.clone());
        tables.local_by_instance.insert(key, id);
        shared
    }

    pub fn get_local(&self, id: u32) -> Option<Arc<ProxyShared>> {
        self.lock().local_by_id.get(&id).cloned()
    }

    /// Removes a local proxy from both indices
    pub fn unregister_local(&self, id: u32) -> Option<Arc<ProxyShared>> {
        let mut tables = self.lock();
        let shared = tables.local_by_id.remove(&id)?;
        if let Some(instance) = shared.instance.as_ref() {
            tables.local_by_instance.remove(&instance_key(instance));
        }
        Some(shared)
    }

    /// Allocates an id for a remote-target activation; the high bit
    /// guarantees it cannot collide with peer-allocated local ids.
    pub fn alloc_preallocated(&self) -> u32 {
        let mut tables = self.lock();
        let id = tables.next_preallocated_id;
        tables.next_preallocated_id = tables.next_preallocated_id.wrapping_add(1);
        id | PREALLOCATED_ID_BIT
    }

    /// Creates the Pending remote record for an activation in flight
    pub fn insert_pending_remote(
        &self,
        host: &Weak<HostCore>,
        id: u32,
        remote_type: String,
    ) -> Arc<ProxyShared> {
        let shared = Arc::new(ProxyShared::new_remote(
            host.clone(),
            id,
            remote_type.clone(),
            remote_type,
            ActivationState::Pending,
        ));
        self.lock().remote_by_id.insert(id, shared.clone());
        shared
    }

    /// Looks up the remote proxy referenced by `proxy_ref`, instantiating a
    /// new record when absent. A Pending record left by an activation is
    /// completed in place.
    pub fn get_or_insert_remote(
        &self,
        host: &Weak<HostCore>,
        proxy_ref: &ProxyRef,
    ) -> Arc<ProxyShared> {
        debug_assert_eq!(proxy_ref.ownership, Ownership::Local);
        let mut tables = self.lock();
        if let Some(existing) = tables.remote_by_id.get(&proxy_ref.id) {
            existing.complete_activation(&proxy_ref.object_type);
            return existing.clone();
        }
        let shared = Arc::new(ProxyShared::new_remote(
            host.clone(),
            proxy_ref.id,
            proxy_ref.remote_type.clone(),
            proxy_ref.object_type.clone(),
            ActivationState::Activated,
        ));
        tables.remote_by_id.insert(proxy_ref.id, shared.clone());
        shared
    }

    pub fn remove_remote(&self, id: u32) -> Option<Arc<ProxyShared>> {
        self.lock().remote_by_id.remove(&id)
    }

    /// (local, remote) table sizes
    pub fn counts(&self) -> (usize, usize) {
        let tables = self.lock();
        (tables.local_by_id.len(), tables.remote_by_id.len())
    }

    /// Empties both tables, handing every proxy back for teardown
    pub fn drain_all(&self) -> (Vec<Arc<ProxyShared>>, Vec<Arc<ProxyShared>>) {
        let mut tables = self.lock();
        tables.local_by_instance.clear();
        let locals = tables.local_by_id.drain().map(|(_, v)| v).collect();
        let remotes = tables.remote_by_id.drain().map(|(_, v)| v).collect();
        (locals, remotes)
    }

    #[cfg(test)]
    fn force_next_local_id(&self, id: u32) {
        self.lock().next_local_id = id;
    }
}
