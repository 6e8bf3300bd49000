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

//! Bidirectional object-proxying runtime over an ordered, reliable
//! bytestream.
//!
//! Two [`ProxyHost`]s share a full-duplex connection. Each side may expose
//! local objects as proxies to the peer and hold proxies referring to
//! peer-owned objects; arguments and results travel by value for plain
//! data and by reference for interface instances, which are automatically
//! promoted to proxies. Cancellation tokens propagate per call.

pub mod config;
pub mod error;
pub mod proxy;
pub mod service;

mod cancel;
mod correlator;
mod host;
mod registry;
mod serializer;

pub use config::HostOptions;
pub use error::{
    Error, InvokeFault, LocatorError, MethodResolutionError, RemoteError, Result,
};
pub use host::ProxyHost;
pub use proxy::{ActivationState, Proxy, ProxyHandle, RemoteType};
pub use serializer::CallArg;
pub use service::{
    Arg, Args, MethodSig, ProxyParam, ServiceDescriptor, ServiceLocator, ServiceObject,
    StaticServiceLocator,
};

// The protocol-level types embedders interact with
pub use rp_remoting::messages::{ActivationMode, ExceptionKind};
pub use rp_remoting::{Decimal, MethodDesc, Ownership, ProxyRef, Value};

// Cancellation tokens are part of the public call surface
pub use tokio_util::sync::CancellationToken;
