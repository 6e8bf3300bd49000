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

//! Module that represents proxy host errors

use std::fmt;

use thiserror::Error;

use rp_remoting::messages::{ExceptionKind, WireException};

#[derive(Error, Debug)]
pub enum Error {
    /// The host has been torn down; surfaced to any API called after
    /// teardown and to every pending call
    #[error("Host is disposed")]
    HostDisposed,

    #[error("Proxy {0} is disposed")]
    ProxyDisposed(u32),

    /// The proxy id allocator would produce an id in the range reserved for
    /// preallocated activation ids
    #[error("Proxy id space exhausted")]
    IdSpaceExhausted,

    #[error("Proxy {0} already registered under this id")]
    DuplicateProxyId(u32),

    /// The proxy handle belongs to a different host
    #[error("Proxy {0} is foreign to this host")]
    ForeignProxy(u32),

    #[error("Cannot cast proxy of type `{object_type}` to `{target}`")]
    InvalidCast { object_type: String, target: String },

    /// The peer replied to an activation with something else than a proxy
    /// reference
    #[error("Unexpected activation reply")]
    UnexpectedReply,

    #[error("Protocol error: {0}")]
    Protocol(#[from] rp_remoting::Error),

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// Local-dispatch counterpart of the MethodResolutionError wire fault
    #[error("Method resolution failed: {0}")]
    MethodResolution(#[from] MethodResolutionError),

    /// Local-dispatch counterpart of an InvocationError wire fault
    #[error("Invocation failed: {0}")]
    Fault(#[from] InvokeFault),
}

/// A specialized `Result` type bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised by the peer and reconstructed from a ReturnException
/// frame. `type_name` names the innermost original error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{type_name}: {message}")]
pub struct RemoteError {
    pub kind: ExceptionKind,
    pub type_name: String,
    pub message: String,
}

impl RemoteError {
    pub fn is_cancelled(&self) -> bool {
        self.kind == ExceptionKind::Cancelled
    }
}

impl From<WireException> for RemoteError {
    fn from(exception: WireException) -> Self {
        Self {
            kind: exception.kind,
            type_name: exception.type_name,
            message: exception.message,
        }
    }
}

/// An error raised by a service method. Carries the original error type
/// name so that the caller side can re-raise a typed error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeFault {
    pub type_name: String,
    pub message: String,
    pub cancelled: bool,
}

impl InvokeFault {
    pub fn new<T, M>(type_name: T, message: M) -> Self
    where
        T: Into<String>,
        M: Into<String>,
    {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            cancelled: false,
        }
    }

    /// Fault raised for malformed or mistyped call arguments
    pub fn argument<M: Into<String>>(message: M) -> Self {
        Self::new("ArgumentError", message)
    }

    /// The method observed cancellation and gave up
    pub fn cancelled() -> Self {
        Self {
            type_name: "OperationCancelled".to_string(),
            message: "the operation was cancelled".to_string(),
            cancelled: true,
        }
    }

    pub(crate) fn into_wire_exception(self) -> WireException {
        let kind = if self.cancelled {
            ExceptionKind::Cancelled
        } else {
            ExceptionKind::Invocation
        };
        WireException::new(kind, self.type_name, self.message)
    }
}

impl fmt::Display for InvokeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for InvokeFault {}

/// Service locator failures; mapped onto the ActivationError wire taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Type `{0}` is not registered")]
    NotRegistered(String),

    #[error("Constructing `{type_name}` failed: {message}")]
    Construction { type_name: String, message: String },

    #[error("Constructor of `{type_name}` expects {expected} arguments, got {got}")]
    ArgumentMismatch {
        type_name: String,
        expected: usize,
        got: usize,
    },
}

impl LocatorError {
    /// Name of the underlying error type as reported over the wire
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            LocatorError::NotRegistered(_) => "NotRegistered",
            LocatorError::Construction { .. } => "ConstructionError",
            LocatorError::ArgumentMismatch { .. } => "ArgumentError",
        }
    }
}

/// Ambiguous or missing method during receiver-side resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MethodResolutionError {
    #[error("No method matching `{0}`")]
    NotFound(String),

    #[error("Method `{0}` is ambiguous")]
    Ambiguous(String),
}
