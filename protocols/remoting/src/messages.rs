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

//! All remoting protocol messages
//!
//! The first byte of every frame payload is the message code; `seq` is the
//! sender's own sequence number and `corr` references a sequence number
//! previously sent by the receiver.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::method::MethodDesc;
use crate::primitives::*;
use crate::value::{decode_values, encode_values, Value};

/// Message codes as they appear on the wire
pub mod code {
    pub const METHOD_CALL: u8 = 0;
    pub const RETURN_VALUE: u8 = 1;
    pub const RETURN_EXCEPTION: u8 = 2;
    pub const ACTIVATION: u8 = 3;
    pub const DEACTIVATION: u8 = 4;
    pub const CANCELLATION_REQUEST: u8 = 5;
}

/// How the receiver obtains the instance backing a new proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    /// Construct a fresh instance via the service locator
    Create = 0,
    /// Fetch a preregistered instance from the service locator
    Load = 1,
}

impl ActivationMode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ActivationMode::Create),
            1 => Ok(ActivationMode::Load),
            other => Err(Error::BadActivationMode(other)),
        }
    }
}

/// Wire discriminator of a remotely raised error, so that the caller can
/// re-raise a typed error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Referenced proxy id not present in the expected table
    ProxyNotFound = 0,
    /// Ambiguous, missing or still-generic method
    MethodResolution = 1,
    /// The invoked method itself raised
    Invocation = 2,
    /// Service locator failure during activation
    Activation = 3,
    /// The method observed cancellation
    Cancelled = 4,
}

impl ExceptionKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ExceptionKind::ProxyNotFound),
            1 => Ok(ExceptionKind::MethodResolution),
            2 => Ok(ExceptionKind::Invocation),
            3 => Ok(ExceptionKind::Activation),
            4 => Ok(ExceptionKind::Cancelled),
            other => Err(Error::BadExceptionKind(other)),
        }
    }
}

/// A remotely raised error as it travels over the wire. The innermost
/// exception is propagated: `type_name` names the original error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireException {
    pub kind: ExceptionKind,
    pub type_name: String,
    pub message: String,
}

impl WireException {
    pub fn new<T, M>(kind: ExceptionKind, type_name: T, message: M) -> Self
    where
        T: Into<String>,
        M: Into<String>,
    {
        Self {
            kind,
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.kind as u8);
        put_string(dst, &self.type_name);
        put_string(dst, &self.message);
    }

    fn decode(src: &mut BytesMut) -> Result<Self> {
        let kind = ExceptionKind::from_u8(get_u8(src)?)?;
        let type_name = get_string(src)?;
        let message = get_string(src)?;
        Ok(Self {
            kind,
            type_name,
            message,
        })
    }
}

impl fmt::Display for WireException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Invoke a method on a proxy owned by the receiver
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub seq: u32,
    pub proxy_id: u32,
    /// The declared return type is a future; the receiver awaits it and
    /// replies with the settled value
    pub wait_task: bool,
    pub method: MethodDesc,
    pub args: Vec<Value>,
}

/// Successful completion of a request identified by `corr`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    pub seq: u32,
    pub corr: u32,
    pub value: Value,
}

/// Failed completion of a request identified by `corr`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnException {
    pub seq: u32,
    pub corr: u32,
    pub exception: WireException,
}

/// Activate an object at the receiver under a caller-chosen proxy id
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub seq: u32,
    /// Proxy id chosen by the caller (high bit set) so that both sides agree
    /// on the id before the reply arrives
    pub preallocated_id: u32,
    pub mode: ActivationMode,
    pub type_name: String,
    pub args: Vec<Value>,
}

/// The sender has dropped its remote proxy; the receiver disposes the
/// corresponding local proxy. Never acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Deactivation {
    pub seq: u32,
    pub proxy_id: u32,
}

/// Cancel the token `token_id` of the in-flight call `corr`. May be resent;
/// late arrivals are dropped without acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationRequest {
    pub seq: u32,
    pub corr: u32,
    pub token_id: i32,
}

/// All messages recognized by the protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    MethodCall(MethodCall),
    ReturnValue(ReturnValue),
    ReturnException(ReturnException),
    Activation(Activation),
    Deactivation(Deactivation),
    CancellationRequest(CancellationRequest),
}

impl Message {
    /// The sender-side sequence number of this message
    pub fn seq(&self) -> u32 {
        match self {
            Message::MethodCall(m) => m.seq,
            Message::ReturnValue(m) => m.seq,
            Message::ReturnException(m) => m.seq,
            Message::Activation(m) => m.seq,
            Message::Deactivation(m) => m.seq,
            Message::CancellationRequest(m) => m.seq,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Message::MethodCall(m) => {
                dst.put_u8(code::METHOD_CALL);
                dst.put_u32_le(m.seq);
                dst.put_u32_le(m.proxy_id);
                dst.put_u8(m.wait_task as u8);
                m.method.encode(dst);
                encode_values(&m.args, dst);
            }
            Message::ReturnValue(m) => {
                dst.put_u8(code::RETURN_VALUE);
                dst.put_u32_le(m.seq);
                dst.put_u32_le(m.corr);
                m.value.encode(dst);
            }
            Message::ReturnException(m) => {
                dst.put_u8(code::RETURN_EXCEPTION);
                dst.put_u32_le(m.seq);
                dst.put_u32_le(m.corr);
                m.exception.encode(dst);
            }
            Message::Activation(m) => {
                dst.put_u8(code::ACTIVATION);
                dst.put_u32_le(m.seq);
                dst.put_u32_le(m.preallocated_id);
                dst.put_u8(m.mode as u8);
                put_string(dst, &m.type_name);
                encode_values(&m.args, dst);
            }
            Message::Deactivation(m) => {
                dst.put_u8(code::DEACTIVATION);
                dst.put_u32_le(m.seq);
                dst.put_u32_le(m.proxy_id);
            }
            Message::CancellationRequest(m) => {
                dst.put_u8(code::CANCELLATION_REQUEST);
                dst.put_u32_le(m.seq);
                dst.put_u32_le(m.corr);
                dst.put_i32_le(m.token_id);
            }
        }
    }

    /// Parses one message from a frame payload. The whole payload must be
    /// consumed, trailing bytes are a protocol violation.
    pub fn decode(src: &mut BytesMut) -> Result<Self> {
        let message = match get_u8(src)? {
            code::METHOD_CALL => {
                let seq = get_u32_le(src)?;
                let proxy_id = get_u32_le(src)?;
                let wait_task = get_u8(src)? != 0;
                let method = MethodDesc::decode(src)?;
                let args = decode_values(src)?;
                Message::MethodCall(MethodCall {
                    seq,
                    proxy_id,
                    wait_task,
                    method,
                    args,
                })
            }
            code::RETURN_VALUE => {
                let seq = get_u32_le(src)?;
                let corr = get_u32_le(src)?;
                let value = Value::decode(src)?;
                Message::ReturnValue(ReturnValue { seq, corr, value })
            }
            code::RETURN_EXCEPTION => {
                let seq = get_u32_le(src)?;
                let corr = get_u32_le(src)?;
                let exception = WireException::decode(src)?;
                Message::ReturnException(ReturnException {
                    seq,
                    corr,
                    exception,
                })
            }
            code::ACTIVATION => {
                let seq = get_u32_le(src)?;
                let preallocated_id = get_u32_le(src)?;
                let mode = ActivationMode::from_u8(get_u8(src)?)?;
                let type_name = get_string(src)?;
                let args = decode_values(src)?;
                Message::Activation(Activation {
                    seq,
                    preallocated_id,
                    mode,
                    type_name,
                    args,
                })
            }
            code::DEACTIVATION => {
                let seq = get_u32_le(src)?;
                let proxy_id = get_u32_le(src)?;
                Message::Deactivation(Deactivation { seq, proxy_id })
            }
            code::CANCELLATION_REQUEST => {
                let seq = get_u32_le(src)?;
                let corr = get_u32_le(src)?;
                let token_id = get_i32_le(src)?;
                Message::CancellationRequest(CancellationRequest {
                    seq,
                    corr,
                    token_id,
                })
            }
            unknown => return Err(Error::UnknownMessageCode(unknown)),
        };
        if !src.is_empty() {
            return Err(Error::TrailingBytes);
        }
        Ok(message)
    }
}
