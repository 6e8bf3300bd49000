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

//! Method descriptors: the explicit replacement for host-language method
//! capture. A descriptor carries everything the receiving side needs to
//! select the one method it names.

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::primitives::*;

/// Describes the target method of a call.
///
/// Resolution at the receiving side selects the unique method satisfying all
/// three filters: name, generic arity and the parameter type-name sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDesc {
    /// Qualified name of the type declaring the method
    pub declaring_type: String,
    pub name: String,
    /// Parameter type names, in declaration order
    pub param_types: Vec<String>,
    /// Substituted generic argument type names; empty for non-generic methods
    pub generic_args: Vec<String>,
    /// The declared return type is an asynchronous completion; drives the
    /// `wait_task` bit of the MethodCall frame. Not part of the wire
    /// descriptor itself.
    pub returns_future: bool,
}

impl MethodDesc {
    pub fn new<D, N>(declaring_type: D, name: N) -> Self
    where
        D: Into<String>,
        N: Into<String>,
    {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            param_types: Vec::new(),
            generic_args: Vec::new(),
            returns_future: false,
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_types = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_generics<I, S>(mut self, generics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generic_args = generics.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the declared return type as a future; the receiver then awaits
    /// the result and replies with the settled value
    pub fn returning_future(mut self) -> Self {
        self.returns_future = true;
        self
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_args.is_empty()
    }

    /// The three-filter matching rule: name, parameter type-name sequence
    /// and generic arity must all agree.
    pub fn matches(&self, name: &str, param_types: &[&str], generic_arity: usize) -> bool {
        self.name == name
            && self.generic_args.len() == generic_arity
            && self.param_types.len() == param_types.len()
            && self
                .param_types
                .iter()
                .zip(param_types.iter())
                .all(|(a, b)| a == b)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        assert!(
            self.param_types.len() <= usize::from(u16::MAX)
                && self.generic_args.len() <= usize::from(u16::MAX),
            "BUG: method descriptor type lists too long"
        );
        dst.put_u8(self.is_generic() as u8);
        put_string(dst, &self.declaring_type);
        put_string(dst, &self.name);
        dst.put_u16_le(self.param_types.len() as u16);
        for param in &self.param_types {
            put_string(dst, param);
        }
        if self.is_generic() {
            dst.put_u16_le(self.generic_args.len() as u16);
            for generic in &self.generic_args {
                put_string(dst, generic);
            }
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Self> {
        let is_generic = get_u8(src)? != 0;
        let declaring_type = get_string(src)?;
        let name = get_string(src)?;
        let n_params = get_u16_le(src)? as usize;
        let mut param_types = Vec::with_capacity(n_params.min(64));
        for _ in 0..n_params {
            param_types.push(get_string(src)?);
        }
        let mut generic_args = Vec::new();
        if is_generic {
            let n_generics = get_u16_le(src)? as usize;
            generic_args.reserve(n_generics.min(64));
            for _ in 0..n_generics {
                generic_args.push(get_string(src)?);
            }
        }
        Ok(Self {
            declaring_type,
            name,
            param_types,
            generic_args,
            // Local bookkeeping only; reconstructed by the receiver from the
            // MethodCall frame when needed
            returns_future: false,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> MethodDesc {
        MethodDesc::new("test.ICalculator", "Add").with_params(vec!["Int32", "Int32"])
    }

    #[test]
    fn descriptor_roundtrip() {
        let desc = sample();
        let mut buf = BytesMut::new();
        desc.encode(&mut buf);
        let decoded = MethodDesc::decode(&mut buf).expect("BUG: descriptor decoding failed");
        assert!(buf.is_empty());
        assert_eq!(decoded, desc);
    }

    #[test]
    fn generic_descriptor_roundtrip() {
        let desc = MethodDesc::new("test.IStore", "Fetch")
            .with_params(vec!["String"])
            .with_generics(vec!["test.Record"]);
        let mut buf = BytesMut::new();
        desc.encode(&mut buf);
        let decoded = MethodDesc::decode(&mut buf).expect("BUG: descriptor decoding failed");
        assert!(decoded.is_generic());
        assert_eq!(decoded, desc);
    }

    #[test]
    fn returns_future_is_not_serialized() {
        let desc = sample().returning_future();
        let mut buf = BytesMut::new();
        desc.encode(&mut buf);
        let decoded = MethodDesc::decode(&mut buf).expect("BUG: descriptor decoding failed");
        assert!(!decoded.returns_future);
    }

    #[test]
    fn matching_filters() {
        let desc = sample();
        assert!(desc.matches("Add", &["Int32", "Int32"], 0));
        // Name mismatch
        assert!(!desc.matches("Sub", &["Int32", "Int32"], 0));
        // Arity mismatch
        assert!(!desc.matches("Add", &["Int32"], 0));
        // Parameter type mismatch
        assert!(!desc.matches("Add", &["Int32", "Int64"], 0));
        // Generic arity mismatch
        assert!(!desc.matches("Add", &["Int32", "Int32"], 1));
    }
}
