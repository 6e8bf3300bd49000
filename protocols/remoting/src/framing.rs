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

//! Basic framing: a frame is a `u32` little-endian length prefix followed by
//! exactly that many payload bytes. The transport layer never parses
//! payloads; a received [`Frame`] carries the raw payload for the receive
//! loop to decode, so that one malformed payload does not terminate the
//! stream.

use bytes::BytesMut;

pub mod codec;

pub use codec::{Codec, Framing};

/// Size of the frame length prefix
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Hard upper bound on the payload size; bounds the allocation a peer can
/// force with a single header
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// A received frame: the raw payload with the length prefix stripped
#[derive(Debug, PartialEq)]
pub struct Frame {
    payload: BytesMut,
}

impl Frame {
    pub fn new(payload: BytesMut) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame providing its payload
    pub fn into_payload(self) -> BytesMut {
        self.payload
    }
}

impl From<BytesMut> for Frame {
    fn from(payload: BytesMut) -> Self {
        Self::new(payload)
    }
}
