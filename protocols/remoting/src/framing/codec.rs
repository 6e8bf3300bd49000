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

use bytes::{BufMut, BytesMut};

use tokio_util::codec::length_delimited::{self, LengthDelimitedCodec};
use tokio_util::codec::{Decoder, Encoder};

use rp_logging::macros::*;

use super::{Frame, LENGTH_FIELD_SIZE, MAX_FRAME_LENGTH};
use crate::error::Error;
use crate::messages::Message;

/// Frame-level codec: decodes length-prefixed payloads into raw [`Frame`]s
/// and serializes outgoing [`Message`]s behind a length prefix.
#[derive(Debug)]
pub struct Codec(LengthDelimitedCodec);

impl Decoder for Codec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let bytes = match self.0.decode(src)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        trace!("remoting: received frame, {} payload bytes", bytes.len());
        Ok(Some(Frame::new(bytes)))
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = BytesMut::with_capacity(128);
        item.encode(&mut payload);
        if payload.len() > MAX_FRAME_LENGTH {
            return Err(Error::FrameTooLarge(payload.len()));
        }
        dst.reserve(LENGTH_FIELD_SIZE + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec(
            length_delimited::Builder::new()
                .little_endian()
                .length_field_length(LENGTH_FIELD_SIZE)
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        )
    }
}

/// Helper struct that groups all framing related associated types
/// (Message + Frame + Error + Codec) for the `rp_wire::Framing` trait
#[derive(Debug)]
pub struct Framing;

impl rp_wire::Framing for Framing {
    type Tx = Message;
    type Rx = Frame;
    type Error = Error;
    type Codec = Codec;
}
