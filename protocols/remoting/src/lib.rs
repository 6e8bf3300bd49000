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

//! The bidirectional object-remoting wire protocol: length-prefixed frames
//! carrying activation, method-call, return, deactivation and cancellation
//! messages, plus the tagged value codec used for arguments and results.

pub mod error;
pub mod framing;
pub mod messages;
pub mod method;
mod primitives;
pub mod value;

use std::pin::Pin;

use futures::prelude::*;
use tokio::net::TcpStream;

pub use self::error::{Error, Result};
pub use self::framing::{Codec, Frame, Framing};
pub use self::messages::Message;
pub use self::method::MethodDesc;
pub use self::value::{Decimal, Ownership, ProxyRef, Value};

/// Tcp stream that produces/consumes remoting frames
pub type Framed = tokio_util::codec::Framed<TcpStream, Codec>;

/// Helper type for outgoing frames when run time support for multiple sink
/// types (e.g. TcpStream, in-memory duplex etc.) is needed
pub type DynFrameSink = Pin<Box<dyn Sink<Message, Error = Error> + Send>>;

/// Helper type for incoming frames when run time support for multiple
/// sources is needed
pub type DynFrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;
