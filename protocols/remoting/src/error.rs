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

//! Module that represents remoting protocol errors

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame exceeds maximum length: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Unknown message code: {0}")]
    UnknownMessageCode(u8),

    #[error("Unknown value tag: {0}")]
    UnknownValueTag(u8),

    #[error("Invalid ownership marker: {0}")]
    BadOwnership(u8),

    #[error("Invalid activation mode: {0}")]
    BadActivationMode(u8),

    #[error("Invalid exception kind: {0}")]
    BadExceptionKind(u8),

    #[error("Invalid unicode scalar value: {0:#x}")]
    BadChar(u32),

    #[error("Incomplete payload, unexpected end of input data")]
    Eof,

    #[error("Length prefix too long or out of range")]
    Overlong,

    #[error("Invalid UTF-8 string data")]
    Unicode,

    #[error("Trailing data left after deserialization")]
    TrailingBytes,

    #[error("Structured value codec: {0}")]
    Structured(String),
}

/// A specialized `Result` type bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
