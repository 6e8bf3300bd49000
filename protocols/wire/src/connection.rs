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

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::prelude::*;
use futures::stream::{SplitSink, SplitStream};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use rp_logging::macros::*;

use crate::framing::Framing;

/// Sending half of a split [`Connection`]
pub type ConnectionTx<F, S> = SplitSink<Framed<S, <F as Framing>::Codec>, <F as Framing>::Tx>;
/// Receiving half of a split [`Connection`]
pub type ConnectionRx<F, S> = SplitStream<Framed<S, <F as Framing>::Codec>>;

/// A message-framed wrapper around an ordered, reliable bytestream `S`.
///
/// The connection performs full message serialization / deserialization
/// through `F::Codec` and can be split into independent send/receive halves
/// so that both directions are driven concurrently.
#[pin_project]
#[derive(Debug)]
pub struct Connection<F: Framing, S> {
    #[pin]
    pub framed_stream: Framed<S, F::Codec>,
}

impl<F: Framing, S> Connection<F, S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Create a new `Connection` from an existing bytestream
    pub fn new(stream: S) -> Self {
        let framed_stream = Framed::new(stream, F::Codec::default());

        Self { framed_stream }
    }

    pub fn codec_mut(&mut self) -> &mut F::Codec {
        self.framed_stream.codec_mut()
    }

    pub fn into_inner(self) -> Framed<S, F::Codec> {
        self.framed_stream
    }
}

impl<F: Framing, S> Connection<F, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Split the connection into two halves which perform message
    /// serialization / deserialization independently
    pub fn split(self) -> (ConnectionTx<F, S>, ConnectionRx<F, S>) {
        self.framed_stream.split()
    }
}

impl<F: Framing> Connection<F, TcpStream> {
    /// Connects to a remote address `addr` and wraps the stream in a framed
    /// connection
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, F::Error> {
        let stream = TcpStream::connect(addr).await?;
        trace!("wire: connected to {:?}", stream.peer_addr());
        Ok(Connection::new(stream))
    }
}

impl<F: Framing, S> From<S> for Connection<F, S>
where
    S: AsyncRead + AsyncWrite,
{
    fn from(stream: S) -> Self {
        Self::new(stream)
    }
}

impl<F: Framing, S> Stream for Connection<F, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<F::Rx, F::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        self.project().framed_stream.poll_next(cx)
    }
}

impl<F: Framing, S> Sink<F::Tx> for Connection<F, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = F::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.project().framed_stream.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: F::Tx) -> Result<(), Self::Error> {
        self.project().framed_stream.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.project().framed_stream.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.project().framed_stream.poll_close(cx)
    }
}
