//! Transport streams held by pooled connections.
//!
//! A [`Stream`] is a plain TCP stream, or a TCP stream wrapped in client-side
//! TLS. Either way it implements [`AsyncRead`] and [`AsyncWrite`], so request
//! logic built on top of a [`Connection`][crate::Connection] doesn't need to
//! know which transport is in use.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A stream which is either plain TCP, or TCP with TLS.
#[pin_project(project = StreamProj)]
pub enum Stream {
    /// Plain TCP.
    Plain(#[pin] TcpStream),

    /// TCP with a completed TLS handshake.
    Tls(#[pin] Box<TlsStream<TcpStream>>),
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Plain(stream) => f.debug_tuple("Stream::Plain").field(stream).finish(),
            Stream::Tls(stream) => f
                .debug_tuple("Stream::Tls")
                .field(stream.get_ref().0)
                .finish(),
        }
    }
}

impl Stream {
    /// Returns `true` if this stream is protected by TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }

    /// The underlying TCP stream.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(stream) => stream,
            Stream::Tls(stream) => stream.get_ref().0,
        }
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Address of the local end of the stream.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Stream::Plain(stream)
    }
}

impl From<TlsStream<TcpStream>> for Stream {
    fn from(stream: TlsStream<TcpStream>) -> Self {
        Stream::Tls(Box::new(stream))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            StreamProj::Plain(stream) => stream.poll_read(cx, buf),
            StreamProj::Tls(stream) => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            StreamProj::Plain(stream) => stream.poll_write(cx, buf),
            StreamProj::Tls(stream) => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            StreamProj::Plain(stream) => stream.poll_flush(cx),
            StreamProj::Tls(stream) => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            StreamProj::Plain(stream) => stream.poll_shutdown(cx),
            StreamProj::Tls(stream) => stream.poll_shutdown(cx),
        }
    }
}
