//! The transport-level enum threaded through the rest of the crate: either a
//! plain `TcpStream`, or one wrapped in a negotiated TLS session. Kept as an
//! enum rather than a trait object so the hot read/write paths stay
//! monomorphic.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

pub enum SocketFlowStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
    /// An in-memory transport backed by `tokio::io::duplex`, used by the
    /// crate's own integration tests to drive a full connection without a
    /// real socket.
    Duplex(DuplexStream),
}

impl AsyncRead for SocketFlowStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketFlowStream::Duplex(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketFlowStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketFlowStream::Duplex(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
            SocketFlowStream::Duplex(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketFlowStream::Duplex(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
