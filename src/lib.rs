//! Async WebSockets implementation for the Tokio stack.
//!
//! This library offers an implementation of [WebSocket Protocol RFC
//! 6455](https://datatracker.ietf.org/doc/html/rfc6455) plus the
//! `permessage-deflate` extension of [RFC
//! 7692](https://datatracker.ietf.org/doc/html/rfc7692), so end-users can
//! wrap a WebSocket server/client into their application.
//!
//! It's an async library based on the Tokio runtime, using a
//! [`tokio::net::TcpStream`] (optionally wrapped in TLS) behind the
//! scenes to perform handshakes, read/write frames, parse masks, handle
//! opcodes and reassemble fragmented messages.

pub mod config;
mod connection;
pub mod connection_state;
mod decoder;
mod encoder;
pub mod error;
pub mod event;
pub mod extensions;
pub mod frame;
pub mod handshake;
mod http;
mod ioutil;
mod keepalive;
mod mask;
pub mod message;
pub mod read;
mod request;
pub mod server;
pub mod split;
pub mod stream;
mod write;

pub use config::{ClientConfig, DeflateConfig, DeflatePolicy, ServerConfig, WebSocketConfig};
pub use connection::WSConnection;
pub use connection_state::ConnectionState;
pub use error::Error;
pub use event::{Event, EventStream};
pub use frame::{CloseCode, OpCode};
pub use handshake::{accept_async, accept_async_with_config, connect_async, connect_async_with_config};
pub use message::{CloseDetails, Message};
pub use server::{start_server, start_server_with_config};
pub use split::{WSReader, WSWriter};
pub use stream::SocketFlowStream;
