//! C9: ties the reader task, the shared writer, and the keep-alive
//! coordinator together into one handle per open connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use tokio::io::{split, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::connection_state::ConnectionState;
use crate::decoder::Inflater;
use crate::encoder::Deflater;
use crate::error::Error;
use crate::event::generate_new_uuid;
use crate::frame::CloseCode;
use crate::keepalive;
use crate::message::Message;
use crate::read::{ReadStream, Role};
use crate::split::{WSReader, WSWriter};
use crate::stream::SocketFlowStream;
use crate::write::{Writer, WriterKind};

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// A single, already-handshaken WebSocket connection. Can be driven
/// directly as a `Stream<Item = Result<Message, Error>>`, or `split()`
/// into independent read/write halves for concurrent use.
pub struct WSConnection {
    id: Uuid,
    reader: WSReader,
    writer: WSWriter,
    read_task: JoinHandle<Result<(), Error>>,
    keepalive_task: Option<JoinHandle<()>>,
}

impl WSConnection {
    pub fn new(socket: SocketFlowStream, role: Role, config: WebSocketConfig, sub_protocol: Option<String>) -> Self {
        let id = generate_new_uuid();
        let (read_half, write_half) = split(socket);
        let writer_kind = match role {
            Role::Client => WriterKind::Client,
            Role::Server => WriterKind::Server,
        };
        let writer = Arc::new(Mutex::new(Writer::new(write_half, writer_kind, id)));
        let state = Arc::new(Mutex::new(ConnectionState::Open));
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        let (deflater, inflater) = build_codecs(&config, role);

        let (read_tx, read_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let mut read_stream = ReadStream::new(
            BufReader::new(read_half),
            role,
            read_tx,
            Arc::clone(&writer),
            Arc::clone(&state),
            config.clone(),
            inflater,
            Arc::clone(&last_pong),
            id,
        );
        let read_task = tokio::spawn(async move { read_stream.poll_messages().await });

        let keepalive_task = keepalive::spawn(
            Arc::clone(&writer),
            Arc::clone(&state),
            last_pong,
            config.keep_alive_interval,
            id,
        );

        let reader = WSReader::new(ReceiverStream::new(read_rx));
        let writer = WSWriter::new(writer, state, config, deflater, sub_protocol);

        log::debug!("[{id}] connection established, role={role:?}");

        Self {
            id,
            reader,
            writer,
            read_task,
            keepalive_task,
        }
    }

    /// The connection's unique identifier, carried by every log line this
    /// connection and its background tasks emit.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Splits into independent halves. The reader task keeps running in
    /// the background, feeding the returned `WSReader`; the keep-alive
    /// task (if any) is left running too, since it only needs the writer.
    pub fn split(self) -> (WSReader, WSWriter) {
        (self.reader, self.writer)
    }

    pub async fn state(&self) -> ConnectionState {
        self.writer.state().await
    }

    pub fn sub_protocol(&self) -> Option<&str> {
        self.writer.sub_protocol()
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.writer.send_as_text(data).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send_as_binary(data).await
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        self.writer.send_ping().await
    }

    pub async fn send_large_data_fragmented(&mut self, data: Vec<u8>, fragment_size: usize) -> Result<(), Error> {
        self.writer.send_large_data_fragmented(data, fragment_size).await
    }

    pub async fn close(&mut self, status: CloseCode, reason: &str) -> Result<(), Error> {
        self.writer.close(status, reason).await
    }
}

impl Drop for WSConnection {
    fn drop(&mut self) {
        self.read_task.abort();
        if let Some(handle) = self.keepalive_task.take() {
            handle.abort();
        }
    }
}

impl Stream for WSConnection {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_next(cx)
    }
}

/// Builds the per-direction `permessage-deflate` codecs for this role, per
/// RFC 7692 §6: `client_no_context_takeover` governs the client's
/// compressor and the server's decompressor, and vice versa for
/// `server_no_context_takeover`.
fn build_codecs(config: &WebSocketConfig, role: Role) -> (Option<Deflater>, Option<Inflater>) {
    if !config.allow_per_message_deflate {
        return (None, None);
    }
    let Some(extensions) = config.extensions.as_ref() else {
        return (None, None);
    };
    if !extensions.permessage_deflate {
        return (None, None);
    }

    match role {
        Role::Client => {
            let compress_reset = config
                .deflate_policy
                .client_context_takeover
                .resolve(extensions.client_no_context_takeover.unwrap_or(false));
            let decompress_reset = extensions.server_no_context_takeover.unwrap_or(false);
            (
                Some(Deflater::new(compress_reset, extensions.client_max_window_bits)),
                Some(Inflater::new(decompress_reset, extensions.server_max_window_bits)),
            )
        }
        Role::Server => {
            let compress_reset = config
                .deflate_policy
                .server_context_takeover
                .resolve(extensions.server_no_context_takeover.unwrap_or(false));
            let decompress_reset = extensions.client_no_context_takeover.unwrap_or(false);
            (
                Some(Deflater::new(compress_reset, extensions.server_max_window_bits)),
                Some(Inflater::new(decompress_reset, extensions.client_max_window_bits)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `WSConnection::new` takes a concrete `SocketFlowStream`, so full
    // connection round trips (which need a real or loopback transport) are
    // covered by the crate's `tests/` integration suite instead of here.

    #[test]
    fn build_codecs_is_none_when_deflate_disallowed() {
        let config = WebSocketConfig {
            allow_per_message_deflate: false,
            ..WebSocketConfig::default()
        };
        let (deflater, inflater) = build_codecs(&config, Role::Client);
        assert!(deflater.is_none());
        assert!(inflater.is_none());
    }

    #[test]
    fn build_codecs_is_none_without_negotiated_extension() {
        let config = WebSocketConfig {
            allow_per_message_deflate: true,
            extensions: None,
            ..WebSocketConfig::default()
        };
        let (deflater, inflater) = build_codecs(&config, Role::Server);
        assert!(deflater.is_none());
        assert!(inflater.is_none());
    }

    #[test]
    fn build_codecs_present_when_negotiated() {
        let config = WebSocketConfig {
            allow_per_message_deflate: true,
            extensions: Some(crate::extensions::Extensions {
                permessage_deflate: true,
                ..Default::default()
            }),
            ..WebSocketConfig::default()
        };
        let (deflater, inflater) = build_codecs(&config, Role::Client);
        assert!(deflater.is_some());
        assert!(inflater.is_some());
    }
}
