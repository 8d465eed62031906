use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::WebSocketConfig;
use crate::connection_state::ConnectionState;
use crate::encoder::Deflater;
use crate::error::Error;
use crate::frame::{CloseCode, Frame, OpCode};
use crate::message::Message;
use crate::write::Writer;

/// Payloads at or below this size aren't worth the compression overhead.
const MIN_COMPRESSIBLE_PAYLOAD_SIZE: usize = 64;

const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WSReader {
    read_rx: ReceiverStream<Result<Message, Error>>,
}

impl WSReader {
    pub fn new(read_rx: ReceiverStream<Result<Message, Error>>) -> Self {
        Self { read_rx }
    }
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.read_rx).poll_next(cx)
    }
}

pub struct WSWriter {
    writer: Arc<Mutex<Writer>>,
    state: Arc<Mutex<ConnectionState>>,
    web_socket_config: WebSocketConfig,
    deflater: Option<Deflater>,
    sub_protocol: Option<String>,
}

impl WSWriter {
    pub fn new(
        writer: Arc<Mutex<Writer>>,
        state: Arc<Mutex<ConnectionState>>,
        web_socket_config: WebSocketConfig,
        deflater: Option<Deflater>,
        sub_protocol: Option<String>,
    ) -> Self {
        Self {
            writer,
            state,
            web_socket_config,
            deflater,
            sub_protocol,
        }
    }

    pub fn sub_protocol(&self) -> Option<&str> {
        self.sub_protocol.as_deref()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.write_message(message).await
    }

    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Text(String::from_utf8(data)?)).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Binary(data)).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.write_message(Message::Text(data)).await
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        self.require_sendable().await?;
        self.writer
            .lock()
            .await
            .write_frame(Frame::new(true, OpCode::Ping, Vec::new(), false), false)
            .await
    }

    /// Sends `data` as a sequence of fragments no larger than
    /// `fragment_size`, using the Continuation opcode for all but the
    /// first frame.
    pub async fn send_large_data_fragmented(&mut self, data: Vec<u8>, fragment_size: usize) -> Result<(), Error> {
        self.require_sendable().await?;

        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or(usize::MAX);
        if fragment_size > max_frame_size {
            return Err(Error::CustomFragmentSizeExceeded(fragment_size, max_frame_size));
        }
        if data.len() > self.web_socket_config.max_message_size.unwrap_or(usize::MAX) {
            return Err(Error::ProtocolViolation(
                crate::error::ProtocolViolationKind::MaxMessageSize,
            ));
        }

        let mut payload = data;
        let compressed = self.compress_if_enabled(&mut payload)?;

        if payload.is_empty() {
            return self
                .write_frames(vec![Frame::new(true, OpCode::Text, Vec::new(), false)])
                .await;
        }

        let chunks: Vec<&[u8]> = payload.chunks(fragment_size.max(1)).collect();
        let total = chunks.len();
        let mut frames = Vec::with_capacity(total);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let opcode = if i == 0 { OpCode::Text } else { OpCode::Continue };
            frames.push(Frame::new(i == total - 1, opcode, chunk.to_vec(), compressed && i == 0));
        }
        self.write_frames(frames).await
    }

    /// One-way close: sends a Close frame and returns without waiting for
    /// the peer's acknowledgment.
    pub async fn close_output(&mut self, status: CloseCode, reason: &str) -> Result<(), Error> {
        self.writer
            .lock()
            .await
            .write_frame(Frame::close(status, reason), false)
            .await?;
        let mut state = self.state.lock().await;
        *state = state.on_close_sent();
        Ok(())
    }

    /// Full close handshake: sends a Close frame, then waits (bounded by
    /// `CLOSE_HANDSHAKE_TIMEOUT`) for the connection to reach `Closed`.
    pub async fn close(&mut self, status: CloseCode, reason: &str) -> Result<(), Error> {
        self.close_output(status, reason).await?;

        let state = Arc::clone(&self.state);
        let wait_for_close = async move {
            loop {
                if state.lock().await.is_terminal() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        match timeout(CLOSE_HANDSHAKE_TIMEOUT, wait_for_close).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let mut state = self.state.lock().await;
                *state = ConnectionState::Closed;
                Ok(())
            }
        }
    }

    async fn require_sendable(&self) -> Result<(), Error> {
        if self.state.lock().await.can_send_data() {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    fn compress_if_enabled(&mut self, data: &mut Vec<u8>) -> Result<bool, Error> {
        if let Some(deflater) = self.deflater.as_mut() {
            if data.len() > MIN_COMPRESSIBLE_PAYLOAD_SIZE {
                *data = deflater.compress(data)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn convert_to_frames(&mut self, message: Message) -> Result<Vec<Frame>, Error> {
        let opcode = message.opcode();
        let mut payload = message.as_binary();

        if payload.is_empty() {
            return Ok(vec![Frame::new(true, opcode, payload, false)]);
        }

        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or(usize::MAX);
        let compressed = self.compress_if_enabled(&mut payload)?;

        let mut frames: Vec<Frame> = payload
            .chunks(max_frame_size)
            .enumerate()
            .map(|(i, chunk)| {
                let frame_opcode = if i == 0 { opcode } else { OpCode::Continue };
                Frame::new(false, frame_opcode, chunk.to_vec(), compressed && i == 0)
            })
            .collect();

        if let Some(last) = frames.last_mut() {
            last.final_fragment = true;
        }

        Ok(frames)
    }

    async fn write_message(&mut self, message: Message) -> Result<(), Error> {
        self.require_sendable().await?;
        if message.as_binary().len() > self.web_socket_config.max_message_size.unwrap_or(usize::MAX) {
            return Err(Error::ProtocolViolation(
                crate::error::ProtocolViolationKind::MaxMessageSize,
            ));
        }
        let frames = self.convert_to_frames(message)?;
        self.write_frames(frames).await
    }

    async fn write_frames(&mut self, frames: Vec<Frame>) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        for frame in frames {
            let set_rsv1 = frame.compressed;
            writer.write_frame(frame, set_rsv1).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::split;
    use crate::write::WriterKind;

    async fn test_writer() -> (WSWriter, tokio::io::DuplexStream) {
        let (client_side, server_side) = tokio::io::duplex(1 << 16);
        let (_read, write_half) = split(server_side);
        let writer = Arc::new(Mutex::new(Writer::new(write_half, WriterKind::Server, crate::event::generate_new_uuid())));
        let state = Arc::new(Mutex::new(ConnectionState::Open));
        (
            WSWriter::new(writer, state, WebSocketConfig::default(), None, None),
            client_side,
        )
    }

    #[tokio::test]
    async fn send_after_close_fails_with_invalid_state() {
        let (mut writer, _client) = test_writer().await;
        writer.close_output(CloseCode::Normal, "").await.unwrap();
        let result = writer.send_as_text("hi".to_string()).await;
        assert!(matches!(result, Err(Error::InvalidState)));
    }

    #[tokio::test]
    async fn oversized_fragment_size_is_rejected() {
        let (mut writer, _client) = test_writer().await;
        let big = writer.web_socket_config.max_frame_size.unwrap() + 1;
        let result = writer.send_large_data_fragmented(vec![1, 2, 3], big).await;
        assert!(matches!(result, Err(Error::CustomFragmentSizeExceeded(_, _))));
    }
}
