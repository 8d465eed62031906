use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, BufReader, ReadHalf};
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::connection_state::ConnectionState;
use crate::decoder::Inflater;
use crate::error::{Error, ProtocolViolationKind};
use crate::frame::{CloseCode, Frame, FrameHeader, OpCode, ReadCursor, MAX_PAYLOAD_SIZE};
use crate::ioutil::{read_exact, read_u16_be, read_u64_be};
use crate::mask::apply_mask;
use crate::message::{CloseDetails, Message};
use crate::stream::SocketFlowStream;
use crate::write::Writer;

const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side this reader is decoding frames for, since the masking
/// requirement is the mirror image depending on role (RFC 6455 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn expects_masked_frames(self) -> bool {
        matches!(self, Role::Server)
    }
}

/// A frame currently being streamed to the caller in chunks smaller than
/// its full payload, via `read_chunk`. Holds the header plus a running
/// byte offset so the mask state lines up across calls.
struct PendingFrame {
    header: FrameHeader,
}

/// Low-level C3 frame reader: parses one header at a time off the wire and
/// can deliver the payload either in one shot (`read_frame`) or in
/// caller-sized chunks (`read_chunk`), masking/unmasking as it goes.
pub struct FrameReader<R> {
    reader: R,
    role: Role,
    pending: Option<PendingFrame>,
    bytes_delivered: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, role: Role) -> Self {
        Self {
            reader,
            role,
            pending: None,
            bytes_delivered: 0,
        }
    }

    async fn read_header(&mut self, max_frame_size: usize) -> Result<FrameHeader, Error> {
        let mut first_two = [0u8; 2];
        timeout(HEADER_READ_TIMEOUT, read_exact(&mut self.reader, &mut first_two)).await??;

        let fin = (first_two[0] & 0b1000_0000) != 0;
        let rsv1 = (first_two[0] & 0b0100_0000) != 0;
        let rsv2 = (first_two[0] & 0b0010_0000) != 0;
        let rsv3 = (first_two[0] & 0b0001_0000) != 0;
        let opcode = OpCode::from(first_two[0] & 0b0000_1111)?;

        if rsv2 || rsv3 {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::ReservedBits));
        }

        if rsv1 && opcode.is_control() {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::ReservedBits));
        }

        if !fin && opcode.is_control() {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::ControlFramesFragmented));
        }

        let masked = (first_two[1] & 0b1000_0000) != 0;
        if masked != self.role.expects_masked_frames() {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::MaskMismatch));
        }

        let mut payload_len = (first_two[1] & 0b0111_1111) as u64;
        if payload_len > 125 && opcode.is_control() {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::ControlFramePayloadSize));
        }

        if payload_len == 126 {
            payload_len = timeout(HEADER_READ_TIMEOUT, read_u16_be(&mut self.reader)).await?? as u64;
        } else if payload_len == 127 {
            payload_len = timeout(HEADER_READ_TIMEOUT, read_u64_be(&mut self.reader)).await??;
        }

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::PayloadTooLarge));
        }
        if (payload_len as usize) > max_frame_size {
            return Err(Error::ProtocolViolation(ProtocolViolationKind::MaxFrameSize));
        }

        let mask_key = if masked {
            let mut mask_key = [0u8; 4];
            timeout(HEADER_READ_TIMEOUT, read_exact(&mut self.reader, &mut mask_key)).await??;
            mask_key
        } else {
            [0u8; 4]
        };

        Ok(FrameHeader {
            fin,
            opcode,
            rsv1,
            masked,
            mask_key,
            payload_len,
        })
    }

    /// Reads up to `buf.len()` bytes of the current (or next) frame's
    /// payload into `buf`, returning the `ReadCursor` describing progress
    /// and the number of bytes written. Call again with `cursor.end_of_frame()
    /// == false` to continue the same frame.
    pub async fn read_chunk(&mut self, buf: &mut [u8], max_frame_size: usize) -> Result<(ReadCursor, usize), Error> {
        let header = match self.pending.take() {
            Some(pending) => pending.header,
            None => {
                self.bytes_delivered = 0;
                self.read_header(max_frame_size).await?
            }
        };

        let remaining = header.payload_len - self.bytes_delivered;
        let to_read = std::cmp::min(remaining, buf.len() as u64) as usize;
        timeout(
            HEADER_READ_TIMEOUT,
            read_exact(&mut self.reader, &mut buf[..to_read]),
        )
        .await??;

        if header.masked {
            apply_mask(header.mask_key, self.bytes_delivered, &mut buf[..to_read]);
        }

        self.bytes_delivered += to_read as u64;
        let bytes_remaining = header.payload_len - self.bytes_delivered;

        let cursor = ReadCursor {
            opcode: header.opcode,
            fin: header.fin,
            compressed: header.rsv1,
            bytes_delivered: self.bytes_delivered,
            bytes_remaining,
        };

        if bytes_remaining > 0 {
            self.pending = Some(PendingFrame { header });
        }

        Ok((cursor, to_read))
    }

    /// Reads one complete frame (header + full payload) in one call.
    pub async fn read_frame(&mut self, max_frame_size: usize) -> Result<Frame, Error> {
        let header = self.read_header(max_frame_size).await?;
        let mut payload = vec![0u8; header.payload_len as usize];

        timeout(HEADER_READ_TIMEOUT, read_exact(&mut self.reader, &mut payload)).await??;

        if header.masked {
            apply_mask(header.mask_key, 0, &mut payload);
        }

        Ok(Frame::new(header.fin, header.opcode, payload, header.rsv1))
    }
}

#[derive(Clone)]
pub(crate) struct FragmentedMessage {
    fragments: Vec<u8>,
    op_code: OpCode,
    compressed: bool,
}

/// C9/C10: owns the read half, drives the `FrameReader`, reassembles
/// fragmented messages, and dispatches control frames, feeding completed
/// messages into `read_tx` for `WSReader` to observe.
pub struct ReadStream {
    frame_reader: FrameReader<BufReader<ReadHalf<SocketFlowStream>>>,
    fragmented_message: Option<FragmentedMessage>,
    pub read_tx: Sender<Result<Message, Error>>,
    writer: Arc<Mutex<Writer>>,
    state: Arc<Mutex<ConnectionState>>,
    config: WebSocketConfig,
    inflater: Option<Inflater>,
    last_pong: Arc<Mutex<Instant>>,
    id: Uuid,
}

impl ReadStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        read: BufReader<ReadHalf<SocketFlowStream>>,
        role: Role,
        read_tx: Sender<Result<Message, Error>>,
        writer: Arc<Mutex<Writer>>,
        state: Arc<Mutex<ConnectionState>>,
        config: WebSocketConfig,
        inflater: Option<Inflater>,
        last_pong: Arc<Mutex<Instant>>,
        id: Uuid,
    ) -> Self {
        Self {
            frame_reader: FrameReader::new(read, role),
            fragmented_message: None,
            read_tx,
            writer,
            state,
            config,
            inflater,
            last_pong,
            id,
        }
    }

    /// Drives the read loop until the connection's Close handshake
    /// completes or a fatal error occurs.
    pub async fn poll_messages(&mut self) -> Result<(), Error> {
        loop {
            let max_frame_size = self.config.max_frame_size.unwrap_or(usize::MAX);
            match self.frame_reader.read_frame(max_frame_size).await {
                Ok(frame) => {
                    log::trace!(
                        "[{}] read frame opcode={:?} fin={} len={}",
                        self.id,
                        frame.opcode,
                        frame.final_fragment,
                        frame.payload.len()
                    );
                    if self.handle_frame(frame).await? {
                        break;
                    }
                }
                Err(Error::TransportClosed) => {
                    let mut state = self.state.lock().await;
                    let close_in_progress = matches!(*state, ConnectionState::CloseSent | ConnectionState::CloseReceived);
                    if close_in_progress {
                        log::debug!("[{}] transport closed during close handshake, settling as Closed", self.id);
                        *state = ConnectionState::Closed;
                        drop(state);
                        return Ok(());
                    }
                    log::warn!("[{}] transport closed unexpectedly, marking connection Aborted", self.id);
                    *state = ConnectionState::Aborted;
                    drop(state);
                    return Err(Error::TransportClosed);
                }
                Err(error) => {
                    log::warn!("[{}] aborting connection after read error: {error}", self.id);
                    if matches!(error, Error::ProtocolViolation(_)) {
                        self.emit_protocol_error_close(&error).await;
                    }
                    let mut state = self.state.lock().await;
                    *state = ConnectionState::Aborted;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Best-effort Close(1002) emission for a mid-stream protocol
    /// violation (§7 error kind 2). Never surfaces a write failure; the
    /// caller is already on its way to marking the connection Aborted
    /// regardless of whether this send succeeds.
    async fn emit_protocol_error_close(&mut self, error: &Error) {
        let already_closing = self.state.lock().await.is_terminal();
        if already_closing {
            return;
        }
        let reason = if self.config.include_exception_in_close_response {
            error.to_string()
        } else {
            String::new()
        };
        let close_frame = Frame::close(CloseCode::Protocol, &reason);
        if let Err(write_error) = self.writer.lock().await.write_frame(close_frame, false).await {
            log::warn!("[{}] failed to emit Close(1002) after protocol violation: {write_error}", self.id);
        }
    }

    /// Returns `Ok(true)` once the connection's Close handshake has fully
    /// completed and the read loop should stop.
    async fn handle_frame(&mut self, frame: Frame) -> Result<bool, Error> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary if !frame.final_fragment => {
                if self.fragmented_message.is_some() {
                    return Err(Error::ProtocolViolation(ProtocolViolationKind::FragmentedInProgress));
                }
                self.fragmented_message = Some(FragmentedMessage {
                    op_code: frame.opcode,
                    fragments: frame.payload,
                    compressed: frame.compressed,
                });
                Ok(false)
            }
            OpCode::Continue => {
                if frame.compressed {
                    return Err(Error::ProtocolViolation(ProtocolViolationKind::ReservedBits));
                }
                let Some(fragmented) = self.fragmented_message.as_mut() else {
                    return Err(Error::ProtocolViolation(ProtocolViolationKind::InvalidContinuationFrame));
                };
                fragmented.fragments.extend_from_slice(&frame.payload);
                if fragmented.fragments.len() > self.config.max_message_size.unwrap_or(usize::MAX) {
                    return Err(Error::ProtocolViolation(ProtocolViolationKind::MaxMessageSize));
                }

                if frame.final_fragment {
                    let finished = self.fragmented_message.take().unwrap();
                    self.transmit_assembled(finished.op_code, finished.fragments, finished.compressed)
                        .await?;
                }
                Ok(false)
            }
            OpCode::Text | OpCode::Binary => {
                if self.fragmented_message.is_some() {
                    return Err(Error::ProtocolViolation(ProtocolViolationKind::InvalidFrameFragmentation));
                }
                self.transmit_assembled(frame.opcode, frame.payload, frame.compressed)
                    .await?;
                Ok(false)
            }
            OpCode::Close => self.handle_close(frame).await,
            OpCode::Ping => {
                self.send_pong_frame(frame.payload).await?;
                Ok(false)
            }
            OpCode::Pong => {
                *self.last_pong.lock().await = Instant::now();
                Ok(false)
            }
        }
    }

    async fn transmit_assembled(&mut self, op_code: OpCode, mut payload: Vec<u8>, compressed: bool) -> Result<(), Error> {
        if compressed {
            let inflater = self
                .inflater
                .as_mut()
                .ok_or(Error::ProtocolViolation(ProtocolViolationKind::ReservedBits))?;
            payload = inflater.decompress(&payload)?;
        }
        self.transmit_message(Frame::new(true, op_code, payload, false)).await
    }

    async fn handle_close(&mut self, frame: Frame) -> Result<bool, Error> {
        let (status, reason) = frame.close_payload().unwrap_or((CloseCode::Empty, String::new()));
        log::debug!("[{}] received close frame status={status:?} reason={reason:?}", self.id);
        self.read_tx
            .send(Ok(Message::Close(CloseDetails {
                status,
                reason: reason.clone(),
            })))
            .await
            .map_err(|_| Error::CommunicationError)?;

        let mut state = self.state.lock().await;
        let previously_sent = matches!(*state, ConnectionState::CloseSent);
        *state = state.on_close_received();
        let should_reply = !previously_sent;
        let next_state = *state;
        drop(state);
        log::debug!("[{}] connection state -> {next_state:?}", self.id);

        if should_reply {
            let reply_status = if status.is_allowed() { CloseCode::Normal } else { CloseCode::Protocol };
            let close_frame = Frame::close(reply_status, "");
            self.writer.lock().await.write_frame(close_frame, false).await?;
            let mut state = self.state.lock().await;
            *state = state.on_close_sent();
            log::debug!("[{}] connection state -> {:?}", self.id, *state);
        }

        Ok(true)
    }

    async fn send_pong_frame(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        let state = *self.state.lock().await;
        if state.is_terminal() {
            return Ok(());
        }
        let pong_frame = Frame::new(true, OpCode::Pong, payload, false);
        self.writer.lock().await.write_frame(pong_frame, false).await
    }

    pub async fn transmit_message(&mut self, frame: Frame) -> Result<(), Error> {
        self.read_tx
            .send(Message::from_frame(frame))
            .await
            .map_err(|_| Error::CommunicationError)
    }
}
