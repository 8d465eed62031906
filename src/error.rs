use crate::frame::Frame;
use crate::message::Message;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::time::error::Elapsed;
use url::ParseError;

/// The sub-kinds of RFC 6455 protocol violations a peer can commit. Kept as
/// a nested enum, rather than one flat variant per case on `Error`, so
/// callers that only care "was this a protocol violation" can match on the
/// outer `Error::ProtocolViolation(_)` without enumerating every kind.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolationKind {
    #[error("payload length exceeds the 2^31 limit")]
    PayloadTooLarge,

    #[error("reserved bits set without a matching negotiated extension")]
    ReservedBits,

    #[error("frame masking didn't match the peer's expected role")]
    MaskMismatch,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("invalid frame while a fragmented message is in progress")]
    InvalidFrameFragmentation,

    #[error("incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("close frame payload must be empty or at least 2 bytes")]
    InvalidClosePayload,

    #[error("max frame size reached")]
    MaxFrameSize,

    #[error("max message size reached")]
    MaxMessageSize,
}

/// The sub-kinds of handshake failure, surfaced separately from mid-stream
/// protocol violations since they're handled by a different code path: a
/// 400/426 HTTP response, instead of a Close frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailureKind {
    #[error("Sec-WebSocket-Version must be >= 13")]
    UnsupportedVersion,

    #[error("couldn't find Sec-WebSocket-Key header in the request")]
    MissingKey,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("server didn't upgrade the connection")]
    NoUpgrade,

    #[error("server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("requested sub-protocol wasn't echoed back by the peer")]
    SubProtocolMismatch,

    #[error("invalid handshake request method, URI or version")]
    MalformedStatusLine,

    #[error("incomplete HTTP request/response")]
    Incomplete,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{source}")]
    FrameSendError {
        #[from]
        source: SendError<Frame>,
    },

    #[error("{source}")]
    MessageSendError {
        #[from]
        source: SendError<Result<Message, Error>>,
    },

    #[error("channel communication error")]
    CommunicationError,

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("IO error: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("transport closed before the expected data arrived")]
    TransportClosed,

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{0}")]
    ProtocolViolation(ProtocolViolationKind),

    #[error("caller buffer is smaller than the control frame payload")]
    BufferTooSmall,

    #[error("invalid operation for the connection's current state")]
    InvalidState,

    #[error("handshake failed: {0}")]
    HandshakeFailed(HandshakeFailureKind),

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("invalid scheme in WebSocket URL, expected ws:// or wss://")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("URL has no port")]
    URLNoPort,

    #[error("use_tls = `{0}` argument does not match the passed URL scheme: `{1}`")]
    SchemeAgainstTlsConfig(bool, String),

    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("{source}")]
    TlsError {
        #[from]
        source: rustls::Error,
    },

    #[error("max_window_bits should be a value between 8 and 15")]
    InvalidMaxWindowBits,
}

impl Error {
    /// Whether this error, surfaced mid-connection, should drive the
    /// connection straight to `Aborted` rather than an orderly `Closed`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::InvalidState | Error::BufferTooSmall)
    }
}
