use crate::error::{Error, ProtocolViolationKind};
use crate::frame::{CloseCode, Frame, OpCode};

/// The status and reason carried by a received Close frame, surfaced to
/// the application as `Message::Close` rather than dropped once the read
/// loop ends (§6.4, §7 propagation policy: "a received Close always
/// surfaces as a receive result carrying status and reason").
#[derive(Debug, Clone, PartialEq)]
pub struct CloseDetails {
    pub status: CloseCode,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    /// A Close frame the peer sent, delivered as the last item the
    /// application sees on this connection's receive stream before it
    /// ends. Never produced by `send`/`send_as_text`/`send_as_binary`;
    /// closing is always driven through `WSWriter::close`/`close_output`.
    Close(CloseDetails),
}

impl Message {
    /// Converts a reassembled data-frame payload into a `Message`. Only
    /// ever called with `Text`/`Binary` opcodes; control frames never reach
    /// the application as a `Message`.
    ///
    /// UTF-8 validation of Text payloads is left to the caller: a Text frame
    /// whose payload isn't valid UTF-8 is delivered as `Binary` rather than
    /// rejected, so the original bytes are always preserved intact.
    pub fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => match String::from_utf8(frame.payload) {
                Ok(text) => Ok(Message::Text(text)),
                Err(err) => Ok(Message::Binary(err.into_bytes())),
            },
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            other => Err(Error::ProtocolViolation(ProtocolViolationKind::InvalidOpcode(
                other.as_u8(),
            ))),
        }
    }

    /// Panics if called on `Message::Close`: the generic send path
    /// (`WSWriter::send*`) never constructs a `Close` message, since
    /// closing always goes through `WSWriter::close`/`close_output`
    /// instead, which build their Close frame directly.
    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.clone(),
            Message::Close(_) => unreachable!("Message::Close is never sent through the generic write path"),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) => Ok(String::from_utf8(data.clone())?),
            Message::Close(details) => Ok(details.reason.clone()),
        }
    }

    /// Panics if called on `Message::Close`; see `as_binary`.
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Close(_) => unreachable!("Message::Close is never sent through the generic write path"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trips_to_message() {
        let frame = Frame::new(true, OpCode::Text, b"hello".to_vec(), false);
        let message = Message::from_frame(frame).unwrap();
        assert_eq!(message, Message::Text("hello".to_string()));
    }

    #[test]
    fn invalid_utf8_in_text_frame_is_preserved_as_binary() {
        let frame = Frame::new(true, OpCode::Text, vec![0xFF, 0xFE], false);
        let message = Message::from_frame(frame).unwrap();
        assert_eq!(message, Message::Binary(vec![0xFF, 0xFE]));
    }

    #[test]
    fn control_opcode_is_not_a_valid_message() {
        let frame = Frame::new(true, OpCode::Ping, Vec::new(), false);
        assert!(Message::from_frame(frame).is_err());
    }

    #[test]
    fn as_binary_and_as_text_convert_both_ways() {
        let message = Message::Binary(b"data".to_vec());
        assert_eq!(message.as_text().unwrap(), "data");
        let message = Message::Text("data".to_string());
        assert_eq!(message.as_binary(), b"data".to_vec());
    }

    #[test]
    fn close_message_exposes_its_reason_as_text() {
        let message = Message::Close(CloseDetails {
            status: crate::frame::CloseCode::Normal,
            reason: "bye".to_string(),
        });
        assert_eq!(message.as_text().unwrap(), "bye");
    }
}
