use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncWriteExt, WriteHalf};
use uuid::Uuid;

use crate::error::Error;
use crate::frame::Frame;
use crate::mask::apply_mask;
use crate::stream::SocketFlowStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    Client,
    Server,
}

/// C4: the single owner of the transport's write half. Wrapped by callers
/// in `Arc<Mutex<Writer>>` so at most one frame is ever being written at a
/// time (§5).
pub struct Writer {
    write_half: WriteHalf<SocketFlowStream>,
    kind: WriterKind,
    id: Uuid,
}

impl Writer {
    pub fn new(write_half: WriteHalf<SocketFlowStream>, kind: WriterKind, id: Uuid) -> Self {
        Self { write_half, kind, id }
    }

    /// Writes one frame. `set_rsv1` marks the frame as carrying a
    /// compressed payload (only ever true for the first frame of a
    /// compressed message, per §4.4).
    pub async fn write_frame(&mut self, frame: Frame, set_rsv1: bool) -> Result<(), Error> {
        let mut first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
        if set_rsv1 {
            first_byte |= 0b0100_0000;
        }

        let payload_len = frame.payload.len();
        let masked = self.kind == WriterKind::Client;

        log::trace!(
            "[{}] writing frame opcode={:?} fin={} len={} compressed={}",
            self.id,
            frame.opcode,
            frame.final_fragment,
            payload_len,
            set_rsv1
        );

        self.write_half.write_all(&[first_byte]).await?;
        self.write_length(payload_len, masked).await?;

        if masked {
            let mask = random_mask();
            self.write_half.write_all(&mask).await?;
            let mut masked_payload = frame.payload;
            apply_mask(mask, 0, &mut masked_payload);
            self.write_half.write_all(&masked_payload).await?;
        } else {
            self.write_half.write_all(&frame.payload).await?;
        }

        Ok(())
    }

    async fn write_length(&mut self, payload_len: usize, masked: bool) -> Result<(), Error> {
        let mask_bit = if masked { 0b1000_0000 } else { 0 };
        if payload_len <= 125 {
            self.write_half.write_all(&[mask_bit | payload_len as u8]).await?;
        } else if payload_len <= 0xFFFF {
            self.write_half
                .write_all(&[mask_bit | 126, (payload_len >> 8) as u8, payload_len as u8])
                .await?;
        } else {
            let bytes = (payload_len as u64).to_be_bytes();
            self.write_half.write_all(&[mask_bit | 127]).await?;
            self.write_half.write_all(&bytes).await?;
        }
        Ok(())
    }
}

fn random_mask() -> [u8; 4] {
    let mut rng = StdRng::from_rng(rand::thread_rng());
    [rng.random(), rng.random(), rng.random(), rng.random()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OpCode;
    use crate::read::{FrameReader, Role};
    use tokio::io::{split, BufReader};

    #[tokio::test]
    async fn server_writes_unmasked_frames() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (_read, write_half) = split(server_side);
        let mut writer = Writer::new(write_half, WriterKind::Server, crate::event::generate_new_uuid());

        writer
            .write_frame(Frame::new(true, OpCode::Text, b"hi".to_vec(), false), false)
            .await
            .unwrap();

        let (read_half, _write_half) = split(client_side);
        let mut reader = FrameReader::new(BufReader::new(read_half), Role::Client);
        let frame = reader.read_frame(1 << 20).await.unwrap();
        assert_eq!(frame.payload, b"hi");
    }

    #[tokio::test]
    async fn client_writes_masked_frames() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (_read, write_half) = split(client_side);
        let mut writer = Writer::new(write_half, WriterKind::Client, crate::event::generate_new_uuid());

        writer
            .write_frame(Frame::new(true, OpCode::Binary, b"secret".to_vec(), false), false)
            .await
            .unwrap();

        let (read_half, _write_half) = split(server_side);
        let mut reader = FrameReader::new(BufReader::new(read_half), Role::Server);
        let frame = reader.read_frame(1 << 20).await.unwrap();
        assert_eq!(frame.payload, b"secret");
    }

    #[tokio::test]
    async fn rsv1_bit_is_set_when_requested() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (_read, write_half) = split(server_side);
        let mut writer = Writer::new(write_half, WriterKind::Server, crate::event::generate_new_uuid());

        writer
            .write_frame(Frame::new(true, OpCode::Text, b"zz".to_vec(), true), true)
            .await
            .unwrap();

        let (read_half, _write_half) = split(client_side);
        let mut reader = FrameReader::new(BufReader::new(read_half), Role::Client);
        let frame = reader.read_frame(1 << 20).await.unwrap();
        assert!(frame.compressed);
    }
}
