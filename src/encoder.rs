//! `permessage-deflate` compression (RFC 7692 §7.2.1). Named `Deflater` to
//! pair with `decoder::Inflater`.

use bytes::BytesMut;
use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::Error;

fn calculate_buffer_size(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096
    } else if payload_size <= 65536 {
        16384
    } else {
        65536
    }
}

pub(crate) struct Deflater {
    compressor: Compress,
    reset_context: bool,
}

impl Deflater {
    pub fn new(reset_context: bool, window_bits: Option<u8>) -> Self {
        let compressor = Compress::new_with_window_bits(
            Compression::default(),
            false,
            window_bits.unwrap_or(15),
        );
        Self {
            compressor,
            reset_context,
        }
    }

    /// Compresses one message's worth of payload and strips the trailing
    /// `00 00 FF FF` the `Sync`-flushed DEFLATE stream always produces,
    /// per RFC 7692 §7.2.1 item 1.
    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if self.reset_context {
            self.compressor.reset();
        }

        let buffer_size = calculate_buffer_size(payload.len());
        let mut compressed = BytesMut::with_capacity(payload.len().max(buffer_size));
        let mut chunk = vec![0u8; buffer_size];

        let before_in = self.compressor.total_in();
        let before_out = self.compressor.total_out();

        loop {
            let offset = (self.compressor.total_in() - before_in) as usize;
            let input = &payload[offset..];
            let status = self
                .compressor
                .compress(input, &mut chunk, FlushCompress::Sync)?;

            let produced = (self.compressor.total_out() - before_out) as usize - compressed.len();
            compressed.extend_from_slice(&chunk[..produced]);

            match status {
                Status::StreamEnd => break,
                Status::Ok if self.compressor.total_in() - before_in >= payload.len() as u64 => break,
                _ => {}
            }
        }

        let trimmed = compressed.len().saturating_sub(4);
        compressed.truncate(trimmed);
        Ok(compressed.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_produces_a_shorter_stream_for_repetitive_data() {
        let mut deflater = Deflater::new(false, None);
        let payload = vec![b'A'; 4096];
        let compressed = deflater.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
    }

    #[test]
    fn compressed_output_never_ends_in_the_deflate_trailer() {
        let mut deflater = Deflater::new(false, None);
        let compressed = deflater.compress(b"hello world").unwrap();
        assert_ne!(&compressed[compressed.len() - 4..], [0, 0, 255, 255]);
    }
}
