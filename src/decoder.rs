//! `permessage-deflate` decompression (RFC 7692 §7.2.2). Named `Inflater` to
//! pair with `encoder::Deflater`.

use bytes::BytesMut;
use flate2::{Decompress, FlushDecompress, Status};

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

/// The 4-byte tail every compressor produces at a `Sync` flush boundary,
/// stripped on the wire and re-appended here before decompressing.
const DEFLATE_TRAILER: [u8; 4] = [0, 0, 255, 255];

pub(crate) struct Inflater {
    decompressor: Decompress,
    /// If true, the compression context is reset before every message,
    /// matching the peer's `no_context_takeover` request.
    reset_context: bool,
}

impl Inflater {
    pub fn new(reset_context: bool, window_bits: Option<u8>) -> Self {
        let decompressor = match window_bits {
            Some(bits) => Decompress::new_with_window_bits(false, bits),
            None => Decompress::new(false),
        };
        Self {
            decompressor,
            reset_context,
        }
    }

    /// Decompresses one message's worth of payload, after the wire-format
    /// trailer has already been stripped by the caller (it's re-added here).
    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let mut input = BytesMut::with_capacity(payload.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let buffer_size = calculate_buffer_size(input.len());
        let mut decompressed = BytesMut::with_capacity(buffer_size);
        let mut chunk = Vec::with_capacity(buffer_size);

        if self.reset_context {
            self.decompressor.reset(false);
        }

        let before_in = self.decompressor.total_in();

        // total_in() keeps advancing across calls when the context isn't
        // reset, since the peer is relying on shared state to have sent a
        // smaller compressed payload; slicing from that running offset
        // keeps this call in sync with it.
        while self.decompressor.total_in() - before_in < input.len() as u64 {
            let offset = (self.decompressor.total_in() - before_in) as usize;
            let remaining = &input[offset..];
            match self
                .decompressor
                .decompress_vec(remaining, &mut chunk, FlushDecompress::Sync)?
            {
                Status::Ok => {
                    decompressed.extend_from_slice(&chunk);
                    chunk.clear();
                }
                Status::StreamEnd => break,
                Status::BufError => break,
            }
        }

        Ok(decompressed.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Deflater;

    #[test]
    fn inflate_reverses_deflate() {
        let mut deflater = Deflater::new(false, None);
        let mut inflater = Inflater::new(false, None);
        let original = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = deflater.compress(&original).unwrap();
        let decompressed = inflater.decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn context_reset_between_messages_still_round_trips() {
        let mut deflater = Deflater::new(true, None);
        let mut inflater = Inflater::new(true, None);
        for payload in [b"AAAA".repeat(100), b"BBBB".repeat(200)] {
            let compressed = deflater.compress(&payload).unwrap();
            let decompressed = inflater.decompress(&compressed).unwrap();
            assert_eq!(decompressed, payload);
        }
    }
}
