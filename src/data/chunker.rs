// ============================================================
// Layer 4 — Byte Chunker
// ============================================================
// Cuts a byte string into fixed-length token sequences.
//
// Two encodings:
//   bytes — one token per byte, ids 0..=255
//   bits  — eight tokens per byte, most significant bit first,
//           ids 0 or 1
//
// Chunks never overlap and the ragged tail of every file is
// dropped: the model needs every sequence to be exactly
// chunk_size tokens long.
//
// Example with chunk_size=4 (bytes):
//   Bytes:   [10 11 12 13 14 15 16 17 18]
//   Chunk 1: [10 11 12 13]
//   Chunk 2: [14 15 16 17]
//   (18 is dropped)

pub struct ByteChunker {
    /// Tokens per sequence
    chunk_size: usize,
    use_bits:   bool,
}

impl ByteChunker {
    /// # Panics
    /// Panics if chunk_size is zero, or not a multiple of 8 in
    /// bit mode. TrainConfig::validate rejects both earlier.
    pub fn new(chunk_size: usize, use_bits: bool) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        assert!(
            !use_bits || chunk_size % 8 == 0,
            "chunk_size ({chunk_size}) must be a multiple of 8 in bit mode"
        );
        Self { chunk_size, use_bits }
    }

    /// Bytes consumed per sequence.
    fn bytes_per_chunk(&self) -> usize {
        if self.use_bits { self.chunk_size / 8 } else { self.chunk_size }
    }

    pub fn chunk(&self, bytes: &[u8]) -> Vec<Vec<u32>> {
        bytes
            .chunks_exact(self.bytes_per_chunk())
            .map(|window| {
                if self.use_bits {
                    window
                        .iter()
                        .flat_map(|&b| (0..8).rev().map(move |i| u32::from((b >> i) & 1)))
                        .collect()
                } else {
                    window.iter().map(|&b| u32::from(b)).collect()
                }
            })
            .collect()
    }

    /// How many sequences a byte string of `len` bytes yields
    pub fn num_chunks(&self, len: usize) -> usize {
        len / self.bytes_per_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_chunks_drop_tail() {
        let c      = ByteChunker::new(4, false);
        let chunks = c.chunk(&[10, 11, 12, 13, 14, 15, 16, 17, 18]);
        assert_eq!(chunks, vec![vec![10, 11, 12, 13], vec![14, 15, 16, 17]]);
        assert_eq!(c.num_chunks(9), 2);
    }

    #[test]
    fn test_bit_chunks_are_msb_first() {
        let c      = ByteChunker::new(8, true);
        let chunks = c.chunk(&[0b1000_0001, 0b0000_0010]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], vec![1, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(chunks[1], vec![0, 0, 0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_short_input_gives_no_chunks() {
        let c = ByteChunker::new(16, false);
        assert!(c.chunk(b"short").is_empty());
    }

    #[test]
    #[should_panic]
    fn test_bit_mode_needs_byte_aligned_chunks() {
        let _ = ByteChunker::new(12, true);
    }
}
