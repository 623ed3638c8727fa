// ============================================================
// Layer 3 — TokenBatch Domain Type
// ============================================================
// A batch is a row-major [batch_size, seq_len] grid of token
// ids. Byte tokens are 0..=255; bit tokens are 0 or 1.
//
// Batches are produced by the data layer and never mutated
// afterwards. The ml layer turns them into device tensors
// through TokenBatcher.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBatch {
    tokens:     Vec<u32>,
    batch_size: usize,
    seq_len:    usize,
}

impl TokenBatch {
    /// Stack equally long rows into one batch.
    ///
    /// # Panics
    /// Panics if `rows` is empty or the rows differ in length.
    /// Datasets only ever hand over full, pre-chunked rows.
    pub fn from_rows(rows: &[Vec<u32>]) -> Self {
        assert!(!rows.is_empty(), "a batch needs at least one row");
        let seq_len = rows[0].len();
        assert!(
            rows.iter().all(|r| r.len() == seq_len),
            "all rows of a batch must have length {seq_len}"
        );
        let tokens = rows.iter().flatten().copied().collect();
        Self { tokens, batch_size: rows.len(), seq_len }
    }

    pub fn batch_size(&self) -> usize { self.batch_size }

    pub fn seq_len(&self) -> usize { self.seq_len }

    pub fn shape(&self) -> [usize; 2] { [self.batch_size, self.seq_len] }

    /// Flattened row-major tokens.
    pub fn tokens(&self) -> &[u32] { &self.tokens }

    pub fn row(&self, index: usize) -> &[u32] {
        let start = index * self.seq_len;
        &self.tokens[start..start + self.seq_len]
    }
}

/// Render a token row as the comma separated form used in diagnostics.
pub fn format_tokens(tokens: &[u32]) -> String {
    tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_is_row_major() {
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(batch.shape(), [2, 3]);
        assert_eq!(batch.tokens(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(batch.row(1), &[4, 5, 6]);
    }

    #[test]
    #[should_panic]
    fn test_ragged_rows_are_rejected() {
        let _ = TokenBatch::from_rows(&[vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(&[0, 17, 255]), "0,17,255");
    }
}
