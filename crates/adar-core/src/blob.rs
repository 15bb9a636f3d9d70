//! Stored representation of file contents.

use serde::{Deserialize, Serialize};

use crate::coding::{Decoder, Encoder};
use crate::error::{CoreError, Result};

/// A file's contents as a coded symbol stream.
///
/// `symbols[i]` is stream position `i` for `(length, seed)`. The first
/// `length` entries are the file bytes; the rest is redundancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolBlob {
    pub length: u64,
    pub seed: u64,
    pub symbols: Vec<u8>,
}

impl SymbolBlob {
    /// Number of symbols stored for `length` bytes at a redundancy factor.
    pub fn stored_symbol_count(length: usize, redundancy: f64) -> usize {
        let factor = 1.0 + redundancy.max(0.0);
        (length as f64 * factor).ceil() as usize
    }

    /// Encode `data` under `seed`, keeping `redundancy * length` repair symbols.
    pub fn encode(data: &[u8], seed: u64, redundancy: f64) -> Self {
        let count = Self::stored_symbol_count(data.len(), redundancy);
        let mut encoder = Encoder::new(data.to_vec(), seed);
        let symbols = std::iter::from_fn(|| encoder.next_value())
            .take(count)
            .collect();
        Self {
            length: data.len() as u64,
            seed,
            symbols,
        }
    }

    /// An empty file.
    pub fn empty(seed: u64) -> Self {
        Self {
            length: 0,
            seed,
            symbols: Vec::new(),
        }
    }

    /// Recover the file bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let length = self.length as usize;
        if self.symbols.len() >= length {
            return Ok(self.symbols[..length].to_vec());
        }
        let mut decoder = Decoder::with_seed(length, self.seed);
        for (index, value) in self.symbols.iter().enumerate() {
            decoder.consume_indexed(index as u64, *value)?;
        }
        decoder.decoded().ok_or(CoreError::DecodeIncomplete {
            rank: decoder.rank(),
            needed: length,
        })
    }

    /// Symbols `[skip, skip + count)`, clamped to what is stored.
    pub fn slice(&self, skip: u64, count: u64) -> &[u8] {
        let len = self.symbols.len();
        let start = (skip.min(len as u64)) as usize;
        let end = (skip.saturating_add(count).min(len as u64)) as usize;
        &self.symbols[start..end]
    }
}
