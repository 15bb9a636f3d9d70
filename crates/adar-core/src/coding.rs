//! Systematic random linear network coding over GF(2).
//!
//! A buffer of `k` bytes is treated as `k` source symbols. A coded symbol is
//! a coefficient bit-vector of length `k` together with the XOR of the source
//! bytes it selects. Addition in GF(2) is XOR and multiplication is AND, so
//! no other arithmetic is involved.
//!
//! ## Coefficient streams
//!
//! Coefficients are never chosen ad hoc. A [`CoefficientStream`] derives them
//! from `(seed, k)`:
//!
//! - position `i < k` is the unit vector `e_i` (the systematic part, equal to
//!   the raw source byte),
//! - position `k + j` is the `j`-th non-zero draw from a BLAKE3 output
//!   stream keyed by the seed.
//!
//! Two peers that agree on a seed can therefore exchange bare symbol values
//! plus a starting index. Seed [`UNSEEDED`] means no seed was agreed and the
//! coefficients travel with the symbols.
//!
//! ## Decoding
//!
//! [`Decoder`] performs incremental Gauss-Jordan elimination. Its rows are
//! kept fully reduced: every pivot column is zero in all other rows. A row
//! whose only remaining bit is its pivot holds a decoded source byte.

use std::fmt;

use crate::error::{CoreError, Result};

/// Seed value meaning "coefficients are transmitted explicitly".
pub const UNSEEDED: u64 = 0;

/// Draw a fresh non-zero seed.
pub fn random_seed() -> u64 {
    loop {
        let seed = rand::random::<u64>();
        if seed != UNSEEDED {
            return seed;
        }
    }
}

/// Domain separation for coefficient generation.
const COEFFICIENT_CONTEXT: &str = "adar coefficients v1";

/// A fixed-length vector over GF(2).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitVector {
    len: usize,
    words: Vec<u64>,
}

impl BitVector {
    /// The all-zero vector.
    pub fn zeros(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(64)],
        }
    }

    /// The unit vector with a single one at `index`.
    pub fn unit(len: usize, index: usize) -> Self {
        let mut v = Self::zeros(len);
        v.set(index, true);
        v
    }

    /// Number of packed bytes needed for `len` bits.
    pub const fn packed_len(len: usize) -> usize {
        len.div_ceil(8)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] >> (index % 64) & 1 == 1
    }

    /// Set or clear a bit. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// In-place addition over GF(2).
    pub fn xor_assign(&mut self, other: &BitVector) {
        debug_assert_eq!(self.len, other.len);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a ^= b;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Index of the lowest set bit.
    pub fn first_one(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * 64 + w.trailing_zeros() as usize)
    }

    /// Indices of all set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(i * 64 + tz)
            })
        })
    }

    /// Pack MSB-first: bit 0 is the high bit of byte 0.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::packed_len(self.len)];
        for i in self.ones() {
            out[i / 8] |= 0x80 >> (i % 8);
        }
        out
    }

    /// Unpack an MSB-first vector of `len` bits. Padding bits are ignored.
    pub fn from_bytes(len: usize, bytes: &[u8]) -> Result<Self> {
        let expected = Self::packed_len(len);
        if bytes.len() != expected {
            return Err(CoreError::PackedLength {
                expected,
                got: bytes.len(),
            });
        }
        Ok(Self::from_packed(len, bytes))
    }

    fn from_packed(len: usize, bytes: &[u8]) -> Self {
        let mut v = Self::zeros(len);
        for (byte_index, byte) in bytes.iter().enumerate() {
            if *byte == 0 {
                continue;
            }
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    v.set(byte_index * 8 + bit, true);
                }
            }
        }
        v
    }
}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: String = (0..self.len)
            .map(|i| if self.get(i) { '1' } else { '0' })
            .collect();
        write!(f, "BitVector({})", bits)
    }
}

/// One coded unit: a coefficient vector and the byte it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedSymbol {
    /// Position in the coefficient stream that produced this symbol.
    pub index: u64,
    pub coefficients: BitVector,
    pub value: u8,
}

/// Deterministic systematic-then-random coefficient sequence.
pub struct CoefficientStream {
    symbols: usize,
    seed: u64,
    position: u64,
    reader: blake3::OutputReader,
}

impl CoefficientStream {
    /// Create the stream for `symbols` source symbols and a seed.
    pub fn new(symbols: usize, seed: u64) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(COEFFICIENT_CONTEXT);
        hasher.update(&seed.to_be_bytes());
        hasher.update(&(symbols as u64).to_be_bytes());
        Self {
            symbols,
            seed,
            position: 0,
            reader: hasher.finalize_xof(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Index of the next coefficient vector to be produced.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move to `target`. Seeking backwards restarts the stream.
    pub fn seek(&mut self, target: u64) {
        if target < self.position {
            *self = Self::new(self.symbols, self.seed);
        }
        let k = self.symbols as u64;
        // Systematic positions consume nothing from the random stream.
        if self.position < k {
            self.position = target.min(k);
        }
        while self.position < target {
            self.draw();
            self.position += 1;
        }
    }

    fn draw(&mut self) -> BitVector {
        let mut bytes = vec![0u8; BitVector::packed_len(self.symbols)];
        loop {
            self.reader.fill(&mut bytes);
            let v = BitVector::from_packed(self.symbols, &bytes);
            if !v.is_zero() {
                return v;
            }
        }
    }
}

impl Iterator for CoefficientStream {
    type Item = BitVector;

    fn next(&mut self) -> Option<BitVector> {
        if self.symbols == 0 {
            return None;
        }
        let index = self.position;
        let v = if index < self.symbols as u64 {
            BitVector::unit(self.symbols, index as usize)
        } else {
            self.draw()
        };
        self.position += 1;
        Some(v)
    }
}

/// Produces the coded symbol stream for one buffer.
///
/// The first `k` symbols are the source bytes verbatim; every later symbol
/// is a random combination usable for repair.
pub struct Encoder {
    source: Vec<u8>,
    coefficients: CoefficientStream,
}

impl Encoder {
    pub fn new(source: impl Into<Vec<u8>>, seed: u64) -> Self {
        let source = source.into();
        let coefficients = CoefficientStream::new(source.len(), seed);
        Self {
            source,
            coefficients,
        }
    }

    /// Number of source symbols.
    pub fn symbols(&self) -> usize {
        self.source.len()
    }

    pub fn seed(&self) -> u64 {
        self.coefficients.seed()
    }

    /// Continue the stream from position `index`.
    pub fn seek(&mut self, index: u64) {
        self.coefficients.seek(index);
    }

    /// Combine the source bytes selected by `coefficients`.
    pub fn combine(&self, coefficients: &BitVector) -> u8 {
        coefficients
            .ones()
            .filter_map(|i| self.source.get(i))
            .fold(0u8, |acc, b| acc ^ b)
    }

    /// Next symbol value only, for seeded transmission.
    pub fn next_value(&mut self) -> Option<u8> {
        let index = self.coefficients.position();
        if index < self.source.len() as u64 {
            self.coefficients.seek(index + 1);
            return Some(self.source[index as usize]);
        }
        self.next().map(|s| s.value)
    }
}

impl Iterator for Encoder {
    type Item = CodedSymbol;

    fn next(&mut self) -> Option<CodedSymbol> {
        let index = self.coefficients.position();
        let coefficients = self.coefficients.next()?;
        let value = self.combine(&coefficients);
        Some(CodedSymbol {
            index,
            coefficients,
            value,
        })
    }
}

/// A decoder row. `None` coefficients stand for the unit vector of the
/// row's pivot, which keeps systematic input cheap.
#[derive(Clone)]
struct Row {
    coefficients: Option<BitVector>,
    value: u8,
}

/// Incremental Gauss-Jordan decoder over GF(2).
pub struct Decoder {
    symbols: usize,
    rows: Vec<Option<Row>>,
    /// Pivot columns whose rows still carry more than one bit.
    dense: Vec<usize>,
    rank: usize,
    stream: Option<CoefficientStream>,
}

impl Decoder {
    /// Decoder for explicitly transmitted coefficients.
    pub fn new(symbols: usize) -> Self {
        Self {
            symbols,
            rows: vec![None; symbols],
            dense: Vec::new(),
            rank: 0,
            stream: None,
        }
    }

    /// Decoder that regenerates coefficients from a shared seed.
    pub fn with_seed(symbols: usize, seed: u64) -> Self {
        let mut decoder = Self::new(symbols);
        if seed != UNSEEDED {
            decoder.stream = Some(CoefficientStream::new(symbols, seed));
        }
        decoder
    }

    pub fn symbols(&self) -> usize {
        self.symbols
    }

    /// Number of linearly independent symbols consumed so far.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn is_fully_decoded(&self) -> bool {
        self.rank == self.symbols
    }

    /// Feed one coded symbol.
    ///
    /// Returns `true` if the symbol raised the rank, `false` if it was
    /// linearly dependent on what the decoder already holds.
    pub fn consume(&mut self, mut coefficients: BitVector, mut value: u8) -> Result<bool> {
        if coefficients.len() != self.symbols {
            return Err(CoreError::CoefficientLength {
                expected: self.symbols,
                got: coefficients.len(),
            });
        }

        let hits: Vec<usize> = coefficients
            .ones()
            .filter(|&c| self.rows[c].is_some())
            .collect();
        for pivot in hits {
            if let Some(row) = &self.rows[pivot] {
                match &row.coefficients {
                    Some(bits) => coefficients.xor_assign(bits),
                    None => coefficients.set(pivot, false),
                }
                value ^= row.value;
            }
        }

        let Some(pivot) = coefficients.first_one() else {
            return Ok(false);
        };

        let row = if coefficients.count_ones() == 1 {
            Row {
                coefficients: None,
                value,
            }
        } else {
            Row {
                coefficients: Some(coefficients),
                value,
            }
        };
        self.eliminate(pivot, &row);
        if row.coefficients.is_some() {
            self.dense.push(pivot);
        }
        self.rows[pivot] = Some(row);
        self.rank += 1;
        Ok(true)
    }

    /// Feed a symbol by its stream position; requires a seed.
    pub fn consume_indexed(&mut self, index: u64, value: u8) -> Result<bool> {
        let k = self.symbols as u64;
        if index < k && self.stream.is_some() {
            let pivot = index as usize;
            if self.rows[pivot].is_none() {
                let row = Row {
                    coefficients: None,
                    value,
                };
                self.eliminate(pivot, &row);
                self.rows[pivot] = Some(row);
                self.rank += 1;
                return Ok(true);
            }
        }
        let stream = self.stream.as_mut().ok_or(CoreError::Unseeded(index))?;
        stream.seek(index);
        match stream.next() {
            Some(coefficients) => self.consume(coefficients, value),
            None => Ok(false),
        }
    }

    /// Clear column `pivot` from every dense row using the new `row`.
    fn eliminate(&mut self, pivot: usize, row: &Row) {
        let mut still_dense = Vec::with_capacity(self.dense.len());
        for &q in &self.dense {
            let Some(existing) = self.rows[q].as_mut() else {
                continue;
            };
            let Some(bits) = existing.coefficients.as_mut() else {
                continue;
            };
            if bits.get(pivot) {
                match &row.coefficients {
                    Some(other) => bits.xor_assign(other),
                    None => bits.set(pivot, false),
                }
                existing.value ^= row.value;
            }
            if bits.count_ones() == 1 {
                existing.coefficients = None;
            } else {
                still_dense.push(q);
            }
        }
        self.dense = still_dense;
    }

    /// True once source symbol `index` has been recovered.
    pub fn is_symbol_decoded(&self, index: usize) -> bool {
        matches!(
            self.rows.get(index),
            Some(Some(Row {
                coefficients: None,
                ..
            }))
        )
    }

    /// The recovered source byte at `index`, if back-substitution reached it.
    pub fn decoded_symbol(&self, index: usize) -> Option<u8> {
        match self.rows.get(index)? {
            Some(Row {
                coefficients: None,
                value,
            }) => Some(*value),
            _ => None,
        }
    }

    /// The whole recovered buffer, once fully decoded.
    pub fn decoded(&self) -> Option<Vec<u8>> {
        if !self.is_fully_decoded() {
            return None;
        }
        (0..self.symbols).map(|i| self.decoded_symbol(i)).collect()
    }
}
