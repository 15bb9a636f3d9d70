//! Content helpers shared by the backends.

use adar_core::{random_seed, SymbolBlob, UNSEEDED};

use crate::error::{Result, StoreError};

/// Largest file a write may produce.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

/// Apply a write to stored content and re-encode it.
pub(crate) fn spliced(
    existing: &SymbolBlob,
    offset: u64,
    data: &[u8],
    redundancy: f64,
) -> Result<SymbolBlob> {
    let end = offset
        .checked_add(data.len() as u64)
        .filter(|end| *end <= MAX_FILE_SIZE)
        .ok_or(StoreError::TooLarge {
            limit: MAX_FILE_SIZE,
        })?;
    let mut bytes = existing.decode()?;
    if (bytes.len() as u64) < end {
        bytes.resize(end as usize, 0);
    }
    bytes[offset as usize..end as usize].copy_from_slice(data);
    Ok(SymbolBlob::encode(&bytes, seed_for(existing.seed), redundancy))
}

/// Encode fresh content.
pub(crate) fn encoded(data: &[u8], seed: Option<u64>, redundancy: f64) -> Result<SymbolBlob> {
    if data.len() as u64 > MAX_FILE_SIZE {
        return Err(StoreError::TooLarge {
            limit: MAX_FILE_SIZE,
        });
    }
    Ok(SymbolBlob::encode(
        data,
        seed_for(seed.unwrap_or(UNSEEDED)),
        redundancy,
    ))
}

/// A byte range of stored content.
pub(crate) fn range(blob: &SymbolBlob, offset: u64, length: u64) -> Result<Vec<u8>> {
    let bytes = blob.decode()?;
    let start = offset.min(bytes.len() as u64) as usize;
    let end = offset.saturating_add(length).min(bytes.len() as u64) as usize;
    Ok(bytes[start..end].to_vec())
}

fn seed_for(seed: u64) -> u64 {
    if seed == UNSEEDED {
        random_seed()
    } else {
        seed
    }
}
