//! Data-channel frame codec.
//!
//! Every frame is one datagram:
//!
//! ```text
//! READ        cmd | path | 0x1F | skip u64 | count u64 | 0x0A
//! DATA/WRITE  cmd | path | 0x1F | seed u64 | offset u64 | length u64
//!             | first_index u64 | nonce[12] | coeff_len u16 | coeffs
//!             | sym_len u16 | symbols | tag[16] | 0x0A
//! ```
//!
//! Integers are big-endian. `symbols` is ciphertext; the cipher binds
//! everything before the nonce, plus `coeffs`, as associated data, so a
//! rewritten header fails authentication. `coeffs` is empty for seeded
//! frames and holds one packed coefficient vector per symbol when `seed` is
//! [`UNSEEDED`](adar_core::UNSEEDED).

use bytes::{Buf, BufMut, BytesMut};

use adar_core::RemotePath;
use adar_pairing::{FrameNonce, Sealed, NONCE_LEN, TAG_LEN};

use crate::error::{Result, SyncError};
use crate::messages::{CommandCode, SENTINEL, SEPARATOR};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Fixed bytes of a payload frame besides path, coefficients and symbols.
const PAYLOAD_OVERHEAD: usize = 1 + 1 + 8 * 4 + NONCE_LEN + 2 + 2 + TAG_LEN + 1;

/// DATA answers a READ; WRITE pushes local changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Data,
    Write,
}

impl PayloadKind {
    fn code(self) -> CommandCode {
        match self {
            PayloadKind::Data => CommandCode::Data,
            PayloadKind::Write => CommandCode::Write,
        }
    }
}

/// Encrypted coded symbols for one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub kind: PayloadKind,
    pub path: RemotePath,
    pub seed: u64,
    /// File offset the decoded buffer belongs at.
    pub offset: u64,
    /// Source symbol count of the buffer.
    pub length: u64,
    /// Stream position of the first symbol.
    pub first_index: u64,
    /// Packed explicit coefficients, empty when seeded.
    pub coefficients: Vec<u8>,
    pub sealed: Sealed,
}

impl Payload {
    /// The authenticated header of this frame.
    pub fn associated_data(&self) -> Vec<u8> {
        associated_data(
            self.kind,
            &self.path,
            self.seed,
            self.offset,
            self.length,
            self.first_index,
            &self.coefficients,
        )
    }
}

/// Header bytes a payload's cipher binds: command, path, the four
/// integers and the explicit coefficients.
pub fn associated_data(
    kind: PayloadKind,
    path: &RemotePath,
    seed: u64,
    offset: u64,
    length: u64,
    first_index: u64,
    coefficients: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(1 + path.as_str().len() + 1 + 32 + 4 + coefficients.len());
    buf.put_u8(kind.code().to_u8());
    buf.put_slice(path.as_str().as_bytes());
    buf.put_u8(SEPARATOR);
    buf.put_u64(seed);
    buf.put_u64(offset);
    buf.put_u64(length);
    buf.put_u64(first_index);
    buf.put_u32(coefficients.len() as u32);
    buf.put_slice(coefficients);
    buf.to_vec()
}

/// One data-channel datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFrame {
    Read {
        path: RemotePath,
        skip: u64,
        count: u64,
    },
    Payload(Payload),
}

impl DataFrame {
    /// How many symbols fit in one datagram for `path`.
    ///
    /// `coefficient_bytes` is the packed width per symbol, zero when seeded.
    pub fn symbol_capacity(path: &RemotePath, coefficient_bytes: usize) -> usize {
        let room = MAX_DATAGRAM.saturating_sub(PAYLOAD_OVERHEAD + path.as_str().len());
        (room / (1 + coefficient_bytes)).min(u16::MAX as usize)
    }

    pub fn path(&self) -> &RemotePath {
        match self {
            DataFrame::Read { path, .. } => path,
            DataFrame::Payload(p) => &p.path,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        match self {
            DataFrame::Read { path, skip, count } => {
                buf.put_u8(CommandCode::Read.to_u8());
                buf.put_slice(path.as_str().as_bytes());
                buf.put_u8(SEPARATOR);
                buf.put_u64(*skip);
                buf.put_u64(*count);
            }
            DataFrame::Payload(p) => {
                let symbols = &p.sealed.ciphertext;
                if p.coefficients.len() > u16::MAX as usize || symbols.len() > u16::MAX as usize {
                    return Err(SyncError::FrameTooLarge {
                        size: p.coefficients.len().max(symbols.len()),
                        limit: u16::MAX as usize,
                    });
                }
                buf.put_u8(p.kind.code().to_u8());
                buf.put_slice(p.path.as_str().as_bytes());
                buf.put_u8(SEPARATOR);
                buf.put_u64(p.seed);
                buf.put_u64(p.offset);
                buf.put_u64(p.length);
                buf.put_u64(p.first_index);
                buf.put_slice(&p.sealed.nonce.0);
                buf.put_u16(p.coefficients.len() as u16);
                buf.put_slice(&p.coefficients);
                buf.put_u16(symbols.len() as u16);
                buf.put_slice(symbols);
                buf.put_slice(&p.sealed.tag);
            }
        }
        buf.put_u8(SENTINEL);

        if buf.len() > MAX_DATAGRAM {
            return Err(SyncError::FrameTooLarge {
                size: buf.len(),
                limit: MAX_DATAGRAM,
            });
        }
        Ok(buf.to_vec())
    }

    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let mut buf = datagram;
        let code = take(&mut buf, 1)?[0];
        let code = CommandCode::from_u8(code)
            .filter(|c| c.is_data_channel())
            .ok_or_else(|| invalid(format!("not a data-channel command: {}", code)))?;

        let sep = buf
            .iter()
            .position(|b| *b == SEPARATOR)
            .ok_or_else(|| invalid("missing path separator"))?;
        let path = std::str::from_utf8(&buf[..sep]).map_err(|_| invalid("path is not UTF-8"))?;
        let path = RemotePath::new(path)?;
        buf.advance(sep + 1);

        let frame = match code {
            CommandCode::Read => {
                let fields = take(&mut buf, 16)?;
                let (mut skip, mut count) = fields.split_at(8);
                DataFrame::Read {
                    path,
                    skip: skip.get_u64(),
                    count: count.get_u64(),
                }
            }
            _ => {
                let mut header = take(&mut buf, 32)?;
                let seed = header.get_u64();
                let offset = header.get_u64();
                let length = header.get_u64();
                let first_index = header.get_u64();

                let mut nonce = [0u8; NONCE_LEN];
                nonce.copy_from_slice(take(&mut buf, NONCE_LEN)?);
                let coeff_len = take(&mut buf, 2)?.get_u16() as usize;
                let coefficients = take(&mut buf, coeff_len)?.to_vec();
                let sym_len = take(&mut buf, 2)?.get_u16() as usize;
                let ciphertext = take(&mut buf, sym_len)?.to_vec();
                let mut tag = [0u8; TAG_LEN];
                tag.copy_from_slice(take(&mut buf, TAG_LEN)?);

                DataFrame::Payload(Payload {
                    kind: if code == CommandCode::Data {
                        PayloadKind::Data
                    } else {
                        PayloadKind::Write
                    },
                    path,
                    seed,
                    offset,
                    length,
                    first_index,
                    coefficients,
                    sealed: Sealed {
                        nonce: FrameNonce(nonce),
                        ciphertext,
                        tag,
                    },
                })
            }
        };

        if buf != [SENTINEL] {
            return Err(invalid("frame does not end with the sentinel"));
        }
        Ok(frame)
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(invalid("truncated frame"));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn invalid(msg: impl Into<String>) -> SyncError {
    SyncError::InvalidMessage(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(symbols: usize) -> DataFrame {
        DataFrame::Payload(Payload {
            kind: PayloadKind::Write,
            path: RemotePath::new("/docs/a.txt").unwrap(),
            seed: 42,
            offset: 7,
            length: 3,
            first_index: 5,
            coefficients: Vec::new(),
            sealed: Sealed {
                nonce: FrameNonce([1; NONCE_LEN]),
                ciphertext: vec![0xAB; symbols],
                tag: [2; TAG_LEN],
            },
        })
    }

    #[test]
    fn test_read_layout() {
        let frame = DataFrame::Read {
            path: RemotePath::new("/a").unwrap(),
            skip: 1,
            count: 2,
        };
        let wire = frame.encode().unwrap();
        let mut expected = vec![10, b'/', b'a', 0x1F];
        expected.extend_from_slice(&1u64.to_be_bytes());
        expected.extend_from_slice(&2u64.to_be_bytes());
        expected.push(b'\n');
        assert_eq!(wire, expected);
        assert_eq!(DataFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn test_payload_roundtrip_and_trailer() {
        let frame = payload(3);
        let wire = frame.encode().unwrap();
        assert_eq!(wire[0], CommandCode::Write.to_u8());
        assert_eq!(*wire.last().unwrap(), b'\n');
        assert_eq!(&wire[wire.len() - 1 - TAG_LEN..wire.len() - 1], &[2; TAG_LEN]);
        assert_eq!(DataFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn test_truncated_and_unterminated_rejected() {
        let wire = payload(3).encode().unwrap();
        for cut in [1, 5, wire.len() - 1] {
            assert!(DataFrame::decode(&wire[..cut]).is_err(), "cut at {}", cut);
        }
        let mut trailing = wire.clone();
        trailing.push(0);
        assert!(DataFrame::decode(&trailing).is_err());
        assert!(DataFrame::decode(b"\x09/a\x1f\n").is_err());
    }

    #[test]
    fn test_associated_data_covers_every_header_field() {
        let DataFrame::Payload(base) = payload(3) else { unreachable!() };
        let aad = base.associated_data();
        let variants = [
            Payload { kind: PayloadKind::Data, ..base.clone() },
            Payload { path: RemotePath::new("/docs/b.txt").unwrap(), ..base.clone() },
            Payload { seed: 43, ..base.clone() },
            Payload { offset: 6, ..base.clone() },
            Payload { length: 4, ..base.clone() },
            Payload { first_index: 4, ..base.clone() },
            Payload { coefficients: vec![1], ..base.clone() },
        ];
        for variant in &variants {
            assert_ne!(variant.associated_data(), aad, "{:?}", variant);
        }
    }

    #[test]
    fn test_oversized_payload_refused() {
        let path = RemotePath::new("/docs/a.txt").unwrap();
        let fits = DataFrame::symbol_capacity(&path, 0);
        assert!(payload(fits).encode().is_ok());
        assert!(matches!(
            payload(fits + 1).encode(),
            Err(SyncError::FrameTooLarge { .. })
        ));
    }
}
