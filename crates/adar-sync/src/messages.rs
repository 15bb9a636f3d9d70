//! Control-channel message types.
//!
//! A request is the ASCII decimal command code, a colon, the arguments
//! joined with the unit separator, and the newline sentinel:
//!
//! ```text
//! 9:/b\n                  LIST /b
//! 7:/b/c\x1f0\n           CREATE /b/c as a file
//! ```
//!
//! Requests are parsed once into [`Request`] at the frame boundary.
//! Responses have no header; their shape follows from the request they
//! answer, so [`Response::decode`] takes the request's [`CommandCode`].
//!
//! A LIST answer is the folder count followed by every folder name and
//! then every file name, all joined with the unit separator:
//!
//! ```text
//! 1\x1fb\x1fa\x1fc\n      folder b, files a and c
//! 0\n                  empty folder
//! ```

use adar_core::{Metadata, RemotePath, Version};
use adar_pairing::X25519PublicKey;
use adar_store::Listing;

use crate::error::{Result, SyncError};

/// Argument delimiter (ASCII unit separator).
pub const SEPARATOR: u8 = 0x1F;

/// End-of-message marker.
pub const SENTINEL: u8 = b'\n';

/// Single-byte answer for a request the remote storage failed.
pub const NAK: u8 = 0x15;

/// Longest control frame accepted without a sentinel.
pub const MAX_FRAME: usize = 64 * 1024;

/// Wire command codes, shared by both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    Pair = 1,
    Connect = 2,
    Key = 3,
    Sync = 4,
    Ready = 5,
    Disconnect = 6,
    Create = 7,
    Rename = 8,
    List = 9,
    Read = 10,
    Data = 11,
    Stats = 12,
    Write = 13,
    Remove = 14,
}

impl CommandCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Pair,
            2 => Self::Connect,
            3 => Self::Key,
            4 => Self::Sync,
            5 => Self::Ready,
            6 => Self::Disconnect,
            7 => Self::Create,
            8 => Self::Rename,
            9 => Self::List,
            10 => Self::Read,
            11 => Self::Data,
            12 => Self::Stats,
            13 => Self::Write,
            14 => Self::Remove,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// READ, DATA and WRITE travel only on the data channel.
    pub fn is_data_channel(self) -> bool {
        matches!(self, Self::Read | Self::Data | Self::Write)
    }

    /// PAIR and CONNECT may come from callers not yet identified.
    pub fn allows_unidentified(self) -> bool {
        matches!(self, Self::Pair | Self::Connect)
    }
}

/// A control-channel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Pair { versions: Vec<Version> },
    Connect { versions: Vec<Version> },
    Key { public: X25519PublicKey },
    Sync,
    Ready,
    Disconnect,
    Create { path: RemotePath, is_dir: bool },
    Rename { from: RemotePath, to: RemotePath },
    List { path: RemotePath },
    Stats { path: RemotePath },
    Remove { path: RemotePath },
}

impl Request {
    pub fn code(&self) -> CommandCode {
        match self {
            Request::Pair { .. } => CommandCode::Pair,
            Request::Connect { .. } => CommandCode::Connect,
            Request::Key { .. } => CommandCode::Key,
            Request::Sync => CommandCode::Sync,
            Request::Ready => CommandCode::Ready,
            Request::Disconnect => CommandCode::Disconnect,
            Request::Create { .. } => CommandCode::Create,
            Request::Rename { .. } => CommandCode::Rename,
            Request::List { .. } => CommandCode::List,
            Request::Stats { .. } => CommandCode::Stats,
            Request::Remove { .. } => CommandCode::Remove,
        }
    }

    /// Encode including the sentinel.
    pub fn encode(&self) -> Vec<u8> {
        let args: Vec<String> = match self {
            Request::Pair { versions } | Request::Connect { versions } => {
                versions.iter().map(|v| v.to_string()).collect()
            }
            Request::Key { public } => vec![public.to_hex()],
            Request::Sync | Request::Ready | Request::Disconnect => Vec::new(),
            Request::Create { path, is_dir } => {
                vec![path.to_string(), flag(*is_dir).to_string()]
            }
            Request::Rename { from, to } => vec![from.to_string(), to.to_string()],
            Request::List { path } | Request::Stats { path } | Request::Remove { path } => {
                vec![path.to_string()]
            }
        };

        let mut out = format!("{}:", self.code().to_u8()).into_bytes();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.extend_from_slice(arg.as_bytes());
        }
        out.push(SENTINEL);
        out
    }

    /// Parse a frame with its sentinel already stripped.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| SyncError::InvalidMessage("request is not UTF-8".into()))?;
        let (code, rest) = text
            .split_once(':')
            .ok_or_else(|| SyncError::InvalidMessage("missing command code".into()))?;
        let code = code
            .parse::<u8>()
            .ok()
            .and_then(CommandCode::from_u8)
            .ok_or_else(|| SyncError::InvalidMessage(format!("unknown command {:?}", code)))?;
        let args: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(SEPARATOR as char).collect()
        };

        let request = match code {
            CommandCode::Pair => Request::Pair {
                versions: parse_versions(&args)?,
            },
            CommandCode::Connect => Request::Connect {
                versions: parse_versions(&args)?,
            },
            CommandCode::Key => {
                let [key] = exact::<1>(code, &args)?;
                Request::Key {
                    public: X25519PublicKey::from_hex(key)?,
                }
            }
            CommandCode::Sync => {
                exact::<0>(code, &args)?;
                Request::Sync
            }
            CommandCode::Ready => {
                exact::<0>(code, &args)?;
                Request::Ready
            }
            CommandCode::Disconnect => {
                exact::<0>(code, &args)?;
                Request::Disconnect
            }
            CommandCode::Create => {
                let [path, dir] = exact::<2>(code, &args)?;
                Request::Create {
                    path: RemotePath::new(path)?,
                    is_dir: parse_flag(dir)?,
                }
            }
            CommandCode::Rename => {
                let [from, to] = exact::<2>(code, &args)?;
                Request::Rename {
                    from: RemotePath::new(from)?,
                    to: RemotePath::new(to)?,
                }
            }
            CommandCode::List => Request::List {
                path: single_path(code, &args)?,
            },
            CommandCode::Stats => Request::Stats {
                path: single_path(code, &args)?,
            },
            CommandCode::Remove => Request::Remove {
                path: single_path(code, &args)?,
            },
            CommandCode::Read | CommandCode::Data | CommandCode::Write => {
                return Err(SyncError::InvalidMessage(format!(
                    "{:?} is a data-channel command",
                    code
                )))
            }
        };
        Ok(request)
    }
}

/// A control-channel response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// PAIR, SYNC, READY: accepted / ready.
    Flag(bool),
    /// CONNECT: the negotiated version, `None` for a rejection.
    Version(Option<Version>),
    /// KEY: the responder's public key.
    Key(X25519PublicKey),
    /// LIST.
    Listing(Listing),
    /// STATS.
    Stats(Metadata),
    /// CREATE, RENAME, REMOVE.
    Ack,
    /// Storage failure on the responder.
    Nak,
    /// Bare sentinel.
    ProtocolError,
}

impl Response {
    /// Encode including the sentinel.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = match self {
            Response::Flag(ok) => flag(*ok).as_bytes().to_vec(),
            Response::Version(v) => v.unwrap_or(0).to_string().into_bytes(),
            Response::Key(public) => public.to_hex().into_bytes(),
            Response::Listing(listing) => {
                let mut out = listing.folders.len().to_string().into_bytes();
                for name in listing.folders.iter().chain(&listing.files) {
                    out.push(SEPARATOR);
                    out.extend_from_slice(name.as_bytes());
                }
                out
            }
            Response::Stats(m) => {
                let fields = [
                    m.length.to_string(),
                    m.ctime_ns.to_string(),
                    m.mtime_ns.to_string(),
                    m.atime_ns.to_string(),
                ];
                join(&fields)
            }
            Response::Ack => b"1".to_vec(),
            Response::Nak => vec![NAK],
            Response::ProtocolError => Vec::new(),
        };
        out.push(SENTINEL);
        out
    }

    /// Parse the answer to a request with code `code`.
    pub fn decode(code: CommandCode, frame: &[u8]) -> Result<Self> {
        if frame.is_empty() {
            return Ok(Response::ProtocolError);
        }
        if frame == [NAK] {
            return Ok(Response::Nak);
        }
        let text = std::str::from_utf8(frame)
            .map_err(|_| SyncError::InvalidMessage("response is not UTF-8".into()))?;

        let response = match code {
            CommandCode::Pair | CommandCode::Sync | CommandCode::Ready => {
                Response::Flag(parse_flag(text)?)
            }
            CommandCode::Connect => {
                let v = parse_number::<Version>(text)?;
                Response::Version((v != 0).then_some(v))
            }
            CommandCode::Key => Response::Key(X25519PublicKey::from_hex(text)?),
            CommandCode::List => {
                let mut fields = text.split(SEPARATOR as char);
                let count: usize = parse_number(fields.next().unwrap_or_default())?;
                let names: Vec<String> = fields.map(str::to_string).collect();
                if names.len() < count || names.iter().any(String::is_empty) {
                    return Err(SyncError::InvalidMessage(format!(
                        "listing of {} names claims {} folders",
                        names.len(),
                        count
                    )));
                }
                let mut folders = names;
                let files = folders.split_off(count);
                Response::Listing(Listing { folders, files })
            }
            CommandCode::Stats => {
                let fields: Vec<&str> = text.split(SEPARATOR as char).collect();
                let [length, ctime, mtime, atime] = fields[..] else {
                    return Err(SyncError::InvalidMessage(format!(
                        "stats needs 4 fields, got {}",
                        fields.len()
                    )));
                };
                Response::Stats(Metadata {
                    length: parse_number(length)?,
                    ctime_ns: parse_number(ctime)?,
                    mtime_ns: parse_number(mtime)?,
                    atime_ns: parse_number(atime)?,
                    seed: None,
                })
            }
            CommandCode::Create | CommandCode::Rename | CommandCode::Remove => {
                if text == "1" {
                    Response::Ack
                } else {
                    return Err(SyncError::InvalidMessage(format!("unexpected ack {:?}", text)));
                }
            }
            CommandCode::Disconnect
            | CommandCode::Read
            | CommandCode::Data
            | CommandCode::Write => {
                return Err(SyncError::InvalidMessage(format!(
                    "{:?} has no control response",
                    code
                )))
            }
        };
        Ok(response)
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(s: &str) -> Result<bool> {
    match s {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(SyncError::InvalidMessage(format!("bad flag {:?}", other))),
    }
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.trim()
        .parse()
        .map_err(|_| SyncError::InvalidMessage(format!("bad number {:?}", s)))
}

fn parse_versions(args: &[&str]) -> Result<Vec<Version>> {
    args.iter().map(|a| parse_number(a)).collect()
}

fn exact<'a, const N: usize>(code: CommandCode, args: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(args).map_err(|_| {
        SyncError::InvalidMessage(format!(
            "{:?} takes {} arguments, got {}",
            code,
            N,
            args.len()
        ))
    })
}

fn single_path(code: CommandCode, args: &[&str]) -> Result<RemotePath> {
    let [path] = exact::<1>(code, args)?;
    Ok(RemotePath::new(path)?)
}

fn join<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.extend_from_slice(item.as_ref().as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> RemotePath {
        RemotePath::new(s).unwrap()
    }

    #[test]
    fn test_request_wire_format() {
        assert_eq!(Request::Pair { versions: vec![1] }.encode(), b"1:1\n");
        assert_eq!(Request::Sync.encode(), b"4:\n");
        assert_eq!(
            Request::Create {
                path: p("/b/c"),
                is_dir: false
            }
            .encode(),
            b"7:/b/c\x1f0\n"
        );
        assert_eq!(
            Request::Rename {
                from: p("/a"),
                to: p("/z")
            }
            .encode(),
            b"8:/a\x1f/z\n"
        );
    }

    #[test]
    fn test_request_roundtrip() {
        let requests = vec![
            Request::Connect { versions: vec![1, 2] },
            Request::Key {
                public: X25519PublicKey([5; 32]),
            },
            Request::Ready,
            Request::Disconnect,
            Request::List { path: RemotePath::root() },
            Request::Stats { path: p("/a") },
            Request::Remove { path: p("/a/b") },
        ];
        for request in requests {
            let mut wire = request.encode();
            assert_eq!(wire.pop(), Some(SENTINEL));
            assert_eq!(Request::decode(&wire).unwrap(), request);
        }
    }

    #[test]
    fn test_request_rejects_malformed() {
        assert!(Request::decode(b"").is_err());
        assert!(Request::decode(b"99:").is_err());
        assert!(Request::decode(b"x:").is_err());
        assert!(Request::decode(b"4:extra").is_err());
        assert!(Request::decode(b"7:/a").is_err());
        assert!(Request::decode(b"10:/a").is_err());
        assert!(Request::decode(b"9:/../etc").is_err());
        assert!(Request::decode(b"3:nothex").is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let listing = Response::Listing(Listing {
            folders: vec!["b".into()],
            files: vec!["a".into(), "c".into()],
        });
        assert_eq!(listing.encode(), b"1\x1fb\x1fa\x1fc\n");
        let stats = Response::Stats(Metadata {
            length: 3,
            ctime_ns: 1,
            mtime_ns: 2,
            atime_ns: 4,
            seed: None,
        });
        assert_eq!(stats.encode(), b"3\x1f1\x1f2\x1f4\n");
        assert_eq!(Response::Nak.encode(), vec![NAK, SENTINEL]);
        assert_eq!(Response::ProtocolError.encode(), b"\n");
        assert_eq!(Response::Version(None).encode(), b"0\n");
    }

    #[test]
    fn test_response_decode() {
        assert_eq!(
            Response::decode(CommandCode::List, b"0").unwrap(),
            Response::Listing(Listing::default())
        );
        assert_eq!(
            Response::decode(CommandCode::Connect, b"1").unwrap(),
            Response::Version(Some(1))
        );
        assert_eq!(
            Response::decode(CommandCode::Connect, b"0").unwrap(),
            Response::Version(None)
        );
        assert_eq!(
            Response::decode(CommandCode::Stats, &[NAK]).unwrap(),
            Response::Nak
        );
        assert_eq!(
            Response::decode(CommandCode::Sync, b"").unwrap(),
            Response::ProtocolError
        );
        assert!(Response::decode(CommandCode::Stats, b"1\x1f2").is_err());
        assert!(Response::decode(CommandCode::List, b"2\x1fa").is_err());
        assert!(Response::decode(CommandCode::List, b"b:a").is_err());
    }

    #[test]
    fn test_listing_names_may_contain_colons() {
        let listing = Listing {
            folders: vec!["10:30 notes".into()],
            files: vec!["a".into(), ":".into()],
        };
        let wire = Response::Listing(listing.clone()).encode();
        assert_eq!(
            Response::decode(CommandCode::List, &wire[..wire.len() - 1]).unwrap(),
            Response::Listing(listing)
        );
    }

    proptest! {
        #[test]
        fn listing_survives_the_wire(
            folders in prop::collection::vec(r"[^\x1f\n\x00/]{1,8}", 0..4),
            files in prop::collection::vec(r"[^\x1f\n\x00/]{1,8}", 0..4),
        ) {
            let listing = Listing { folders, files };
            let wire = Response::Listing(listing.clone()).encode();
            prop_assert_eq!(
                Response::decode(CommandCode::List, &wire[..wire.len() - 1]).unwrap(),
                Response::Listing(listing)
            );
        }
    }
}
