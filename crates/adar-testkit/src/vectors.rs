//! Control-channel wire vectors.
//!
//! Byte-exact encodings of requests and responses, so that other
//! implementations of the protocol can be checked against this one.

use adar_core::{Metadata, RemotePath};
use adar_store::Listing;
use adar_sync::{CommandCode, Request, Response, SENTINEL};

/// An expected request encoding.
#[derive(Debug, Clone)]
pub struct RequestVector {
    pub name: &'static str,
    pub request: Request,
    pub wire: &'static [u8],
}

/// An expected response encoding, answering a request with `code`.
#[derive(Debug, Clone)]
pub struct ResponseVector {
    pub name: &'static str,
    pub code: CommandCode,
    pub response: Response,
    pub wire: &'static [u8],
}

fn path(s: &str) -> RemotePath {
    RemotePath::new(s).unwrap_or_else(|e| panic!("bad vector path {}: {}", s, e))
}

pub fn request_vectors() -> Vec<RequestVector> {
    vec![
        RequestVector {
            name: "PAIR one version",
            request: Request::Pair { versions: vec![1] },
            wire: b"1:1\n",
        },
        RequestVector {
            name: "CONNECT two versions",
            request: Request::Connect {
                versions: vec![1, 2],
            },
            wire: b"2:1\x1f2\n",
        },
        RequestVector {
            name: "SYNC",
            request: Request::Sync,
            wire: b"4:\n",
        },
        RequestVector {
            name: "READY",
            request: Request::Ready,
            wire: b"5:\n",
        },
        RequestVector {
            name: "DISCONNECT",
            request: Request::Disconnect,
            wire: b"6:\n",
        },
        RequestVector {
            name: "CREATE file",
            request: Request::Create {
                path: path("/b/c"),
                is_dir: false,
            },
            wire: b"7:/b/c\x1f0\n",
        },
        RequestVector {
            name: "CREATE folder",
            request: Request::Create {
                path: path("/b"),
                is_dir: true,
            },
            wire: b"7:/b\x1f1\n",
        },
        RequestVector {
            name: "RENAME",
            request: Request::Rename {
                from: path("/a"),
                to: path("/z"),
            },
            wire: b"8:/a\x1f/z\n",
        },
        RequestVector {
            name: "LIST",
            request: Request::List { path: path("/b") },
            wire: b"9:/b\n",
        },
        RequestVector {
            name: "STATS",
            request: Request::Stats { path: path("/a") },
            wire: b"12:/a\n",
        },
        RequestVector {
            name: "REMOVE",
            request: Request::Remove { path: path("/a") },
            wire: b"14:/a\n",
        },
    ]
}

pub fn response_vectors() -> Vec<ResponseVector> {
    vec![
        ResponseVector {
            name: "PAIR accepted",
            code: CommandCode::Pair,
            response: Response::Flag(true),
            wire: b"1\n",
        },
        ResponseVector {
            name: "SYNC not ready",
            code: CommandCode::Sync,
            response: Response::Flag(false),
            wire: b"0\n",
        },
        ResponseVector {
            name: "CONNECT negotiated",
            code: CommandCode::Connect,
            response: Response::Version(Some(1)),
            wire: b"1\n",
        },
        ResponseVector {
            name: "CONNECT rejected",
            code: CommandCode::Connect,
            response: Response::Version(None),
            wire: b"0\n",
        },
        ResponseVector {
            name: "LIST",
            code: CommandCode::List,
            response: Response::Listing(Listing {
                folders: vec!["b".into()],
                files: vec!["a".into(), "c".into()],
            }),
            wire: b"1\x1fb\x1fa\x1fc\n",
        },
        ResponseVector {
            name: "LIST empty",
            code: CommandCode::List,
            response: Response::Listing(Listing::default()),
            wire: b"0\n",
        },
        ResponseVector {
            name: "STATS",
            code: CommandCode::Stats,
            response: Response::Stats(Metadata {
                length: 5,
                ctime_ns: 1,
                mtime_ns: 10,
                atime_ns: 10,
                seed: None,
            }),
            wire: b"5\x1f1\x1f10\x1f10\n",
        },
        ResponseVector {
            name: "CREATE acknowledged",
            code: CommandCode::Create,
            response: Response::Ack,
            wire: b"1\n",
        },
        ResponseVector {
            name: "REMOVE refused by storage",
            code: CommandCode::Remove,
            response: Response::Nak,
            wire: b"\x15\n",
        },
        ResponseVector {
            name: "protocol error",
            code: CommandCode::List,
            response: Response::ProtocolError,
            wire: b"\n",
        },
    ]
}

/// Check every vector in both directions. Returns the names that failed.
pub fn verify_all_vectors() -> Vec<&'static str> {
    let mut failed = Vec::new();
    for v in request_vectors() {
        let encoded = v.request.encode();
        let decoded = strip(v.wire).and_then(|frame| Request::decode(frame).ok());
        if encoded != v.wire || decoded.as_ref() != Some(&v.request) {
            failed.push(v.name);
        }
    }
    for v in response_vectors() {
        let encoded = v.response.encode();
        let decoded = strip(v.wire).and_then(|frame| Response::decode(v.code, frame).ok());
        if encoded != v.wire || decoded.as_ref() != Some(&v.response) {
            failed.push(v.name);
        }
    }
    failed
}

fn strip(wire: &[u8]) -> Option<&[u8]> {
    wire.strip_suffix(&[SENTINEL])
}
