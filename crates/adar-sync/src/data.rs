//! Data channel: encrypted coded symbols over UDP.
//!
//! One datagram carries one frame. A READ asks the holder of a file for a
//! run of its stored symbols, which come back as DATA frames. WRITE frames
//! push local changes. Both payload kinds are sealed with the peer's data
//! key, the frame header bound as associated data, and fed into a coding
//! session on arrival. Frames that fail authentication are dropped before
//! they touch any state.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::Instant;

use adar_core::{
    now_nanos, random_seed, BitVector, Decoder, Encoder, PeerId, RemotePath, SymbolBlob, UNSEEDED,
};
use adar_pairing::DataKey;
use adar_store::{StoreError, SymbolSlice, MAX_FILE_SIZE};

use crate::context::ChannelContext;
use crate::datagram::{associated_data, DataFrame, Payload, PayloadKind, MAX_DATAGRAM};
use crate::error::{Result, SyncError};
use crate::peers::Peer;
use crate::shutdown::ShutdownSignal;

/// Coding sessions idle this long are abandoned.
const SESSION_IDLE: Duration = Duration::from_secs(60);

/// Longest gap between prunes while datagrams keep arriving.
const PRUNE_EVERY: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Outgoing symbol runs
// ─────────────────────────────────────────────────────────────────────────────

/// Coded symbols for one buffer, ready to be split into frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRun {
    pub seed: u64,
    /// Source symbol count of the buffer.
    pub length: u64,
    /// Stream position of `values[0]`.
    pub first_index: u64,
    pub values: Vec<u8>,
    /// One coefficient vector per value; present iff `seed` is [`UNSEEDED`].
    pub coefficients: Option<Vec<BitVector>>,
}

impl SymbolRun {
    /// Systematic symbols plus `redundancy` repair symbols under `seed`.
    pub fn seeded(data: &[u8], seed: u64, redundancy: f64) -> Self {
        Self::from_blob(SymbolBlob::encode(data, seed, redundancy))
    }

    /// Like [`seeded`](Self::seeded), but carrying every coefficient vector
    /// so the receiver needs no seed.
    pub fn explicit(data: &[u8], redundancy: f64) -> Self {
        let count = SymbolBlob::stored_symbol_count(data.len(), redundancy);
        let (coefficients, values) = Encoder::new(data.to_vec(), random_seed())
            .take(count)
            .map(|symbol| (symbol.coefficients, symbol.value))
            .unzip();
        Self {
            seed: UNSEEDED,
            length: data.len() as u64,
            first_index: 0,
            values,
            coefficients: Some(coefficients),
        }
    }

    fn from_blob(blob: SymbolBlob) -> Self {
        Self {
            seed: blob.seed,
            length: blob.length,
            first_index: 0,
            values: blob.symbols,
            coefficients: None,
        }
    }

    /// Stored symbols starting at stream position `skip`.
    pub fn from_slice(slice: SymbolSlice, skip: u64) -> Self {
        Self {
            seed: slice.seed,
            length: slice.length,
            first_index: skip,
            values: slice.symbols,
            coefficients: None,
        }
    }

    /// Split into sealed frames that each fit one datagram.
    ///
    /// An empty buffer still yields one frame so the receiver learns about
    /// it; an empty run for a non-empty buffer yields none.
    pub fn seal(
        &self,
        key: &DataKey,
        kind: PayloadKind,
        path: &RemotePath,
        offset: u64,
    ) -> Result<Vec<DataFrame>> {
        let width = match &self.coefficients {
            Some(_) => BitVector::packed_len(self.length as usize),
            None if self.seed == UNSEEDED && self.length > 0 => {
                return Err(SyncError::InvalidMessage(format!(
                    "symbols for {} carry neither a seed nor coefficients",
                    path
                )))
            }
            None => 0,
        };
        let capacity = DataFrame::symbol_capacity(path, width);
        if capacity == 0 {
            return Err(SyncError::FrameTooLarge {
                size: width + 1,
                limit: MAX_DATAGRAM,
            });
        }

        let payload = |first_index: u64, values: &[u8], coefficients: Vec<u8>| -> Result<DataFrame> {
            let aad = associated_data(kind, path, self.seed, offset, self.length, first_index, &coefficients);
            Ok(DataFrame::Payload(Payload {
                kind,
                path: path.clone(),
                seed: self.seed,
                offset,
                length: self.length,
                first_index,
                coefficients,
                sealed: key.seal(values, &aad)?,
            }))
        };

        if self.values.is_empty() {
            return if self.length == 0 {
                Ok(vec![payload(self.first_index, &[], Vec::new())?])
            } else {
                Ok(Vec::new())
            };
        }

        let mut frames = Vec::with_capacity(self.values.len().div_ceil(capacity));
        for (n, chunk) in self.values.chunks(capacity).enumerate() {
            let start = n * capacity;
            let coefficients = match &self.coefficients {
                Some(all) => all
                    .iter()
                    .skip(start)
                    .take(chunk.len())
                    .flat_map(|c| c.to_bytes())
                    .collect(),
                None => Vec::new(),
            };
            frames.push(payload(self.first_index + start as u64, chunk, coefficients)?);
        }
        Ok(frames)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    peer: PeerId,
    kind: PayloadKind,
    path: RemotePath,
    seed: u64,
    offset: u64,
}

struct CodingSession {
    decoder: Decoder,
    length: u64,
    touched: Instant,
}

#[derive(Default)]
struct Sessions {
    active: HashMap<SessionKey, CodingSession>,
    /// Finished WRITE sessions, so stragglers don't start a new one.
    completed: HashMap<SessionKey, Instant>,
}

impl Sessions {
    /// Feed decrypted symbols. Returns the buffer once it is complete.
    fn feed(&mut self, key: SessionKey, payload: &Payload, values: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.completed.contains_key(&key) {
            return Ok(None);
        }

        let length = payload.length;
        let session = self.active.entry(key.clone()).or_insert_with(|| CodingSession {
            decoder: if payload.seed == UNSEEDED {
                Decoder::new(length as usize)
            } else {
                Decoder::with_seed(length as usize, payload.seed)
            },
            length,
            touched: Instant::now(),
        });
        if session.length != length {
            return Err(SyncError::InvalidMessage(format!(
                "length changed mid-session for {}: {} != {}",
                payload.path, session.length, length
            )));
        }
        session.touched = Instant::now();

        if payload.seed == UNSEEDED {
            let width = BitVector::packed_len(length as usize);
            if payload.coefficients.len() != width * values.len() {
                return Err(SyncError::InvalidMessage(format!(
                    "{} coefficient bytes for {} symbols",
                    payload.coefficients.len(),
                    values.len()
                )));
            }
            if width > 0 {
                for (packed, value) in payload.coefficients.chunks(width).zip(values) {
                    session
                        .decoder
                        .consume(BitVector::from_bytes(length as usize, packed)?, *value)?;
                }
            }
        } else {
            for (i, value) in values.iter().enumerate() {
                session
                    .decoder
                    .consume_indexed(payload.first_index + i as u64, *value)?;
            }
        }

        let Some(bytes) = session.decoder.decoded() else {
            tracing::debug!(
                "{}: rank {}/{}",
                payload.path,
                session.decoder.rank(),
                session.decoder.symbols()
            );
            return Ok(None);
        };
        self.active.remove(&key);
        if key.kind == PayloadKind::Write {
            self.completed.insert(key, Instant::now());
        }
        Ok(Some(bytes))
    }

    fn discard_reads(&mut self, peer: PeerId, path: &RemotePath) {
        self.active
            .retain(|k, _| !(k.kind == PayloadKind::Data && k.peer == peer && &k.path == path));
    }

    fn prune(&mut self, now: Instant) {
        self.active.retain(|_, s| now.duration_since(s.touched) < SESSION_IDLE);
        self.completed.retain(|_, at| now.duration_since(*at) < SESSION_IDLE);
    }
}

/// An outstanding read waiting for its DATA frames to decode.
struct PendingRead {
    id: u64,
    tx: oneshot::Sender<Vec<u8>>,
}

type ReadKey = (PeerId, RemotePath);

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// The node's UDP endpoint.
pub struct DataChannel {
    socket: UdpSocket,
    ctx: ChannelContext,
    sessions: Mutex<Sessions>,
    reads: Mutex<HashMap<ReadKey, PendingRead>>,
    next_read: AtomicU64,
}

impl DataChannel {
    pub async fn bind(addr: SocketAddr, ctx: ChannelContext) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Arc::new(Self {
            socket,
            ctx,
            sessions: Mutex::new(Sessions::default()),
            reads: Mutex::new(HashMap::new()),
            next_read: AtomicU64::new(0),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reads(&self) -> MutexGuard<'_, HashMap<ReadKey, PendingRead>> {
        self.reads.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive until shutdown. Each datagram is handled on its own task.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownSignal) {
        let mut buf = vec![0u8; u16::MAX as usize];
        let mut last_prune = Instant::now();
        while !shutdown.is_triggered() {
            let received =
                tokio::time::timeout(self.ctx.settings.poll_interval, self.socket.recv_from(&mut buf)).await;
            let now = Instant::now();
            if received.is_err() || now.duration_since(last_prune) >= PRUNE_EVERY {
                self.sessions().prune(now);
                last_prune = now;
            }
            match received {
                Err(_) => {}
                Ok(Err(e)) => tracing::warn!("data channel receive failed: {}", e),
                Ok(Ok((n, from))) => {
                    let datagram = buf[..n].to_vec();
                    let this = self.clone();
                    tokio::spawn(async move { this.handle(&datagram, from).await });
                }
            }
        }
        tracing::debug!("data channel stopped");
    }

    async fn handle(&self, datagram: &[u8], from: SocketAddr) {
        let frame = match DataFrame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("malformed datagram from {}: {}", from, e);
                return;
            }
        };
        let Some(peer) = self.trusted_sender(from.ip()).await else {
            tracing::warn!("dropping datagram from unidentified {}", from);
            return;
        };
        let Some(key) = self.wait_for_key(&peer).await else {
            tracing::warn!("dropping datagram from {}: no data key yet", peer.identity().name);
            return;
        };

        let result = match frame {
            DataFrame::Read { path, skip, count } => self.serve_read(&key, from, &path, skip, count).await,
            DataFrame::Payload(payload) => self.receive(&peer, &key, payload).await,
        };
        if let Err(e) = result {
            tracing::warn!("datagram from {} failed: {}", from, e);
        }
    }

    async fn trusted_sender(&self, ip: IpAddr) -> Option<Arc<Peer>> {
        let settings = &self.ctx.settings;
        let peer = self.ctx.directory.wait_for_addr(ip, settings.identify_timeout).await?;
        let paired = peer
            .wait_until(settings.identify_timeout, |_, state| state.is_trusted())
            .await;
        paired.then_some(peer)
    }

    async fn wait_for_key(&self, peer: &Peer) -> Option<DataKey> {
        peer.wait_until(self.ctx.settings.identify_timeout, |s, _| s.data_key.is_some())
            .await;
        peer.data_key()
    }

    async fn serve_read(
        &self,
        key: &DataKey,
        to: SocketAddr,
        path: &RemotePath,
        skip: u64,
        count: u64,
    ) -> Result<()> {
        let slice = self.ctx.storage.symbols(path, skip, count).await?;
        let run = SymbolRun::from_slice(slice, skip);
        let frames = run.seal(key, PayloadKind::Data, path, 0)?;
        tracing::debug!("serving {} symbols of {} to {} in {} frames", run.values.len(), path, to, frames.len());
        for frame in &frames {
            self.send_frame(to, frame).await?;
        }
        Ok(())
    }

    async fn receive(&self, peer: &Peer, key: &DataKey, payload: Payload) -> Result<()> {
        let Ok(values) = key.open(&payload.sealed, &payload.associated_data()) else {
            tracing::warn!(
                "dropping {:?} frame for {} from {}: authentication failed",
                payload.kind,
                payload.path,
                peer.identity().name
            );
            return Ok(());
        };
        if payload.length > MAX_FILE_SIZE {
            return Err(StoreError::TooLarge { limit: MAX_FILE_SIZE }.into());
        }

        let read_key = (peer.id(), payload.path.clone());
        if payload.kind == PayloadKind::Data && !self.reads().contains_key(&read_key) {
            tracing::debug!("unsolicited DATA for {} dropped", payload.path);
            return Ok(());
        }

        let session = SessionKey {
            peer: peer.id(),
            kind: payload.kind,
            path: payload.path.clone(),
            seed: payload.seed,
            offset: payload.offset,
        };
        let Some(bytes) = self.sessions().feed(session, &payload, &values)? else {
            return Ok(());
        };

        match payload.kind {
            PayloadKind::Data => {
                if let Some(pending) = self.reads().remove(&read_key) {
                    let _ = pending.tx.send(bytes);
                }
            }
            PayloadKind::Write => {
                let storage = &self.ctx.storage;
                let now = now_nanos();
                if storage.stat(&payload.path).await.is_err() {
                    storage.create(&payload.path, false, now).await?;
                }
                storage.write(&payload.path, payload.offset, &bytes, now).await?;
                tracing::debug!(
                    "committed {} bytes at {} of {} from {}",
                    bytes.len(),
                    payload.offset,
                    payload.path,
                    peer.identity().name
                );
            }
        }
        Ok(())
    }

    /// Fetch `length` bytes of `path` from `peer`.
    ///
    /// Asks for the systematic symbols first. Each time the session stalls
    /// for `read_timeout`, asks for the next run of repair symbols, up to
    /// `repair_attempts` times.
    pub async fn request_read(&self, peer: &Peer, path: &RemotePath, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let endpoint = peer
            .data_endpoint()
            .ok_or_else(|| SyncError::PeerNotConnected(peer.identity().name.clone()))?;

        let read_key = (peer.id(), path.clone());
        let id = self.next_read.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        self.sessions().discard_reads(peer.id(), path);
        self.reads().insert(read_key.clone(), PendingRead { id, tx });

        let settings = &self.ctx.settings;
        let (mut skip, count) = (0, length);
        let mut outcome = Err(SyncError::Timeout(format!("reading {} from {}", path, peer.identity().name)));
        for attempt in 0..=settings.repair_attempts {
            if attempt > 0 {
                tracing::debug!("read of {} stalled, requesting repair symbols {}..", path, skip);
            }
            if let Err(e) = self.send_frame(endpoint, &DataFrame::Read { path: path.clone(), skip, count }).await {
                outcome = Err(e);
                break;
            }
            match tokio::time::timeout(settings.read_timeout, &mut rx).await {
                Ok(Ok(bytes)) => return Ok(bytes),
                Ok(Err(_)) => return Err(SyncError::Cancelled),
                Err(_) => skip += count,
            }
        }

        {
            let mut reads = self.reads();
            if reads.get(&read_key).is_some_and(|p| p.id == id) {
                reads.remove(&read_key);
            }
        }
        self.sessions().discard_reads(peer.id(), path);
        outcome
    }

    /// Push `data` at `offset` of `path` to `peer` under a fresh seed.
    pub async fn send_write(&self, peer: &Peer, path: &RemotePath, offset: u64, data: &[u8]) -> Result<()> {
        let run = SymbolRun::seeded(data, random_seed(), self.ctx.settings.redundancy);
        self.send_run(peer, path, offset, &run).await
    }

    /// Send an already coded run as WRITE frames.
    pub async fn send_run(&self, peer: &Peer, path: &RemotePath, offset: u64, run: &SymbolRun) -> Result<()> {
        let not_connected = || SyncError::PeerNotConnected(peer.identity().name.clone());
        let endpoint = peer.data_endpoint().ok_or_else(not_connected)?;
        let key = peer.data_key().ok_or_else(not_connected)?;
        for frame in run.seal(&key, PayloadKind::Write, path, offset)? {
            self.send_frame(endpoint, &frame).await?;
        }
        Ok(())
    }

    async fn send_frame(&self, to: SocketAddr, frame: &DataFrame) -> Result<()> {
        let bytes = frame.encode()?;
        self.socket.send_to(&bytes, self.route(to)).await?;
        Ok(())
    }

    /// A dual-stack socket reaches IPv4 peers through mapped addresses.
    fn route(&self, to: SocketAddr) -> SocketAddr {
        match (self.socket.local_addr(), to.ip()) {
            (Ok(local), IpAddr::V4(v4)) if local.is_ipv6() => {
                SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), to.port())
            }
            _ => to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adar_pairing::KeyAgreement;

    fn key() -> DataKey {
        let a = KeyAgreement::generate();
        let b = KeyAgreement::generate();
        a.agree(&b.public_key()).data_key()
    }

    fn path(s: &str) -> RemotePath {
        RemotePath::new(s).unwrap()
    }

    fn open_all(frames: &[DataFrame], key: &DataKey) -> Vec<(Payload, Vec<u8>)> {
        frames
            .iter()
            .map(|f| match f {
                DataFrame::Payload(p) => {
                    let values = key.open(&p.sealed, &p.associated_data()).unwrap();
                    (p.clone(), values)
                }
                DataFrame::Read { .. } => panic!("expected payload"),
            })
            .collect()
    }

    fn session_key(p: &Payload) -> SessionKey {
        SessionKey {
            peer: PeerId::from_bytes([1; 16]),
            kind: p.kind,
            path: p.path.clone(),
            seed: p.seed,
            offset: p.offset,
        }
    }

    #[test]
    fn test_seeded_run_decodes_from_repair_symbols_only() {
        let k = key();
        let data: Vec<u8> = (0..200u32).map(|i| (i * 7) as u8).collect();
        let run = SymbolRun::seeded(&data, 77, 3.0);
        let frames = run.seal(&k, PayloadKind::Write, &path("/f"), 0).unwrap();

        // Skip the systematic part entirely.
        let repair = SymbolRun {
            first_index: 200,
            values: run.values[200..].to_vec(),
            ..run.clone()
        };
        let frames_repair = repair.seal(&k, PayloadKind::Write, &path("/f"), 0).unwrap();
        assert!(!frames.is_empty());

        let mut sessions = Sessions::default();
        let mut out = None;
        for (payload, values) in open_all(&frames_repair, &k) {
            if let Some(bytes) = sessions.feed(session_key(&payload), &payload, &values).unwrap() {
                out = Some(bytes);
            }
        }
        assert_eq!(out.unwrap(), data);
    }

    #[test]
    fn test_explicit_run_decodes_without_seed() {
        let k = key();
        let data = b"explicit coefficients travel with the symbols".to_vec();
        let run = SymbolRun::explicit(&data, 1.0);
        assert_eq!(run.seed, UNSEEDED);
        let frames = run.seal(&k, PayloadKind::Write, &path("/e"), 3).unwrap();

        let mut sessions = Sessions::default();
        let mut out = None;
        for (payload, values) in open_all(&frames, &k) {
            assert_eq!(payload.offset, 3);
            if let Some(bytes) = sessions.feed(session_key(&payload), &payload, &values).unwrap() {
                out = Some(bytes);
            }
        }
        assert_eq!(out.unwrap(), data);
    }

    #[test]
    fn test_completed_write_ignores_stragglers() {
        let k = key();
        let run = SymbolRun::seeded(b"abc", 5, 1.0);
        let frames = open_all(&run.seal(&k, PayloadKind::Write, &path("/s"), 0).unwrap(), &k);
        let (payload, values) = &frames[0];

        let mut sessions = Sessions::default();
        assert!(sessions.feed(session_key(payload), payload, values).unwrap().is_some());
        assert!(sessions.feed(session_key(payload), payload, values).unwrap().is_none());
        assert!(sessions.active.is_empty());
    }

    #[test]
    fn test_prune_evicts_idle_sessions() {
        let k = key();
        let run = SymbolRun::seeded(b"abcdef", 8, 1.0);
        let frames = open_all(&run.seal(&k, PayloadKind::Write, &path("/p"), 0).unwrap(), &k);
        let (payload, values) = &frames[0];

        let mut sessions = Sessions::default();
        assert!(sessions.feed(session_key(payload), payload, &values[..2]).unwrap().is_none());
        assert_eq!(sessions.active.len(), 1);

        let start = Instant::now();
        sessions.prune(start + SESSION_IDLE / 2);
        assert_eq!(sessions.active.len(), 1);
        sessions.prune(start + SESSION_IDLE + PRUNE_EVERY);
        assert!(sessions.active.is_empty());
    }

    #[test]
    fn test_empty_buffer_still_sends_one_frame() {
        let k = key();
        let frames = SymbolRun::seeded(b"", 9, 1.0)
            .seal(&k, PayloadKind::Write, &path("/empty"), 0)
            .unwrap();
        assert_eq!(frames.len(), 1);

        let (payload, values) = &open_all(&frames, &k)[0];
        let mut sessions = Sessions::default();
        assert_eq!(sessions.feed(session_key(payload), payload, values).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_large_runs_split_across_datagrams() {
        let k = key();
        let data = vec![0xAB; 100_000];
        let frames = SymbolRun::seeded(&data, 3, 0.0)
            .seal(&k, PayloadKind::Write, &path("/big"), 0)
            .unwrap();
        assert!(frames.len() >= 2);
        for frame in &frames {
            assert!(frame.encode().unwrap().len() <= MAX_DATAGRAM);
        }
    }

    #[test]
    fn test_unseeded_run_without_coefficients_is_refused() {
        let run = SymbolRun {
            seed: UNSEEDED,
            length: 3,
            first_index: 0,
            values: b"abc".to_vec(),
            coefficients: None,
        };
        assert!(run.seal(&key(), PayloadKind::Data, &path("/x"), 0).is_err());
    }
}
