//! In-memory harness: scripted store, consensus, history, forwarder,
//! and a registry with closure handlers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use palisade_core::consensus::{Consensus, ConsensusKind, ConsensusStatistics};
use palisade_core::error::{KvError, KvResult};
use palisade_core::history::{RequestId, TxHistory};
use palisade_core::identity::{cert_key_id, CallerId, NodeId};
use palisade_core::kv::{CommitOutcome, FrameFormat, KvStore, KvTransaction, Term, Version};
use palisade_core::records::{DigestAlg, SignedRequest};

use palisade_rpc::{
    EndpointContext, EndpointDefinition, EndpointMetrics, EndpointProperties, EndpointRegistry,
    ExecutionOutcome, Forwarder, RpcContext, RpcFrontend, SessionContext,
};

pub const CLIENT_SIGNATURES_TABLE: &str = "palisade.client_signatures";

// ---------------------------------------------------------------- store

/// What the next `commit()` should do.
#[derive(Debug, Clone)]
pub enum CommitScript {
    /// Assign the next version and apply the write set.
    Auto,
    /// Commit at a fixed version and term.
    Commit { version: Version, term: Term },
    Conflict,
    NoReplicate,
    Compacted,
    SerialiseFailure,
}

#[derive(Default)]
struct StoreInner {
    data: Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>,
    globally_committed: Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>,
    commit_script: Mutex<VecDeque<CommitScript>>,
    next_version: AtomicU64,
    last_req_id: Mutex<Option<RequestId>>,
    consensus: Mutex<Option<Arc<dyn Consensus>>>,
    history: Mutex<Option<Arc<dyn TxHistory>>>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Arc<StoreInner>,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, table: &str, key: &[u8], value: Vec<u8>) {
        self.inner
            .data
            .lock()
            .insert((table.to_string(), key.to_vec()), value);
    }

    pub fn seed_globally_committed(&self, table: &str, key: &[u8], value: Vec<u8>) {
        self.inner
            .globally_committed
            .lock()
            .insert((table.to_string(), key.to_vec()), value);
    }

    pub fn script_commits(&self, scripts: impl IntoIterator<Item = CommitScript>) {
        self.inner.commit_script.lock().extend(scripts);
    }

    pub fn pending_commit_scripts(&self) -> usize {
        self.inner.commit_script.lock().len()
    }

    pub fn read(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .data
            .lock()
            .get(&(table.to_string(), key.to_vec()))
            .cloned()
    }

    pub fn committed_entries(&self) -> usize {
        self.inner.data.lock().len()
    }

    pub fn last_req_id(&self) -> Option<RequestId> {
        *self.inner.last_req_id.lock()
    }

    pub fn install_consensus(&self, consensus: Option<Arc<dyn Consensus>>) {
        *self.inner.consensus.lock() = consensus;
    }

    pub fn install_history(&self, history: Option<Arc<dyn TxHistory>>) {
        *self.inner.history.lock() = history;
    }
}

impl KvStore for MemStore {
    fn create_tx(&self) -> Box<dyn KvTransaction> {
        Box::new(MemTransaction {
            inner: Arc::clone(&self.inner),
            writes: HashMap::new(),
            read_version: self.inner.next_version.load(Ordering::Relaxed),
            commit_version: 0,
            commit_term: 0,
            req_id: None,
        })
    }

    fn consensus(&self) -> Option<Arc<dyn Consensus>> {
        self.inner.consensus.lock().clone()
    }

    fn history(&self) -> Option<Arc<dyn TxHistory>> {
        self.inner.history.lock().clone()
    }
}

struct MemTransaction {
    inner: Arc<StoreInner>,
    writes: HashMap<(String, Vec<u8>), Option<Vec<u8>>>,
    read_version: Version,
    commit_version: Version,
    commit_term: Term,
    req_id: Option<RequestId>,
}

impl KvTransaction for MemTransaction {
    fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        let slot = (table.to_string(), key.to_vec());
        if let Some(write) = self.writes.get(&slot) {
            return write.clone();
        }
        self.inner.data.lock().get(&slot).cloned()
    }

    fn get_globally_committed(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .globally_committed
            .lock()
            .get(&(table.to_string(), key.to_vec()))
            .cloned()
    }

    fn put(&mut self, table: &str, key: &[u8], value: Vec<u8>) {
        self.writes
            .insert((table.to_string(), key.to_vec()), Some(value));
    }

    fn remove(&mut self, table: &str, key: &[u8]) {
        self.writes.insert((table.to_string(), key.to_vec()), None);
    }

    fn commit(&mut self) -> KvResult<CommitOutcome> {
        let script = self
            .inner
            .commit_script
            .lock()
            .pop_front()
            .unwrap_or(CommitScript::Auto);
        match script {
            CommitScript::Auto => {
                let version = if self.writes.is_empty() {
                    0
                } else {
                    self.inner.next_version.fetch_add(1, Ordering::Relaxed) + 1
                };
                self.apply(version, 2);
                Ok(CommitOutcome::Committed)
            }
            CommitScript::Commit { version, term } => {
                self.inner.next_version.fetch_max(version, Ordering::Relaxed);
                self.apply(version, term);
                Ok(CommitOutcome::Committed)
            }
            CommitScript::Conflict => Ok(CommitOutcome::Conflict),
            CommitScript::NoReplicate => Ok(CommitOutcome::NoReplicate),
            CommitScript::Compacted => Err(KvError::Compacted {
                version: self.read_version,
            }),
            CommitScript::SerialiseFailure => Err(KvError::Serialise {
                reason: "scripted serialise failure".to_string(),
            }),
        }
    }

    fn commit_version(&self) -> Version {
        self.commit_version
    }

    fn commit_term(&self) -> Term {
        self.commit_term
    }

    fn read_version(&self) -> Version {
        self.read_version
    }

    fn version(&self) -> Version {
        if self.commit_version != 0 {
            self.commit_version
        } else {
            self.read_version
        }
    }

    fn reset(&mut self) {
        self.writes.clear();
        self.read_version = self.inner.next_version.load(Ordering::Relaxed);
    }

    fn set_req_id(&mut self, req_id: RequestId) {
        self.req_id = Some(req_id);
        *self.inner.last_req_id.lock() = Some(req_id);
    }

    fn req_id(&self) -> Option<RequestId> {
        self.req_id
    }
}

impl MemTransaction {
    fn apply(&mut self, version: Version, term: Term) {
        let mut data = self.inner.data.lock();
        for ((table, key), value) in self.writes.drain() {
            match value {
                Some(value) => {
                    data.insert((table, key), value);
                }
                None => {
                    data.remove(&(table, key));
                }
            }
        }
        self.commit_version = version;
        self.commit_term = term;
    }
}

// ------------------------------------------------------------ consensus

pub struct TestConsensus {
    kind: ConsensusKind,
    primary: AtomicBool,
    primary_node: Mutex<Option<NodeId>>,
    active: Mutex<Vec<NodeId>>,
    committed: AtomicU64,
}

impl TestConsensus {
    pub fn new(kind: ConsensusKind, is_primary: bool, primary_node: Option<NodeId>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            primary: AtomicBool::new(is_primary),
            primary_node: Mutex::new(primary_node),
            active: Mutex::new(vec![NodeId(1), NodeId(2), NodeId(3)]),
            committed: AtomicU64::new(0),
        })
    }

    pub fn cft_primary() -> Arc<Self> {
        Self::new(ConsensusKind::Cft, true, Some(NodeId(1)))
    }

    pub fn cft_backup(primary_node: Option<NodeId>) -> Arc<Self> {
        Self::new(ConsensusKind::Cft, false, primary_node)
    }

    pub fn bft_primary() -> Arc<Self> {
        Self::new(ConsensusKind::Bft, true, Some(NodeId(1)))
    }

    pub fn bft_backup(primary_node: Option<NodeId>) -> Arc<Self> {
        Self::new(ConsensusKind::Bft, false, primary_node)
    }

    pub fn set_committed_seqno(&self, seqno: Version) {
        self.committed.store(seqno, Ordering::Relaxed);
    }
}

impl Consensus for TestConsensus {
    fn primary(&self) -> Option<NodeId> {
        *self.primary_node.lock()
    }

    fn active_nodes(&self) -> Vec<NodeId> {
        self.active.lock().clone()
    }

    fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Relaxed)
    }

    fn kind(&self) -> ConsensusKind {
        self.kind
    }

    fn committed_seqno(&self) -> Version {
        self.committed.load(Ordering::Relaxed)
    }

    fn statistics(&self) -> ConsensusStatistics {
        ConsensusStatistics {
            time_spent: 5,
            sample_count: 1,
            tx_count: 0,
        }
    }
}

// -------------------------------------------------------------- history

#[derive(Debug, Clone)]
pub struct AddedRequest {
    pub id: RequestId,
    pub caller_id: CallerId,
    pub caller_cert: Vec<u8>,
    pub request: Vec<u8>,
}

pub struct TestHistory {
    accept: AtomicBool,
    pub added: Mutex<Vec<AddedRequest>>,
    pub signatures: AtomicU64,
    pub flushes: AtomicU64,
}

impl TestHistory {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(accept),
            added: Mutex::new(Vec::new()),
            signatures: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    pub fn signature_hints(&self) -> u64 {
        self.signatures.load(Ordering::Relaxed)
    }
}

impl TxHistory for TestHistory {
    fn try_emit_signature(&self) {
        self.signatures.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_pending(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn add_request(
        &self,
        id: RequestId,
        caller_id: CallerId,
        caller_cert: &[u8],
        request: &[u8],
        _frame: FrameFormat,
    ) -> bool {
        if !self.accept.load(Ordering::Relaxed) {
            return false;
        }
        self.added.lock().push(AddedRequest {
            id,
            caller_id,
            caller_cert: caller_cert.to_vec(),
            request: request.to_vec(),
        });
        true
    }
}

// ------------------------------------------------------------ forwarder

#[derive(Debug, Clone)]
pub struct ForwardedCall {
    pub primary: NodeId,
    pub active_nodes: Vec<NodeId>,
    pub caller_id: CallerId,
    pub caller_cert: Vec<u8>,
}

pub struct RecordingForwarder {
    accept: AtomicBool,
    pub calls: Mutex<Vec<ForwardedCall>>,
}

impl RecordingForwarder {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(accept),
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl Forwarder for RecordingForwarder {
    fn forward(
        &self,
        _ctx: &RpcContext,
        primary: NodeId,
        active_nodes: &[NodeId],
        caller_id: CallerId,
        caller_cert: &[u8],
    ) -> bool {
        if !self.accept.load(Ordering::Relaxed) {
            return false;
        }
        self.calls.lock().push(ForwardedCall {
            primary,
            active_nodes: active_nodes.to_vec(),
            caller_id,
            caller_cert: caller_cert.to_vec(),
        });
        true
    }
}

// ------------------------------------------------------------- registry

type Handler = dyn Fn(&mut EndpointContext<'_>) -> ExecutionOutcome + Send + Sync;

#[derive(Default)]
pub struct TestRegistry {
    endpoints: Mutex<Vec<(Arc<EndpointDefinition>, Arc<Handler>)>>,
    metrics: Mutex<HashMap<(String, String), Arc<EndpointMetrics>>>,
    certs: Mutex<HashMap<Vec<u8>, CallerId>>,
    digests: Mutex<HashMap<String, CallerId>>,
    certs_by_id: Mutex<HashMap<u64, Vec<u8>>>,
    forwarded_lookup_ok: AtomicBool,
    pub init_calls: AtomicU64,
    pub ticks: Mutex<Vec<(Duration, ConsensusStatistics)>>,
}

impl TestRegistry {
    pub fn new() -> Arc<Self> {
        let registry = Self::default();
        registry.forwarded_lookup_ok.store(true, Ordering::Relaxed);
        Arc::new(registry)
    }

    /// Make forwarded-caller cert lookups fail, as on a node that has
    /// not yet replicated the caller's registration.
    pub fn fail_forwarded_lookups(&self) {
        self.forwarded_lookup_ok.store(false, Ordering::Relaxed);
    }

    pub fn register(
        &self,
        verb: &str,
        method: &str,
        properties: EndpointProperties,
        handler: impl Fn(&mut EndpointContext<'_>) -> ExecutionOutcome + Send + Sync + 'static,
    ) {
        let definition = Arc::new(EndpointDefinition {
            method: method.to_string(),
            verb: verb.to_string(),
            properties,
        });
        self.endpoints.lock().push((definition, Arc::new(handler)));
    }

    pub fn add_cert(&self, cert: &[u8], caller: CallerId) {
        self.certs.lock().insert(cert.to_vec(), caller);
        self.digests.lock().insert(cert_key_id(cert), caller);
        self.certs_by_id.lock().insert(caller.0, cert.to_vec());
    }

    pub fn metrics_for(&self, verb: &str, method: &str) -> Arc<EndpointMetrics> {
        Arc::clone(
            self.metrics
                .lock()
                .entry((method.to_string(), verb.to_string()))
                .or_default(),
        )
    }

    pub fn init_count(&self) -> u64 {
        self.init_calls.load(Ordering::Relaxed)
    }
}

impl EndpointRegistry for TestRegistry {
    fn find_endpoint(
        &self,
        _tx: &mut dyn KvTransaction,
        ctx: &RpcContext,
    ) -> Option<Arc<EndpointDefinition>> {
        self.endpoints
            .lock()
            .iter()
            .find(|(e, _)| e.method == ctx.method() && e.verb == ctx.request_verb())
            .map(|(e, _)| Arc::clone(e))
    }

    fn allowed_verbs(&self, ctx: &RpcContext) -> Vec<String> {
        self.endpoints
            .lock()
            .iter()
            .filter(|(e, _)| e.method == ctx.method())
            .map(|(e, _)| e.verb.clone())
            .collect()
    }

    fn metrics(&self, endpoint: &EndpointDefinition) -> Arc<EndpointMetrics> {
        self.metrics_for(&endpoint.verb, &endpoint.method)
    }

    fn caller_id(&self, _tx: &mut dyn KvTransaction, cert: &[u8]) -> CallerId {
        self.certs
            .lock()
            .get(cert)
            .copied()
            .unwrap_or(CallerId::INVALID)
    }

    fn caller_id_by_digest(&self, _tx: &mut dyn KvTransaction, key_id: &str) -> CallerId {
        self.digests
            .lock()
            .get(key_id)
            .copied()
            .unwrap_or(CallerId::INVALID)
    }

    fn has_certs(&self) -> bool {
        !self.certs.lock().is_empty()
    }

    fn execute_endpoint(
        &self,
        endpoint: &EndpointDefinition,
        args: &mut EndpointContext<'_>,
    ) -> ExecutionOutcome {
        let handler = self
            .endpoints
            .lock()
            .iter()
            .find(|(e, _)| e.method == endpoint.method && e.verb == endpoint.verb)
            .map(|(_, h)| Arc::clone(h));
        match handler {
            Some(handler) => (handler.as_ref())(args),
            None => ExecutionOutcome::Other {
                msg: "no handler registered".to_string(),
            },
        }
    }

    fn set_consensus(&self, _consensus: Option<Arc<dyn Consensus>>) {}

    fn set_history(&self, _history: Option<Arc<dyn TxHistory>>) {}

    fn init_handlers(&self, _store: &Arc<dyn KvStore>) {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn tick(&self, elapsed: Duration, stats: ConsensusStatistics) {
        self.ticks.lock().push((elapsed, stats));
    }

    fn lookup_forwarded_caller_cert(
        &self,
        _ctx: &mut RpcContext,
        _tx: &mut dyn KvTransaction,
    ) -> bool {
        self.forwarded_lookup_ok.load(Ordering::Relaxed)
    }

    fn resolve_caller_cert(
        &self,
        caller: CallerId,
        _tx: &mut dyn KvTransaction,
    ) -> Option<Vec<u8>> {
        self.certs_by_id.lock().get(&caller.0).cloned()
    }
}

// -------------------------------------------------------------- harness

pub struct Harness {
    pub store: Arc<MemStore>,
    pub registry: Arc<TestRegistry>,
    pub frontend: RpcFrontend,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemStore::new();
        let registry = TestRegistry::new();
        let frontend = RpcFrontend::new(
            Arc::clone(&store) as Arc<dyn KvStore>,
            Arc::clone(&registry) as Arc<dyn EndpointRegistry>,
            Some(CLIENT_SIGNATURES_TABLE.to_string()),
        );
        Self {
            store,
            registry,
            frontend,
        }
    }

    pub fn open(self) -> Self {
        self.frontend.open(None);
        self
    }

    pub fn with_consensus(self, consensus: Arc<TestConsensus>) -> Self {
        self.store.install_consensus(Some(consensus));
        self
    }

    pub fn with_history(self, history: Arc<TestHistory>) -> Self {
        self.store.install_history(Some(history));
        self
    }

    pub fn with_forwarder(self, forwarder: Arc<RecordingForwarder>) -> Self {
        self.frontend.set_cmd_forwarder(forwarder);
        self
    }
}

// -------------------------------------------------------------- helpers

pub fn request(verb: &str, path: &str) -> RpcContext {
    RpcContext::new(SessionContext::new(Vec::new(), 0), verb, path)
}

pub fn keypair(seed: u8) -> (SigningKey, Vec<u8>) {
    let signing = SigningKey::from_bytes(&[seed; 32]);
    let cert = signing.verifying_key().to_bytes().to_vec();
    (signing, cert)
}

pub fn sign_request(signing: &SigningKey, request: &[u8]) -> SignedRequest {
    let digest = Sha256::digest(request);
    SignedRequest {
        request: request.to_vec(),
        signature: signing.sign(digest.as_slice()).to_bytes().to_vec(),
        digest: DigestAlg::Sha256,
        key_id: cert_key_id(signing.verifying_key().to_bytes().as_slice()),
    }
}

/// Handler that writes one KV entry and replies 200 "stored".
pub fn storing_handler(table: &'static str) -> impl Fn(&mut EndpointContext<'_>) -> ExecutionOutcome {
    move |args: &mut EndpointContext<'_>| {
        args.tx.put(table, b"key", b"value".to_vec());
        args.ctx.set_response_body("stored");
        ExecutionOutcome::Ok
    }
}

#[derive(Debug)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("<non-utf8>")
    }
}

pub fn parse_response(bytes: &[u8]) -> ParsedResponse {
    let split = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header/body separator");
    let head = std::str::from_utf8(&bytes[..split]).expect("utf8 head");
    let body = bytes[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_line = lines.next().expect("status line");
    let status = status_line
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let headers = lines
        .filter_map(|line| {
            line.split_once(": ")
                .map(|(n, v)| (n.to_string(), v.to_string()))
        })
        .collect();

    ParsedResponse {
        status,
        headers,
        body,
    }
}
