//! Per-request context shared between the transport and the frontend.
//!
//! The transport owns the `RpcContext`; the frontend mutates the
//! response half and may mark the session as forwarding. Response
//! serialisation renders HTTP/1.1 bytes for the transport to put on the
//! wire verbatim.

use http::header::HeaderName;
use http::StatusCode;

use palisade_core::identity::CallerId;
use palisade_core::kv::{FrameFormat, Term, Version};
use palisade_core::records::SignedRequest;

/// Header carrying the sequence number the transaction committed at.
pub const TX_SEQNO_HEADER: &str = "x-palisade-tx-seqno";
/// Header carrying the consensus term of the commit.
pub const TX_VIEW_HEADER: &str = "x-palisade-tx-view";
/// Header carrying the globally committed seqno. Deprecated; kept for
/// clients that still poll it.
pub const GLOBAL_COMMIT_HEADER: &str = "x-palisade-global-commit";

/// Caller a peer node forwarded a request on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedCaller {
    pub caller_id: CallerId,
}

/// TLS-session-level request provenance.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub caller_cert: Vec<u8>,
    /// Present iff the request arrived forwarded from a peer node.
    pub original_caller: Option<ForwardedCaller>,
    pub client_session_id: u64,
    /// Set once the frontend decides to forward this session's request.
    pub is_forwarding: bool,
}

impl SessionContext {
    pub fn new(caller_cert: Vec<u8>, client_session_id: u64) -> Self {
        Self {
            caller_cert,
            original_caller: None,
            client_session_id,
            is_forwarding: false,
        }
    }

    /// Session for a request received from a peer node on behalf of
    /// `caller_id`.
    pub fn forwarded(caller_cert: Vec<u8>, client_session_id: u64, caller_id: CallerId) -> Self {
        Self {
            caller_cert,
            original_caller: Some(ForwardedCaller { caller_id }),
            client_session_id,
            is_forwarding: false,
        }
    }
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: Vec<(HeaderName, String)>,
    body: Vec<u8>,
    seqno: Option<Version>,
    view: Option<Term>,
    global_commit: Option<Version>,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: Vec::new(),
            seqno: None,
            view: None,
            global_commit: None,
        }
    }
}

/// One in-flight request plus its response under construction.
#[derive(Debug)]
pub struct RpcContext {
    pub session: SessionContext,
    verb: String,
    method: String,
    request_headers: Vec<(String, String)>,
    request_body: Vec<u8>,
    request_index: u64,
    raw_request: Vec<u8>,
    signed_request: Option<SignedRequest>,
    frame_format: FrameFormat,
    /// BFT: this node was told to execute the request itself.
    pub execute_on_node: bool,
    /// Bootstrap request creating the service; always treated as
    /// primary-executed.
    pub is_create_request: bool,
    apply_writes: bool,
    response: ResponseState,
}

impl RpcContext {
    pub fn new(
        session: SessionContext,
        verb: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            session,
            verb: verb.into(),
            method: method.into(),
            request_headers: Vec::new(),
            request_body: Vec::new(),
            request_index: 0,
            raw_request: Vec::new(),
            signed_request: None,
            frame_format: FrameFormat::Http,
            execute_on_node: false,
            is_create_request: false,
            apply_writes: true,
            response: ResponseState::default(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request_body = body.into();
        self
    }

    pub fn with_request_index(mut self, index: u64) -> Self {
        self.request_index = index;
        self
    }

    pub fn with_raw_request(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw_request = raw.into();
        self
    }

    pub fn with_signed_request(mut self, signed: SignedRequest) -> Self {
        self.signed_request = Some(signed);
        self
    }

    pub fn with_frame_format(mut self, frame: FrameFormat) -> Self {
        self.frame_format = frame;
        self
    }

    /// Request path, e.g. `/log/private`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// HTTP verb, e.g. `POST`.
    pub fn request_verb(&self) -> &str {
        &self.verb
    }

    pub fn request_headers(&self) -> &[(String, String)] {
        &self.request_headers
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn request_body(&self) -> &[u8] {
        &self.request_body
    }

    pub fn request_index(&self) -> u64 {
        self.request_index
    }

    /// The framed request exactly as it arrived, for the history and
    /// for forwarding.
    pub fn serialised_request(&self) -> &[u8] {
        &self.raw_request
    }

    pub fn signed_request(&self) -> Option<&SignedRequest> {
        self.signed_request.as_ref()
    }

    pub fn frame_format(&self) -> FrameFormat {
        self.frame_format
    }

    /// Endpoints clear this to discard their write set, e.g. after a
    /// request fails validation inside the handler.
    pub fn set_apply_writes(&mut self, apply: bool) {
        self.apply_writes = apply;
    }

    pub fn should_apply_writes(&self) -> bool {
        self.apply_writes
    }

    pub fn set_response_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn response_status(&self) -> StatusCode {
        self.response.status
    }

    pub fn set_response_header(&mut self, name: HeaderName, value: impl Into<String>) {
        self.response.headers.push((name, value.into()));
    }

    pub fn response_header(&self, name: &HeaderName) -> Option<&str> {
        self.response
            .headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_response_body(&mut self, body: impl Into<Vec<u8>>) {
        self.response.body = body.into();
    }

    pub fn response_body(&self) -> &[u8] {
        &self.response.body
    }

    pub fn set_seqno(&mut self, seqno: Version) {
        self.response.seqno = Some(seqno);
    }

    pub fn seqno(&self) -> Option<Version> {
        self.response.seqno
    }

    pub fn set_view(&mut self, view: Term) {
        self.response.view = Some(view);
    }

    pub fn view(&self) -> Option<Term> {
        self.response.view
    }

    pub fn set_global_commit(&mut self, seqno: Version) {
        self.response.global_commit = Some(seqno);
    }

    pub fn global_commit(&self) -> Option<Version> {
        self.response.global_commit
    }

    /// Render the response as HTTP/1.1 bytes.
    pub fn serialise_response(&self) -> Vec<u8> {
        let reason = self.response.status.canonical_reason().unwrap_or("");
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.response.status.as_u16(), reason);
        for (name, value) in &self.response.headers {
            out.push_str(name.as_str());
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        if let Some(seqno) = self.response.seqno {
            out.push_str(&format!("{TX_SEQNO_HEADER}: {seqno}\r\n"));
        }
        if let Some(view) = self.response.view {
            out.push_str(&format!("{TX_VIEW_HEADER}: {view}\r\n"));
        }
        if let Some(gc) = self.response.global_commit {
            out.push_str(&format!("{GLOBAL_COMMIT_HEADER}: {gc}\r\n"));
        }
        out.push_str(&format!("content-length: {}\r\n\r\n", self.response.body.len()));
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.response.body);
        bytes
    }
}
