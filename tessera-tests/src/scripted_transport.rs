//! Scripted transport for sender tests.
//!
//! Replies are consumed in order, one per call, regardless of which address
//! the call targets. Every call is recorded so tests can assert exactly
//! which peers were contacted and with which routing context.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tessera_client::{
    CopRequest, CopResponse, KvRequest, KvResponse, RequestKind, Transport, TransportError,
    TransportResult,
};
use tessera_routing::RpcContext;
use tokio_util::sync::CancellationToken;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Reply to a key-value call.
    Kv(TransportResult<KvResponse>),
    /// Reply to a coprocessor call.
    Cop(TransportResult<CopResponse>),
}

/// A connection-refused failure from `addr`.
#[must_use]
pub fn refused(addr: &str) -> TransportError {
    TransportError::ConnectionRefused {
        addr: addr.to_string(),
    }
}

/// A call observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    /// Target address.
    pub addr: String,
    /// Kind of the request.
    pub kind: RequestKind,
    /// Routing context stamped by the sender.
    pub context: Option<RpcContext>,
    /// Timeout passed by the sender.
    pub timeout: Duration,
}

/// Transport that answers from a fixed script.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<SentRequest>>,
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedTransport {
    /// Creates a transport that will answer with `replies`, in order.
    #[must_use]
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Cancels `token` while serving the `call`th request (1-based), after
    /// the reply has been chosen but before it is returned.
    #[must_use]
    pub fn cancel_on_call(self, call: usize, token: CancellationToken) -> Self {
        *self
            .cancel_on_call
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((call, token));
        self
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the target address of every call made so far.
    #[must_use]
    pub fn addrs(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.addr).collect()
    }

    /// Returns the number of unconsumed replies.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next(&self, sent: SentRequest) -> Reply {
        let call = {
            let mut log = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
            log.push(sent);
            log.len()
        };
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some((at, token)) = self
            .cancel_on_call
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if *at == call {
                token.cancel();
            }
        }
        reply.unwrap_or_else(|| panic!("transport script exhausted at call {call}"))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_kv(
        &self,
        addr: &str,
        request: &KvRequest,
        timeout: Duration,
    ) -> TransportResult<KvResponse> {
        let sent = SentRequest {
            addr: addr.to_string(),
            kind: request.kind,
            context: request.context,
            timeout,
        };
        match self.next(sent) {
            Reply::Kv(reply) => reply,
            Reply::Cop(_) => panic!("scripted a coprocessor reply for a kv call"),
        }
    }

    async fn send_coprocessor(
        &self,
        addr: &str,
        request: &CopRequest,
        timeout: Duration,
    ) -> TransportResult<CopResponse> {
        let sent = SentRequest {
            addr: addr.to_string(),
            kind: RequestKind::Coprocessor,
            context: request.context,
            timeout,
        };
        match self.next(sent) {
            Reply::Cop(reply) => reply,
            Reply::Kv(_) => panic!("scripted a kv reply for a coprocessor call"),
        }
    }
}
