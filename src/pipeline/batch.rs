//! Batch coordinator: merges concurrent operations into shared network calls.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::pipeline::{Call, Middleware};
use crate::types::{BatchRequest, Operation, Request, Response};
use crate::{Error, Result};

/// Max out at roughly 100kb (the limit express-graphql imposes server-side).
const DEFAULT_MAX_BATCH_SIZE: usize = 102_400;

/// Where a combined call is sent. A combined envelope has no single member
/// URL, so the endpoint comes from batch configuration: the transport default,
/// a fixed URL, or a thunk over the member operations.
#[derive(Clone, Default)]
pub enum BatchEndpoint {
    /// Fall through to the transport's configured endpoint.
    #[default]
    Default,
    Static(String),
    Thunk(Arc<dyn Fn(&[Operation]) -> String + Send + Sync>),
}

impl std::fmt::Debug for BatchEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchEndpoint::Default => f.write_str("Default"),
            BatchEndpoint::Static(url) => f.debug_tuple("Static").field(url).finish(),
            BatchEndpoint::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

/// Batch coordinator configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// How long an open batch accepts further operations. Zero means "next
    /// tick": everything admitted before the runtime goes idle rides along.
    pub batch_timeout: Duration,
    /// Cap on the accumulated combined body size, in bytes.
    pub max_batch_size: usize,
    /// Admit mutations into batches.
    pub allow_mutations: bool,
    pub endpoint: BatchEndpoint,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::ZERO,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            allow_mutations: false,
            endpoint: BatchEndpoint::Default,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_max_batch_size(mut self, bytes: usize) -> Self {
        self.max_batch_size = bytes;
        self
    }

    pub fn with_allow_mutations(mut self, allow: bool) -> Self {
        self.allow_mutations = allow;
        self
    }

    pub fn with_endpoint(mut self, endpoint: BatchEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_batch_url(self, url: impl Into<String>) -> Self {
        self.with_endpoint(BatchEndpoint::Static(url.into()))
    }
}

/// Per-caller bookkeeping for one distinct member of a batch.
///
/// The oneshot sender enforces exactly-once settlement by construction:
/// completing consumes the wrapper. Callers whose serialized body is
/// byte-identical to an existing member ride along as duplicates and receive
/// an independent copy of the primary's outcome.
struct RequestWrapper {
    operation: Operation,
    body: String,
    tx: oneshot::Sender<Result<Response>>,
    duplicates: Vec<oneshot::Sender<Result<Response>>>,
}

impl RequestWrapper {
    fn complete(self, outcome: Result<Response>) {
        for duplicate in self.duplicates {
            let _ = duplicate.send(outcome.clone());
        }
        let _ = self.tx.send(outcome);
    }
}

/// One open-or-dispatching batch. Admission happens under the coordinator's
/// open-slot lock; the deadline task flips `accepting` and drains the members,
/// after which the batch is inert and can never be reused.
struct Batch {
    state: Mutex<BatchState>,
}

struct BatchState {
    accepting: bool,
    body_size: usize,
    members: Vec<RequestWrapper>,
}

impl Batch {
    fn open() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BatchState {
                accepting: true,
                // Reserve 2 bytes for the enclosing `[]`.
                body_size: 2,
                members: Vec::new(),
            }),
        })
    }
}

impl BatchState {
    fn admit(
        &mut self,
        operation: Operation,
        body: String,
        cost: usize,
        tx: oneshot::Sender<Result<Response>>,
    ) {
        self.body_size += cost;
        match self.members.iter_mut().find(|w| w.body == body) {
            Some(primary) => {
                debug!(
                    operation = %operation.id(),
                    "coalesced into duplicate of an existing batch member"
                );
                primary.duplicates.push(tx);
            }
            None => self.members.push(RequestWrapper {
                operation,
                body,
                tx,
                duplicates: Vec::new(),
            }),
        }
    }
}

/// Request coalescing policy.
///
/// Operations submitted while a batch is open are merged into one combined
/// network call, dispatched when the batch deadline elapses or left to a
/// fresh batch when the size cap would be exceeded. Mutations (unless
/// allowed), multipart operations, and operations with the `skip_batch`
/// directive bypass the coordinator entirely.
///
/// Duplicate detection is byte-equality of serialized bodies: semantically
/// equal operations that serialize differently become separate members. This
/// mirrors the admission check's conservative size accounting, which charges
/// one separator byte per admitted caller.
///
/// The open-batch slot is owned by this instance, so independently configured
/// pipelines never share batches.
pub struct BatchMiddleware {
    config: BatchConfig,
    open: Mutex<Option<Arc<Batch>>>,
}

impl BatchMiddleware {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            open: Mutex::new(None),
        }
    }

    /// Admit one operation: reuse the open batch, or open a fresh one (and
    /// start its deadline task) when none accepts or the size cap would be
    /// exceeded. Returns the receiver the caller awaits.
    async fn enqueue(
        self: Arc<Self>,
        operation: Operation,
        body: String,
        next: Call,
    ) -> oneshot::Receiver<Result<Response>> {
        let (tx, rx) = oneshot::channel();
        // +1 accounts for the trailing comma after joining.
        let cost = body.len() + 1;

        let mut slot = self.open.lock().await;
        if let Some(batch) = slot.as_ref() {
            let mut state = batch.state.lock().await;
            if state.accepting && state.body_size + cost <= self.config.max_batch_size {
                state.admit(operation, body, cost, tx);
                return rx;
            }
        }

        // Open a fresh batch. The member is admitted under the state lock
        // before the deadline task can dispatch, so even a zero deadline
        // never drains an empty batch.
        let batch = Batch::open();
        let mut state = batch.state.lock().await;
        *slot = Some(batch.clone());
        let coordinator = self.clone();
        let deadline = self.config.batch_timeout;
        let pending = batch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            coordinator.dispatch(pending, next).await;
        });
        state.admit(operation, body, cost, tx);
        rx
    }

    /// Close the batch and send its members: a lone member goes out as a
    /// plain single request; two or more go out as one combined envelope,
    /// demultiplexed by position on the way back.
    async fn dispatch(&self, batch: Arc<Batch>, next: Call) {
        let members = {
            let mut state = batch.state.lock().await;
            state.accepting = false;
            std::mem::take(&mut state.members)
        };
        match members.len() {
            0 => {}
            1 => {
                let wrapper = members.into_iter().next().unwrap_or_else(|| unreachable!());
                let outcome = next(Request::Single(wrapper.operation.clone())).await;
                // A lone member gets the real outcome, never a
                // missing-position error.
                wrapper.complete(outcome);
            }
            n => {
                debug!(members = n, "dispatching combined batch call");
                self.dispatch_combined(members, next).await;
            }
        }
    }

    async fn dispatch_combined(&self, members: Vec<RequestWrapper>, next: Call) {
        let operations: Vec<Operation> =
            members.iter().map(|w| w.operation.clone()).collect();
        let mut combined = BatchRequest::new(operations);
        match &self.config.endpoint {
            BatchEndpoint::Default => {}
            BatchEndpoint::Static(url) => combined.set_url(url.clone()),
            BatchEndpoint::Thunk(thunk) => {
                let url = thunk(combined.operations());
                combined.set_url(url);
            }
        }

        let expected = members.len();
        match next(Request::Batch(combined)).await {
            Ok(response) => {
                let items = match response.json().and_then(Value::as_array) {
                    Some(items) => items.clone(),
                    None => {
                        warn!("combined response is not an array; failing every member");
                        fail_all(members, Error::MalformedBatch);
                        return;
                    }
                };
                let mut slots: Vec<Option<RequestWrapper>> =
                    members.into_iter().map(Some).collect();
                for (index, payload) in items.iter().enumerate().take(slots.len()) {
                    // A null entry leaves its member to the finalize pass.
                    if payload.is_null() {
                        continue;
                    }
                    if let Some(wrapper) = slots[index].take() {
                        wrapper.complete(Ok(response.for_member(payload)));
                    }
                }
                // Finalize: the server returned fewer (or null) entries than
                // dispatched members.
                for (index, slot) in slots.into_iter().enumerate() {
                    if let Some(wrapper) = slot {
                        warn!(index, expected, "no entry in combined response for member");
                        wrapper.complete(Err(Error::MissingBatchPosition { index, expected }));
                    }
                }
            }
            // Transport failures and aborts apply to every member
            // identically; an abort is never converted into a
            // missing-position error.
            Err(err) => fail_all(members, err),
        }
    }
}

fn fail_all(members: Vec<RequestWrapper>, err: Error) {
    for wrapper in members {
        wrapper.complete(Err(err.clone()));
    }
}

impl Middleware for BatchMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let coordinator = self.clone();
            let next = next.clone();
            Box::pin(async move {
                let operation = match request {
                    Request::Single(op) => op,
                    Request::Batch(_) => {
                        return Err(Error::config(
                            "batch coordinator received an already-combined request; \
                             was BatchMiddleware registered twice?",
                        ));
                    }
                };
                if (operation.is_mutation() && !coordinator.config.allow_mutations)
                    || operation.is_multipart()
                    || operation.cache_directives().skip_batch
                {
                    return next(Request::Single(operation)).await;
                }
                let body = operation.body()?.to_string();
                let rx = coordinator.enqueue(operation, body, next).await;
                rx.await
                    .unwrap_or_else(|_| Err(Error::aborted("batch dispatch task dropped")))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpErrorInfo;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Terminal that records every request and answers combined envelopes
    /// with one `{"data":{"pos":i}}` entry per member (optionally truncated).
    struct RecordingTerminal {
        calls: Arc<AtomicUsize>,
        seen: Arc<StdMutex<Vec<Request>>>,
        truncate_to: Option<usize>,
    }

    impl RecordingTerminal {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(StdMutex::new(Vec::new())),
                truncate_to: None,
            }
        }

        fn truncating(len: usize) -> Self {
            Self {
                truncate_to: Some(len),
                ..Self::new()
            }
        }

        fn call(&self) -> Call {
            let calls = self.calls.clone();
            let seen = self.seen.clone();
            let truncate_to = self.truncate_to;
            Arc::new(move |request| {
                let calls = calls.clone();
                let seen = seen.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    seen.lock().unwrap().push(request.clone());
                    match request {
                        Request::Single(_) => {
                            Ok(Response::from_graphql(json!({ "data": { "single": true } })))
                        }
                        Request::Batch(batch) => {
                            let mut entries: Vec<Value> = (0..batch.len())
                                .map(|i| json!({ "data": { "pos": i } }))
                                .collect();
                            if let Some(len) = truncate_to {
                                entries.truncate(len);
                            }
                            Ok(Response::from_graphql(Value::Array(entries)))
                        }
                    }
                })
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn coordinator(config: BatchConfig) -> Arc<BatchMiddleware> {
        Arc::new(BatchMiddleware::new(config))
    }

    fn op(id: &str) -> Operation {
        Operation::query(format!("query {id} {{ f }}")).with_id(id)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_operations_share_one_combined_call() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(50)),
        )
        .apply(terminal.call());

        let (a, b, c) = tokio::join!(
            chain(Request::Single(op("A"))),
            chain(Request::Single(op("B"))),
            chain(Request::Single(op("C"))),
        );
        assert_eq!(terminal.calls(), 1);
        assert_eq!(a.unwrap().data().unwrap()["pos"], json!(0));
        assert_eq!(b.unwrap().data().unwrap()["pos"], json!(1));
        assert_eq!(c.unwrap().data().unwrap()["pos"], json!(2));

        let seen = terminal.seen.lock().unwrap();
        match &seen[0] {
            Request::Batch(batch) => {
                let ids: Vec<&str> = batch.operations().iter().map(Operation::id).collect();
                assert_eq!(ids, vec!["A", "B", "C"]);
            }
            other => panic!("expected combined request, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_submission_within_window_joins_the_batch() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(50)),
        )
        .apply(terminal.call());

        let early = tokio::spawn({
            let chain = chain.clone();
            async move {
                tokio::join!(
                    chain(Request::Single(op("1"))),
                    chain(Request::Single(op("2"))),
                )
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let third = chain(Request::Single(op("3"))).await.unwrap();

        let (first, second) = early.await.unwrap();
        assert!(first.unwrap().is_success() && second.unwrap().is_success());
        assert_eq!(third.data().unwrap()["pos"], json!(2));
        assert_eq!(terminal.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_in_separate_windows_make_separate_calls() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(50)),
        )
        .apply(terminal.call());

        chain(Request::Single(op("4"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(160)).await;
        chain(Request::Single(op("5"))).await.unwrap();
        assert_eq!(terminal.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lone_member_goes_out_without_an_envelope() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(BatchConfig::new()).apply(terminal.call());
        let response = chain(Request::Single(op("Solo"))).await.unwrap();
        assert_eq!(response.data().unwrap()["single"], json!(true));
        let seen = terminal.seen.lock().unwrap();
        assert!(matches!(seen[0], Request::Single(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn size_cap_splits_into_multiple_combined_calls() {
        let terminal = RecordingTerminal::new();
        // Each op body is well over 40 bytes, so two ops exceed the cap.
        let chain = coordinator(
            BatchConfig::new()
                .with_batch_timeout(Duration::from_millis(50))
                .with_max_batch_size(120),
        )
        .apply(terminal.call());

        let results = tokio::join!(
            chain(Request::Single(op("S1"))),
            chain(Request::Single(op("S2"))),
            chain(Request::Single(op("S3"))),
        );
        assert!(results.0.is_ok() && results.1.is_ok() && results.2.is_ok());
        assert!(terminal.calls() >= 2, "cap must split the batch");
        for request in terminal.seen.lock().unwrap().iter() {
            if let Request::Batch(batch) = request {
                assert!(batch.body().unwrap().len() <= 120);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn byte_identical_operations_coalesce() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(50)),
        )
        .apply(terminal.call());

        // Same id, query, and variables: byte-identical bodies.
        let (a, b, c) = tokio::join!(
            chain(Request::Single(op("Dup"))),
            chain(Request::Single(op("Dup"))),
            chain(Request::Single(op("Other"))),
        );
        assert_eq!(terminal.calls(), 1);
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.data(), b.data());
        assert_eq!(c.unwrap().data().unwrap()["pos"], json!(1));

        let seen = terminal.seen.lock().unwrap();
        match &seen[0] {
            Request::Batch(batch) => assert_eq!(batch.len(), 2),
            other => panic!("expected combined request, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_combined_response_fails_the_tail_members() {
        let terminal = RecordingTerminal::truncating(1);
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(50)),
        )
        .apply(terminal.call());

        let (a, b) = tokio::join!(
            chain(Request::Single(op("Ok"))),
            chain(Request::Single(op("Dropped"))),
        );
        assert!(a.is_ok());
        match b.unwrap_err() {
            Error::MissingBatchPosition { index, expected } => {
                assert_eq!(index, 1);
                assert_eq!(expected, 2);
            }
            other => panic!("expected missing-position error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_array_combined_response_fails_every_member() {
        let terminal: Call = Arc::new(|_request| {
            Box::pin(async { Ok(Response::from_graphql(json!({ "data": { "not": "array" } }))) })
        });
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(10)),
        )
        .apply(terminal);

        let (a, b) = tokio::join!(
            chain(Request::Single(op("X"))),
            chain(Request::Single(op("Y"))),
        );
        assert!(matches!(a.unwrap_err(), Error::MalformedBatch));
        assert!(matches!(b.unwrap_err(), Error::MalformedBatch));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_fans_out_to_every_member() {
        let terminal: Call = Arc::new(|_request| {
            Box::pin(async {
                Err(Error::Transport(HttpErrorInfo {
                    message: "connection refused".to_string(),
                    is_timeout: false,
                    is_connect: true,
                    is_request: false,
                }))
            })
        });
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(10)),
        )
        .apply(terminal);

        let (a, b) = tokio::join!(
            chain(Request::Single(op("X"))),
            chain(Request::Single(op("Y"))),
        );
        assert!(matches!(a.unwrap_err(), Error::Transport(_)));
        assert!(matches!(b.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_propagates_as_abort_not_missing_position() {
        let terminal: Call =
            Arc::new(|_request| Box::pin(async { Err(Error::aborted("cancelled")) }));
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(10)),
        )
        .apply(terminal);

        let (a, b) = tokio::join!(
            chain(Request::Single(op("X"))),
            chain(Request::Single(op("Y"))),
        );
        assert!(a.unwrap_err().is_abort());
        assert!(b.unwrap_err().is_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_classes_skip_the_coordinator() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(50)),
        )
        .apply(terminal.call());

        let mutation = Operation::mutation("mutation M { m }").with_id("M");
        chain(Request::Single(mutation)).await.unwrap();
        let opted_out = op("Skip").with_skip_batch();
        chain(Request::Single(opted_out)).await.unwrap();
        let upload = op("Up").with_uploadable(crate::types::Uploadable::new(
            "file0",
            "a.bin",
            "application/octet-stream",
            "x",
        ));
        chain(Request::Single(upload)).await.unwrap();

        // Three immediate single calls, no batch window involved.
        assert_eq!(terminal.calls(), 3);
        let seen = terminal.seen.lock().unwrap();
        assert!(seen.iter().all(|r| matches!(r, Request::Single(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_batch_when_explicitly_allowed() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new()
                .with_batch_timeout(Duration::from_millis(50))
                .with_allow_mutations(true),
        )
        .apply(terminal.call());

        let (a, b) = tokio::join!(
            chain(Request::Single(Operation::mutation("mutation A { a }").with_id("A"))),
            chain(Request::Single(Operation::mutation("mutation B { b }").with_id("B"))),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(terminal.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn double_registration_is_a_config_error() {
        let terminal = RecordingTerminal::new();
        let inner = coordinator(BatchConfig::new()).apply(terminal.call());
        let chain = coordinator(
            BatchConfig::new().with_batch_timeout(Duration::from_millis(10)),
        )
        .apply(inner);

        let (a, b) = tokio::join!(
            chain(Request::Single(op("X"))),
            chain(Request::Single(op("Y"))),
        );
        assert!(matches!(a.unwrap_err(), Error::Config { .. }));
        assert!(matches!(b.unwrap_err(), Error::Config { .. }));
        assert_eq!(terminal.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn combined_call_uses_the_configured_batch_url() {
        let terminal = RecordingTerminal::new();
        let chain = coordinator(
            BatchConfig::new()
                .with_batch_timeout(Duration::from_millis(10))
                .with_batch_url("http://host.test/graphql/batch"),
        )
        .apply(terminal.call());

        let _ = tokio::join!(
            chain(Request::Single(op("X"))),
            chain(Request::Single(op("Y"))),
        );
        let seen = terminal.seen.lock().unwrap();
        assert_eq!(seen[0].url(), Some("http://host.test/graphql/batch"));
    }
}
