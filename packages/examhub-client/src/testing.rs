use examhub_sdk::{StreamEvent, StreamTransport, TransportHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// In-memory transport that records every open/close.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    inner: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    opened: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    log: Mutex<Vec<String>>,
    latest: Mutex<Option<broadcast::Sender<StreamEvent>>>,
}

impl FakeTransport {
    pub(crate) fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub(crate) fn max_live(&self) -> usize {
        self.inner.max_live.load(Ordering::SeqCst)
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    /// Pushes an event on the most recently opened connection.
    pub(crate) fn emit(&self, event: StreamEvent) {
        if let Some(tx) = self.inner.latest.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl StreamTransport for FakeTransport {
    fn open(
        &self,
        credential: &str,
        events: broadcast::Sender<StreamEvent>,
    ) -> Box<dyn TransportHandle> {
        let state = &self.inner;
        state.opened.fetch_add(1, Ordering::SeqCst);
        let live = state.live.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_live.fetch_max(live, Ordering::SeqCst);
        state.log.lock().unwrap().push(format!("open:{credential}"));
        *state.latest.lock().unwrap() = Some(events);

        Box::new(FakeHandle {
            state: Arc::clone(&self.inner),
            credential: credential.to_string(),
            closed: false,
        })
    }
}

struct FakeHandle {
    state: Arc<FakeState>,
    credential: String,
    closed: bool,
}

impl TransportHandle for FakeHandle {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state.live.fetch_sub(1, Ordering::SeqCst);
        self.state
            .log
            .lock()
            .unwrap()
            .push(format!("close:{}", self.credential));
        *self.state.latest.lock().unwrap() = None;
    }
}

/// Unsigned JWT for `sub` expiring `ttl_secs` from now (negative = expired).
pub(crate) fn valid_token(sub: &str, ttl_secs: i64) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let exp = chrono::Utc::now().timestamp() + ttl_secs;
    let payload = serde_json::json!({ "sub": sub, "roles": ["ROLE_STUDENT"], "exp": exp });
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}
