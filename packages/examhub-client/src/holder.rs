use examhub_sdk::{StreamEvent, StreamTransport, TransportHandle};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_BUFFER: usize = 64;

/// Default window for [`StreamHolder::should_refetch`].
pub const REFETCH_DEBOUNCE: Duration = Duration::from_millis(5000);

static SHARED: OnceLock<Arc<StreamHolder>> = OnceLock::new();

/// Owns the single shared notification stream.
///
/// Any number of bell instances may depend on the stream at once; the holder
/// keeps at most one connection open, bound to the credential it was opened
/// with, and closes it when the last dependent releases it.
pub struct StreamHolder {
    transport: Arc<dyn StreamTransport>,
    state: Mutex<HolderState>,
}

#[derive(Default)]
struct HolderState {
    connection: Option<ActiveConnection>,
    listener_count: usize,
    last_fetch_at: Option<Instant>,
    next_generation: u64,
}

struct ActiveConnection {
    generation: u64,
    credential: String,
    events: broadcast::Sender<StreamEvent>,
    handle: Box<dyn TransportHandle>,
    connected: bool,
}

/// One dependent's claim on the shared connection.
pub struct Lease {
    /// Identifies the connection this lease belongs to.
    pub generation: u64,
    pub events: broadcast::Receiver<StreamEvent>,
    /// The stream had already reported `connected` when this lease was taken.
    pub already_connected: bool,
}

impl StreamHolder {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(HolderState::default()),
        }
    }

    /// Process-wide holder. The transport is only used by the first call.
    pub fn shared(transport: Arc<dyn StreamTransport>) -> Arc<StreamHolder> {
        SHARED
            .get_or_init(|| Arc::new(StreamHolder::new(transport)))
            .clone()
    }

    fn state(&self) -> MutexGuard<'_, HolderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquire(&self, credential: &str) -> Lease {
        let mut state = self.state();

        let stale = state
            .connection
            .as_ref()
            .is_some_and(|conn| conn.credential != credential);
        if stale {
            debug!("credential changed, replacing notification stream");
            close_locked(&mut state);
        }

        let HolderState {
            connection,
            listener_count,
            next_generation,
            ..
        } = &mut *state;
        let mut first_receiver = None;
        let conn = connection.get_or_insert_with(|| {
            *next_generation += 1;
            let generation = *next_generation;
            let (events, receiver) = broadcast::channel(EVENT_BUFFER);
            // 先订阅再启动传输，避免丢失最早的事件
            first_receiver = Some(receiver);
            let handle = self.transport.open(credential, events.clone());
            debug!(generation, "notification stream opened");
            ActiveConnection {
                generation,
                credential: credential.to_string(),
                events,
                handle,
                connected: false,
            }
        });

        *listener_count += 1;
        debug!(generation = conn.generation, listeners = *listener_count, "stream acquired");

        Lease {
            generation: conn.generation,
            events: first_receiver.unwrap_or_else(|| conn.events.subscribe()),
            already_connected: conn.connected,
        }
    }

    /// Drops one dependent. The last release of the current connection closes it.
    ///
    /// Releases for a connection that was already replaced or failed are
    /// ignored so they can never close its successor.
    pub fn release(&self, generation: u64) {
        let mut state = self.state();
        let current = state
            .connection
            .as_ref()
            .is_some_and(|conn| conn.generation == generation);
        if !current {
            debug!(generation, "release of a retired stream ignored");
            return;
        }

        state.listener_count = state.listener_count.saturating_sub(1);
        debug!(generation, listeners = state.listener_count, "stream released");
        if state.listener_count == 0 {
            close_locked(&mut state);
        }
    }

    /// Records that the stream reported `connected`.
    pub fn mark_connected(&self, generation: u64) {
        let mut state = self.state();
        if let Some(conn) = state.connection.as_mut() {
            if conn.generation == generation {
                conn.connected = true;
            }
        }
    }

    /// Tears the connection down after a failed start so the next mount can
    /// retry from scratch. Returns whether anything was closed.
    pub fn fail(&self, generation: u64) -> bool {
        let mut state = self.state();
        let current = state
            .connection
            .as_ref()
            .is_some_and(|conn| conn.generation == generation && !conn.connected);
        if current {
            close_locked(&mut state);
        }
        current
    }

    /// Drops a connection whose stream has ended, connected or not, so the
    /// next acquire opens a fresh one. Returns whether anything was closed.
    pub fn retire(&self, generation: u64) -> bool {
        let mut state = self.state();
        let current = state
            .connection
            .as_ref()
            .is_some_and(|conn| conn.generation == generation);
        if current {
            close_locked(&mut state);
        }
        current
    }

    /// True (and records `now`) when no fetch happened yet or the last one is
    /// older than `window`.
    pub fn should_refetch(&self, now: Instant, window: Duration) -> bool {
        let mut state = self.state();
        let due = match state.last_fetch_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > window,
        };
        if due {
            state.last_fetch_at = Some(now);
        }
        due
    }

    pub fn is_open(&self) -> bool {
        self.state().connection.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state()
            .connection
            .as_ref()
            .is_some_and(|conn| conn.connected)
    }

    pub fn listener_count(&self) -> usize {
        self.state().listener_count
    }

    pub fn credential(&self) -> Option<String> {
        self.state()
            .connection
            .as_ref()
            .map(|conn| conn.credential.clone())
    }

    pub fn generation(&self) -> Option<u64> {
        self.state().connection.as_ref().map(|conn| conn.generation)
    }
}

// 关闭连接并清空凭据与计数；旧租约随之失效
fn close_locked(state: &mut HolderState) {
    if let Some(mut conn) = state.connection.take() {
        conn.handle.close();
        debug!(generation = conn.generation, "notification stream closed");
    }
    state.listener_count = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    fn holder() -> (StreamHolder, FakeTransport) {
        let transport = FakeTransport::default();
        (StreamHolder::new(Arc::new(transport.clone())), transport)
    }

    #[test]
    fn test_many_mounts_share_one_connection() {
        let (holder, transport) = holder();

        let leases: Vec<Lease> = (0..5).map(|_| holder.acquire("t1")).collect();
        assert_eq!(transport.opened(), 1);
        assert_eq!(holder.listener_count(), 5);
        assert!(leases.iter().all(|l| l.generation == leases[0].generation));

        for lease in &leases[..4] {
            holder.release(lease.generation);
            assert!(holder.is_open());
        }
        holder.release(leases[4].generation);

        assert!(!holder.is_open());
        assert_eq!(holder.credential(), None);
        assert_eq!(transport.live(), 0);
        assert_eq!(transport.max_live(), 1);
    }

    #[test]
    fn test_interleaved_mounts_never_open_two() {
        let (holder, transport) = holder();

        let a = holder.acquire("t1");
        let b = holder.acquire("t1");
        holder.release(a.generation);
        let c = holder.acquire("t1");
        holder.release(b.generation);
        assert!(holder.is_open());
        holder.release(c.generation);

        assert!(!holder.is_open());
        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.max_live(), 1);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let (holder, transport) = holder();
        let lease = holder.acquire("t1");
        holder.release(lease.generation);
        holder.release(lease.generation);

        assert_eq!(holder.listener_count(), 0);

        let again = holder.acquire("t1");
        assert_eq!(holder.listener_count(), 1);
        assert_ne!(again.generation, lease.generation);
        assert_eq!(transport.opened(), 2);
    }

    #[test]
    fn test_credential_change_closes_before_reopen() {
        let (holder, transport) = holder();

        let old = holder.acquire("t1");
        let _other = holder.acquire("t1");
        let new = holder.acquire("t2");

        assert_eq!(transport.log(), vec!["open:t1", "close:t1", "open:t2"]);
        assert_eq!(transport.max_live(), 1);
        assert_eq!(holder.credential().as_deref(), Some("t2"));
        assert_eq!(holder.listener_count(), 1);

        // 旧凭据的实例卸载不影响新连接
        holder.release(old.generation);
        assert!(holder.is_open());
        holder.release(new.generation);
        assert!(!holder.is_open());
    }

    #[test]
    fn test_fail_resets_state_until_connected() {
        let (holder, transport) = holder();

        let lease = holder.acquire("t1");
        assert!(holder.fail(lease.generation));
        assert!(!holder.is_open());
        assert_eq!(holder.listener_count(), 0);
        assert_eq!(transport.live(), 0);

        // 已连接的流不会被判定失败
        let next = holder.acquire("t1");
        holder.mark_connected(next.generation);
        assert!(!holder.fail(next.generation));
        assert!(holder.is_open());

        let joined = holder.acquire("t1");
        assert!(joined.already_connected);
        assert!(!holder.fail(lease.generation));
    }

    #[test]
    fn test_retire_drops_ended_stream() {
        let (holder, transport) = holder();

        let lease = holder.acquire("t1");
        let _other = holder.acquire("t1");
        holder.mark_connected(lease.generation);
        assert!(holder.retire(lease.generation));
        assert!(!holder.is_open());
        assert_eq!(holder.listener_count(), 0);
        assert_eq!(transport.live(), 0);

        let next = holder.acquire("t1");
        assert!(!next.already_connected);
        assert_eq!(transport.opened(), 2);

        // 旧连接的结束事件不影响新连接
        assert!(!holder.retire(lease.generation));
        holder.release(lease.generation);
        assert!(holder.is_open());
        assert_eq!(holder.listener_count(), 1);
    }

    #[test]
    fn test_first_lease_sees_events_sent_during_open() {
        struct EndsImmediately;
        struct Nothing;
        impl TransportHandle for Nothing {
            fn close(&mut self) {}
        }
        impl StreamTransport for EndsImmediately {
            fn open(
                &self,
                _credential: &str,
                events: broadcast::Sender<StreamEvent>,
            ) -> Box<dyn TransportHandle> {
                let _ = events.send(StreamEvent::Error {
                    message: "connection refused".to_string(),
                });
                let _ = events.send(StreamEvent::Closed);
                Box::new(Nothing)
            }
        }

        let holder = StreamHolder::new(Arc::new(EndsImmediately));
        let mut lease = holder.acquire("t1");

        assert!(matches!(
            lease.events.try_recv().unwrap(),
            StreamEvent::Error { .. }
        ));
        assert_eq!(lease.events.try_recv().unwrap(), StreamEvent::Closed);
    }

    #[test]
    fn test_should_refetch_debounce() {
        let (holder, _) = holder();
        let t0 = Instant::now();

        assert!(holder.should_refetch(t0, REFETCH_DEBOUNCE));
        assert!(!holder.should_refetch(t0 + Duration::from_millis(1), REFETCH_DEBOUNCE));
        assert!(!holder.should_refetch(t0 + Duration::from_millis(5000), REFETCH_DEBOUNCE));
        assert!(holder.should_refetch(t0 + Duration::from_millis(5001), REFETCH_DEBOUNCE));
        assert!(!holder.should_refetch(t0 + Duration::from_millis(9000), REFETCH_DEBOUNCE));
        assert!(holder.should_refetch(t0 + Duration::from_millis(10_002), REFETCH_DEBOUNCE));
    }

    #[test]
    fn test_lease_receives_stream_events() {
        let (holder, transport) = holder();
        let mut lease = holder.acquire("t1");

        transport.emit(StreamEvent::Heartbeat);
        assert_eq!(lease.events.try_recv().unwrap(), StreamEvent::Heartbeat);
    }

    #[test]
    fn test_shared_holder_is_singleton() {
        let first = StreamHolder::shared(Arc::new(FakeTransport::default()));
        let second = StreamHolder::shared(Arc::new(FakeTransport::default()));
        assert!(Arc::ptr_eq(&first, &second));
    }
}
