use crate::cache::NotificationCache;
use crate::holder::{REFETCH_DEBOUNCE, StreamHolder};
use examhub_sdk::{AppConfig, ExamHubClient, Notification, StreamEvent, TokenProvider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, trace, warn};

/// Default wait for the stream's `connected` event.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy)]
pub struct BellConfig {
    pub liveness_timeout: Duration,
    pub refetch_debounce: Duration,
}

impl Default for BellConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: LIVENESS_TIMEOUT,
            refetch_debounce: REFETCH_DEBOUNCE,
        }
    }
}

impl From<&AppConfig> for BellConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            liveness_timeout: Duration::from_millis(config.liveness_timeout_ms),
            refetch_debounce: Duration::from_millis(config.refetch_debounce_ms),
        }
    }
}

/// 铃铛缓存的变更通知
#[derive(Debug, Clone)]
pub enum BellUpdate {
    /// 实时推送的新通知
    Pushed(Notification),
    /// 全量刷新完成，携带记录数
    Refreshed(usize),
    MarkedRead(i64),
}

/// One notification-bell instance: its own cache plus the shared stream.
#[derive(Clone)]
pub struct NotificationBell {
    inner: Arc<BellInner>,
}

struct BellInner {
    holder: Arc<StreamHolder>,
    client: ExamHubClient,
    auth: Arc<dyn TokenProvider>,
    config: BellConfig,
    cache: Mutex<NotificationCache>,
    open: AtomicBool,
    updates: broadcast::Sender<BellUpdate>,
}

impl NotificationBell {
    pub fn new(
        holder: Arc<StreamHolder>,
        client: ExamHubClient,
        auth: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_config(holder, client, auth, BellConfig::default())
    }

    pub fn with_config(
        holder: Arc<StreamHolder>,
        client: ExamHubClient,
        auth: Arc<dyn TokenProvider>,
        config: BellConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(BellInner {
                holder,
                client,
                auth,
                config,
                cache: Mutex::new(NotificationCache::new()),
                open: AtomicBool::new(false),
                updates,
            }),
        }
    }

    /// Attaches this instance to the shared stream.
    ///
    /// Returns `None` without touching the network when nobody is logged in
    /// or the token is missing or expired.
    pub fn mount(&self) -> Option<MountedBell> {
        let inner = &self.inner;
        let Some(user) = inner.auth.current_user() else {
            debug!("no logged-in user, bell stays offline");
            return None;
        };
        if !inner.auth.is_token_valid() {
            debug!(user = %user.username, "token missing or expired, bell stays offline");
            return None;
        }
        let token = inner.auth.token()?;

        let lease = inner.holder.acquire(&token);
        let generation = lease.generation;

        let liveness = if lease.already_connected {
            None
        } else {
            Some(spawn_liveness_timer(
                Arc::clone(&inner.holder),
                generation,
                inner.config.liveness_timeout,
            ))
        };

        let dispatch = tokio::spawn(dispatch(
            Arc::clone(inner),
            generation,
            lease.events,
            liveness.as_ref().map(JoinHandle::abort_handle),
        ));

        if lease.already_connected {
            // 加入已连接的流，等同于收到 connected
            inner.on_connected();
        }

        debug!(user = %user.username, generation, "bell mounted");
        Some(MountedBell {
            bell: self.clone(),
            generation,
            dispatch,
            liveness,
        })
    }

    /// Fire-and-forget full refresh; failures are logged and swallowed.
    pub fn refresh(&self) -> JoinHandle<()> {
        spawn_refresh(Arc::clone(&self.inner))
    }

    /// Opens or closes the dropdown. Opening refreshes the list.
    pub fn toggle(&self) -> bool {
        let was_open = self.inner.open.fetch_xor(true, Ordering::SeqCst);
        if !was_open {
            self.refresh();
        }
        !was_open
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Marks a notification read locally right away, then acknowledges it
    /// with the server. A failed acknowledgement is not rolled back.
    pub fn mark_read(&self, id: i64) -> JoinHandle<()> {
        if self.inner.cache().mark_read_locally(id) {
            let _ = self.inner.updates.send(BellUpdate::MarkedRead(id));
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.authorized_client().mark_user_as_read(id).await {
                if e.is_unauthorized() {
                    inner.auth.invalidate();
                }
                warn!(id, error = %e, "failed to acknowledge notification read");
            }
        })
    }

    pub fn unread_count(&self) -> usize {
        self.inner.cache().unread_count()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.cache().records().to_vec()
    }

    pub fn updates(&self) -> broadcast::Receiver<BellUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn holder(&self) -> &Arc<StreamHolder> {
        &self.inner.holder
    }
}

impl BellInner {
    fn cache(&self) -> MutexGuard<'_, NotificationCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn authorized_client(&self) -> ExamHubClient {
        let mut client = self.client.clone();
        if let Some(token) = self.auth.token() {
            client.set_token(&token);
        }
        client
    }

    fn on_connected(self: &Arc<Self>) {
        if self
            .holder
            .should_refetch(Instant::now(), self.config.refetch_debounce)
        {
            spawn_refresh(Arc::clone(self));
        } else {
            trace!("refresh skipped, fetched recently");
        }
    }

    fn apply_push(&self, data: &str) {
        match serde_json::from_str::<Notification>(data) {
            Ok(record) => {
                debug!(id = record.id, "live notification received");
                self.cache().prepend(record.clone());
                let _ = self.updates.send(BellUpdate::Pushed(record));
            }
            Err(e) => warn!(error = %e, "invalid notification event discarded"),
        }
    }
}

fn spawn_refresh(inner: Arc<BellInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match inner.authorized_client().get_user_notifications().await {
            Ok(records) => {
                let count = records.len();
                inner.cache().replace_all(records);
                let _ = inner.updates.send(BellUpdate::Refreshed(count));
            }
            Err(e) => {
                if e.is_unauthorized() {
                    inner.auth.invalidate();
                }
                warn!(error = %e, "failed to refresh notifications");
            }
        }
    })
}

fn spawn_liveness_timer(
    holder: Arc<StreamHolder>,
    generation: u64,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if holder.fail(generation) {
            warn!(
                generation,
                timeout_ms = timeout.as_millis() as u64,
                "no connected event from notification stream, closed"
            );
        }
    })
}

async fn dispatch(
    inner: Arc<BellInner>,
    generation: u64,
    mut events: broadcast::Receiver<StreamEvent>,
    liveness: Option<AbortHandle>,
) {
    loop {
        match events.recv().await {
            Ok(StreamEvent::Connected) => {
                if let Some(timer) = &liveness {
                    timer.abort();
                }
                inner.holder.mark_connected(generation);
                inner.on_connected();
            }
            Ok(StreamEvent::Notification { data }) => inner.apply_push(&data),
            Ok(StreamEvent::Heartbeat) => {}
            Ok(StreamEvent::Other { event, .. }) => trace!(%event, "unhandled stream event"),
            Ok(StreamEvent::Error { message }) => debug!(%message, "stream transport error"),
            Ok(StreamEvent::Closed) | Err(RecvError::Closed) => {
                if inner.holder.retire(generation) {
                    debug!(generation, "stream ended, connection retired");
                }
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "bell lagged behind the notification stream");
            }
        }
    }
}

/// A mounted bell. Dropping it unmounts.
pub struct MountedBell {
    bell: NotificationBell,
    generation: u64,
    dispatch: JoinHandle<()>,
    liveness: Option<JoinHandle<()>>,
}

impl MountedBell {
    pub fn bell(&self) -> &NotificationBell {
        &self.bell
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn unmount(self) {
        drop(self);
    }

    /// Unmounts and mounts again under whatever token is current now.
    pub fn remount(self) -> Option<MountedBell> {
        let bell = self.bell.clone();
        drop(self);
        bell.mount()
    }
}

impl Drop for MountedBell {
    fn drop(&mut self) {
        // 先注销事件处理，再释放连接
        self.dispatch.abort();
        self.bell.inner.holder.release(self.generation);
        if let Some(timer) = &self.liveness {
            timer.abort();
        }
        debug!(generation = self.generation, "bell unmounted");
    }
}
