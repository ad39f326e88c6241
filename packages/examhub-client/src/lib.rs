pub mod bell;
pub mod cache;
pub mod holder;
pub mod session;

#[cfg(test)]
mod testing;

pub use bell::{BellConfig, BellUpdate, MountedBell, NotificationBell};
pub use cache::NotificationCache;
pub use holder::{Lease, StreamHolder};
pub use session::Session;

use examhub_sdk::{AppConfig, ExamHubClient, Notification, SseTransport};
use std::sync::Arc;

/// Wires a bell onto the process-wide stream holder.
pub fn shared_bell(
    client: &ExamHubClient,
    session: Arc<Session>,
    config: &AppConfig,
) -> NotificationBell {
    let transport = SseTransport::from_config(client.clone(), config);
    let holder = StreamHolder::shared(Arc::new(transport));
    NotificationBell::with_config(holder, client.clone(), session, BellConfig::from(config))
}

/// 格式化通知显示
pub fn format_notification(notification: &Notification) -> String {
    let marker = if notification.is_read { " " } else { "●" };
    let recipient = notification
        .recipient_username
        .as_deref()
        .map(|r| format!(" → {}", r))
        .unwrap_or_default();
    format!(
        "{} #{} {}{}\n   {}",
        marker,
        notification.id,
        notification.created_at.format("%Y-%m-%d %H:%M:%S"),
        recipient,
        notification.message
    )
}
