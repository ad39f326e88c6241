use examhub_sdk::Notification;

/// 单个铃铛实例持有的通知列表，最新在前
#[derive(Debug, Clone, Default)]
pub struct NotificationCache {
    records: Vec<Notification>,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full refresh: the server's order is kept as-is.
    pub fn replace_all(&mut self, records: Vec<Notification>) {
        self.records = records;
    }

    /// Live push. Ids are not de-duplicated.
    pub fn prepend(&mut self, record: Notification) {
        self.records.insert(0, record);
    }

    /// Flips `is_read` on every record with this id. Returns whether any matched.
    pub fn mark_read_locally(&mut self, id: i64) -> bool {
        let mut found = false;
        for record in self.records.iter_mut().filter(|r| r.id == id) {
            record.is_read = true;
            found = true;
        }
        found
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_read).count()
    }

    pub fn records(&self) -> &[Notification] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn note(id: i64, is_read: bool) -> Notification {
    Notification {
        id,
        message: format!("message {id}"),
        is_read,
        created_at: chrono::Utc::now(),
        recipient_username: None,
    }
}
