use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知记录
///
/// 服务端创建，通过首次拉取或实时推送各送达一次；客户端只会修改 `is_read`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub message: String,
    #[serde(default, alias = "read")]
    pub is_read: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub recipient_username: Option<String>,
}

/// 当前登录用户（来自 JWT 的 `sub` 与 `roles`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub username: String,
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// 管理员创建通知的输入参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInput {
    pub message: String,
    pub target_username: Option<String>,
    pub target_role: Option<String>,
    pub to_all: bool,
}

/// 通知流上的具名事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// 服务端确认连接建立
    Connected,
    /// 心跳包，仅用于保活
    Heartbeat,
    /// 推送的通知，`data` 为未解析的 JSON 文本
    Notification { data: String },
    /// 未识别的事件名
    Other { event: String, data: String },
    /// 传输层错误（不一定意味着连接结束）
    Error { message: String },
    /// 传输层已结束
    Closed,
}

impl StreamEvent {
    pub const CONNECTED: &'static str = "connected";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const NOTIFICATION: &'static str = "notification";

    /// Maps an SSE `event:` name and its data onto a stream event.
    pub fn from_named(event: &str, data: String) -> Self {
        match event {
            Self::CONNECTED => StreamEvent::Connected,
            Self::HEARTBEAT => StreamEvent::Heartbeat,
            Self::NOTIFICATION => StreamEvent::Notification { data },
            other => StreamEvent::Other {
                event: other.to_string(),
                data,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StreamEvent::Connected => Self::CONNECTED,
            StreamEvent::Heartbeat => Self::HEARTBEAT,
            StreamEvent::Notification { .. } => Self::NOTIFICATION,
            StreamEvent::Other { event, .. } => event,
            StreamEvent::Error { .. } => "error",
            StreamEvent::Closed => "closed",
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server_url: String,
    pub timeout_seconds: u64,
    /// 打开流后等待 `connected` 的时长
    pub liveness_timeout_ms: u64,
    /// 重连时全量刷新的去抖窗口
    pub refetch_debounce_ms: u64,
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            timeout_seconds: 30,
            liveness_timeout_ms: 5000,
            refetch_debounce_ms: 5000,
            reconnect: true,
            reconnect_delay_ms: 3000,
        }
    }
}

/// Parses either an RFC 3339 timestamp or a naive ISO-8601 one (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
