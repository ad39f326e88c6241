use crate::SdkResult;
use crate::auth::{LoginRequest, LoginResponse, SignupRequest};
use crate::error::*;
use examhub_core::*;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
pub struct ExamHubClient {
    client: Client,
    pub base_url: String,
    pub timeout: Duration,
    pub token: Option<String>,
}

impl ExamHubClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            token: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.server_url).with_timeout(Duration::from_secs(config.timeout_seconds))
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn authorized(&self, mut request: RequestBuilder) -> RequestBuilder {
        // 添加Authorization头如果有token
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.timeout(self.timeout)
    }

    async fn send(&self, request: RequestBuilder) -> SdkResult<Response> {
        let response = self.authorized(request).send().await?;
        check_status(response).await
    }

    async fn get_list<T>(&self, endpoint: &str) -> SdkResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.send(self.client.get(self.api_url(endpoint))).await?;
        let list: Option<Vec<T>> = response.json().await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn login(&self, username: &str, password: &str) -> SdkResult<LoginResponse> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .send(self.client.post(self.api_url("auth/login")).json(&request))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn signup(&self, username: &str, password: &str, roles: &[String]) -> SdkResult<Value> {
        let request = SignupRequest {
            username: username.to_string(),
            password: password.to_string(),
            roles: roles.to_vec(),
        };
        let response = self
            .send(self.client.post(self.api_url("auth/signup")).json(&request))
            .await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    /// 当前用户的通知，服务端顺序（最新在前）
    pub async fn get_user_notifications(&self) -> SdkResult<Vec<Notification>> {
        self.get_list("notifications").await
    }

    pub async fn mark_user_as_read(&self, id: i64) -> SdkResult<()> {
        let url = self.api_url(&format!("notifications/{id}/read"));
        self.send(self.client.put(url)).await?;
        Ok(())
    }

    pub async fn get_notifications(&self) -> SdkResult<Vec<Notification>> {
        self.get_list("admin/notifications").await
    }

    pub async fn get_all_notifications(&self) -> SdkResult<Vec<Notification>> {
        self.get_list("admin/notifications/all").await
    }

    pub async fn create_notification(&self, input: &NotificationInput) -> SdkResult<()> {
        let url = self.api_url("admin/notifications");
        self.send(self.client.post(url).json(input)).await?;
        Ok(())
    }

    pub async fn mark_as_read(&self, id: i64) -> SdkResult<()> {
        let url = self.api_url(&format!("admin/notifications/{id}/read"));
        self.send(self.client.put(url)).await?;
        Ok(())
    }

    /// `GET /api/notifications/stream?token=<bearer>`
    pub fn stream_url(&self, token: &str) -> SdkResult<Url> {
        let mut url = Url::parse(&self.api_url("notifications/stream"))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

async fn check_status(response: Response) -> SdkResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(SdkError::Unauthorized);
    }
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let mut message = error_message(&body);
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }
    Err(SdkError::ApiError {
        status: status.as_u16(),
        message,
    })
}

/// Server errors arrive as a bare string, a `{"message": ...}` object, or
/// arbitrary JSON.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(text)) => text,
        Ok(Value::Object(map)) => match map.get("message") {
            Some(Value::String(text)) => text.clone(),
            _ => Value::Object(map).to_string(),
        },
        Ok(other) => other.to_string(),
        Err(_) => body.trim().to_string(),
    }
}
