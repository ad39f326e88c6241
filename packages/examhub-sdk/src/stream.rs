use crate::SdkResult;
use crate::client::ExamHubClient;
use crate::error::SdkError;
use eventsource_client::{self as es, Client};
use examhub_core::{AppConfig, StreamEvent};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

/// An open push channel. Closing it stops event delivery.
pub trait TransportHandle: Send {
    fn close(&mut self);
}

/// Opens push channels bound to a bearer credential.
///
/// `open` must return immediately; connecting happens in the background and
/// every decoded event is forwarded to `events`. Connection failures are
/// reported through `events` as [`StreamEvent::Error`]/[`StreamEvent::Closed`],
/// never as a return value.
pub trait StreamTransport: Send + Sync {
    fn open(
        &self,
        credential: &str,
        events: broadcast::Sender<StreamEvent>,
    ) -> Box<dyn TransportHandle>;
}

/// SSE transport for `GET /api/notifications/stream`.
#[derive(Clone)]
pub struct SseTransport {
    client: ExamHubClient,
    reconnect: bool,
    reconnect_delay: Duration,
}

impl SseTransport {
    pub fn new(client: ExamHubClient) -> Self {
        Self {
            client,
            reconnect: true,
            reconnect_delay: Duration::from_secs(3),
        }
    }

    pub fn from_config(client: ExamHubClient, config: &AppConfig) -> Self {
        Self::new(client)
            .with_reconnect(config.reconnect)
            .with_reconnect_delay(Duration::from_millis(config.reconnect_delay_ms))
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn reconnect_options(&self) -> es::ReconnectOptions {
        // 首次连接失败不重试，交给下一次挂载
        es::ReconnectOptions::reconnect(self.reconnect)
            .retry_initial(false)
            .delay(self.reconnect_delay)
            .backoff_factor(2)
            .delay_max(Duration::from_secs(60))
            .build()
    }
}

fn build_client(url: SdkResult<Url>, reconnect: es::ReconnectOptions) -> SdkResult<impl Client> {
    let url = url?;
    let client = es::ClientBuilder::for_url(url.as_str())
        .map_err(|e| SdkError::StreamError(format!("{:?}", e)))?
        .reconnect(reconnect)
        .build();
    Ok(client)
}

impl StreamTransport for SseTransport {
    fn open(
        &self,
        credential: &str,
        events: broadcast::Sender<StreamEvent>,
    ) -> Box<dyn TransportHandle> {
        let url = self.client.stream_url(credential);
        let reconnect = self.reconnect_options();
        let base_url = self.client.base_url.clone();

        let task = tokio::spawn(async move {
            let client = match build_client(url, reconnect) {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "failed to open notification stream");
                    let _ = events.send(StreamEvent::Error {
                        message: e.to_string(),
                    });
                    let _ = events.send(StreamEvent::Closed);
                    return;
                }
            };

            debug!(server = %base_url, "notification stream opening");
            let mut stream = client.stream();
            loop {
                match stream.next().await {
                    Some(Ok(es::SSE::Event(event))) => {
                        trace!(event = %event.event_type, "stream event");
                        // 没有订阅者时忽略
                        let _ = events.send(StreamEvent::from_named(&event.event_type, event.data));
                    }
                    Some(Ok(es::SSE::Comment(_))) => {}
                    Some(Err(e)) => {
                        warn!(server = %base_url, error = %e, "notification stream error");
                        let _ = events.send(StreamEvent::Error {
                            message: e.to_string(),
                        });
                    }
                    None => {
                        debug!(server = %base_url, "notification stream ended");
                        let _ = events.send(StreamEvent::Closed);
                        break;
                    }
                }
            }
        });

        Box::new(SseHandle { task })
    }
}

struct SseHandle {
    task: JoinHandle<()>,
}

impl TransportHandle for SseHandle {
    fn close(&mut self) {
        self.task.abort();
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
