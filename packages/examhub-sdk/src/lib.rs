pub mod auth;
pub mod client;
pub mod error;
pub mod stream;

pub use auth::{JwtClaims, StaticToken, TokenProvider, decode_claims};
pub use client::ExamHubClient;
pub use error::{SdkError, SdkResult};
pub use examhub_core::*;
pub use stream::{SseTransport, StreamTransport, TransportHandle};
