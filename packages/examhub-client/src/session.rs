use anyhow::{Context, Result};
use examhub_sdk::auth::LoginResponse;
use examhub_sdk::{ExamHubClient, TokenProvider};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// 当前登录凭据，可选地持久化到文件
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<String>>,
    path: Option<PathBuf>,
}

impl Session {
    pub fn in_memory(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            path: None,
        }
    }

    /// Loads the token stored at `path`, if any.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let token = match std::fs::read_to_string(&path) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("reading token file {}", path.display()));
            }
        };
        debug!(path = %path.display(), has_token = token.is_some(), "session loaded");
        Ok(Self {
            token: RwLock::new(token),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            std::fs::write(path, token)
                .with_context(|| format!("writing token file {}", path.display()))?;
        }
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("removing token file {}", path.display()));
                }
            }
        }
        Ok(())
    }

    pub async fn login(
        &self,
        client: &ExamHubClient,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse> {
        let response = client.login(username, password).await?;
        self.set_token(&response.token)?;
        Ok(response)
    }

    /// Client carrying the current token, if any.
    pub fn authorized(&self, client: &ExamHubClient) -> ExamHubClient {
        let mut client = client.clone();
        match self.token() {
            Some(token) => client.set_token(&token),
            None => client.clear_token(),
        }
        client
    }
}

impl TokenProvider for Session {
    fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn invalidate(&self) {
        warn!("token invalid or expired, clearing session");
        if let Err(e) = self.logout() {
            warn!(error = %e, "failed to clear stored token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_token_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("examhub-{}-{}-{}", name, std::process::id(), nanos))
            .join("token")
    }

    #[test]
    fn test_session_persists_token() {
        let path = temp_token_path("persist");

        let session = Session::load(&path).unwrap();
        assert_eq!(session.token(), None);

        session.set_token("abc.def.ghi").unwrap();
        assert_eq!(session.token().as_deref(), Some("abc.def.ghi"));

        let reloaded = Session::load(&path).unwrap();
        assert_eq!(reloaded.token().as_deref(), Some("abc.def.ghi"));

        reloaded.logout().unwrap();
        assert!(!path.exists());
        assert_eq!(Session::load(&path).unwrap().token(), None);
    }

    #[test]
    fn test_invalidate_clears_memory_session() {
        let session = Session::in_memory(Some("t".to_string()));
        session.invalidate();
        assert_eq!(session.token(), None);
        assert!(!session.is_token_valid());
    }

    #[test]
    fn test_authorized_client_tracks_token() {
        let client = ExamHubClient::new("http://localhost:8080");
        let session = Session::in_memory(None);
        assert_eq!(session.authorized(&client).token, None);

        session.set_token("jwt").unwrap();
        assert_eq!(session.authorized(&client).token.as_deref(), Some("jwt"));
    }
}
