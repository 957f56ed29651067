use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::auth::session::ProviderCredential;
use crate::error::FetchError;

/// Name/email pair reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Exchanges a provider credential for the caller's profile.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch(&self, credential: &ProviderCredential) -> Result<Profile, FetchError>;
}

/// Subset of the OpenID Connect userinfo response.
#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

pub struct HttpProfileFetcher {
    client: reqwest::Client,
    userinfo_url: String,
}

impl HttpProfileFetcher {
    pub fn new(userinfo_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            userinfo_url: userinfo_url.into(),
        })
    }
}

#[async_trait]
impl ProfileFetcher for HttpProfileFetcher {
    async fn fetch(&self, credential: &ProviderCredential) -> Result<Profile, FetchError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "error requesting user info");
                FetchError::Transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, "identity provider rejected user info request");
            return Err(FetchError::Status(status.as_u16()));
        }

        let info = response.json::<UserInfo>().await.map_err(|e| {
            error!(error = ?e, "error parsing user info");
            FetchError::Transport(e)
        })?;

        let email = info
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| is_valid_email(e))
            .ok_or(FetchError::MissingEmail)?;

        debug!(%email, "profile fetched");
        Ok(Profile {
            name: info.name.unwrap_or_default(),
            email,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Answers every fetch with a fixed profile and counts the calls.
    pub struct StubFetcher {
        profile: Option<Profile>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        pub fn returning(name: &str, email: &str) -> Self {
            Self {
                profile: Some(Profile {
                    name: name.into(),
                    email: email.into(),
                }),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                profile: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProfileFetcher for StubFetcher {
        async fn fetch(&self, _credential: &ProviderCredential) -> Result<Profile, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.profile.clone().ok_or(FetchError::Status(500))
        }
    }
}
