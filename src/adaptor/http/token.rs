use std::time::{Duration, Instant};

use async_lock::Mutex;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::adaptor::datastore::TokenProvider;
use crate::error::{internal_error, unauthenticated, DbResult};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// Refresh a little before the advertised expiry.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// OAuth access tokens from the compute metadata server, cached until they
/// are about to expire.
pub struct MetadataTokenProvider {
    client: Client,
    url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, METADATA_TOKEN_URL)
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> DbResult<MetadataToken> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|err| {
                unauthenticated(format!(
                    "Could not reach the metadata server for an access token: {err}"
                ))
            })?;
        if !response.status().is_success() {
            return Err(unauthenticated(format!(
                "Metadata server refused the token request ({})",
                response.status()
            )));
        }
        response
            .json::<MetadataToken>()
            .await
            .map_err(|err| internal_error(format!("Malformed metadata token response: {err}")))
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn get_token(&self) -> DbResult<Option<String>> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.token.clone()));
            }
        }

        let fetched = self.fetch().await?;
        let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(EXPIRY_SLACK);
        log::debug!("fetched access token from metadata server, valid for {lifetime:?}");
        *cached = Some(CachedToken {
            token: fetched.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(Some(fetched.access_token))
    }

    fn invalidate_token(&self) {
        if let Some(mut cached) = self.cached.try_lock() {
            *cached = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mock_server;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn caches_metadata_tokens() {
        let Some(server) = mock_server("caches_metadata_tokens") else {
            return;
        };
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/token")
                .header("Metadata-Flavor", "Google");
            then.status(200)
                .json_body(json!({ "access_token": "ya29.test", "expires_in": 3599 }));
        });

        let provider = MetadataTokenProvider::with_url(Client::new(), server.url("/token"));
        assert_eq!(provider.get_token().await.unwrap().as_deref(), Some("ya29.test"));
        assert_eq!(provider.get_token().await.unwrap().as_deref(), Some("ya29.test"));
        assert!(provider.can_refresh());
        mock.assert_hits(1);
    }
}
