//! Helpers for running the typed API against the Firestore emulator with
//! security rules applied, or against an in-memory store.
//!
//! ```no_run
//! use typed_firestore::testing::{inject_testing_adaptor, RulesTestEnvironment, TestEnvironmentConfig};
//!
//! # async fn run() -> typed_firestore::DbResult<()> {
//! let env = RulesTestEnvironment::new(
//!     TestEnvironmentConfig::new("demo-project").with_rules("rules_version = '2'; ..."),
//! )
//! .await?;
//! inject_testing_adaptor(&env.authenticated_context("sasha")?)?;
//! // ... exercise the typed API as user `sasha` ...
//! env.cleanup().await?;
//! # Ok(())
//! # }
//! ```

use std::env;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::{Client, Method};
use serde_json::json;

use crate::adaptor::http::{emulator_origin, map_http_error, Connection};
use crate::adaptor::{
    adaptor, inject_adaptor, Adaptor, AdaptorKind, HttpDatastore, InMemoryDatastore,
    NoopTokenProvider, StaticTokenProvider, TokenProviderArc,
};
use crate::error::{failed_precondition, internal_error, invalid_argument, unavailable, DbResult};
use crate::model::{DatabaseId, Timestamp};

/// Settings for [`RulesTestEnvironment::new`].
#[derive(Clone, Debug, Default)]
pub struct TestEnvironmentConfig {
    pub project_id: String,
    /// Emulator `host:port`. Defaults to `FIRESTORE_EMULATOR_HOST`.
    pub emulator_host: Option<String>,
    /// Security rules loaded when the environment starts.
    pub rules: Option<String>,
}

impl TestEnvironmentConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_rules(mut self, rules: impl Into<String>) -> Self {
        self.rules = Some(rules.into());
        self
    }
}

/// A project on the Firestore emulator.
#[derive(Clone, Debug)]
pub struct RulesTestEnvironment {
    database_id: DatabaseId,
    emulator_host: String,
    client: Client,
}

/// Who a [`RulesTestContext`] acts as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextIdentity {
    Unauthenticated,
    User(String),
    /// Bypasses security rules.
    Admin,
}

/// A client of the emulator acting as one identity.
#[derive(Clone, Debug)]
pub struct RulesTestContext {
    identity: ContextIdentity,
    adaptor: Adaptor,
}

impl RulesTestEnvironment {
    pub async fn new(config: TestEnvironmentConfig) -> DbResult<Self> {
        if config.project_id.is_empty() {
            return Err(invalid_argument("The rules test environment needs a project id"));
        }
        let emulator_host = config
            .emulator_host
            .or_else(|| env::var("FIRESTORE_EMULATOR_HOST").ok())
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                invalid_argument(
                    "No Firestore emulator host: set emulator_host or FIRESTORE_EMULATOR_HOST",
                )
            })?;
        let environment = Self {
            database_id: DatabaseId::default_database(config.project_id),
            emulator_host,
            client: Client::new(),
        };
        if let Some(rules) = config.rules.as_deref() {
            environment.load_rules(rules).await?;
        }
        Ok(environment)
    }

    pub fn project_id(&self) -> &str {
        self.database_id.project_id()
    }

    pub fn unauthenticated_context(&self) -> DbResult<RulesTestContext> {
        self.context(ContextIdentity::Unauthenticated, Arc::new(NoopTokenProvider))
    }

    /// A context signed in as `uid`, using an unsigned ID token the emulator
    /// accepts.
    pub fn authenticated_context(&self, uid: &str) -> DbResult<RulesTestContext> {
        if uid.is_empty() {
            return Err(invalid_argument("Authenticated contexts need a non-empty uid"));
        }
        let token = unsigned_id_token(self.project_id(), uid)?;
        self.context(
            ContextIdentity::User(uid.to_string()),
            Arc::new(StaticTokenProvider::new(token)),
        )
    }

    /// A context that bypasses security rules.
    pub fn admin_context(&self) -> DbResult<RulesTestContext> {
        self.context(ContextIdentity::Admin, Arc::new(StaticTokenProvider::new("owner")))
    }

    fn context(&self, identity: ContextIdentity, auth: TokenProviderArc) -> DbResult<RulesTestContext> {
        let connection = Connection::builder(self.database_id.clone())
            .with_client(self.client.clone())
            .with_emulator_host(self.emulator_host.clone());
        let datastore = HttpDatastore::builder(self.database_id.clone())
            .with_connection_builder(connection)
            .with_auth_provider(auth)
            .build()?;
        Ok(RulesTestContext {
            identity,
            adaptor: Adaptor::new(AdaptorKind::Testing, self.database_id.clone(), Arc::new(datastore)),
        })
    }

    /// Replaces the emulator's security rules for this project.
    pub async fn load_rules(&self, rules: &str) -> DbResult<()> {
        let url = format!(
            "{}/emulator/v1/projects/{}:securityRules",
            emulator_origin(&self.emulator_host),
            self.project_id()
        );
        let body = json!({ "rules": { "files": [{ "content": rules }] } });
        self.send(Method::PUT, &url, Some(&body)).await?;
        log::debug!("loaded security rules into the emulator for {}", self.project_id());
        Ok(())
    }

    /// Deletes every document of the project from the emulator.
    pub async fn clear_firestore(&self) -> DbResult<()> {
        let url = format!(
            "{}/emulator/v1/{}/documents",
            emulator_origin(&self.emulator_host),
            self.database_id.database_name()
        );
        self.send(Method::DELETE, &url, None).await
    }

    /// Releases the environment's data. Contexts stay usable.
    pub async fn cleanup(&self) -> DbResult<()> {
        self.clear_firestore().await
    }

    async fn send(&self, method: Method, url: &str, body: Option<&serde_json::Value>) -> DbResult<()> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| unavailable(format!("Firestore emulator unreachable: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response
            .text()
            .await
            .map_err(|err| internal_error(err.to_string()))?;
        Err(map_http_error(status, &text))
    }
}

impl RulesTestContext {
    pub fn identity(&self) -> &ContextIdentity {
        &self.identity
    }

    /// The context as a `Testing` adaptor.
    pub fn adaptor(&self) -> Adaptor {
        self.adaptor.clone()
    }
}

fn unsigned_id_token(project_id: &str, uid: &str) -> DbResult<String> {
    let now = Timestamp::now().to_millis() / 1000;
    let header = json!({ "alg": "none", "kid": "fakekid", "typ": "JWT" });
    let payload = json!({
        "iss": format!("https://securetoken.google.com/{project_id}"),
        "aud": project_id,
        "iat": now,
        "exp": now + 3600,
        "auth_time": now,
        "sub": uid,
        "user_id": uid,
        "firebase": { "sign_in_provider": "custom", "identities": {} },
    });
    let encode = |value: &serde_json::Value| {
        serde_json::to_vec(value)
            .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
            .map_err(|err| internal_error(err.to_string()))
    };
    Ok(format!("{}.{}.", encode(&header)?, encode(&payload)?))
}

/// Makes the typed API use `context` until the adaptor is cleared.
pub fn inject_testing_adaptor(context: &RulesTestContext) -> DbResult<()> {
    inject_adaptor(context.adaptor())
}

/// Switches the injected testing adaptor to another context, e.g. to act as
/// a different user.
pub async fn set_context(context: &RulesTestContext) -> DbResult<()> {
    let current = adaptor().await?;
    if current.kind() != AdaptorKind::Testing {
        return Err(failed_precondition(
            "set_context() requires inject_testing_adaptor() to be called first",
        ));
    }
    inject_adaptor(context.adaptor())
}

/// Injects a fresh in-memory store and returns it.
pub fn inject_in_memory_adaptor(project_id: &str) -> DbResult<InMemoryDatastore> {
    let datastore = InMemoryDatastore::new();
    inject_adaptor(Adaptor::new(
        AdaptorKind::Testing,
        DatabaseId::default_database(project_id),
        Arc::new(datastore.clone()),
    ))?;
    Ok(datastore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mock_server;
    use httpmock::prelude::*;

    #[test]
    fn authenticated_tokens_carry_the_uid() {
        let token = unsigned_id_token("demo-project", "sasha").unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_empty());

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "none");
        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(payload["sub"], "sasha");
        assert_eq!(payload["user_id"], "sasha");
        assert_eq!(payload["aud"], "demo-project");
    }

    #[tokio::test]
    async fn loads_rules_and_clears_documents() {
        let Some(server) = mock_server("loads_rules_and_clears_documents") else {
            return;
        };
        let rules = server.mock(|when, then| {
            when.method(PUT)
                .path("/emulator/v1/projects/demo-project:securityRules")
                .json_body_partial(r#"{"rules":{"files":[{"content":"allow all"}]}}"#);
            then.status(200).json_body(serde_json::json!({}));
        });
        let clear = server.mock(|when, then| {
            when.method(DELETE)
                .path("/emulator/v1/projects/demo-project/databases/(default)/documents");
            then.status(200);
        });

        let env = RulesTestEnvironment::new(
            TestEnvironmentConfig::new("demo-project")
                .with_emulator_host(server.base_url())
                .with_rules("allow all"),
        )
        .await
        .unwrap();
        env.cleanup().await.unwrap();

        rules.assert();
        clear.assert();
    }

    #[tokio::test]
    async fn contexts_talk_to_the_emulator_with_their_identity() {
        let Some(server) = mock_server("contexts_talk_to_the_emulator_with_their_identity") else {
            return;
        };
        let read = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/projects/demo-project/databases/(default)/documents/users/a")
                .header("authorization", "Bearer owner");
            then.status(404);
        });

        let env = RulesTestEnvironment::new(
            TestEnvironmentConfig::new("demo-project").with_emulator_host(server.address().to_string()),
        )
        .await
        .unwrap();
        let admin = env.admin_context().unwrap();
        assert_eq!(admin.identity(), &ContextIdentity::Admin);
        let snapshot = admin
            .adaptor()
            .datastore()
            .get_document(&crate::model::DocumentKey::parse("users/a").unwrap())
            .await
            .unwrap();
        assert!(!snapshot.exists());
        read.assert();
    }
}
