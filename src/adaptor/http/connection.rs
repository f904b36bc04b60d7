use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;

use crate::error::{internal_error, unavailable, DbResult};
use crate::model::DatabaseId;

use super::rpc_error::map_http_error;

const FIRESTORE_API_HOST: &str = "https://firestore.googleapis.com";
const FIRESTORE_API_VERSION: &str = "v1";

#[derive(Clone, Debug)]
pub struct Connection {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConnectionBuilder {
    database_id: DatabaseId,
    client: Option<Client>,
    emulator_host: Option<String>,
    api_key: Option<String>,
}

#[derive(Default, Clone, Debug)]
pub struct RequestContext {
    pub auth_token: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl ConnectionBuilder {
    pub fn new(database_id: DatabaseId) -> Self {
        Self {
            database_id,
            client: None,
            emulator_host: None,
            api_key: None,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    /// Sends `key=<api_key>` with every request, as end-user clients do.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn build(self) -> DbResult<Connection> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .build()
                .map_err(|err| internal_error(err.to_string()))?,
        };
        let base_url = build_base_url(&self.database_id, self.emulator_host.as_deref());
        Ok(Connection {
            client,
            base_url,
            api_key: self.api_key,
        })
    }
}

impl Connection {
    pub fn builder(database_id: DatabaseId) -> ConnectionBuilder {
        ConnectionBuilder::new(database_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn invoke_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
        context: &RequestContext,
    ) -> DbResult<JsonValue> {
        let (status, text) = self.send(method, path, body, context).await?;
        if status.is_success() {
            parse_body(&text)
        } else {
            Err(map_http_error(status, &text))
        }
    }

    /// Like [`Connection::invoke_json`] but maps `404` to `None`.
    pub async fn invoke_json_optional(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
        context: &RequestContext,
    ) -> DbResult<Option<JsonValue>> {
        let (status, text) = self.send(method, path, body, context).await?;
        if status.is_success() {
            parse_body(&text).map(Some)
        } else if status == StatusCode::NOT_FOUND {
            Ok(None)
        } else {
            Err(map_http_error(status, &text))
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
        context: &RequestContext,
    ) -> DbResult<(StatusCode, String)> {
        let mut request = self.build_request(method, path, context);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                unavailable(err.to_string())
            } else {
                internal_error(err.to_string())
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| internal_error(err.to_string()))?;
        Ok((status, text))
    }

    fn build_request(&self, method: Method, path: &str, context: &RequestContext) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut builder = self.client.request(method, url);
        if let Some(timeout) = context.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(api_key) = self.api_key.as_deref() {
            builder = builder.query(&[("key", api_key)]);
        }
        if let Some(token) = context.auth_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder.header("Content-Type", "application/json")
    }
}

fn parse_body(text: &str) -> DbResult<JsonValue> {
    if text.is_empty() {
        Ok(JsonValue::Null)
    } else {
        serde_json::from_str(text).map_err(|err| internal_error(err.to_string()))
    }
}

/// `host:port` (or a full origin) of an emulator as an origin URL.
pub(crate) fn emulator_origin(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn build_base_url(database_id: &DatabaseId, emulator_host: Option<&str>) -> String {
    let host = match emulator_host {
        Some(host) => emulator_origin(host),
        None => FIRESTORE_API_HOST.to_string(),
    };
    format!(
        "{host}/{FIRESTORE_API_VERSION}/{}",
        database_id.database_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulator_hosts_use_plain_http() {
        let db = DatabaseId::default_database("demo");
        assert_eq!(
            build_base_url(&db, Some("127.0.0.1:8080")),
            "http://127.0.0.1:8080/v1/projects/demo/databases/(default)"
        );
        assert_eq!(
            build_base_url(&db, None),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)"
        );
    }
}
