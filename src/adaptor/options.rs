use std::env;

use serde_json::{Map, Value};

use crate::adaptor::environment::{default_app_config_json, default_emulator_host};
use crate::error::{missing_project_id, DbResult};
use crate::model::{DatabaseId, DEFAULT_DATABASE};

/// Connection settings for the environment-selected adaptors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdaptorOptions {
    pub project_id: String,
    pub database: String,
    pub api_key: Option<String>,
    pub emulator_host: Option<String>,
}

impl AdaptorOptions {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_string(),
            api_key: None,
            emulator_host: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    /// Reads the options from the process environment.
    ///
    /// The project comes from the app config (`__FIREBASE_DEFAULTS__` or
    /// `FIREBASE_CONFIG`), then `GCLOUD_PROJECT`, then
    /// `GOOGLE_CLOUD_PROJECT`. `FIRESTORE_EMULATOR_HOST` wins over the
    /// emulator host from the defaults.
    pub fn from_env() -> DbResult<Self> {
        Self::resolve(
            default_app_config_json(),
            default_emulator_host(),
            |name| env::var(name).ok(),
        )
    }

    fn resolve(
        config: Option<Map<String, Value>>,
        default_emulator: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> DbResult<Self> {
        let config = config.unwrap_or_default();
        let text = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let project_id = text("projectId")
            .or_else(|| lookup("GCLOUD_PROJECT"))
            .or_else(|| lookup("GOOGLE_CLOUD_PROJECT"))
            .filter(|project| !project.is_empty())
            .ok_or_else(missing_project_id)?;

        Ok(Self {
            project_id,
            database: text("databaseId").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            api_key: text("apiKey"),
            emulator_host: lookup("FIRESTORE_EMULATOR_HOST")
                .filter(|host| !host.is_empty())
                .or(default_emulator),
        })
    }

    pub fn database_id(&self) -> DatabaseId {
        DatabaseId::new(self.project_id.clone(), self.database.clone())
    }
}
