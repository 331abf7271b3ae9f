use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_API_KEY: &str = "FIREBASE_API_KEY";
pub const ENV_AUTH_DOMAIN: &str = "FIREBASE_AUTH_DOMAIN";
pub const ENV_PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
pub const ENV_STORAGE_BUCKET: &str = "FIREBASE_STORAGE_BUCKET";
pub const ENV_MESSAGING_SENDER_ID: &str = "FIREBASE_MESSAGING_SENDER_ID";
pub const ENV_APP_ID: &str = "FIREBASE_APP_ID";
pub const ENV_MEASUREMENT_ID: &str = "FIREBASE_MEASUREMENT_ID";

/// Connection parameters for the dependent service, as served by the
/// configuration endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required configuration fields: {}", .missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

/// A payload whose required fields are known to be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidConfig {
    payload: ConfigPayload,
}

impl ConfigPayload {
    pub const REQUIRED: [&'static str; 3] = ["apiKey", "authDomain", "projectId"];

    /// Assemble a payload from a variable lookup. Unset and blank values stay
    /// `None`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            api_key: read(ENV_API_KEY),
            auth_domain: read(ENV_AUTH_DOMAIN),
            project_id: read(ENV_PROJECT_ID),
            storage_bucket: read(ENV_STORAGE_BUCKET),
            messaging_sender_id: read(ENV_MESSAGING_SENDER_ID),
            app_id: read(ENV_APP_ID),
            measurement_id: read(ENV_MEASUREMENT_ID),
        }
    }

    /// Local development configuration: environment values where set, demo
    /// values everywhere else.
    pub fn development_fallback<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Self::from_lookup(lookup);
        let or = |value: Option<String>, default: &str| Some(value.unwrap_or_else(|| default.into()));
        Self {
            api_key: or(env.api_key, "demo-api-key"),
            auth_domain: or(env.auth_domain, "demo-project.firebaseapp.com"),
            project_id: or(env.project_id, "demo-project"),
            storage_bucket: or(env.storage_bucket, "demo-project.appspot.com"),
            messaging_sender_id: or(env.messaging_sender_id, "123456789"),
            app_id: or(env.app_id, "1:123456789:web:demo"),
            measurement_id: or(env.measurement_id, "G-DEMO"),
        }
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        let fields = [&self.api_key, &self.auth_domain, &self.project_id];
        Self::REQUIRED
            .iter()
            .zip(fields)
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn validate(self) -> Result<ValidConfig, ValidationError> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(ValidConfig { payload: self })
        } else {
            Err(ValidationError { missing })
        }
    }
}

impl ValidConfig {
    pub fn api_key(&self) -> &str {
        self.payload.api_key.as_deref().unwrap_or_default()
    }

    pub fn auth_domain(&self) -> &str {
        self.payload.auth_domain.as_deref().unwrap_or_default()
    }

    pub fn project_id(&self) -> &str {
        self.payload.project_id.as_deref().unwrap_or_default()
    }

    pub fn payload(&self) -> &ConfigPayload {
        &self.payload
    }
}
