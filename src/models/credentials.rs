//! Service account credentials used to authenticate against Pub/Sub.
use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, constants::DEFAULT_TOKEN_URI, models::SecretString};

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccountCredentials {
    pub client_email: SecretString,
    pub private_key: SecretString,
    #[serde(default = "empty_secret")]
    pub private_key_id: SecretString,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn empty_secret() -> SecretString {
    SecretString::new("")
}

impl ServiceAccountCredentials {
    pub fn new(client_email: &str, private_key: &str) -> Self {
        Self {
            client_email: SecretString::new(client_email),
            private_key: SecretString::new(private_key),
            private_key_id: empty_secret(),
            token_uri: default_token_uri(),
        }
    }

    pub fn with_private_key_id(mut self, private_key_id: &str) -> Self {
        self.private_key_id = SecretString::new(private_key_id);
        self
    }

    /// Both the client email and the private key must be present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_email.is_blank() {
            return Err(ConfigError::MissingField(
                "credentials.client_email".to_string(),
            ));
        }
        if self.private_key.is_blank() {
            return Err(ConfigError::MissingField(
                "credentials.private_key".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the credentials in the service account key file layout
    /// expected by `google-cloud-auth`.
    pub fn to_service_account_json(&self, project_id: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "service_account",
            "project_id": project_id,
            "private_key_id": self.private_key_id.reveal().to_string(),
            "private_key": self.private_key.reveal().to_string(),
            "client_email": self.client_email.reveal().to_string(),
            "token_uri": self.token_uri,
        })
    }
}
