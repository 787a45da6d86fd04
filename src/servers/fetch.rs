//! Fetching node and hub lists from the account API.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::record::{parse_server_list, ApiServer};
use super::Scope;
use crate::config::Config;
use crate::error::SdkError;

/// Account credentials used to request the user's private lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Anything that can produce the raw node or hub list.
#[async_trait]
pub trait ServerSource: Send + Sync {
    async fn fetch(&self, scope: Scope) -> Result<Vec<ApiServer>, SdkError>;

    /// Switch between the public lists (`None`) and the user's lists.
    fn set_credentials(&self, _credentials: Option<Credentials>) {}
}

/// [`ServerSource`] backed by the HTTP API.
pub struct ApiServerSource {
    client: reqwest::Client,
    servers_url: String,
    user_servers_url: String,
    hubs_url: String,
    user_hubs_url: String,
    credentials: RwLock<Option<Credentials>>,
}

impl ApiServerSource {
    pub fn new(config: &Config) -> Result<Self, SdkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| SdkError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            servers_url: config.servers_url.clone(),
            user_servers_url: config.user_servers_url.clone(),
            hubs_url: config.hubs_url.clone(),
            user_hubs_url: config.user_hubs_url.clone(),
            credentials: RwLock::new(None),
        })
    }

    fn url_for(&self, scope: Scope, logged_in: bool) -> &str {
        match (scope, logged_in) {
            (Scope::Nodes, false) => &self.servers_url,
            (Scope::Nodes, true) => &self.user_servers_url,
            (Scope::Hubs, false) => &self.hubs_url,
            (Scope::Hubs, true) => &self.user_hubs_url,
        }
    }
}

#[async_trait]
impl ServerSource for ApiServerSource {
    async fn fetch(&self, scope: Scope) -> Result<Vec<ApiServer>, SdkError> {
        let credentials = self.credentials.read().clone();
        let url = self.url_for(scope, credentials.is_some()).to_string();

        let request = match &credentials {
            None => {
                log::info!("Fetching default {} list from {}", scope, url);
                self.client.get(&url)
            }
            Some(c) => {
                log::info!("Fetching {} list for logged in user", scope);
                self.client
                    .post(&url)
                    .form(&[("username", c.username.as_str()), ("password", c.password.as_str())])
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| SdkError::Network(format!("Failed to fetch {} list: {}", scope, e)))?;

        if !response.status().is_success() {
            return Err(SdkError::Network(format!(
                "API returned error status: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SdkError::Network(format!("Failed to read {} list: {}", scope, e)))?;

        log::debug!("{} list response is {} bytes", scope, body.len());

        let list = parse_server_list(&body)?;
        if list.is_empty() {
            return Err(SdkError::EmptyList(scope.noun()));
        }
        Ok(list)
    }

    fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.write() = credentials;
    }
}
