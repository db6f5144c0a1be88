use anyhow::Result;

use super::types::ServerInfo;

/// Relative path of the info endpoint on every remote server.
const INFO_PATH: &str = "switcher/getInfo.php";

#[derive(Clone)]
pub struct ServerInfoClient {
    client: reqwest::Client,
}

impl ServerInfoClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Endpoint for a profile's base url, inserting exactly one separating
    /// slash when the url lacks a trailing one.
    pub fn info_endpoint(base_url: &str) -> String {
        let mut endpoint = base_url.to_string();
        if !endpoint.is_empty() && !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        endpoint.push_str(INFO_PATH);
        endpoint
    }

    pub async fn fetch_info(&self, base_url: &str) -> Result<ServerInfo> {
        let endpoint = Self::info_endpoint(base_url);
        tracing::debug!("fetching server info from {endpoint}");
        let response = self.client.get(&endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("info endpoint {endpoint} returned {status}");
        }
        Ok(response.json().await?)
    }
}

impl Default for ServerInfoClient {
    fn default() -> Self {
        Self::new()
    }
}
