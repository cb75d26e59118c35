use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::probe::{NetworkState, NetworkStateSource, ProbeError};

/// Reachability check against a health endpoint.
///
/// A refused/unroutable connection means no data connection; a timeout means
/// connected but reachability unknown (which the probe treats as offline).
pub struct HttpReachability {
    http: Client,
    url: Url,
}

impl HttpReachability {
    pub fn new(http: Client, url: Url) -> Self { Self { http, url } }
}

#[async_trait]
impl NetworkStateSource for HttpReachability {
    async fn current_state(&self) -> Result<NetworkState, ProbeError> {
        match self.http.head(self.url.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                Ok(NetworkState {
                    is_connected: true,
                    is_internet_reachable: Some(status.is_success() || status.is_redirection()),
                    connection_type: Some("http".to_string()),
                })
            }
            Err(e) if e.is_connect() => Ok(NetworkState::disconnected()),
            Err(e) if e.is_timeout() => Ok(NetworkState {
                is_connected: true,
                is_internet_reachable: None,
                connection_type: Some("http".to_string()),
            }),
            Err(e) => Err(ProbeError::Check(e.to_string())),
        }
    }
}
