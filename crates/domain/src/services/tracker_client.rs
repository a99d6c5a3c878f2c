use crate::entities::{AccessToken, AnnounceRequest, AnnounceResponse, Credentials, TorrentMetadata};
use crate::errors::DomainError;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// JSON body of every non-2xx tracker response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&DomainError> for ErrorBody {
    fn from(err: &DomainError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.detail(),
        }
    }
}

/// HTTP client for a tracker.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl TrackerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DomainError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| DomainError::TrackerError(format!("Invalid tracker URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::TrackerError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub async fn register(&self, credentials: &Credentials) -> Result<AccessToken, DomainError> {
        let request = self.client.post(self.endpoint("register")?).json(credentials);
        self.send(request).await
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AccessToken, DomainError> {
        let request = self.client.post(self.endpoint("login")?).json(credentials);
        self.send(request).await
    }

    /// Publishes a descriptor; the tracker answers with the stored one.
    pub async fn publish(&self, metadata: &TorrentMetadata) -> Result<TorrentMetadata, DomainError> {
        let request = self.client.post(self.endpoint("publish")?).json(metadata);
        self.send(request).await
    }

    pub async fn announce(&self, announce: &AnnounceRequest) -> Result<AnnounceResponse, DomainError> {
        let request = self.client.get(self.endpoint("announce")?).query(announce);
        self.send(request).await
    }

    /// Stored descriptor for an identity, as needed to fetch from a magnet link.
    pub async fn torrent(&self, info_hash: &str) -> Result<TorrentMetadata, DomainError> {
        let request = self
            .client
            .get(self.endpoint(&format!("torrent/{}", info_hash))?);
        self.send(request).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, DomainError> {
        self.base_url
            .join(path)
            .map_err(|e| DomainError::TrackerError(format!("Invalid tracker endpoint {}: {}", path, e)))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, DomainError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::TrackerError(format!("Tracker unreachable: {}", e)))?;

        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, DomainError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| DomainError::TrackerError(format!("Malformed tracker response: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => Err(DomainError::from_kind(&error.error, error.message)),
        Err(_) => Err(DomainError::TrackerError(format!("Tracker answered {}: {}", status, body))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_under_the_base_path() {
        let client = TrackerClient::new("http://127.0.0.1:8000/tracker", Duration::from_secs(1)).unwrap();

        assert_eq!(
            client.endpoint("announce").unwrap().as_str(),
            "http://127.0.0.1:8000/tracker/announce"
        );
    }

    #[test]
    fn error_bodies_carry_the_kind() {
        let body = ErrorBody::from(&DomainError::UnknownTorrent("abc".to_string()));

        assert_eq!(body.error, "unknown_torrent");
        assert_eq!(body.message, "abc");
        assert!(matches!(
            DomainError::from_kind(&body.error, body.message),
            DomainError::UnknownTorrent(m) if m == "abc"
        ));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(TrackerClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
