//! REST client for a remote workspace service.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Operation | Request                     |
//! |-----------|-----------------------------|
//! | fetch     | `GET  /api/workspaces/{id}` |
//! | save      | `PUT  /api/workspaces/{id}` |
//! | list      | `GET  /api/workspaces`      |

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{ServiceFuture, WorkspaceListing, WorkspaceRecord, WorkspaceService};
use crate::error::{ConfigError, FetchError, SaveError};

/// Listing envelope returned by `GET /api/workspaces`.
#[derive(Debug, Deserialize)]
struct ListingEnvelope {
    workspaces: WorkspaceListing,
}

/// Workspace service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWorkspaceService {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpWorkspaceService {
    /// Every request is bounded by `timeout`; an expired request fails
    /// like an unreachable remote.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::ValidationError(format!("remote.url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::ValidationError(format!(
                "remote.url {base_url} cannot be used as a base URL"
            )));
        }
        Ok(Self {
            base_url,
            token,
            timeout,
            http: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn list_url(&self) -> Url {
        self.endpoint(&["api", "workspaces"])
    }

    /// Segment values are percent-encoded by `url`.
    pub(crate) fn workspace_url(&self, id: &str) -> Url {
        self.endpoint(&["api", "workspaces", id])
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_record(&self, id: &str) -> Result<WorkspaceRecord, FetchError> {
        let url = self.workspace_url(id);
        let response = self
            .authorize(self.http.get(url.clone()))
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("GET {url}: {status}")));
        }

        let mut record: WorkspaceRecord = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("GET {url}: {e}")))?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        debug!(workspace = id, "workspace fetched");
        Ok(record)
    }

    async fn put_record(&self, id: &str, mut record: WorkspaceRecord) -> Result<(), SaveError> {
        record.id = id.to_string();
        record.metadata.id = id.to_string();
        let url = self.workspace_url(id);
        let response = self
            .authorize(self.http.put(url.clone()))
            .json(&record)
            .send()
            .await
            .map_err(|e| SaveError::Remote(format!("PUT {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SaveError::Remote(format!("PUT {url}: {status}")));
        }
        debug!(workspace = id, "workspace saved");
        Ok(())
    }

    async fn get_listing(&self) -> Result<WorkspaceListing, FetchError> {
        let url = self.list_url();
        let response = self
            .authorize(self.http.get(url.clone()))
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("GET {url}: {status}")));
        }
        let envelope: ListingEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("GET {url}: {e}")))?;
        Ok(envelope.workspaces)
    }
}

impl WorkspaceService for HttpWorkspaceService {
    fn fetch<'a>(&'a self, id: &'a str) -> ServiceFuture<'a, WorkspaceRecord, FetchError> {
        Box::pin(self.get_record(id))
    }

    fn save<'a>(&'a self, id: &'a str, record: WorkspaceRecord) -> ServiceFuture<'a, (), SaveError> {
        Box::pin(self.put_record(id, record))
    }

    fn list(&self) -> ServiceFuture<'_, WorkspaceListing, FetchError> {
        Box::pin(self.get_listing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn endpoints_join_onto_base_path() {
        let service =
            HttpWorkspaceService::new("http://localhost:8888/lab/", None, TIMEOUT).unwrap();
        assert_eq!(
            service.list_url().as_str(),
            "http://localhost:8888/lab/api/workspaces"
        );
        assert_eq!(
            service.workspace_url("proj1").as_str(),
            "http://localhost:8888/lab/api/workspaces/proj1"
        );
    }

    #[test]
    fn base_without_trailing_slash_keeps_last_segment() {
        let service = HttpWorkspaceService::new("http://example.com/root", None, TIMEOUT).unwrap();
        assert_eq!(
            service.workspace_url("a").as_str(),
            "http://example.com/root/api/workspaces/a"
        );
    }

    #[test]
    fn workspace_ids_are_encoded_as_one_segment() {
        let service = HttpWorkspaceService::new("http://example.com", None, TIMEOUT).unwrap();
        let url = service.workspace_url("a/b c");
        assert_eq!(url.path(), "/api/workspaces/a%2Fb%20c");
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        assert!(matches!(
            HttpWorkspaceService::new("not a url", None, TIMEOUT),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            HttpWorkspaceService::new("mailto:someone@example.com", None, TIMEOUT),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn unresponsive_remote_fails_after_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the connection without ever answering.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
            drop(socket);
        });

        let service = HttpWorkspaceService::new(
            &format!("http://{addr}"),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(10), service.fetch("proj1"))
            .await
            .expect("request is bounded by the service timeout")
            .unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)), "{err:?}");
        server.abort();
    }

    #[test]
    fn listing_envelope_decodes() {
        let envelope: ListingEnvelope = serde_json::from_str(
            r#"{"workspaces":{"ids":["a"],"values":[{"id":"a","data":{},"metadata":{"id":"a"}}]}}"#,
        )
        .unwrap();
        assert_eq!(envelope.workspaces.ids, vec!["a"]);
    }
}
