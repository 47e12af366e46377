//! Elasticsearch over its HTTP API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | ping | `HEAD /` |
//! | index exists | `HEAD /{index}` |
//! | delete / create index | `DELETE` / `PUT /{index}` |
//! | put mapping | `PUT /{index}/_mapping[/{type}]` |
//! | index / delete document | `PUT` / `DELETE /{index}/{type or _doc}/{id}` |
//! | info | `GET /` |
//! | index stats | `GET /_stats?human=true` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use super::{BackendError, SearchBackend};
use crate::models::IndexDocument;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ElasticsearchBackend {
    location: String,
    base: Url,
    client: Client,
}

impl ElasticsearchBackend {
    pub fn new(location: &str) -> Result<Self, BackendError> {
        let base =
            Url::parse(location).map_err(|_| BackendError::InvalidUrl(location.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(location.to_string()));
        }

        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            location: location.to_string(),
            base,
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BackendError::InvalidUrl(self.location.clone()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, BackendError> {
        let url = self.url(segments)?;
        debug!(%method, %url, "elasticsearch request");
        Ok(self.client.request(method, url))
    }

    fn document_segments<'a>(index: &'a str, doc_type: Option<&'a str>, id: &'a str) -> [&'a str; 3] {
        [index, doc_type.unwrap_or("_doc"), id]
    }
}

/// Turn a non-success response into [`BackendError::Status`].
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    fn location(&self) -> &str {
        &self.location
    }

    async fn ping(&self, timeout: Duration) -> Result<(), BackendError> {
        let response = self
            .request(Method::HEAD, &[])?
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(timeout)
                } else {
                    BackendError::Request(e)
                }
            })?;
        check(response).await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let response = self.request(Method::HEAD, &[index])?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => check(response).await.map(|_| true),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        let response = self.request(Method::DELETE, &[index])?.send().await?;
        check(response).await?;
        Ok(())
    }

    async fn create_index(&self, index: &str) -> Result<(), BackendError> {
        let response = self.request(Method::PUT, &[index])?.send().await?;
        check(response).await?;
        Ok(())
    }

    async fn put_mapping(
        &self,
        index: &str,
        mapping_type: Option<&str>,
        mapping: &Value,
    ) -> Result<(), BackendError> {
        let request = match mapping_type {
            Some(t) => self.request(Method::PUT, &[index, "_mapping", t])?,
            None => self.request(Method::PUT, &[index, "_mapping"])?,
        };
        let response = request.json(mapping).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn index_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
        doc: &IndexDocument,
    ) -> Result<(), BackendError> {
        let response = self
            .request(Method::PUT, &Self::document_segments(index, doc_type, id))?
            .json(doc)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
    ) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, &Self::document_segments(index, doc_type, id))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }

    async fn info(&self) -> Result<Value, BackendError> {
        let response = self.request(Method::GET, &[])?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn index_stats(&self) -> Result<Value, BackendError> {
        let response = self
            .request(Method::GET, &["_stats"])?
            .query(&[("human", "true")])
            .send()
            .await?;
        let stats: Value = check(response).await?.json().await?;
        Ok(stats.get("indices").cloned().unwrap_or(Value::Null))
    }
}
