use crate::config::RemoteSettings;
use crate::domain::model::{RowOutcome, TableRow};
use crate::domain::ports::{BatchRequest, QueryPage, QueryRequest, RemoteClient, RemoteError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// JSON-over-HTTP client for the record store.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: Client,
    base_url: Url,
    endpoint: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct DescribeResponse {
    #[serde(default)]
    fields: Vec<DescribeField>,
}

#[derive(Deserialize)]
struct DescribeField {
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id_field: Option<&'a str>,
    records: &'a [TableRow],
}

#[derive(Deserialize)]
struct SubmitResponse {
    results: Vec<SubmitResult>,
}

#[derive(Deserialize)]
struct SubmitResult {
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    created: bool,
    #[serde(default)]
    errors: Vec<SubmitError>,
}

#[derive(Deserialize)]
struct SubmitError {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    query: &'a str,
    batch_size: usize,
    include_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    locator: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    records: Vec<Map<String, Value>>,
    done: bool,
    #[serde(default)]
    next_locator: Option<String>,
}

impl From<SubmitResult> for RowOutcome {
    fn from(result: SubmitResult) -> Self {
        if result.success {
            RowOutcome::Success {
                id: result.id,
                created: result.created,
            }
        } else {
            let message = result
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            RowOutcome::Failure {
                message: if message.is_empty() {
                    "rejected without a message".to_string()
                } else {
                    message
                },
            }
        }
    }
}

impl HttpRemoteClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| RemoteError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let endpoint = settings.endpoint.trim_end_matches('/').to_string();
        let base_url = Url::parse(&endpoint)
            .map_err(|e| RemoteError::Connection(format!("invalid endpoint {}: {}", endpoint, e)))?;

        Ok(Self {
            client,
            base_url,
            endpoint,
            access_token: settings.access_token.clone(),
        })
    }

    /// Appends `segments` to the endpoint path, percent-encoding each one so
    /// an entity name cannot change the route.
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Connection(format!("{} cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self
            .authorized(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        tracing::debug!("Remote response status: {}", response.status());
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn describe(&self, entity: &str) -> Result<Vec<String>, RemoteError> {
        let url = self.url(&["sobjects", entity, "describe"])?;
        tracing::debug!("Describing {} via {}", entity, url);

        let response: DescribeResponse = self.send(self.client.get(url)).await?;
        Ok(response.fields.into_iter().map(|f| f.name).collect())
    }

    async fn submit_batch(&self, request: BatchRequest<'_>) -> Result<Vec<RowOutcome>, RemoteError> {
        let url = self.url(&["sobjects", request.entity, request.operation.as_str()])?;
        let body = SubmitBody {
            external_id_field: request.external_id_field,
            records: request.records,
        };

        let response: SubmitResponse = self
            .send(
                self.client
                    .post(url)
                    .header("Content-Type", "application/json")
                    .json(&body),
            )
            .await?;
        Ok(response.results.into_iter().map(RowOutcome::from).collect())
    }

    async fn query(&self, request: QueryRequest<'_>) -> Result<QueryPage, RemoteError> {
        let body = QueryBody {
            query: request.query,
            batch_size: request.batch_size,
            include_deleted: request.include_deleted,
            locator: request.locator,
        };

        let url = self.url(&["query"])?;
        let response: QueryResponse = self
            .send(
                self.client
                    .post(url)
                    .header("Content-Type", "application/json")
                    .json(&body),
            )
            .await?;
        Ok(QueryPage {
            records: response.records,
            done: response.done,
            next_locator: response.next_locator,
        })
    }
}
