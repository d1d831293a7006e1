//! [`QueryClient`] implementation over reqwest.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    BatchOperation, ClientError, Entity, EntityKey, EntityQuery, HttpMethod, IncomingResponse,
    OutgoingRequest, Parameters, QueryClient, RequestInterceptor, Value,
};
use reqwest::Url;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::batch;

const JSON: &str = "application/json";
const XML: &str = "application/xml";

/// A query client bound to one service root and one interceptor.
///
/// Cheap to clone: clones share the HTTP connection pool, the interceptor,
/// and the metadata cache.
#[derive(Clone)]
pub struct HttpQueryClient {
    http: reqwest::Client,
    service_root: Url,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    metadata: MetadataCache,
}

/// Schema document slot shared by every client that should fetch it at most
/// once. An already-filled slot answers [`QueryClient::fetch_metadata`]
/// without a network call.
pub type MetadataCache = Arc<OnceCell<Arc<str>>>;

impl HttpQueryClient {
    /// Creates a client. `service_root` must end with `/`.
    ///
    /// Clients handed the same `metadata` slot fetch the schema once between
    /// them.
    pub(crate) fn new(
        http: reqwest::Client,
        service_root: Url,
        interceptor: Option<Arc<dyn RequestInterceptor>>,
        metadata: MetadataCache,
    ) -> Self {
        Self {
            http,
            service_root,
            interceptor,
            metadata,
        }
    }

    pub fn service_root(&self) -> &Url {
        &self.service_root
    }

    fn url(&self, relative: &str, options: &[(&'static str, String)]) -> Result<Url, ClientError> {
        let mut url = self
            .service_root
            .join(relative)
            .map_err(|e| ClientError::Transport {
                message: format!("cannot address '{relative}': {e}"),
            })?;
        if !options.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(options.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    fn request(&self, method: HttpMethod, url: Url) -> OutgoingRequest {
        let mut request = OutgoingRequest::new(method, url.as_str());
        request.set_header("Accept", JSON);
        request
    }

    /// Runs the interceptor hooks around one HTTP exchange and classifies the
    /// response status.
    async fn send(&self, mut request: OutgoingRequest) -> Result<IncomingResponse, ClientError> {
        if let Some(interceptor) = &self.interceptor {
            interceptor.before_send(&mut request);
        }

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.http.request(method, request.url.as_str());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        debug!(method = %request.method, url = %request.url, status, "Domain API response");

        let incoming = IncomingResponse {
            status,
            url: request.url,
            body,
        };
        if let Some(interceptor) = &self.interceptor {
            interceptor.after_receive(&incoming);
        }

        if incoming.is_success() {
            Ok(incoming)
        } else {
            Err(ClientError::status(incoming.status, incoming.body))
        }
    }

    async fn get_json(&self, url: Url) -> Result<Option<serde_json::Value>, ClientError> {
        let response = self.send(self.request(HttpMethod::Get, url)).await?;
        parse_optional_json(&response.body)
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    #[instrument(skip(self, query), fields(set = query.entity_set()))]
    async fn find_entries(&self, query: &EntityQuery) -> Result<Vec<Entity>, ClientError> {
        let url = self.url(&query.relative_path(), &query.query_options())?;
        let json = self.get_json(url).await?.unwrap_or_default();
        match json {
            serde_json::Value::Object(mut map) if map.contains_key("value") => {
                entities(map.remove("value").unwrap_or_default())
            }
            // A keyed query answers with the entity itself.
            serde_json::Value::Object(map) => Ok(vec![Entity::from(map)]),
            other => Err(ClientError::Decode {
                message: format!("expected an entity collection, got {other}"),
            }),
        }
    }

    #[instrument(skip(self, query), fields(set = query.entity_set()))]
    async fn find_entry(&self, query: &EntityQuery) -> Result<Option<Entity>, ClientError> {
        if query.entity_key().is_some() {
            let url = self.url(&query.relative_path(), &query.query_options())?;
            return match self.get_json(url).await {
                Ok(Some(serde_json::Value::Object(map))) => Ok(Some(Entity::from(map))),
                Ok(_) => Ok(None),
                Err(ClientError::Status { status: 404, .. }) => Ok(None),
                Err(e) => Err(e),
            };
        }

        let query = match query.limit() {
            Some(_) => query.clone(),
            None => query.clone().top(1),
        };
        Ok(self.find_entries(&query).await?.into_iter().next())
    }

    #[instrument(skip(self, entity))]
    async fn insert_entry(
        &self,
        set: &str,
        entity: serde_json::Value,
    ) -> Result<Entity, ClientError> {
        let url = self.url(set, &[])?;
        let mut request = self.request(HttpMethod::Post, url).with_body(entity);
        request.set_header("Prefer", "return=representation");
        let response = self.send(request).await?;
        match parse_optional_json(&response.body)? {
            Some(serde_json::Value::Object(map)) => Ok(Entity::from(map)),
            _ => Err(ClientError::Decode {
                message: format!("insert into '{set}' returned no entity"),
            }),
        }
    }

    #[instrument(skip(self, key, patch), fields(key = %key))]
    async fn update_entry(
        &self,
        set: &str,
        key: &EntityKey,
        patch: serde_json::Value,
    ) -> Result<(), ClientError> {
        let url = self.url(&key.path(set), &[])?;
        self.send(self.request(HttpMethod::Patch, url).with_body(patch))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn delete_entry(&self, set: &str, key: &EntityKey) -> Result<(), ClientError> {
        let url = self.url(&key.path(set), &[])?;
        self.send(self.request(HttpMethod::Delete, url)).await?;
        Ok(())
    }

    #[instrument(skip(self, parameters))]
    async fn execute_action(
        &self,
        path: &str,
        parameters: Parameters,
    ) -> Result<Value, ClientError> {
        let url = self.url(path, &[])?;
        let request = self
            .request(HttpMethod::Post, url)
            .with_body(serde_json::Value::Object(parameters));
        let response = self.send(request).await?;
        Ok(unwrap_result(parse_optional_json(&response.body)?))
    }

    #[instrument(skip(self, parameters))]
    async fn execute_function(
        &self,
        path: &str,
        parameters: Parameters,
    ) -> Result<Value, ClientError> {
        let url = self.url(&function_path(path, &parameters), &[])?;
        let json = self.get_json(url).await?;
        Ok(unwrap_result(json))
    }

    #[instrument(skip(self, operations), fields(operations = operations.len()))]
    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<Value>, ClientError> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url("$batch", &[])?;
        let request = self
            .request(HttpMethod::Post, url)
            .with_body(batch::encode(&operations));
        let response = self.send(request).await?;
        batch::decode(&response.body, operations.len())
    }

    async fn fetch_metadata(&self) -> Result<Arc<str>, ClientError> {
        let document = self
            .metadata
            .get_or_try_init(|| async {
                let url = self.url("$metadata", &[])?;
                let mut request = self.request(HttpMethod::Get, url);
                request.set_header("Accept", XML);
                let response = self.send(request).await?;
                debug!(bytes = response.body.len(), "Fetched service metadata");
                Ok::<_, ClientError>(Arc::<str>::from(response.body))
            })
            .await?;
        Ok(Arc::clone(document))
    }
}

fn transport_error(error: reqwest::Error) -> ClientError {
    ClientError::Transport {
        message: error.to_string(),
    }
}

fn parse_optional_json(body: &str) -> Result<Option<serde_json::Value>, ClientError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| ClientError::Decode {
            message: format!("invalid JSON response: {e}"),
        })
}

fn entities(json: serde_json::Value) -> Result<Vec<Entity>, ClientError> {
    let serde_json::Value::Array(items) = json else {
        return Err(ClientError::Decode {
            message: "collection 'value' is not an array".to_owned(),
        });
    };
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Object(map) => Ok(Entity::from(map)),
            other => Err(ClientError::Decode {
                message: format!("collection item is not an entity: {other}"),
            }),
        })
        .collect()
}

/// Unwraps a `{"value": ...}` result envelope. Objects carrying other data
/// properties are returned whole.
fn unwrap_result(json: Option<serde_json::Value>) -> Value {
    match json {
        None => Value::Null,
        Some(serde_json::Value::Object(mut map))
            if map.contains_key("value")
                && map.keys().all(|k| k == "value" || k.starts_with('@')) =>
        {
            Value::from(map.remove("value").unwrap_or_default())
        }
        Some(other) => Value::from(other),
    }
}

/// Renders `Name(p1=v1,p2=v2)`. Paths already ending in `)` are left as is.
fn function_path(path: &str, parameters: &Parameters) -> String {
    if path.ends_with(')') {
        return path.to_owned();
    }
    let arguments: Vec<String> = parameters
        .iter()
        .map(|(name, value)| format!("{name}={}", literal(value)))
        .collect();
    format!("{path}({})", arguments.join(","))
}

fn literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn function_path_renders_literals() {
        let mut parameters = Parameters::new();
        parameters.insert("code".to_owned(), json!("O'Neil"));
        parameters.insert("count".to_owned(), json!(3));
        assert_eq!(
            function_path("Find", &parameters),
            "Find(code='O''Neil',count=3)"
        );
        assert_eq!(function_path("GetChanges", &Parameters::new()), "GetChanges()");
    }

    #[test]
    fn scalar_results_are_unwrapped() {
        let value = unwrap_result(Some(json!({
            "@odata.context": "$metadata#Edm.String",
            "value": "tx-1"
        })));
        assert_eq!(value.as_str(), Some("tx-1"));
        assert!(unwrap_result(None).is_null());
    }

    #[test]
    fn entity_results_are_not_unwrapped() {
        let value = unwrap_result(Some(json!({"value": 1, "Name": "x"})));
        assert!(value.as_entity().is_some());
    }
}
