//! Weaviate store over the REST and GraphQL APIs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use rag_core::protocol::{check_dimension, check_embedder_dimension, project_metadata, resolve_record, Record};
use rag_core::{
    Document, DuplicatePolicy, Embedder, Metadata, RagError, Result, RetrievedDoc, StoreConfig,
    StoreDescriptor, VectorStore,
};

/// Convert a collection name to a Weaviate class name.
///
/// Words split on `_`, `-` and spaces are capitalized and joined:
/// `my_docs` becomes `MyDocs`.
pub fn to_class_name(input: &str) -> String {
    input
        .split(|c| c == '_' || c == '-' || c == ' ')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct WeaviateObject<'a> {
    class: &'a str,
    id: &'a str,
    properties: Properties<'a>,
    vector: &'a [f32],
}

#[derive(Debug, Serialize)]
struct Properties<'a> {
    text: &'a str,
    /// Metadata as JSON text, so arbitrary shapes round-trip.
    metadata: String,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    id: Option<String>,
    result: Option<BatchStatus>,
}

#[derive(Debug, Deserialize)]
struct BatchStatus {
    errors: Option<ErrorList>,
}

#[derive(Debug, Deserialize)]
struct ErrorList {
    #[serde(default)]
    error: Vec<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(default)]
    text: String,
    metadata: Option<String>,
    #[serde(rename = "_additional")]
    additional: Option<Additional>,
}

#[derive(Debug, Deserialize)]
struct Additional {
    id: Option<String>,
    distance: Option<f32>,
}

/// Vector store backed by a Weaviate class.
///
/// The class is created on connect with no vectorizer and cosine distance.
/// Document ids must be UUIDs, which content-addressed ids are. Weaviate does
/// not return stored vectors from a near-vector query, so retrieved
/// documents carry the query vector instead.
pub struct WeaviateStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    class: String,
    dimension: usize,
    duplicates: DuplicatePolicy,
    embedder: Arc<dyn Embedder>,
    closed: AtomicBool,
}

impl WeaviateStore {
    /// Connect to `base_url` and make sure the class for `collection` exists.
    pub async fn connect(
        base_url: &str,
        collection: &str,
        dimension: usize,
        embedder: Arc<dyn Embedder>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        check_embedder_dimension(&*embedder, dimension)?;

        let class = to_class_name(collection);
        if class.is_empty() {
            return Err(RagError::config(format!(
                "invalid collection name: {:?}",
                collection
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        let store = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            class,
            dimension,
            duplicates: DuplicatePolicy::default(),
            embedder,
            closed: AtomicBool::new(false),
        };
        store.ensure_class().await?;

        info!("Weaviate store ready: {}", store.descriptor());
        Ok(store)
    }

    /// Connect using a store configuration.
    pub async fn from_config(config: &StoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self::connect(
            &config.base_url,
            &config.collection,
            config.dimension,
            embedder,
            config.api_key.clone(),
            config.timeout_secs,
        )
        .await?
        .with_duplicate_policy(config.duplicates))
    }

    /// Set how re-indexing an existing id is handled.
    pub fn with_duplicate_policy(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// The Weaviate class holding the documents.
    pub fn class_name(&self) -> &str {
        &self.class
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn object_url(&self, id: &str) -> String {
        self.url(&format!("objects/{}/{}", self.class, id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| RagError::connection(format!("Request to {} failed: {}", url, e)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RagError::Closed);
        }
        Ok(())
    }

    async fn ensure_class(&self) -> Result<()> {
        let url = self.url(&format!("schema/{}", self.class));
        let response = self.send(&url, self.client.get(&url)).await?;

        match response.status() {
            status if status.is_success() => {
                debug!("Class {} already exists", self.class);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let url = self.url("schema");
                let body = class_definition(&self.class);
                let response = self.send(&url, self.client.post(&url).json(&body)).await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(RagError::schema(format!(
                        "Failed to create class {}: {} {}",
                        self.class,
                        status,
                        body.trim()
                    )));
                }
                info!("Created class {}", self.class);
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RagError::schema(format!(
                    "Failed to read class {}: {} {}",
                    self.class,
                    status,
                    body.trim()
                )))
            }
        }
    }

    async fn write_record(&self, record: &Record) -> Result<()> {
        self.ensure_open()?;
        let object = WeaviateObject {
            class: &self.class,
            id: &record.id,
            properties: Properties {
                text: &record.text,
                metadata: serde_json::to_string(&record.metadata)?,
            },
            vector: &record.vector,
        };

        match self.duplicates {
            DuplicatePolicy::Reject => {
                if self.exists(&record.id).await? {
                    return Err(RagError::DuplicateId {
                        id: record.id.clone(),
                    });
                }
                let url = self.url("objects");
                let response = self.send(&url, self.client.post(&url).json(&object)).await?;
                check_status(&url, response).await?;
                Ok(())
            }
            DuplicatePolicy::Overwrite => {
                // Batch import replaces an existing object with the same id
                let url = self.url("batch/objects");
                let body = json!({ "objects": [object] });
                let response = self.send(&url, self.client.post(&url).json(&body)).await?;
                let response = check_status(&url, response).await?;
                let results: Vec<BatchResult> = response
                    .json()
                    .await
                    .map_err(|e| RagError::database(format!("Malformed response from {}: {}", url, e)))?;
                batch_errors(&results)
            }
        }
    }
}

fn class_definition(class: &str) -> Value {
    json!({
        "class": class,
        "vectorizer": "none",
        "vectorIndexConfig": { "distance": "cosine" },
        "properties": [
            { "name": "text", "dataType": ["text"] },
            { "name": "metadata", "dataType": ["text"] }
        ]
    })
}

fn near_vector_query(class: &str, vector: &[f32], limit: usize) -> Result<String> {
    Ok(format!(
        "{{ Get {{ {}(nearVector: {{vector: {}}}, limit: {}) {{ text metadata _additional {{ id distance }} }} }} }}",
        class,
        serde_json::to_string(vector)?,
        limit
    ))
}

async fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RagError::database(format!(
        "{} returned {}: {}",
        url,
        status,
        body.trim()
    )))
}

fn batch_errors(results: &[BatchResult]) -> Result<()> {
    for result in results {
        let messages: Vec<&str> = result
            .result
            .as_ref()
            .and_then(|status| status.errors.as_ref())
            .map(|errors| errors.error.iter().map(|e| e.message.as_str()).collect())
            .unwrap_or_default();
        if !messages.is_empty() {
            return Err(RagError::database(format!(
                "Failed to write object {}: {}",
                result.id.as_deref().unwrap_or("?"),
                messages.join("; ")
            )));
        }
    }
    Ok(())
}

/// Turn a GraphQL `Get` response into retrieved documents.
fn parse_hits(
    class: &str,
    response: GraphQlResponse,
    query: &[f32],
    fields: &[&str],
) -> Result<Vec<RetrievedDoc>> {
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(RagError::database(format!(
            "GraphQL query failed: {}",
            messages.join("; ")
        )));
    }

    let hits = response
        .data
        .as_ref()
        .and_then(|data| data.get("Get"))
        .and_then(|get| get.get(class))
        .cloned()
        .ok_or_else(|| RagError::database(format!("No results for class {}", class)))?;
    let hits: Vec<Hit> = serde_json::from_value(hits)?;

    hits.into_iter()
        .map(|hit| {
            let metadata: Metadata = match hit.metadata.as_deref() {
                Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
                _ => Metadata::new(),
            };
            let (id, distance) = match hit.additional {
                Some(additional) => (additional.id, additional.distance),
                None => (None, None),
            };
            Ok(RetrievedDoc {
                id,
                text: hit.text,
                metadata: project_metadata(metadata, fields),
                vector: query.to_vec(),
                score: distance.map(|d| 1.0 - d),
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn index(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut ids = Vec::with_capacity(docs.len());

        for doc in docs {
            let record = match resolve_record(doc, &*self.embedder, self.dimension).await {
                Ok(record) => record,
                Err(e) => return Err(RagError::after_partial_write(ids, e)),
            };
            if let Err(e) = self.write_record(&record).await {
                return Err(RagError::after_partial_write(ids, e));
            }
            ids.push(record.id);
        }

        debug!("Indexed {} documents into {}", ids.len(), self.class);
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let url = self.object_url(id);
        let response = self.send(&url, self.client.delete(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Delete of missing object {} in {}", id, self.class);
            return Ok(());
        }
        check_status(&url, response).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        let url = self.object_url(id);
        let response = self.send(&url, self.client.head(&url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(RagError::database(format!("{} returned {}", url, status))),
        }
    }

    async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        fields: &[&str],
    ) -> Result<Vec<RetrievedDoc>> {
        self.ensure_open()?;
        check_dimension(self.dimension, vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let url = self.url("graphql");
        let body = json!({ "query": near_vector_query(&self.class, vector, top_k)? });
        let response = self.send(&url, self.client.post(&url).json(&body)).await?;
        let response: GraphQlResponse = check_status(&url, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::database(format!("Malformed response from {}: {}", url, e)))?;

        let mut results = parse_hits(&self.class, response, vector, fields)?;
        if results.len() > top_k {
            warn!("Weaviate returned {} hits for limit {}", results.len(), top_k);
            results.truncate(top_k);
        }
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor {
            backend: "weaviate".to_string(),
            collection: self.class.clone(),
            dimension: self.dimension,
            embedder: self.embedder.descriptor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_embed::MockEmbedder;

    #[test]
    fn test_to_class_name() {
        assert_eq!(to_class_name("my_docs"), "MyDocs");
        assert_eq!(to_class_name("hello-WORLD docs"), "HelloWorldDocs");
        assert_eq!(to_class_name("__a__b"), "AB");
        assert_eq!(to_class_name("Docs"), "Docs");
        assert_eq!(to_class_name("_-"), "");
    }

    #[test]
    fn test_near_vector_query() {
        let query = near_vector_query("MyDocs", &[1.0, 0.5], 3).unwrap();
        assert_eq!(
            query,
            "{ Get { MyDocs(nearVector: {vector: [1.0,0.5]}, limit: 3) { text metadata _additional { id distance } } } }"
        );
    }

    #[test]
    fn test_parse_hits() {
        let response: GraphQlResponse = serde_json::from_value(json!({
            "data": { "Get": { "MyDocs": [
                {
                    "text": "A",
                    "metadata": "{\"lang\":\"en\",\"page\":1}",
                    "_additional": { "id": "id-a", "distance": 0.25 }
                },
                { "text": "B", "metadata": null, "_additional": { "id": "id-b", "distance": 0.5 } }
            ] } }
        }))
        .unwrap();

        let hits = parse_hits("MyDocs", response, &[1.0, 0.0], &["lang"]).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.as_deref(), Some("id-a"));
        assert_eq!(hits[0].score, Some(0.75));
        assert_eq!(hits[0].vector, vec![1.0, 0.0]);
        assert_eq!(hits[0].metadata.len(), 1);
        assert_eq!(hits[0].metadata["lang"], json!("en"));
        assert!(hits[1].metadata.is_empty());
    }

    #[test]
    fn test_parse_hits_errors() {
        let response: GraphQlResponse = serde_json::from_value(json!({
            "errors": [{ "message": "class not found" }]
        }))
        .unwrap();
        let err = parse_hits("MyDocs", response, &[1.0], &[]).unwrap_err();
        assert!(err.to_string().contains("class not found"));
    }

    #[test]
    fn test_batch_errors() {
        let ok: Vec<BatchResult> =
            serde_json::from_value(json!([{ "id": "a", "result": {} }])).unwrap();
        assert!(batch_errors(&ok).is_ok());

        let failed: Vec<BatchResult> = serde_json::from_value(json!([
            { "id": "a", "result": { "errors": { "error": [{ "message": "bad vector" }] } } }
        ]))
        .unwrap();
        let err = batch_errors(&failed).unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_class_definition() {
        let def = class_definition("MyDocs");
        assert_eq!(def["vectorizer"], "none");
        assert_eq!(def["vectorIndexConfig"]["distance"], "cosine");
        assert_eq!(def["properties"][1]["name"], "metadata");
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let err = WeaviateStore::connect(
            "http://127.0.0.1:9",
            "docs",
            8,
            Arc::new(MockEmbedder::new(8)),
            None,
            2,
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.error_code(), "CONNECTION_ERROR");
    }
}
