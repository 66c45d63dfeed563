use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::salt::resource_key;
use crate::types::{McpError, RegistryError, ResourceBody, ResourceContent};

/// Produces the content of one resource.
#[async_trait]
pub trait ResourceProducer: Send + Sync {
    /// `uri` is the advertised identifier of the resource being read.
    async fn produce(&self, uri: &str) -> Result<Produced, McpError>;
}

/// Raw producer output. The registry turns it into exactly one encoding:
/// text wins over bytes, and neither becomes empty text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Produced {
    pub text: Option<String>,
    pub blob: Option<Vec<u8>>,
}

impl Produced {
    pub fn text(text: impl Into<String>) -> Self {
        Produced {
            text: Some(text.into()),
            blob: None,
        }
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Produced {
            text: None,
            blob: Some(bytes.into()),
        }
    }

    fn into_body(self) -> ResourceBody {
        match (self.text, self.blob) {
            (Some(text), _) => ResourceBody::Text(text),
            (None, Some(bytes)) => {
                ResourceBody::Blob(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            (None, None) => ResourceBody::Text(String::new()),
        }
    }
}

/// Wraps an async closure into a ResourceProducer.
pub struct FnResourceProducer<F> {
    f: F,
}

impl<F, Fut> FnResourceProducer<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Produced, McpError>> + Send + 'static,
{
    pub fn new(f: F) -> Arc<dyn ResourceProducer> {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut> ResourceProducer for FnResourceProducer<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Produced, McpError>> + Send + 'static,
{
    async fn produce(&self, uri: &str) -> Result<Produced, McpError> {
        (self.f)(uri.to_string()).await
    }
}

/// Fixed text content.
pub struct StaticText(pub String);

impl StaticText {
    pub fn new(text: impl Into<String>) -> Arc<dyn ResourceProducer> {
        Arc::new(StaticText(text.into()))
    }
}

#[async_trait]
impl ResourceProducer for StaticText {
    async fn produce(&self, _uri: &str) -> Result<Produced, McpError> {
        Ok(Produced::text(self.0.clone()))
    }
}

/// MCP resource definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Map<String, Value>>,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl ResourceDefinition {
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        ResourceDefinition {
            uri: uri.into(),
            name: name.into(),
            description: description.into(),
            mime_type: mime_type.into(),
            annotations: None,
            meta: None,
        }
    }

    pub fn annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    /// Uniqueness key: the uri without its salt parameter.
    pub fn key(&self) -> String {
        resource_key(&self.uri)
    }
}

/// A definition paired with the producer serving it.
pub type ResourceEntry = (ResourceDefinition, Arc<dyn ResourceProducer>);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("read resource {uri}: {message}")]
    Producer { uri: String, message: String },
}

struct RegisteredResource {
    definition: ResourceDefinition,
    producer: Arc<dyn ResourceProducer>,
}

/// Uri → {definition, producer}, keyed by [`resource_key`].
#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, RegisteredResource>,
    order: Vec<String>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.order)
            .finish()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: ResourceDefinition,
        producer: Arc<dyn ResourceProducer>,
    ) -> Result<(), RegistryError> {
        let key = definition.key();
        if self.resources.contains_key(&key) {
            return Err(RegistryError::DuplicateResource(key));
        }

        tracing::info!(uri = %definition.uri, name = %definition.name, "registered resource");
        self.order.push(key.clone());
        self.resources.insert(
            key,
            RegisteredResource {
                definition,
                producer,
            },
        );
        Ok(())
    }

    pub fn register_all(
        &mut self,
        entries: impl IntoIterator<Item = ResourceEntry>,
    ) -> Result<(), RegistryError> {
        for (definition, producer) in entries {
            self.register(definition, producer)?;
        }
        Ok(())
    }

    /// Await each source in turn and register what it yields. Returns once
    /// every source has been registered.
    pub async fn register_all_async<I, Fut>(&mut self, sources: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<Vec<ResourceEntry>, RegistryError>>,
    {
        for source in sources {
            let entries = source.await?;
            self.register_all(entries)?;
        }
        Ok(())
    }

    /// Read a resource by uri. The salt parameter is ignored for lookup; the
    /// returned content carries the advertised uri.
    pub async fn read(&self, uri: &str) -> Result<ResourceContent, ReadError> {
        let entry = self
            .resources
            .get(&resource_key(uri))
            .ok_or_else(|| ReadError::NotFound(uri.to_string()))?;

        let definition = &entry.definition;
        let producer = Arc::clone(&entry.producer);
        let advertised = definition.uri.clone();
        let outcome = tokio::spawn(async move { producer.produce(&advertised).await }).await;

        let message = match outcome {
            Ok(Ok(produced)) => {
                return Ok(ResourceContent {
                    uri: definition.uri.clone(),
                    mime_type: definition.mime_type.clone(),
                    body: produced.into_body(),
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(join) if join.is_panic() => "producer panicked".to_string(),
            Err(join) => join.to_string(),
        };
        tracing::warn!(uri = %definition.uri, error = %message, "resource producer failed");
        Err(ReadError::Producer {
            uri: definition.uri.clone(),
            message,
        })
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.resources.contains_key(&resource_key(uri))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Advertised uris in registration order.
    pub fn list_uris(&self) -> Vec<String> {
        self.definitions().map(|d| d.uri.clone()).collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.order
            .iter()
            .filter_map(|key| self.resources.get(key))
            .map(|r| &r.definition)
    }

    /// The `resources/list` result body.
    pub fn list_json(&self) -> Value {
        let resources: Vec<&ResourceDefinition> = self.definitions().collect();
        json!({ "resources": resources })
    }
}
