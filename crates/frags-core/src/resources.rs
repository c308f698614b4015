//! Named resources attached to session prompts.
//!
//! Plans reference resources by identifier; bytes are fetched lazily through a
//! [`ResourceLoader`] and cached for the duration of one run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

use crate::error::FragsError;

/// A resource reference, optionally carrying its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResourceSpec")]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip)]
    pub bytes: Option<Arc<Vec<u8>>>,
}

/// Plans may write a resource as a bare identifier string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ResourceSpec {
    Identifier(String),
    #[serde(rename_all = "camelCase")]
    Full {
        identifier: String,
        #[serde(default)]
        media_type: Option<String>,
    },
}

impl From<ResourceSpec> for Resource {
    fn from(spec: ResourceSpec) -> Self {
        match spec {
            ResourceSpec::Identifier(identifier) => Resource::new(identifier),
            ResourceSpec::Full {
                identifier,
                media_type,
            } => Resource {
                identifier,
                media_type,
                bytes: None,
            },
        }
    }
}

impl Resource {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            media_type: None,
            bytes: None,
        }
    }

    pub fn with_bytes(identifier: impl Into<String>, bytes: Vec<u8>) -> Self {
        let identifier = identifier.into();
        let media_type = Some(guess_media_type(&identifier));
        Self {
            identifier,
            media_type,
            bytes: Some(Arc::new(bytes)),
        }
    }

    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or("application/octet-stream")
    }

    /// Whether the content can be inlined into a prompt as text.
    pub fn is_text(&self) -> bool {
        let mt = self.media_type();
        mt.starts_with("text/")
            || matches!(
                mt,
                "application/json" | "application/yaml" | "application/x-yaml" | "application/xml"
            )
    }

    /// UTF-8 content, if loaded and decodable.
    pub fn as_text(&self) -> Option<&str> {
        self.bytes
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    /// `data:` URL of the content, if loaded.
    pub fn data_url(&self) -> Option<String> {
        self.bytes.as_deref().map(|b| {
            format!(
                "data:{};base64,{}",
                self.media_type(),
                base64::engine::general_purpose::STANDARD.encode(b)
            )
        })
    }
}

pub fn guess_media_type(identifier: &str) -> String {
    mime_guess::from_path(identifier)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Fetches resource content by identifier.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, identifier: &str) -> Result<Resource, FragsError>;
}

/// Loads files relative to a base directory.
pub struct FileResourceLoader {
    base_dir: PathBuf,
}

impl FileResourceLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        let path = Path::new(identifier);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ResourceLoader for FileResourceLoader {
    async fn load(&self, identifier: &str) -> Result<Resource, FragsError> {
        let path = self.path_for(identifier);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            FragsError::Resource(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        tracing::debug!("[Resources] loaded {} ({} bytes)", path.display(), bytes.len());
        Ok(Resource::with_bytes(identifier, bytes))
    }
}

/// In-memory resources, e.g. uploaded with a web request.
#[derive(Default)]
pub struct MemoryResourceLoader {
    entries: HashMap<String, Arc<Vec<u8>>>,
}

impl MemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identifier: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(identifier.into(), Arc::new(bytes));
    }

    /// Build from `{name: base64}` pairs.
    pub fn from_base64<'a>(
        encoded: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, FragsError> {
        let mut loader = Self::new();
        for (name, data) in encoded {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| FragsError::Resource(format!("Resource '{}' is not valid base64: {}", name, e)))?;
            loader.insert(name.clone(), bytes);
        }
        Ok(loader)
    }
}

#[async_trait]
impl ResourceLoader for MemoryResourceLoader {
    async fn load(&self, identifier: &str) -> Result<Resource, FragsError> {
        let bytes = self
            .entries
            .get(identifier)
            .ok_or_else(|| FragsError::Resource(format!("Resource '{}' was not provided", identifier)))?;
        Ok(Resource {
            identifier: identifier.to_string(),
            media_type: Some(guess_media_type(identifier)),
            bytes: Some(bytes.clone()),
        })
    }
}

/// Per-run cache; concurrent requests for one identifier share a single load.
pub struct ResourceCache {
    loader: Arc<dyn ResourceLoader>,
    cells: Mutex<HashMap<String, Arc<OnceCell<Resource>>>>,
    loads: AtomicUsize,
}

impl ResourceCache {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            loader,
            cells: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Content for `spec`, loading it at most once per identifier.
    ///
    /// A media type set on the spec wins over the guessed one.
    pub async fn materialize(&self, spec: &Resource) -> Result<Resource, FragsError> {
        if spec.bytes.is_some() {
            return Ok(spec.clone());
        }
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(spec.identifier.clone()).or_default().clone()
        };
        let loaded = cell
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                self.loader.load(&spec.identifier).await
            })
            .await?;

        let mut resource = loaded.clone();
        if spec.media_type.is_some() {
            resource.media_type = spec.media_type.clone();
        }
        Ok(resource)
    }

    /// Number of loader calls so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Drop cached content.
    pub async fn clear(&self) {
        self.cells.lock().await.clear();
    }
}
