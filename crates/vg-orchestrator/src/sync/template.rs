//! Template catalog

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use vg_core::{ClusterId, ContentClass, NodeName, TemplateId, VgError};

/// How a template imported from a backup is rebuilt on other nodes
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSource {
    /// Guest id the template is restored as
    pub vmid: u32,
    /// Backup archive volume
    pub archive_volid: String,
    /// Storage holding the archive
    pub archive_storage: String,
    /// Whether every node already sees the archive
    pub archive_shared: bool,
}

/// A distributed template
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub description: Option<String>,
    pub cluster_id: ClusterId,
    /// Node that received the upload or ran the import
    pub primary_node: NodeName,
    pub storage: String,
    pub volid: String,
    pub content: ContentClass,
    pub size: Option<u64>,
    /// Whether `storage` is visible from every node
    pub shared: bool,
    pub restore: Option<RestoreSource>,
    pub created_at: u64,
}

/// In-memory template records
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: DashMap<TemplateId, Template>,
    next_id: AtomicU64,
}

impl TemplateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a template about to be created
    pub fn next_id(&self) -> TemplateId {
        TemplateId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Record a template
    pub fn insert(&self, template: Template) {
        self.templates.insert(template.id, template);
    }

    /// Look up a template
    pub fn get(&self, id: TemplateId) -> Result<Template, VgError> {
        self.templates
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| VgError::NotFound(format!("template {}", id)))
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Content class for an uploaded template file, by extension
pub fn content_for_file(filename: &str) -> ContentClass {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".iso") || lower.ends_with(".img") {
        ContentClass::Iso
    } else if lower.starts_with("vzdump-") || lower.contains(".vma") {
        ContentClass::Backup
    } else if lower.contains(".tar") {
        ContentClass::Vztmpl
    } else {
        ContentClass::Images
    }
}
