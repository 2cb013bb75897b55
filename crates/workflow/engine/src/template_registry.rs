//! Template registry: stores and retrieves workflow templates
//!
//! Templates are immutable once registered. To modify, register a new
//! version under the same name. The registry tracks all versions.

use docflow_types::{TemplateId, WorkflowError, WorkflowResult, WorkflowTemplate};
use std::collections::HashMap;

/// Registry of workflow templates
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    /// All registered templates, keyed by ID
    templates: HashMap<TemplateId, WorkflowTemplate>,
    /// Index by name → list of template IDs (for versioning)
    by_name: HashMap<String, Vec<TemplateId>>,
}

impl TemplateRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow template
    ///
    /// Validates the step graph before storing (unique step ids, known
    /// dependencies, no cycles). Re-registering a name assigns the next
    /// version number. Returns the template ID.
    pub fn register(&mut self, mut template: WorkflowTemplate) -> WorkflowResult<TemplateId> {
        template.validate()?;

        if let Some(latest) = self.get_latest_by_name(&template.name) {
            template.version = latest.version + 1;
        }

        let id = template.id.clone();
        let name = template.name.clone();
        let version = template.version;

        self.templates.insert(id.clone(), template);
        self.by_name.entry(name).or_default().push(id.clone());

        tracing::info!(template_id = %id, version, "Workflow template registered");
        Ok(id)
    }

    /// Get a template by ID
    pub fn get(&self, id: &TemplateId) -> WorkflowResult<&WorkflowTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))
    }

    /// Get the latest version of a template by name
    pub fn get_latest_by_name(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.by_name
            .get(name)
            .and_then(|ids| ids.last())
            .and_then(|id| self.templates.get(id))
    }

    /// Get all versions of a template by name
    pub fn get_versions_by_name(&self, name: &str) -> Vec<&WorkflowTemplate> {
        self.by_name
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| self.templates.get(id)).collect())
            .unwrap_or_default()
    }

    /// List all registered templates
    pub fn list(&self) -> Vec<&WorkflowTemplate> {
        self.templates.values().collect()
    }

    /// Total number of registered templates
    pub fn count(&self) -> usize {
        self.templates.len()
    }

    /// Check if a template exists
    pub fn contains(&self, id: &TemplateId) -> bool {
        self.templates.contains_key(id)
    }

    /// Remove a template
    pub fn remove(&mut self, id: &TemplateId) -> WorkflowResult<WorkflowTemplate> {
        let template = self
            .templates
            .remove(id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))?;

        // Clean up the name index
        if let Some(ids) = self.by_name.get_mut(&template.name) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_name.remove(&template.name);
            }
        }

        tracing::info!(template_id = %id, "Workflow template removed");
        Ok(template)
    }
}
