//! Checklist template catalog port.
//!
//! Templates are consumed read-only as opaque scored-item definitions; the
//! visual template editor lives elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use savora_core::TemplateId;

use crate::error::Result;

/// One scored checklist item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateItem {
    /// Item identifier, unique within the template.
    pub id: String,
    /// Points the item contributes to its section.
    pub points: f64,
    /// Critical items force finding severity to critical when failed.
    pub critical: bool,
    /// Category, carried onto findings.
    pub category: String,
}

/// A weighted group of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSection {
    /// Section name, carried onto findings.
    pub name: String,
    /// Relative weight of the section within the template.
    pub weight: f64,
    /// Scored items.
    pub items: Vec<TemplateItem>,
}

/// Scoring parameters for a template.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Minimum weighted score, 0-100, to pass.
    pub pass_threshold: f64,
    /// Whether a single failed critical item fails the audit outright.
    pub critical_fail: bool,
}

/// A named checklist of scored items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Identifier.
    pub id: TemplateId,
    /// Display name.
    pub name: String,
    /// Weighted sections.
    pub sections: Vec<TemplateSection>,
    /// Scoring parameters.
    pub scoring: ScoringConfig,
}

impl Template {
    /// Find an item and its section by item id.
    #[must_use]
    pub fn find_item(&self, item_id: &str) -> Option<(&TemplateSection, &TemplateItem)> {
        self.sections.iter().find_map(|section| {
            section
                .items
                .iter()
                .find(|item| item.id == item_id)
                .map(|item| (section, item))
        })
    }
}

/// Trait for template lookups. Read-only.
#[async_trait::async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Look up one template.
    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>>;
}

/// In-memory template catalog for testing.
#[derive(Debug, Default)]
pub struct InMemoryTemplateCatalog {
    templates: Arc<RwLock<HashMap<TemplateId, Template>>>,
}

impl InMemoryTemplateCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template.
    pub async fn add_template(&self, template: Template) {
        self.templates
            .write()
            .await
            .insert(template.id, template);
    }
}

#[async_trait::async_trait]
impl TemplateCatalog for InMemoryTemplateCatalog {
    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>> {
        Ok(self.templates.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_item_locates_section() {
        let template = Template {
            id: TemplateId::new(),
            name: "Daily hygiene".into(),
            sections: vec![TemplateSection {
                name: "Cold chain".into(),
                weight: 2.0,
                items: vec![TemplateItem {
                    id: "fridge-temp".into(),
                    points: 10.0,
                    critical: true,
                    category: "temperature".into(),
                }],
            }],
            scoring: ScoringConfig {
                pass_threshold: 80.0,
                critical_fail: true,
            },
        };

        let (section, item) = template.find_item("fridge-temp").unwrap();
        assert_eq!(section.name, "Cold chain");
        assert!(item.critical);
        assert!(template.find_item("missing").is_none());
    }
}
