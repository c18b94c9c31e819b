/*!
 * Commerce resources and per-field translation results.
 */

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::translation::strategy::StrategyKind;

/// Kind of commerce entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Product,
    Collection,
    Page,
    Article,
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Collection => "collection",
            Self::Page => "page",
            Self::Article => "article",
            Self::Other => "other",
        }
    }
}

impl FromStr for ResourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "product" => Ok(Self::Product),
            "collection" => Ok(Self::Collection),
            "page" => Ok(Self::Page),
            "article" => Ok(Self::Article),
            "other" => Ok(Self::Other),
            _ => Err(anyhow!("Unknown resource type: {}", s)),
        }
    }
}

/// Translation status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Eligible for (re)translation
    #[default]
    Pending,
    Processing,
    Completed,
    /// Some fields kept their original text
    Partial,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ResourceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow!("Unknown resource status: {}", s)),
        }
    }
}

/// A translatable commerce entity, read as a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub shop_id: String,
    #[serde(default)]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub seo_title: Option<String>,
    #[serde(default)]
    pub seo_description: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl Resource {
    pub fn new(id: impl Into<String>, shop_id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: id.into(),
            shop_id: shop_id.into(),
            resource_type,
            ..Self::default()
        }
    }

    /// Value of a field, if present and not blank
    pub fn field(&self, field: FieldName) -> Option<&str> {
        let value = match field {
            FieldName::Title => &self.title,
            FieldName::Handle => &self.handle,
            FieldName::Description => &self.description,
            FieldName::DescriptionHtml => &self.description_html,
            FieldName::SeoTitle => &self.seo_title,
            FieldName::SeoDescription => &self.seo_description,
            FieldName::Summary => &self.summary,
            FieldName::Label => &self.label,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// Present fields in translation order
    pub fn present_fields(&self) -> Vec<FieldName> {
        FieldName::ALL.iter().copied().filter(|f| self.field(*f).is_some()).collect()
    }
}

/// One textual attribute of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    Title,
    Handle,
    Description,
    DescriptionHtml,
    SeoTitle,
    SeoDescription,
    Summary,
    Label,
}

impl FieldName {
    pub const ALL: [FieldName; 8] = [
        Self::Title,
        Self::Description,
        Self::DescriptionHtml,
        Self::Handle,
        Self::Summary,
        Self::Label,
        Self::SeoTitle,
        Self::SeoDescription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Handle => "handle",
            Self::Description => "description",
            Self::DescriptionHtml => "descriptionHtml",
            Self::SeoTitle => "seoTitle",
            Self::SeoDescription => "seoDescription",
            Self::Summary => "summary",
            Self::Label => "label",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTranslation {
    pub original: String,
    /// Translated text, or a source-language fallback when `success` is false
    pub text: String,
    pub success: bool,
    pub strategy: Option<StrategyKind>,
    pub attempts: u32,
    #[serde(default)]
    pub notes: Vec<String>,
    pub needs_review: bool,
}

impl FieldTranslation {
    /// Field kept in the source language
    pub fn failed(original: &str, attempts: u32, notes: Vec<String>) -> Self {
        Self {
            original: original.to_string(),
            text: original.to_string(),
            success: false,
            strategy: None,
            attempts,
            notes,
            needs_review: true,
        }
    }
}

/// All field translations of one resource into one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub resource_id: String,
    pub language: String,
    pub fields: BTreeMap<FieldName, FieldTranslation>,
}

impl TranslationResult {
    pub fn new(resource_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            language: language.into(),
            fields: BTreeMap::new(),
        }
    }

    /// fieldName -> translated text, `None` for fields the resource lacks
    pub fn to_field_map(&self) -> BTreeMap<&'static str, Option<String>> {
        FieldName::ALL
            .iter()
            .map(|f| (f.as_str(), self.fields.get(f).map(|t| t.text.clone())))
            .collect()
    }

    pub fn text(&self, field: FieldName) -> Option<&str> {
        self.fields.get(&field).map(|t| t.text.as_str())
    }

    pub fn succeeded(&self) -> usize {
        self.fields.values().filter(|f| f.success).count()
    }

    pub fn failed_fields(&self) -> Vec<FieldName> {
        self.fields.iter().filter(|(_, t)| !t.success).map(|(f, _)| *f).collect()
    }

    pub fn needs_review(&self) -> bool {
        self.fields.values().any(|f| f.needs_review)
    }

    pub fn total_attempts(&self) -> u32 {
        self.fields.values().map(|f| f.attempts).sum()
    }

    /// Resource status this result should produce
    pub fn status(&self) -> ResourceStatus {
        if self.failed_fields().is_empty() {
            ResourceStatus::Completed
        } else {
            ResourceStatus::Partial
        }
    }
}
