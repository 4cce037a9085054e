// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Curriculum document model and per-kind node validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

fn default_locale() -> String {
    "ru".to_string()
}

/// Text that is either plain or keyed by locale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    /// Same text in every locale.
    Plain(String),
    /// Locale → text.
    Localized(BTreeMap<String, String>),
}

impl Default for LocalizedText {
    fn default() -> Self {
        Self::Localized(BTreeMap::new())
    }
}

impl LocalizedText {
    /// Text for `locale`, falling back to `fallback`, then to any locale.
    pub fn get(&self, locale: &str, fallback: &str) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Localized(map) => map
                .get(locale)
                .or_else(|| map.get(fallback))
                .or_else(|| map.values().next())
                .map(String::as_str),
        }
    }
}

/// Root of a curriculum definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDocument {
    pub playbook_id: String,
    pub version: String,
    #[serde(default = "default_locale")]
    pub locale_default: String,
    pub worlds: Vec<WorldDocument>,
}

/// A world: an ordered phase of the program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDocument {
    pub id: String,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
}

/// A node as written in the curriculum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub requirements: Option<Requirements>,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

/// Node type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Info,
    Form,
    Upload,
    ConfirmTask,
    Milestone,
    Course,
    Payment,
    Gateway,
    Cards,
    Checklist,
}

impl NodeKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Form => "form",
            Self::Upload => "upload",
            Self::ConfirmTask => "confirm_task",
            Self::Milestone => "milestone",
            Self::Course => "course",
            Self::Payment => "payment",
            Self::Gateway => "gateway",
            Self::Cards => "cards",
            Self::Checklist => "checklist",
        }
    }

    /// Whether a submission of this kind starts an approval workflow by default.
    pub fn reviewed_by_default(&self) -> bool {
        matches!(
            self,
            Self::Form | Self::Upload | Self::ConfirmTask | Self::Milestone | Self::Checklist
        )
    }
}

/// Requirements block of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub uploads: Vec<UploadRequirement>,
    #[serde(default)]
    pub fields: Vec<FieldRequirement>,
    #[serde(default, rename = "courseId")]
    pub course_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Whether a slot holds one file or a list of positioned files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    Single,
    Multi,
}

impl Multiplicity {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }

    /// Parse from storage; unknown values read as `single`.
    pub fn parse(s: &str) -> Self {
        match s {
            "multi" => Self::Multi,
            _ => Self::Single,
        }
    }
}

/// Declared upload slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequirement {
    pub key: String,
    #[serde(default)]
    pub mime: Vec<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub label: LocalizedText,
    #[serde(default)]
    pub accept: Option<String>,
    #[serde(default)]
    pub multiplicity: Multiplicity,
}

fn default_true() -> bool {
    true
}

fn default_field_type() -> String {
    "text".to_string()
}

/// Declared form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRequirement {
    pub key: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub label: LocalizedText,
}

impl FieldRequirement {
    /// Whether `form` satisfies this field.
    pub fn is_satisfied(&self, form: &Value) -> bool {
        if !self.required || self.field_type == "note" {
            return true;
        }
        match form.get(&self.key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => self.field_type != "boolean" || *b,
            Some(Value::String(s)) => !s.trim().is_empty() && self.field_type != "boolean",
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => self.field_type != "boolean",
        }
    }
}

/// Node definition derived from a playbook version.
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    pub slug: String,
    pub kind: NodeKind,
    pub world: String,
    pub title: LocalizedText,
    pub description: LocalizedText,
    pub prerequisites: Vec<String>,
    pub uploads: Vec<UploadRequirement>,
    pub fields: Vec<FieldRequirement>,
    pub course_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub config: serde_json::Map<String, Value>,
}

impl NodeDefinition {
    pub(crate) fn from_document(world: &str, doc: NodeDocument) -> Result<Self> {
        let requirements = doc.requirements.unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        let prerequisites = doc
            .prerequisites
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        let node = Self {
            slug: doc.id,
            kind: doc.kind,
            world: world.to_string(),
            title: doc.title,
            description: doc.description,
            prerequisites,
            uploads: requirements.uploads,
            fields: requirements.fields,
            course_id: requirements.course_id,
            amount: requirements.amount,
            currency: requirements.currency,
            config: doc.config,
        };
        node.check_shape()?;
        Ok(node)
    }

    fn check_shape(&self) -> Result<()> {
        if self.slug.trim().is_empty() {
            return Err(Error::Parse("node id must not be empty".to_string()));
        }
        let mut keys = std::collections::HashSet::new();
        for upload in &self.uploads {
            if !keys.insert(upload.key.as_str()) {
                return Err(Error::Parse(format!(
                    "node '{}' declares upload '{}' twice",
                    self.slug, upload.key
                )));
            }
        }
        match self.kind {
            NodeKind::Course if self.course_id.is_none() => Err(Error::Parse(format!(
                "course node '{}' requires courseId",
                self.slug
            ))),
            NodeKind::Payment if self.amount.is_none() => Err(Error::Parse(format!(
                "payment node '{}' requires amount",
                self.slug
            ))),
            _ => Ok(()),
        }
    }

    /// Whether submitting this node starts an approval workflow.
    pub fn requires_review(&self) -> bool {
        self.config
            .get("review")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| self.kind.reviewed_by_default())
    }

    /// Upload requirement by slot key.
    pub fn upload(&self, key: &str) -> Option<&UploadRequirement> {
        self.uploads.iter().find(|u| u.key == key)
    }

    /// Kind-specific checks on the current form payload at submission.
    ///
    /// Slot checks happen separately because they need attachment state.
    pub fn validate_form(&self, form: &Value) -> Result<()> {
        for field in &self.fields {
            if !field.is_satisfied(form) {
                return Err(Error::MissingFormField(field.key.clone()));
            }
        }

        match self.kind {
            NodeKind::Payment => {
                let required = self.amount.unwrap_or(0.0);
                let paid = form.get("amount").and_then(Value::as_f64);
                match paid {
                    Some(paid) if paid >= required => {}
                    _ => return Err(Error::MissingFormField("amount".to_string())),
                }
                if let Some(currency) = &self.currency {
                    let given = form.get("currency").and_then(Value::as_str);
                    if !given.is_some_and(|c| c.eq_ignore_ascii_case(currency)) {
                        return Err(Error::MissingFormField("currency".to_string()));
                    }
                }
            }
            NodeKind::Course => {
                let enrolled = form.get("course_id").and_then(Value::as_str);
                if enrolled != self.course_id.as_deref() {
                    return Err(Error::MissingFormField("course_id".to_string()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(kind: &str, requirements: Value) -> NodeDefinition {
        let doc: NodeDocument = serde_json::from_value(json!({
            "id": "n1",
            "type": kind,
            "requirements": requirements,
        }))
        .unwrap();
        NodeDefinition::from_document("W1", doc).unwrap()
    }

    #[test]
    fn test_localized_text_fallbacks() {
        let text: LocalizedText = serde_json::from_value(json!({"ru": "Привет", "en": "Hello"})).unwrap();
        assert_eq!(text.get("en", "ru"), Some("Hello"));
        assert_eq!(text.get("kz", "ru"), Some("Привет"));
        let plain: LocalizedText = serde_json::from_value(json!("Hi")).unwrap();
        assert_eq!(plain.get("kz", "ru"), Some("Hi"));
    }

    #[test]
    fn test_upload_defaults() {
        let n = node("upload", json!({"uploads": [{"key": "cv", "mime": ["application/pdf"]}]}));
        let cv = n.upload("cv").unwrap();
        assert!(cv.required);
        assert_eq!(cv.multiplicity, Multiplicity::Single);
        assert!(n.requires_review());
    }

    #[test]
    fn test_boolean_and_note_fields() {
        let n = node(
            "checklist",
            json!({"fields": [
                {"key": "grp", "type": "note"},
                {"key": "chk_copy", "type": "boolean", "required": true},
                {"key": "comment", "required": false}
            ]}),
        );
        assert!(n.validate_form(&json!({"chk_copy": true})).is_ok());
        assert!(matches!(
            n.validate_form(&json!({"chk_copy": false})),
            Err(Error::MissingFormField(ref k)) if k == "chk_copy"
        ));
        assert!(n.validate_form(&json!({})).is_err());
    }

    #[test]
    fn test_text_field_rejects_blank() {
        let n = node("form", json!({"fields": [{"key": "topic", "required": true}]}));
        assert!(n.validate_form(&json!({"topic": "  "})).is_err());
        assert!(n.validate_form(&json!({"topic": "Cardiology"})).is_ok());
    }

    #[test]
    fn test_payment_requires_amount() {
        let doc: NodeDocument = serde_json::from_value(json!({"id": "fee", "type": "payment"})).unwrap();
        assert!(matches!(
            NodeDefinition::from_document("W1", doc),
            Err(Error::Parse(_))
        ));

        let n = node("payment", json!({"amount": 150.0, "currency": "KZT"}));
        assert!(n.validate_form(&json!({"amount": 150, "currency": "kzt"})).is_ok());
        assert!(n.validate_form(&json!({"amount": 100, "currency": "KZT"})).is_err());
        assert!(n.validate_form(&json!({"amount": 150, "currency": "USD"})).is_err());
        assert!(!n.requires_review());
    }

    #[test]
    fn test_course_enrolment() {
        let n = node("course", json!({"courseId": "PHD-101"}));
        assert!(n.validate_form(&json!({"course_id": "PHD-101"})).is_ok());
        assert!(n.validate_form(&json!({})).is_err());
    }

    #[test]
    fn test_review_override() {
        let doc: NodeDocument = serde_json::from_value(json!({
            "id": "intro", "type": "info", "config": {"review": true}
        }))
        .unwrap();
        assert!(NodeDefinition::from_document("W1", doc).unwrap().requires_review());
    }

    #[test]
    fn test_duplicate_upload_keys_rejected() {
        let doc: NodeDocument = serde_json::from_value(json!({
            "id": "n", "type": "upload",
            "requirements": {"uploads": [{"key": "a"}, {"key": "a"}]}
        }))
        .unwrap();
        assert!(NodeDefinition::from_document("W1", doc).is_err());
    }
}
