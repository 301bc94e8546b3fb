use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TRUE: &str = "True";
pub const FALSE: &str = "False";

pub const FIELD_ISSUE_NUMBER: &str = "v32";
pub const FIELD_DOCUMENT_TYPE: &str = "v71";
pub const FIELD_PROCESSING_DATE: &str = "v91";
pub const DEFAULT_SUBFIELD: &str = "_";

fn flag_false() -> String {
    FALSE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleKey {
    pub collection: String,
    pub code: String,
}

impl ArticleKey {
    pub fn new(collection: impl Into<String>, code: impl Into<String>) -> Self {
        ArticleKey {
            collection: collection.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleRecord {
    pub code: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_title: Option<String>,
    #[serde(default)]
    pub publication_year: String,
    #[serde(default = "flag_false")]
    pub sent_wos: String,
    #[serde(default = "flag_false")]
    pub applicable: String,
    #[serde(default)]
    pub article: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    SentWos(String),
    Applicable(String),
    ArticleField { tag: String, value: Value },
}

impl ArticleRecord {
    pub fn key(&self) -> ArticleKey {
        ArticleKey::new(self.collection.clone(), self.code.clone())
    }

    pub fn journal_issn(&self) -> String {
        match &self.code_title {
            Some(issn) if !issn.is_empty() => issn.to_uppercase(),
            _ => issn_from_code(&self.code),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent_wos == TRUE
    }

    pub fn is_applicable(&self) -> bool {
        self.applicable == TRUE
    }

    pub fn fields(&self) -> FieldMap {
        FieldMap::from_value(&self.article)
    }

    pub fn document_type(&self) -> Option<String> {
        self.fields()
            .first(FIELD_DOCUMENT_TYPE, DEFAULT_SUBFIELD)
            .map(|v| v.trim().to_string())
    }

    pub fn is_ahead_of_print(&self) -> bool {
        self.fields()
            .first(FIELD_ISSUE_NUMBER, DEFAULT_SUBFIELD)
            .map(|v| v.to_lowercase().contains("ahead"))
            .unwrap_or(false)
    }

    /// Processing date as a fixed-width `YYYYMMDD` string. Absent, empty or
    /// malformed values all yield `None`.
    pub fn processing_date(&self) -> Option<String> {
        let fields = self.fields();
        let raw = fields.first(FIELD_PROCESSING_DATE, DEFAULT_SUBFIELD)?.trim();
        if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Some(raw.to_string())
        } else {
            None
        }
    }

    pub fn apply(&mut self, update: &FieldUpdate) -> bool {
        match update {
            FieldUpdate::SentWos(value) => replace_if_changed(&mut self.sent_wos, value),
            FieldUpdate::Applicable(value) => replace_if_changed(&mut self.applicable, value),
            FieldUpdate::ArticleField { tag, value } => {
                if !self.article.is_object() {
                    self.article = Value::Object(Map::new());
                }
                match self.article.as_object_mut() {
                    Some(fields) => {
                        if fields.get(tag) == Some(value) {
                            false
                        } else {
                            fields.insert(tag.clone(), value.clone());
                            true
                        }
                    }
                    None => false,
                }
            }
        }
    }
}

fn replace_if_changed(slot: &mut String, value: &str) -> bool {
    if slot == value {
        false
    } else {
        *slot = value.to_string();
        true
    }
}

pub fn issn_from_code(code: &str) -> String {
    code.get(1..10).unwrap_or_default().to_uppercase()
}

pub type Subfields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Absent,
    Present(&'a [Subfields]),
}

/// Typed view over the `article` field map. Each field code maps to its
/// ordered occurrences; anything that is not an occurrence list (or a bare
/// string) is treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    fields: BTreeMap<String, Vec<Subfields>>,
}

impl FieldMap {
    pub fn from_value(value: &Value) -> Self {
        let mut fields = BTreeMap::new();
        let Some(object) = value.as_object() else {
            return FieldMap { fields };
        };

        for (tag, raw) in object {
            let occurrences = match raw {
                Value::Array(items) => items.iter().filter_map(occurrence_from_value).collect(),
                Value::String(s) => vec![single_occurrence(s)],
                _ => continue,
            };
            fields.insert(tag.clone(), occurrences);
        }

        FieldMap { fields }
    }

    pub fn field(&self, tag: &str) -> Field<'_> {
        match self.fields.get(tag) {
            Some(occurrences) if !occurrences.is_empty() => Field::Present(occurrences),
            _ => Field::Absent,
        }
    }

    pub fn first(&self, tag: &str, subfield: &str) -> Option<&str> {
        match self.field(tag) {
            Field::Absent => None,
            Field::Present(occurrences) => occurrences[0].get(subfield).map(String::as_str),
        }
    }

    pub fn occurrences_value(occurrences: &[Subfields]) -> Value {
        Value::Array(
            occurrences
                .iter()
                .map(|occ| {
                    Value::Object(
                        occ.iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}

fn single_occurrence(value: &str) -> Subfields {
    let mut occ = Subfields::new();
    occ.insert(DEFAULT_SUBFIELD.to_string(), value.to_string());
    occ
}

fn occurrence_from_value(value: &Value) -> Option<Subfields> {
    match value {
        Value::Object(map) => Some(
            map.iter()
                .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                .collect(),
        ),
        Value::String(s) => Some(single_occurrence(s)),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
