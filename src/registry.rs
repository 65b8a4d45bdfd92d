//! Transform registry
//!
//! Process-wide catalog from transform type name to decoder, capability and
//! UI metadata. Built once from an explicit, ordered registration list and
//! read-only afterwards.

use crate::error::{Result, SieveError};
use crate::transform::{DateSpan, Operation, Transform, DEFAULT_MERGE_SEPARATOR};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

/// Decodes the positional parameters that follow `[type, operation]`
pub type DecodeFn = fn(&[Json]) -> std::result::Result<Transform, String>;

/// One parameter in a transform's UI schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    #[serde(rename = "type")]
    pub param_type: String,
    pub name: String,
    pub label: String,
    pub example: Json,
}

impl ParameterDef {
    fn new(param_type: &str, name: &str, label: &str, example: Json) -> Self {
        ParameterDef {
            param_type: param_type.to_string(),
            name: name.to_string(),
            label: label.to_string(),
            example,
        }
    }
}

/// UI description of a transform type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformDef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: Vec<String>,
    pub params: Vec<ParameterDef>,
    pub operations: Vec<Operation>,
}

/// Registry entry for one transform type
#[derive(Clone)]
pub struct RegistryEntry {
    pub name: &'static str,
    pub operation: Operation,
    pub decode: DecodeFn,
    /// Template fragments; `{param}` placeholders name parameters
    pub description: &'static [&'static str],
    pub params: fn() -> Vec<ParameterDef>,
    /// A representative instance, used to check the declared capability
    pub example: fn() -> Transform,
}

impl RegistryEntry {
    pub fn def(&self) -> TransformDef {
        TransformDef {
            type_name: self.name.to_string(),
            description: self.description.iter().map(|s| s.to_string()).collect(),
            params: (self.params)(),
            operations: vec![self.operation],
        }
    }
}

/// Name-indexed transform catalog
pub struct TransformRegistry {
    order: Vec<&'static str>,
    entries: HashMap<&'static str, RegistryEntry>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        TransformRegistry {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    /// Register a transform type. Re-registering a name is a no-op; an entry
    /// whose example does not report the declared operation is rejected.
    pub fn register(&mut self, entry: RegistryEntry) -> bool {
        if self.entries.contains_key(entry.name) {
            return false;
        }

        let example = (entry.example)();
        if example.type_name() != entry.name || example.operation() != entry.operation {
            warn!(
                transform = entry.name,
                declared = %entry.operation,
                actual = %example.operation(),
                "rejecting transform with mismatched capability"
            );
            return false;
        }

        self.order.push(entry.name);
        self.entries.insert(entry.name, entry);
        true
    }

    pub fn lookup(&self, name: &str) -> Result<&RegistryEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| SieveError::UnknownTransformType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    /// Names of the types implementing `operation`
    pub fn supporting(&self, operation: Operation) -> Vec<&'static str> {
        self.order
            .iter()
            .copied()
            .filter(|name| self.entries[name].operation == operation)
            .collect()
    }

    pub fn list_defs(&self) -> Vec<TransformDef> {
        self.order
            .iter()
            .map(|name| self.entries[name].def())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: OnceLock<TransformRegistry> = OnceLock::new();

/// The process-wide registry with every built-in transform
pub fn registry() -> &'static TransformRegistry {
    REGISTRY.get_or_init(|| {
        let mut registry = TransformRegistry::new();
        for entry in builtin_entries() {
            registry.register(entry);
        }
        registry
    })
}

// Parameter decoding helpers

fn arg<'a>(params: &'a [Json], index: usize, name: &str) -> std::result::Result<&'a Json, String> {
    params
        .get(index)
        .ok_or_else(|| format!("missing parameter '{}'", name))
}

/// Numbers are accepted where text is expected, but the decoded transform
/// re-encodes them as strings, so its canonical key differs from the input.
fn number_as_string(name: &str, n: &serde_json::Number) -> String {
    warn!(parameter = name, value = %n, "numeric parameter normalized to a string");
    n.to_string()
}

fn string_param(params: &[Json], index: usize, name: &str) -> std::result::Result<String, String> {
    match arg(params, index, name)? {
        Json::String(s) => Ok(s.clone()),
        Json::Number(n) => Ok(number_as_string(name, n)),
        other => Err(format!("parameter '{}' must be a string, got {}", name, other)),
    }
}

fn string_list_param(
    params: &[Json],
    index: usize,
    name: &str,
) -> std::result::Result<Vec<String>, String> {
    match arg(params, index, name)? {
        Json::Array(items) => items
            .iter()
            .map(|item| match item {
                Json::String(s) => Ok(s.clone()),
                Json::Number(n) => Ok(number_as_string(name, n)),
                other => Err(format!("parameter '{}' has a non-string item {}", name, other)),
            })
            .collect(),
        other => Err(format!("parameter '{}' must be a list, got {}", name, other)),
    }
}

fn position_param(params: &[Json], index: usize, name: &str) -> std::result::Result<usize, String> {
    let value = arg(params, index, name)?;
    let position = match value {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    position
        .map(|p| p as usize)
        .ok_or_else(|| format!("parameter '{}' must be a non-negative integer, got {}", name, value))
}

fn span_list_param(
    params: &[Json],
    index: usize,
    name: &str,
) -> std::result::Result<Vec<DateSpan>, String> {
    match arg(params, index, name)? {
        Json::Array(items) => items
            .iter()
            .map(|item| match item.as_array().map(Vec::as_slice) {
                Some([Json::String(start), Json::String(end)]) => Ok(DateSpan::new(start, end)),
                _ => Err(format!("parameter '{}' has a malformed range {}", name, item)),
            })
            .collect(),
        other => Err(format!("parameter '{}' must be a list, got {}", name, other)),
    }
}

fn s(v: &str) -> String {
    v.to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|i| i.to_string()).collect()
}

fn builtin_entries() -> Vec<RegistryEntry> {
    use serde_json::json;

    vec![
        RegistryEntry {
            name: "ExactMatch",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::ExactMatch {
                    column: string_param(p, 0, "column")?,
                    value: string_param(p, 1, "value")?,
                })
            },
            description: &["{column}", " = ", "{value}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("Q1")),
                    ParameterDef::new("string", "value", "Value", json!("yes")),
                ]
            },
            example: || Transform::ExactMatch {
                column: s("Q1"),
                value: s("yes"),
            },
        },
        RegistryEntry {
            name: "MatchAny",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::MatchAny {
                    column: string_param(p, 0, "column")?,
                    values: string_list_param(p, 1, "values")?,
                })
            },
            description: &["{column}", " is one of ", "{values}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("Q1")),
                    ParameterDef::new("list", "values", "Values", json!(["yes", "maybe"])),
                ]
            },
            example: || Transform::MatchAny {
                column: s("Q1"),
                values: strings(&["yes", "maybe"]),
            },
        },
        RegistryEntry {
            name: "DoesNotMatch",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::DoesNotMatch {
                    column: string_param(p, 0, "column")?,
                    value: string_param(p, 1, "value")?,
                })
            },
            description: &["{column}", " != ", "{value}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("Q1")),
                    ParameterDef::new("string", "value", "Value", json!("no")),
                ]
            },
            example: || Transform::DoesNotMatch {
                column: s("Q1"),
                value: s("no"),
            },
        },
        RegistryEntry {
            name: "DoesNotMatchAny",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::DoesNotMatchAny {
                    column: string_param(p, 0, "column")?,
                    values: string_list_param(p, 1, "values")?,
                })
            },
            description: &["{column}", " is not one of ", "{values}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("Q1")),
                    ParameterDef::new("list", "values", "Values", json!(["no"])),
                ]
            },
            example: || Transform::DoesNotMatchAny {
                column: s("Q1"),
                values: strings(&["no"]),
            },
        },
        RegistryEntry {
            name: "HasText",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::HasText {
                    column: string_param(p, 0, "column")?,
                    text: string_param(p, 1, "text")?,
                })
            },
            description: &["{column}", " contains ", "{text}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("Q2")),
                    ParameterDef::new("string", "text", "Text", json!("website")),
                ]
            },
            example: || Transform::HasText {
                column: s("Q2"),
                text: s("website"),
            },
        },
        RegistryEntry {
            name: "DoesNotHaveText",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::DoesNotHaveText {
                    column: string_param(p, 0, "column")?,
                    text: string_param(p, 1, "text")?,
                })
            },
            description: &["{column}", " does not contain ", "{text}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("Q2")),
                    ParameterDef::new("string", "text", "Text", json!("website")),
                ]
            },
            example: || Transform::DoesNotHaveText {
                column: s("Q2"),
                text: s("website"),
            },
        },
        RegistryEntry {
            name: "DateRange",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::DateRange {
                    column: string_param(p, 0, "column")?,
                    span: DateSpan::new(string_param(p, 1, "start")?, string_param(p, 2, "end")?),
                })
            },
            description: &["{column}", " between ", "{start}", " and ", "{end}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("EndDate")),
                    ParameterDef::new("date", "start", "Start", json!("2020-01-01")),
                    ParameterDef::new("date", "end", "End", json!("2020-12-31")),
                ]
            },
            example: || Transform::DateRange {
                column: s("EndDate"),
                span: DateSpan::new("2020-01-01", "2020-12-31"),
            },
        },
        RegistryEntry {
            name: "DateRanges",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::DateRanges {
                    column: string_param(p, 0, "column")?,
                    spans: span_list_param(p, 1, "ranges")?,
                })
            },
            description: &["{column}", " within ", "{ranges}"],
            params: || {
                vec![
                    ParameterDef::new("column", "column", "Column", json!("EndDate")),
                    ParameterDef::new(
                        "date_ranges",
                        "ranges",
                        "Ranges",
                        json!([["2020-01-01", "2020-01-31"]]),
                    ),
                ]
            },
            example: || Transform::DateRanges {
                column: s("EndDate"),
                spans: vec![DateSpan::new("2020-01-01", "2020-01-31")],
            },
        },
        RegistryEntry {
            name: "MatchingColumns",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::MatchingColumns {
                    left: string_param(p, 0, "left")?,
                    right: string_param(p, 1, "right")?,
                })
            },
            description: &["{left}", " matches ", "{right}"],
            params: || {
                vec![
                    ParameterDef::new("column", "left", "Column", json!("Q1")),
                    ParameterDef::new("column", "right", "Other column", json!("Q3")),
                ]
            },
            example: || Transform::MatchingColumns {
                left: s("Q1"),
                right: s("Q3"),
            },
        },
        RegistryEntry {
            name: "HasTag",
            operation: Operation::Filter,
            decode: |p| {
                Ok(Transform::HasTag {
                    key_column: string_param(p, 0, "key_column")?,
                    tag: string_param(p, 1, "tag")?,
                })
            },
            description: &["tagged ", "{tag}"],
            params: || {
                vec![
                    ParameterDef::new("column", "key_column", "Primary key", json!("ResponseID")),
                    ParameterDef::new("string", "tag", "Tag", json!("follow-up")),
                ]
            },
            example: || Transform::HasTag {
                key_column: s("ResponseID"),
                tag: s("follow-up"),
            },
        },
        RegistryEntry {
            name: "MergeColumnText",
            operation: Operation::Enrich,
            decode: |p| {
                let separator = if p.len() > 2 {
                    string_param(p, 2, "separator")?
                } else {
                    DEFAULT_MERGE_SEPARATOR.to_string()
                };
                Ok(Transform::MergeColumnText {
                    name: string_param(p, 0, "name")?,
                    columns: string_list_param(p, 1, "columns")?,
                    separator,
                })
            },
            description: &["{name}", " = merge ", "{columns}"],
            params: || {
                vec![
                    ParameterDef::new("string", "name", "Name", json!("merged")),
                    ParameterDef::new("columns", "columns", "Columns", json!(["Q1", "Q2"])),
                    ParameterDef::new("string", "separator", "Separator", json!(" ")),
                ]
            },
            example: || Transform::MergeColumnText {
                name: s("merged"),
                columns: strings(&["Q1", "Q2"]),
                separator: s(DEFAULT_MERGE_SEPARATOR),
            },
        },
        RegistryEntry {
            name: "ExtractNth",
            operation: Operation::Enrich,
            decode: |p| {
                Ok(Transform::ExtractNth {
                    name: string_param(p, 0, "name")?,
                    column: string_param(p, 1, "column")?,
                    separator: string_param(p, 2, "separator")?,
                    position: position_param(p, 3, "position")?,
                })
            },
            description: &["{name}", " = part ", "{position}", " of ", "{column}"],
            params: || {
                vec![
                    ParameterDef::new("string", "name", "Name", json!("section")),
                    ParameterDef::new("column", "column", "Column", json!("Referer")),
                    ParameterDef::new("string", "separator", "Separator", json!("/")),
                    ParameterDef::new("number", "position", "Position", json!(3)),
                ]
            },
            example: || Transform::ExtractNth {
                name: s("section"),
                column: s("Referer"),
                separator: s("/"),
                position: 3,
            },
        },
        RegistryEntry {
            name: "Tag",
            operation: Operation::Enrich,
            decode: |p| {
                Ok(Transform::Tag {
                    name: string_param(p, 0, "name")?,
                    key_column: string_param(p, 1, "key_column")?,
                })
            },
            description: &["{name}", " = tags by ", "{key_column}"],
            params: || {
                vec![
                    ParameterDef::new("string", "name", "Name", json!("tags")),
                    ParameterDef::new("column", "key_column", "Primary key", json!("ResponseID")),
                ]
            },
            example: || Transform::Tag {
                name: s("tags"),
                key_column: s("ResponseID"),
            },
        },
        RegistryEntry {
            name: "ProblemReport",
            operation: Operation::Enrich,
            decode: |p| {
                Ok(Transform::ProblemReport {
                    name: string_param(p, 0, "name")?,
                    columns: string_list_param(p, 1, "columns")?,
                })
            },
            description: &["{name}", " = problem report over ", "{columns}"],
            params: || {
                vec![
                    ParameterDef::new("string", "name", "Name", json!("problem")),
                    ParameterDef::new("columns", "columns", "Text columns", json!(["Q2"])),
                ]
            },
            example: || Transform::ProblemReport {
                name: s("problem"),
                columns: strings(&["Q2"]),
            },
        },
        RegistryEntry {
            name: "Categorization",
            operation: Operation::Enrich,
            decode: |p| {
                Ok(Transform::Categorization {
                    name: string_param(p, 0, "name")?,
                    column: string_param(p, 1, "column")?,
                    categories: string_list_param(p, 2, "categories")?,
                })
            },
            description: &["{name}", " = category of ", "{column}"],
            params: || {
                vec![
                    ParameterDef::new("string", "name", "Name", json!("category")),
                    ParameterDef::new("column", "column", "Column", json!("Q2")),
                    ParameterDef::new(
                        "list",
                        "categories",
                        "Categories",
                        json!(["login", "search", "payment"]),
                    ),
                ]
            },
            example: || Transform::Categorization {
                name: s("category"),
                column: s("Q2"),
                categories: strings(&["login", "search", "payment"]),
            },
        },
    ]
}
