//! Transforms
//!
//! A transform is one named, parameterized step of a view's pipeline. It is
//! either a *filter* (keeps a subset of rows) or an *enrichment* (adds one or
//! more named columns computed from existing ones).
//!
//! The wire form is the flat JSON array `[type, operation, ...params]`.
//! Persisted views must stay decodable, so new parameters are only ever
//! appended. Equality and hashing are defined over that wire form.

use crate::error::{Result, SieveError, TransformError};
use crate::registry::registry;
use crate::table::{SortKey, Table};
use crate::tags::TagStore;
use crate::types::{DatasetId, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Wire form of a single transform
pub type WireTransform = Vec<Json>;

/// The two things a transform can do to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Filter,
    Enrich,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Filter => "filter",
            Operation::Enrich => "enrich",
        }
    }

    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "filter" => Some(Operation::Filter),
            "enrich" => Some(Operation::Enrich),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive date interval, kept in its wire text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSpan {
    pub start: String,
    pub end: String,
}

impl DateSpan {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        DateSpan {
            start: start.into(),
            end: end.into(),
        }
    }

    fn bounds(&self) -> std::result::Result<(NaiveDate, NaiveDate), TransformError> {
        let start = parse_date(&self.start).ok_or_else(|| TransformError::InvalidParameter {
            name: "start".to_string(),
            reason: format!("'{}' is not a date", self.start),
        })?;
        let end = parse_date(&self.end).ok_or_else(|| TransformError::InvalidParameter {
            name: "end".to_string(),
            reason: format!("'{}' is not a date", self.end),
        })?;
        Ok((start, end))
    }
}

/// Resources a transform may need beyond the table itself, scoped to the
/// dataset being resolved.
pub struct TransformContext<'a> {
    pub dataset_id: DatasetId,
    pub tags: &'a TagStore,
}

impl<'a> TransformContext<'a> {
    pub fn new(dataset_id: DatasetId, tags: &'a TagStore) -> Self {
        TransformContext { dataset_id, tags }
    }
}

/// Result of an enrichment: the widened table and an optional sort request
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub table: Table,
    pub sort: Option<SortKey>,
}

/// Default separator for `MergeColumnText` when absent from the wire
pub const DEFAULT_MERGE_SEPARATOR: &str = " ";

/// All transform variants
#[derive(Debug, Clone)]
pub enum Transform {
    ExactMatch { column: String, value: String },
    MatchAny { column: String, values: Vec<String> },
    DoesNotMatch { column: String, value: String },
    DoesNotMatchAny { column: String, values: Vec<String> },
    HasText { column: String, text: String },
    DoesNotHaveText { column: String, text: String },
    DateRange { column: String, span: DateSpan },
    DateRanges { column: String, spans: Vec<DateSpan> },
    MatchingColumns { left: String, right: String },
    HasTag { key_column: String, tag: String },
    MergeColumnText {
        name: String,
        columns: Vec<String>,
        separator: String,
    },
    ExtractNth {
        name: String,
        column: String,
        separator: String,
        position: usize,
    },
    Tag { name: String, key_column: String },
    ProblemReport { name: String, columns: Vec<String> },
    Categorization {
        name: String,
        column: String,
        categories: Vec<String>,
    },
}

impl Transform {
    /// Stable type discriminator
    pub fn type_name(&self) -> &'static str {
        match self {
            Transform::ExactMatch { .. } => "ExactMatch",
            Transform::MatchAny { .. } => "MatchAny",
            Transform::DoesNotMatch { .. } => "DoesNotMatch",
            Transform::DoesNotMatchAny { .. } => "DoesNotMatchAny",
            Transform::HasText { .. } => "HasText",
            Transform::DoesNotHaveText { .. } => "DoesNotHaveText",
            Transform::DateRange { .. } => "DateRange",
            Transform::DateRanges { .. } => "DateRanges",
            Transform::MatchingColumns { .. } => "MatchingColumns",
            Transform::HasTag { .. } => "HasTag",
            Transform::MergeColumnText { .. } => "MergeColumnText",
            Transform::ExtractNth { .. } => "ExtractNth",
            Transform::Tag { .. } => "Tag",
            Transform::ProblemReport { .. } => "ProblemReport",
            Transform::Categorization { .. } => "Categorization",
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Transform::MergeColumnText { .. }
            | Transform::ExtractNth { .. }
            | Transform::Tag { .. }
            | Transform::ProblemReport { .. }
            | Transform::Categorization { .. } => Operation::Enrich,
            _ => Operation::Filter,
        }
    }

    pub fn is_filter(&self) -> bool {
        self.operation() == Operation::Filter
    }

    pub fn is_enrichment(&self) -> bool {
        self.operation() == Operation::Enrich
    }

    /// Columns this transform reads
    pub fn input_labels(&self) -> Vec<String> {
        match self {
            Transform::ExactMatch { column, .. }
            | Transform::MatchAny { column, .. }
            | Transform::DoesNotMatch { column, .. }
            | Transform::DoesNotMatchAny { column, .. }
            | Transform::HasText { column, .. }
            | Transform::DoesNotHaveText { column, .. }
            | Transform::DateRange { column, .. }
            | Transform::DateRanges { column, .. }
            | Transform::ExtractNth { column, .. }
            | Transform::Categorization { column, .. } => vec![column.clone()],
            Transform::MatchingColumns { left, right } => {
                if left == right {
                    vec![left.clone()]
                } else {
                    vec![left.clone(), right.clone()]
                }
            }
            Transform::HasTag { key_column, .. } | Transform::Tag { key_column, .. } => {
                vec![key_column.clone()]
            }
            Transform::MergeColumnText { columns, .. }
            | Transform::ProblemReport { columns, .. } => {
                let mut labels: Vec<String> = Vec::with_capacity(columns.len());
                for column in columns {
                    if !labels.contains(column) {
                        labels.push(column.clone());
                    }
                }
                labels
            }
        }
    }

    /// Columns this transform creates, in order (empty for filters)
    pub fn output_labels(&self) -> Vec<String> {
        match self {
            Transform::MergeColumnText { name, .. }
            | Transform::ExtractNth { name, .. }
            | Transform::Tag { name, .. }
            | Transform::Categorization { name, .. } => vec![name.clone()],
            Transform::ProblemReport { name, .. } => {
                vec![format!("{}_text", name), format!("{}_score", name)]
            }
            _ => Vec::new(),
        }
    }

    /// Wire form: `[type, operation, ...params]`
    pub fn to_wire(&self) -> WireTransform {
        let mut wire = vec![json!(self.type_name()), json!(self.operation().as_str())];
        match self {
            Transform::ExactMatch { column, value }
            | Transform::DoesNotMatch { column, value } => {
                wire.extend([json!(column), json!(value)]);
            }
            Transform::MatchAny { column, values }
            | Transform::DoesNotMatchAny { column, values } => {
                wire.extend([json!(column), json!(values)]);
            }
            Transform::HasText { column, text } | Transform::DoesNotHaveText { column, text } => {
                wire.extend([json!(column), json!(text)]);
            }
            Transform::DateRange { column, span } => {
                wire.extend([json!(column), json!(span.start), json!(span.end)]);
            }
            Transform::DateRanges { column, spans } => {
                let spans: Vec<Json> = spans.iter().map(|s| json!([s.start, s.end])).collect();
                wire.extend([json!(column), Json::Array(spans)]);
            }
            Transform::MatchingColumns { left, right } => {
                wire.extend([json!(left), json!(right)]);
            }
            Transform::HasTag { key_column, tag } => {
                wire.extend([json!(key_column), json!(tag)]);
            }
            Transform::MergeColumnText {
                name,
                columns,
                separator,
            } => {
                wire.extend([json!(name), json!(columns), json!(separator)]);
            }
            Transform::ExtractNth {
                name,
                column,
                separator,
                position,
            } => {
                wire.extend([json!(name), json!(column), json!(separator), json!(position)]);
            }
            Transform::Tag { name, key_column } => {
                wire.extend([json!(name), json!(key_column)]);
            }
            Transform::ProblemReport { name, columns } => {
                wire.extend([json!(name), json!(columns)]);
            }
            Transform::Categorization {
                name,
                column,
                categories,
            } => {
                wire.extend([json!(name), json!(column), json!(categories)]);
            }
        }
        wire
    }

    /// Decode a wire form through the transform registry
    pub fn from_wire(wire: &[Json]) -> Result<Transform> {
        let name = wire
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| SieveError::MalformedTransform {
                transform: Json::Array(wire.to_vec()).to_string(),
                reason: "missing type name".to_string(),
            })?;

        let entry = registry().lookup(name)?;

        let operation = wire.get(1).and_then(Json::as_str).and_then(Operation::parse);
        if operation != Some(entry.operation) {
            return Err(SieveError::MalformedTransform {
                transform: Json::Array(wire.to_vec()).to_string(),
                reason: format!("{} is a {} transform", name, entry.operation),
            });
        }

        (entry.decode)(&wire[2..]).map_err(|reason| SieveError::MalformedTransform {
            transform: Json::Array(wire.to_vec()).to_string(),
            reason,
        })
    }

    /// Canonical serialized text; the identity used for equality and hashing
    pub fn canonical(&self) -> String {
        Json::Array(self.to_wire()).to_string()
    }

    /// Run the transform, dispatching on its operation. Enrichments that
    /// request a sort record it as the table's default sort.
    pub fn apply(
        &self,
        table: Table,
        ctx: &TransformContext<'_>,
    ) -> std::result::Result<Table, TransformError> {
        match self.operation() {
            Operation::Filter => self.filter(&table, ctx),
            Operation::Enrich => {
                let Enrichment { mut table, sort } = self.enrich(table, ctx)?;
                if sort.is_some() {
                    table.set_default_sort(sort);
                }
                Ok(table)
            }
        }
    }

    /// Keep the rows this filter accepts
    pub fn filter(
        &self,
        table: &Table,
        ctx: &TransformContext<'_>,
    ) -> std::result::Result<Table, TransformError> {
        match self {
            Transform::ExactMatch { column, value } => {
                let index = table.require_column(column)?;
                Ok(table.retain_rows(|row| row[index].render() == *value))
            }
            Transform::DoesNotMatch { column, value } => {
                let index = table.require_column(column)?;
                Ok(table.retain_rows(|row| row[index].render() != *value))
            }
            Transform::MatchAny { column, values } => {
                let index = table.require_column(column)?;
                Ok(table.retain_rows(|row| values.contains(&row[index].render())))
            }
            Transform::DoesNotMatchAny { column, values } => {
                let index = table.require_column(column)?;
                Ok(table.retain_rows(|row| !values.contains(&row[index].render())))
            }
            Transform::HasText { column, text } => {
                let index = table.require_column(column)?;
                let needle = text.to_lowercase();
                Ok(table.retain_rows(|row| row[index].render().to_lowercase().contains(&needle)))
            }
            Transform::DoesNotHaveText { column, text } => {
                let index = table.require_column(column)?;
                let needle = text.to_lowercase();
                Ok(table.retain_rows(|row| !row[index].render().to_lowercase().contains(&needle)))
            }
            Transform::DateRange { column, span } => {
                filter_dates(table, column, std::slice::from_ref(span))
            }
            Transform::DateRanges { column, spans } => filter_dates(table, column, spans),
            Transform::MatchingColumns { left, right } => {
                let left = table.require_column(left)?;
                let right = table.require_column(right)?;
                Ok(table.retain_rows(|row| row[left].render() == row[right].render()))
            }
            Transform::HasTag { key_column, tag } => {
                let index = table.require_column(key_column)?;
                let tag_map = ctx
                    .tags
                    .get(ctx.dataset_id)
                    .map_err(|e| TransformError::Resource(e.to_string()))?;
                match tag_map {
                    Some(tag_map) => {
                        let tag_map = tag_map.read();
                        Ok(table.retain_rows(|row| tag_map.has_tag(&row[index].render(), tag)))
                    }
                    None => Ok(table.retain_rows(|_| false)),
                }
            }
            _ => Err(TransformError::UnsupportedOperation {
                transform: self.type_name().to_string(),
                operation: Operation::Filter,
            }),
        }
    }

    /// Add this enrichment's output columns to the table
    pub fn enrich(
        &self,
        mut table: Table,
        ctx: &TransformContext<'_>,
    ) -> std::result::Result<Enrichment, TransformError> {
        let sort = match self {
            Transform::MergeColumnText {
                name,
                columns,
                separator,
            } => {
                let indexes = columns
                    .iter()
                    .map(|c| table.require_column(c))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let values = table
                    .rows()
                    .iter()
                    .map(|row| {
                        let parts: Vec<String> = indexes
                            .iter()
                            .map(|&i| row[i].render().trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect();
                        text_value(parts.join(separator))
                    })
                    .collect();
                table.set_column(name, values);
                None
            }
            Transform::ExtractNth {
                name,
                column,
                separator,
                position,
            } => {
                if separator.is_empty() {
                    return Err(TransformError::InvalidParameter {
                        name: "separator".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
                let index = table.require_column(column)?;
                let values = table
                    .rows()
                    .iter()
                    .map(|row| {
                        let text = row[index].render();
                        let piece = text
                            .split(separator.as_str())
                            .nth(*position)
                            .map(|s| s.trim().to_string())
                            .unwrap_or_default();
                        text_value(piece)
                    })
                    .collect();
                table.set_column(name, values);
                None
            }
            Transform::Tag { name, key_column } => {
                let index = table.require_column(key_column)?;
                let tag_map = ctx
                    .tags
                    .get_or_create(ctx.dataset_id, key_column)
                    .map_err(|e| TransformError::Resource(e.to_string()))?;
                let tag_map = tag_map.read();
                let values = table
                    .rows()
                    .iter()
                    .map(|row| {
                        let tags: Vec<String> =
                            tag_map.tags_for(&row[index].render()).into_iter().collect();
                        text_value(tags.join(", "))
                    })
                    .collect();
                drop(tag_map);
                table.set_column(name, values);
                None
            }
            Transform::ProblemReport { name, columns } => {
                let indexes = columns
                    .iter()
                    .map(|c| table.require_column(c))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let detector = problem_detector()?;

                let mut texts = Vec::with_capacity(table.len());
                let mut scores = Vec::with_capacity(table.len());
                for row in table.rows() {
                    let joined: Vec<String> = indexes.iter().map(|&i| row[i].render()).collect();
                    let text = detector.normalize(&joined.join(" "));
                    scores.push(Value::Int(detector.score(&text) as i64));
                    texts.push(text_value(text));
                }

                let score_label = format!("{}_score", name);
                table.set_column(&format!("{}_text", name), texts);
                table.set_column(&score_label, scores);
                Some(SortKey::new(score_label, false))
            }
            Transform::Categorization {
                name,
                column,
                categories,
            } => {
                let index = table.require_column(column)?;
                let words: Vec<String> = categories.iter().map(|c| c.to_lowercase()).collect();
                let values = table
                    .rows()
                    .iter()
                    .map(|row| {
                        let text = row[index].render().to_lowercase();
                        let mut best: Option<(usize, usize)> = None;
                        for (i, word) in words.iter().enumerate() {
                            if word.is_empty() {
                                continue;
                            }
                            let count = text.matches(word.as_str()).count();
                            if count > 0 && best.map_or(true, |(c, _)| count > c) {
                                best = Some((count, i));
                            }
                        }
                        best.map_or(Value::Empty, |(_, i)| Value::Text(categories[i].clone()))
                    })
                    .collect();
                table.set_column(name, values);
                None
            }
            _ => {
                return Err(TransformError::UnsupportedOperation {
                    transform: self.type_name().to_string(),
                    operation: Operation::Enrich,
                })
            }
        };

        Ok(Enrichment { table, sort })
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.to_wire() == other.to_wire()
    }
}

impl Eq for Transform {}

impl Hash for Transform {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl Serialize for Transform {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireTransform::deserialize(deserializer)?;
        Transform::from_wire(&wire).map_err(serde::de::Error::custom)
    }
}

fn text_value(s: String) -> Value {
    if s.is_empty() {
        Value::Empty
    } else {
        Value::Text(s)
    }
}

fn filter_dates(
    table: &Table,
    column: &str,
    spans: &[DateSpan],
) -> std::result::Result<Table, TransformError> {
    let index = table.require_column(column)?;
    let bounds = spans
        .iter()
        .map(DateSpan::bounds)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(table.retain_rows(|row| match parse_date(&row[index].render()) {
        Some(date) => bounds.iter().any(|(start, end)| *start <= date && date <= *end),
        None => false,
    }))
}

/// Parse the date part of the formats survey exports commonly use
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

const PROBLEM_TERMS: &[&str] = &[
    r"error(s|ed|red)?",
    r"fail(ed|s|ing|ure|ures)?",
    r"crash(es|ed|ing)?",
    r"unauthorized",
    r"system",
    r"browser",
    r"navigat(e|ing|ion)",
    r"web ?site(s)?",
    r"web ?page(s)?",
    r"(hyper)?link(s|ed)?",
    r"click(ed|ing)?",
    r"broken",
    r"password(s)?",
    r"wrong page",
    r"faq",
    r"drop ?down",
    r"download(s|ed|ing)?",
    r"log(ged|ging)? ?(in|out)",
    r"server",
    r"gateway",
    r"redirect(s|ed|ing)?",
    r"responding",
    r"tim(e|ed|ing) ?out",
    r"not found",
    r"pop ?up(s)?",
    r"chrome",
    r"firefox",
    r"safari",
    r"android",
];

const DIFFICULTY_TERMS: &[&str] = &[
    r"confus(e|ed|ing)",
    r"frustrat(e|ed|ing)",
    r"difficult(y|ies)?",
    r"broke(n)?",
    r"wrong",
    r"not right",
    r"(wasn't|wasnt|isn't|isnt|not) clear",
    r"problem(s|atic)?",
    r"fail(s|ed|ure|ures)?",
    r"issue(s)?",
    r"unclear",
    r"(could|did)(n't|nt| not) (find|see|understand)",
    r"can('t|t|not| not)",
    r"incomplete",
];

static PROBLEM_DETECTOR: OnceLock<std::result::Result<ProblemDetector, regex::Error>> =
    OnceLock::new();

/// Shared detector, compiled on first use
fn problem_detector() -> std::result::Result<&'static ProblemDetector, TransformError> {
    match PROBLEM_DETECTOR.get_or_init(ProblemDetector::new) {
        Ok(detector) => Ok(detector),
        Err(e) => Err(TransformError::InvalidParameter {
            name: "pattern".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Two-pass surface pattern detector for technical problem reports
struct ProblemDetector {
    problem: Regex,
    difficulty: Regex,
    replace_chars: Regex,
    collapse_ws: Regex,
    remove_dashes: Regex,
}

impl ProblemDetector {
    fn new() -> std::result::Result<Self, regex::Error> {
        Ok(ProblemDetector {
            problem: Regex::new(&format!(r"\b({})\b", PROBLEM_TERMS.join("|")))?,
            difficulty: Regex::new(&format!(r"\b({})\b", DIFFICULTY_TERMS.join("|")))?,
            replace_chars: Regex::new(r#"[.,?!:;*/\n\t()"]"#)?,
            collapse_ws: Regex::new(r" {2,}")?,
            remove_dashes: Regex::new(r"( - |-)")?,
        })
    }

    fn normalize(&self, text: &str) -> String {
        let text = self.replace_chars.replace_all(text, " ");
        let text = self.collapse_ws.replace_all(&text, " ");
        let text = self.remove_dashes.replace_all(&text, "");
        text.trim().to_lowercase()
    }

    /// Problem-term matches, counted only when a difficulty term is present
    fn score(&self, text: &str) -> usize {
        if text.is_empty() || !self.difficulty.is_match(text) {
            return 0;
        }
        self.problem.find_iter(text).count()
    }
}
