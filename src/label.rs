//! Display column labels

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

pub const DEFAULT_LABEL_WIDTH: u32 = 150;
pub const DEFAULT_FONT_SIZE: u32 = 18;

/// A display column descriptor. The name is the identity used for lookups;
/// width and font size are only defaulted when read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "w", default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label {
            name: name.into(),
            width: None,
            font_size: None,
        }
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_font_size(mut self, font_size: u32) -> Self {
        self.font_size = Some(font_size);
        self
    }

    pub fn width(&self) -> u32 {
        self.width.unwrap_or(DEFAULT_LABEL_WIDTH)
    }

    pub fn font_size(&self) -> u32 {
        self.font_size.unwrap_or(DEFAULT_FONT_SIZE)
    }
}

// Compares effective values; an explicit default equals an absent field.
impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.width() == other.width()
            && self.font_size() == other.font_size()
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.width().hash(state);
        self.font_size().hash(state);
    }
}

/// Ordered display columns of a view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSequence(VecDeque<Label>);

impl LabelSequence {
    pub fn new() -> Self {
        LabelSequence(VecDeque::new())
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LabelSequence(names.into_iter().map(Label::new).collect())
    }

    /// Insert labels at the front, keeping their relative order
    pub fn prepend<I>(&mut self, labels: I)
    where
        I: IntoIterator<Item = Label>,
        I::IntoIter: DoubleEndedIterator,
    {
        for label in labels.into_iter().rev() {
            self.0.push_front(label);
        }
    }

    pub fn push(&mut self, label: Label) {
        self.0.push_back(label);
    }

    /// Remove the first label with this name; returns whether one was found
    pub fn remove_by_name(&mut self, name: &str) -> bool {
        match self.0.iter().position(|l| l.name == name) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|l| l.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|l| l.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Label> for LabelSequence {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        LabelSequence(iter.into_iter().collect())
    }
}

/// Which labels to list for a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    /// Raw dataset columns plus every enrichment output in the view
    All,
    /// Columns of the raw dataset
    Original,
    /// Columns produced by the view's enrichments
    Derived,
    /// Labels currently displayed by the view
    Active,
}

impl LabelType {
    pub fn parse(s: &str) -> Option<LabelType> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Some(LabelType::All),
            "original" => Some(LabelType::Original),
            "derived" => Some(LabelType::Derived),
            "active" => Some(LabelType::Active),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form_omits_defaults() {
        let label = Label::new("Q1");
        assert_eq!(serde_json::to_string(&label).unwrap(), r#"{"n":"Q1"}"#);

        let label = Label::new("Q2").with_width(200);
        assert_eq!(serde_json::to_string(&label).unwrap(), r#"{"n":"Q2","w":200}"#);

        let parsed: Label = serde_json::from_str(r#"{"n":"Q3","s":12}"#).unwrap();
        assert_eq!(parsed.width(), DEFAULT_LABEL_WIDTH);
        assert_eq!(parsed.font_size(), 12);
    }

    #[test]
    fn test_equality_uses_effective_values() {
        let explicit = Label::new("a").with_width(DEFAULT_LABEL_WIDTH);
        assert_eq!(Label::new("a"), explicit);
        assert_ne!(Label::new("a"), Label::new("a").with_font_size(10));
        assert_ne!(
            serde_json::to_string(&Label::new("a")).unwrap(),
            serde_json::to_string(&explicit).unwrap()
        );
    }

    #[test]
    fn test_prepend_front_first() {
        let mut labels = LabelSequence::from_names(["Q1", "Q2"]);
        labels.prepend(vec![Label::new("x_text"), Label::new("x_score")]);
        assert_eq!(labels.names(), vec!["x_text", "x_score", "Q1", "Q2"]);

        assert!(labels.remove_by_name("x_score"));
        assert!(!labels.remove_by_name("x_score"));
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_label_type_parse() {
        assert_eq!(LabelType::parse("Derived"), Some(LabelType::Derived));
        assert_eq!(LabelType::parse("other"), None);
    }
}
