//! Pure analytics over a materialized table

use crate::error::TransformError;
use crate::table::Table;
use crate::transform::parse_date;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Shortest word counted by [`word_history`]
pub const HISTORY_MIN_WORD_LENGTH: usize = 3;

/// Number of words [`word_history`] keeps a daily series for
pub const HISTORY_TOP_WORDS: usize = 50;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing",
    "for", "from", "had", "has", "have", "having", "he", "her", "here", "him", "his", "how", "i",
    "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not",
    "of", "off", "on", "once", "only", "or", "other", "our", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your",
];

/// Occurrences of each rendered value of `column`
pub fn unique_counts(table: &Table, column: &str) -> Result<BTreeMap<String, usize>, TransformError> {
    let mut counts = BTreeMap::new();
    for value in table.column_values(column)? {
        *counts.entry(value.render()).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Lower-cased words of two or more characters, minus stop words
pub fn terms(text: &str) -> Vec<String> {
    terms_with_min(text, 2)
}

fn terms_with_min(text: &str, min_len: usize) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= min_len && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Daily word usage across a text column.
///
/// Day 0 is `start`, the earliest parseable date in the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordHistory {
    pub start: Option<NaiveDate>,
    /// Occurrences per day for the most used words. Every series has one
    /// entry per day from `start` to the last dated row.
    pub counts: BTreeMap<String, Vec<usize>>,
    /// Occurrences over the whole table, for every word seen
    pub totals: BTreeMap<String, usize>,
}

/// Count words of `text_column` per day of `date_column`.
///
/// Rows whose date does not parse are left out. Only the `top_n` words by
/// total get a daily series; ties are broken alphabetically.
pub fn word_history(
    table: &Table,
    date_column: &str,
    text_column: &str,
    min_word_length: usize,
    top_n: usize,
) -> Result<WordHistory, TransformError> {
    let date_index = table.require_column(date_column)?;
    let text_index = table.require_column(text_column)?;

    let dated: Vec<(NaiveDate, Vec<String>)> = table
        .rows()
        .iter()
        .filter_map(|row| {
            let date = parse_date(&row[date_index].render())?;
            Some((date, terms_with_min(&row[text_index].render(), min_word_length)))
        })
        .collect();

    let start = match dated.iter().map(|(date, _)| *date).min() {
        Some(start) => start,
        None => return Ok(WordHistory::default()),
    };

    let mut totals: BTreeMap<String, usize> = BTreeMap::new();
    let mut daily: HashMap<(String, usize), usize> = HashMap::new();
    let mut days = 0;
    for (date, words) in dated {
        let day = (date - start).num_days() as usize;
        days = days.max(day + 1);
        for word in words {
            *totals.entry(word.clone()).or_insert(0) += 1;
            *daily.entry((word, day)).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&String, &usize)> = totals.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(top_n);

    let counts = ranked
        .into_iter()
        .map(|(word, _)| {
            let series: Vec<usize> = (0..days)
                .map(|day| daily.get(&(word.clone(), day)).copied().unwrap_or(0))
                .collect();
            (word.clone(), series)
        })
        .collect();

    Ok(WordHistory {
        start: Some(start),
        counts,
        totals,
    })
}

/// For each value of `category_column`, the `count` most frequent terms of
/// `text_column` among its rows. Ties are broken alphabetically.
pub fn top_terms_by_category(
    table: &Table,
    text_column: &str,
    category_column: &str,
    count: usize,
) -> Result<BTreeMap<String, Vec<(String, usize)>>, TransformError> {
    let text_index = table.require_column(text_column)?;
    let category_index = table.require_column(category_column)?;

    let mut counts: HashMap<String, HashMap<String, usize>> = HashMap::new();
    for row in table.rows() {
        let category = counts.entry(row[category_index].render()).or_default();
        for term in terms(&row[text_index].render()) {
            *category.entry(term).or_insert(0) += 1;
        }
    }

    Ok(counts
        .into_iter()
        .map(|(category, terms)| {
            let mut ranked: Vec<(String, usize)> = terms.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ranked.truncate(count);
            (category, ranked)
        })
        .collect())
}
