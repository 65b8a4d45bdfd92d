//! Session Tests - Files on Disk
//!
//! Runs a session against real CSV/TSV files and JSON records, reopens it,
//! and checks that the views, history and tags come back.

use sieve_core::*;
use std::sync::Arc;
use tempfile::TempDir;

const RESPONSES: &str = "\
ResponseID,Score,EndDate,Comment
r1,9,2020-01-05 10:00:00,love the new website
r2,3,2020-02-11 08:30:00,the link is broken
r3,7,2020-02-20 17:45:00,
r4,2,2020-03-02 09:15:00,website is slow and the page is broken
";

fn open(dir: &TempDir) -> Session {
    let config = Config::rooted_at(dir.path());
    std::fs::create_dir_all(&config.data_dir).unwrap();
    let data = config.data_dir.join("responses.csv");
    if !data.exists() {
        std::fs::write(&data, RESPONSES).unwrap();
    }
    let loader = Arc::new(CsvLoader::new(config.data_dir.clone()));
    Session::open(config, loader).unwrap()
}

fn february() -> Transform {
    Transform::DateRange {
        column: "EndDate".to_string(),
        span: DateSpan::new("2020-02-01", "2020-02-29"),
    }
}

fn problems() -> Transform {
    Transform::ProblemReport {
        name: "problem".to_string(),
        columns: vec!["Comment".to_string()],
    }
}

/// Test: first visit creates the root view from the CSV header
#[test]
fn test_first_visit_creates_root() {
    let dir = TempDir::new().unwrap();
    let session = open(&dir);

    let dataset = session
        .set_most_recent_dataset(DEFAULT_USER_ID, "responses.csv")
        .unwrap();
    let root = session.most_recent_view(DEFAULT_USER_ID, Some(dataset.id)).unwrap();

    assert!(root.transforms.is_empty());
    assert_eq!(
        root.labels.names(),
        vec!["ResponseID", "Score", "EndDate", "Comment"]
    );
    assert_eq!(session.rows(root.id, None, None, None).unwrap().len(), 4);
}

/// Test: filter by date, enrich with a problem score, sort by it
#[test]
fn test_filter_enrich_and_sort() {
    let dir = TempDir::new().unwrap();
    let session = open(&dir);
    session
        .set_most_recent_dataset(DEFAULT_USER_ID, "responses.csv")
        .unwrap();
    let root = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();

    let view = session
        .transform_view(root.id, vec![february(), problems()], vec![])
        .unwrap();
    assert_eq!(
        session.labels(view.id, LabelType::Derived).unwrap(),
        vec!["problem_text", "problem_score"]
    );

    // the problem report sorts by its score, highest first
    let rows = session.rows(view.id, None, None, None).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.get(0, "ResponseID"), Some(&Value::from("r2")));

    let ascending = session
        .rows(view.id, Some("ResponseID"), Some(true), Some(1))
        .unwrap();
    assert_eq!(ascending.len(), 1);
    assert_eq!(ascending.get(0, "ResponseID"), Some(&Value::from("r2")));
}

/// Test: views, history and tags survive a restart
#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let (root_id, child_id) = {
        let session = open(&dir);
        session
            .set_most_recent_dataset(DEFAULT_USER_ID, "responses.csv")
            .unwrap();
        let root = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
        let child = session.transform_view(root.id, vec![february()], vec![]).unwrap();
        session
            .add_tags(
                child.id,
                &["follow-up".to_string()],
                &["r2".to_string()],
                "ResponseID",
            )
            .unwrap();
        (root.id, child.id)
    };

    let session = open(&dir);
    assert!(session.load_report().skipped.is_empty());
    assert_eq!(session.cache_stats().tables, 1);

    let recent = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
    assert_eq!(recent.id, child_id);

    // adding then removing the filter lands on the persisted root again
    let back = session.transform_view(child_id, vec![], vec![february()]).unwrap();
    assert_eq!(back.id, root_id);

    let tagged = session.get_tags(root_id, &["r2".to_string()]).unwrap();
    assert!(tagged["r2"].contains("follow-up"));

    let with_tag = session
        .transform_view(
            root_id,
            vec![Transform::HasTag {
                key_column: "ResponseID".to_string(),
                tag: "follow-up".to_string(),
            }],
            vec![],
        )
        .unwrap();
    let rows = session.rows(with_tag.id, None, None, None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.get(0, "ResponseID"), Some(&Value::from("r2")));
}

/// Test: a persisted transform that no longer decodes is dropped and reported
#[test]
fn test_unknown_persisted_transform_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = Config::rooted_at(dir.path());
    std::fs::create_dir_all(&config.config_dir).unwrap();
    std::fs::write(
        config.views_path(),
        r#"[{"id":1,"parent_id":null,"dataset_id":1,"user_id":1,"column_labels":[{"n":"Score"}],"transforms":[["Retired","filter","Score"],["ExactMatch","filter","Score","9"]]}]"#,
    )
    .unwrap();

    let session = open(&dir);
    assert_eq!(session.load_report().views, 1);
    assert_eq!(session.load_report().skipped.len(), 1);

    let view = session.view(ViewId::new(1)).unwrap();
    assert_eq!(view.transforms.len(), 1);
}

/// Test: word usage is counted per day since the first response
#[test]
fn test_word_counts_over_time() {
    let dir = TempDir::new().unwrap();
    let session = open(&dir);
    session
        .set_most_recent_dataset(DEFAULT_USER_ID, "responses.csv")
        .unwrap();
    let root = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();

    let history = session
        .word_counts_over_time(root.id, "EndDate", "Comment")
        .unwrap();
    assert_eq!(history.start, chrono::NaiveDate::from_ymd_opt(2020, 1, 5));
    assert_eq!(history.totals["website"], 2);
    assert_eq!(history.totals["broken"], 2);
    assert_eq!(history.totals["slow"], 1);

    // January 5th to March 2nd, 2020
    let website = &history.counts["website"];
    assert_eq!(website.len(), 58);
    assert_eq!(website[0], 1);
    assert_eq!(website[57], 1);
    assert_eq!(website.iter().sum::<usize>(), 2);
    assert_eq!(history.counts["broken"][37], 1);
}

/// Test: tab-separated files are read with the tab delimiter
#[test]
fn test_tsv_dataset() {
    let dir = TempDir::new().unwrap();
    let session = open(&dir);
    std::fs::write(
        session.config().data_dir.join("short.tsv"),
        "id\tanswer\n1\tyes\n2\tno\n",
    )
    .unwrap();

    session
        .set_most_recent_dataset(DEFAULT_USER_ID, "short.tsv")
        .unwrap();
    let root = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
    let counts = session.unique_counts(root.id, "answer").unwrap();
    assert_eq!(counts.get("yes"), Some(&1));
    assert_eq!(counts.get("no"), Some(&1));
}

/// Test: a missing data file is an error, not a panic
#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let session = open(&dir);
    session
        .set_most_recent_dataset(DEFAULT_USER_ID, "absent.csv")
        .unwrap();
    assert!(matches!(
        session.most_recent_view(DEFAULT_USER_ID, None),
        Err(SieveError::Load { .. })
    ));
}
