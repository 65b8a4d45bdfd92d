//! Integration Tests - View Pipelines End to End
//!
//! Builds views through the view store, resolves them through the resolver
//! and checks the cache reuse between them.

use sieve_core::*;
use std::sync::Arc;

fn survey() -> Table {
    Table::from_rows(
        vec!["Q1".to_string(), "Q2".to_string()],
        vec![
            vec![Value::from("yes"), Value::from("a")],
            vec![Value::from("no"), Value::from("b")],
            vec![Value::from("yes"), Value::from("c")],
            vec![Value::from("maybe"), Value::from("d")],
        ],
    )
}

fn dataset() -> Dataset {
    Dataset::new(DatasetId::new(1), "survey.csv")
}

fn resolver(metrics: Arc<SieveMetrics>) -> Resolver {
    let loader = MemoryLoader::new().with_table(DatasetId::new(1), survey());
    Resolver::new(Arc::new(loader), Arc::new(TagStore::in_memory())).with_metrics(metrics)
}

fn root(store: &ViewStore) -> View {
    store
        .create_root(
            UserId::new(1),
            DatasetId::new(1),
            LabelSequence::from_names(["Q1", "Q2"]),
        )
        .unwrap()
        .view
}

fn exact_yes() -> Transform {
    Transform::ExactMatch {
        column: "Q1".to_string(),
        value: "yes".to_string(),
    }
}

fn merged() -> Transform {
    Transform::MergeColumnText {
        name: "merged".to_string(),
        columns: vec!["Q1".to_string(), "Q2".to_string()],
        separator: "-".to_string(),
    }
}

/// Test: add a filter, add an enrichment, then remove the filter
#[test]
fn test_refine_and_remove_workflow() {
    let store = ViewStore::in_memory();
    let metrics = Arc::new(SieveMetrics::new().unwrap());
    let resolver = resolver(metrics.clone());

    let view0 = root(&store);
    let view1 = store
        .transform_view(view0.id, &ViewMutation::add(exact_yes()))
        .unwrap()
        .view;
    let view2 = store
        .transform_view(view1.id, &ViewMutation::add(merged()))
        .unwrap()
        .view;
    assert_eq!(view2.labels.names(), vec!["merged", "Q1", "Q2"]);

    let view3 = store
        .transform_view(view2.id, &ViewMutation::remove(exact_yes()))
        .unwrap()
        .view;
    assert_eq!(view3.transforms.as_slice(), &[merged()]);
    assert_eq!(view3.parent_id, Some(view2.id));
    assert!(view3.labels.contains("merged"));

    let table1 = resolver.resolve(&view1, &dataset()).unwrap();
    assert_eq!(table1.len(), 2);

    // view1 is a strict subset of view2
    let table2 = resolver.resolve(&view2, &dataset()).unwrap();
    assert_eq!(table2.get(1, "merged"), Some(&Value::from("yes-c")));

    // neither cached view is a subset of {merged}
    assert!(resolver
        .cache()
        .best_base(DatasetId::new(1), &view3.transforms)
        .is_none());
    let table3 = resolver.resolve(&view3, &dataset()).unwrap();
    assert_eq!(table3.len(), 4);
    assert_eq!(table3.get(3, "merged"), Some(&Value::from("maybe-d")));

    assert_eq!(metrics.resolutions(ResolutionSource::Raw), 2);
    assert_eq!(metrics.resolutions(ResolutionSource::Base), 1);
    assert_eq!(metrics.resolutions(ResolutionSource::Cache), 0);
    assert_eq!(resolver.cache().stats().raw_tables, 1);
}

/// Test: two mutation paths that end in the same transform list share a view
#[test]
fn test_views_are_deduplicated() {
    let store = ViewStore::in_memory();
    let view0 = root(&store);

    let stepwise = store
        .transform_view(view0.id, &ViewMutation::add(exact_yes()))
        .unwrap()
        .view;
    let stepwise = store
        .transform_view(stepwise.id, &ViewMutation::add(merged()))
        .unwrap()
        .view;

    let at_once = store
        .transform_view(
            view0.id,
            &ViewMutation::new(vec![exact_yes(), merged()], vec![]),
        )
        .unwrap();

    assert!(!at_once.created);
    assert_eq!(at_once.view.id, stepwise.id);
    assert_eq!(store.len(), 3);

    let reordered = store
        .transform_view(
            view0.id,
            &ViewMutation::new(vec![merged(), exact_yes()], vec![]),
        )
        .unwrap();
    assert!(reordered.created);
}

/// Test: removing an enrichment removes everything built on its output
#[test]
fn test_cascading_removal() {
    let store = ViewStore::in_memory();
    let view0 = root(&store);

    let on_merged = Transform::HasText {
        column: "merged".to_string(),
        text: "yes".to_string(),
    };
    let first_part = Transform::ExtractNth {
        name: "first".to_string(),
        column: "merged".to_string(),
        separator: "-".to_string(),
        position: 0,
    };
    let on_first = Transform::ExactMatch {
        column: "first".to_string(),
        value: "yes".to_string(),
    };
    let unrelated = Transform::DoesNotMatch {
        column: "Q2".to_string(),
        value: "b".to_string(),
    };

    let full = store
        .transform_view(
            view0.id,
            &ViewMutation::new(
                vec![
                    merged(),
                    on_merged,
                    first_part,
                    on_first,
                    unrelated.clone(),
                ],
                vec![],
            ),
        )
        .unwrap()
        .view;
    assert_eq!(full.labels.names(), vec!["first", "merged", "Q1", "Q2"]);

    let pruned = store
        .transform_view(full.id, &ViewMutation::remove(merged()))
        .unwrap()
        .view;
    assert_eq!(pruned.transforms.as_slice(), &[unrelated]);
    assert_eq!(pruned.labels.names(), vec!["Q1", "Q2"]);
}

/// Test: removing a transform the view does not have changes nothing
#[test]
fn test_removing_missing_transform_is_a_no_op() {
    let store = ViewStore::in_memory();
    let view0 = root(&store);
    let view1 = store
        .transform_view(view0.id, &ViewMutation::add(exact_yes()))
        .unwrap()
        .view;

    let outcome = store
        .transform_view(view1.id, &ViewMutation::remove(merged()))
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.view.id, view1.id);
}

/// Test: a second enrichment with an existing output name is rejected
#[test]
fn test_duplicate_output_label_is_rejected() {
    let store = ViewStore::in_memory();
    let view0 = root(&store);
    let view1 = store
        .transform_view(view0.id, &ViewMutation::add(merged()))
        .unwrap()
        .view;

    let clash = Transform::Categorization {
        name: "merged".to_string(),
        column: "Q2".to_string(),
        categories: vec!["a".to_string()],
    };
    let result = store.transform_view(view1.id, &ViewMutation::add(clash));
    assert!(matches!(
        result,
        Err(SieveError::DuplicateOutputLabel { ref label, .. }) if label == "merged"
    ));
    assert_eq!(store.len(), 2);
}

fn list(transforms: &[Transform]) -> TransformList {
    TransformList::from(transforms.to_vec())
}

fn filter(value: &str) -> Transform {
    Transform::ExactMatch {
        column: "Q1".to_string(),
        value: value.to_string(),
    }
}

/// Test: the chosen base lacks the fewest target transforms
#[test]
fn test_best_base_is_cheapest_subset() {
    let cache = TableCache::new();
    let dataset_id = DatasetId::new(1);
    let table = Arc::new(survey());
    let (a, b, c, d) = (filter("a"), filter("b"), filter("c"), filter("d"));

    cache.insert(dataset_id, ViewId::new(1), list(&[]), table.clone());
    cache.insert(dataset_id, ViewId::new(2), list(&[a.clone()]), table.clone());
    cache.insert(dataset_id, ViewId::new(3), list(&[b.clone(), a.clone()]), table.clone());
    cache.insert(dataset_id, ViewId::new(4), list(&[a.clone(), b.clone(), c.clone()]), table.clone());

    let target = list(&[a.clone(), b.clone(), d.clone()]);
    let best = cache.best_base(dataset_id, &target).unwrap();
    assert_eq!(best, BaseCandidate { view_id: ViewId::new(3), remaining: 1 });

    // another dataset sees none of them
    assert!(cache.best_base(DatasetId::new(2), &target).is_none());
}

/// Test: equal cost goes to the lowest view id
#[test]
fn test_best_base_tie_break() {
    let cache = TableCache::new();
    let dataset_id = DatasetId::new(1);
    let table = Arc::new(survey());
    let (a, b) = (filter("a"), filter("b"));

    cache.insert(dataset_id, ViewId::new(9), list(&[a.clone()]), table.clone());
    cache.insert(dataset_id, ViewId::new(5), list(&[b.clone()]), table.clone());

    let best = cache.best_base(dataset_id, &list(&[a, b])).unwrap();
    assert_eq!(best.view_id, ViewId::new(5));
}

/// Test: a cached view with any transform outside the target is never used
#[test]
fn test_non_subset_base_is_rejected() {
    let cache = TableCache::new();
    let dataset_id = DatasetId::new(1);
    cache.insert(
        dataset_id,
        ViewId::new(1),
        list(&[filter("a"), filter("x")]),
        Arc::new(survey()),
    );

    assert!(cache.best_base(dataset_id, &list(&[filter("a")])).is_none());
    assert!(cache
        .best_base(dataset_id, &list(&[filter("x"), filter("a"), filter("b")]))
        .is_some());
}

/// Test: a failing transform leaves no trace in the cache
#[test]
fn test_failed_resolution_is_not_cached() {
    let store = ViewStore::in_memory();
    let metrics = Arc::new(SieveMetrics::new().unwrap());
    let resolver = resolver(metrics.clone());
    let view0 = root(&store);

    let broken = store
        .transform_view(
            view0.id,
            &ViewMutation::add(Transform::DateRange {
                column: "Q2".to_string(),
                span: DateSpan::new("not a date", "2020-01-01"),
            }),
        )
        .unwrap()
        .view;

    assert!(matches!(
        resolver.resolve(&broken, &dataset()),
        Err(SieveError::TransformApplication { .. })
    ));
    assert!(!resolver.cache().contains(DatasetId::new(1), broken.id));
    assert_eq!(metrics.failures(), 1);
}

/// Test: threads racing on the same mutation share one view and one result
#[test]
fn test_concurrent_derivation_and_resolution() {
    let store = ViewStore::in_memory();
    let metrics = Arc::new(SieveMetrics::new().unwrap());
    let resolver = resolver(metrics.clone());
    let view0 = root(&store);
    let mutation = ViewMutation::new(vec![exact_yes(), merged()], vec![]);

    let results: Vec<(ViewOutcome, Arc<Table>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let outcome = store.transform_view(view0.id, &mutation).unwrap();
                    let table = resolver.resolve(&outcome.view, &dataset()).unwrap();
                    (outcome, table)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let id = results[0].0.view.id;
    assert!(results.iter().all(|(outcome, _)| outcome.view.id == id));
    assert_eq!(results.iter().filter(|(outcome, _)| outcome.created).count(), 1);
    assert_eq!(store.len(), 2);

    let expected = &results[0].1;
    assert_eq!(expected.len(), 2);
    assert!(results.iter().all(|(_, table)| table.as_ref() == expected.as_ref()));
    assert!(resolver.cache().contains(DatasetId::new(1), id));
    assert_eq!(metrics.failures(), 0);
}
