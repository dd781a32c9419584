#[macro_use]
mod common;

use common::{link, seed_nodes, Backend};
use uuid::Uuid;
use vaultgraph_core::{
    Context, Edge, EdgeRepository, EdgeType, ErrorKind, Page, RepoError,
};

fn ctx() -> Context {
    Context::background()
}

fn sorted_ids(edges: &[Edge]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = edges.iter().map(|edge| edge.id).collect();
    ids.sort();
    ids
}

fn create_then_get_roundtrips_label_and_weight<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b"]);
    let edge = link("a", "b").with_label("see also").with_weight(2.5);

    let created = b.edges().create(&ctx(), b.exec(), &edge).unwrap();
    assert!(created.created_at > 0);

    let loaded = b.edges().get_by_id(&ctx(), b.exec(), edge.id).unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.label.as_deref(), Some("see also"));
    assert_eq!(loaded.edge_type, EdgeType::Reference);
}

fn missing_endpoint_is_a_validation_error<B: Backend>(b: &B) {
    seed_nodes(b, &["a"]);
    let err = b
        .edges()
        .create(&ctx(), b.exec(), &link("a", "nowhere"))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "reference"));
    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 0);
}

fn self_loops_and_negative_weights_are_rejected<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b"]);
    let err = b.edges().create(&ctx(), b.exec(), &link("a", "a")).unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "target_id"));

    let err = b
        .edges()
        .create(&ctx(), b.exec(), &link("a", "b").with_weight(-1.0))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "weight"));
}

fn natural_key_is_unique<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b"]);
    b.edges().create(&ctx(), b.exec(), &link("a", "b")).unwrap();

    let err = b.edges().create(&ctx(), b.exec(), &link("a", "b")).unwrap_err();
    assert_duplicate(err, NATURAL_KEY, "a -> b (reference)");

    // Same endpoints with another type is a different link.
    b.edges()
        .create(&ctx(), b.exec(), &Edge::new("a", "b", EdgeType::Embed))
        .unwrap();
    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 2);
}

const NATURAL_KEY: &str = "edges.source_id, edges.target_id, edges.edge_type";

fn assert_duplicate(err: RepoError, expected_field: &str, expected_value: &str) {
    match err {
        RepoError::DuplicateKey { field, value } => {
            assert_eq!(field.as_deref(), Some(expected_field));
            assert_eq!(value.as_deref(), Some(expected_value));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

fn duplicates_name_the_colliding_key<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b", "c"]);
    let stored = b.edges().create(&ctx(), b.exec(), &link("a", "b")).unwrap();

    let mut same_id = link("b", "c");
    same_id.id = stored.id;
    let err = b.edges().create(&ctx(), b.exec(), &same_id).unwrap_err();
    assert_duplicate(err, "edges.id", &stored.id.to_string());

    let mut moved = b.edges().create(&ctx(), b.exec(), &link("a", "c")).unwrap();
    moved.target_id = "b".to_string();
    let err = b.edges().update(&ctx(), b.exec(), &moved).unwrap_err();
    assert_duplicate(err, NATURAL_KEY, "a -> b (reference)");
}

fn batch_duplicates_name_the_first_colliding_edge<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b", "c"]);
    b.edges().create(&ctx(), b.exec(), &link("b", "c")).unwrap();

    let batch = vec![
        link("a", "b"),
        link("a", "c"),
        link("b", "c"),
        link("a", "b"),
    ];
    let err = b.edges().create_batch(&ctx(), b.exec(), &batch).unwrap_err();
    assert_duplicate(err, NATURAL_KEY, "b -> c (reference)");
    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 1);

    let repeated = vec![link("c", "a"), link("a", "b"), link("c", "a")];
    let err = b.edges().create_batch(&ctx(), b.exec(), &repeated).unwrap_err();
    assert_duplicate(err, NATURAL_KEY, "c -> a (reference)");

    let fresh = link("a", "c");
    let mut reused = link("c", "b");
    reused.id = fresh.id;
    let err = b
        .edges()
        .create_batch(&ctx(), b.exec(), &[fresh.clone(), reused])
        .unwrap_err();
    assert_duplicate(err, "edges.id", &fresh.id.to_string());
    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 1);
}

fn update_rewrites_in_place<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b", "c"]);
    let created = b.edges().create(&ctx(), b.exec(), &link("a", "b")).unwrap();

    let mut moved = created.clone();
    moved.target_id = "c".to_string();
    moved.weight = 0.25;
    moved.label = Some("moved".to_string());
    let updated = b.edges().update(&ctx(), b.exec(), &moved).unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.target_id, "c");
    assert_eq!(updated.weight, 0.25);
    assert_eq!(updated.created_at, created.created_at);

    let err = b
        .edges()
        .update(&ctx(), b.exec(), &link("a", "c"))
        .unwrap_err();
    assert!(err.is_not_found());
}

fn delete_is_idempotent<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b"]);
    let edge = b.edges().create(&ctx(), b.exec(), &link("a", "b")).unwrap();

    b.edges().delete(&ctx(), b.exec(), edge.id).unwrap();
    b.edges().delete(&ctx(), b.exec(), edge.id).unwrap();
    assert!(b
        .edges()
        .get_by_id(&ctx(), b.exec(), edge.id)
        .unwrap_err()
        .is_not_found());
}

fn adjacency_queries_return_matching_sets<B: Backend>(b: &B) {
    seed_nodes(b, &["hub", "x", "y", "z"]);
    let out_x = link("hub", "x");
    let out_y = Edge::new("hub", "y", EdgeType::Embed);
    let into_hub = link("z", "hub");
    let unrelated = link("x", "y");
    let all = vec![out_x.clone(), out_y.clone(), into_hub.clone(), unrelated.clone()];
    assert_eq!(b.edges().create_batch(&ctx(), b.exec(), &all).unwrap(), 4);

    let outgoing = b.edges().get_outgoing(&ctx(), b.exec(), "hub").unwrap();
    assert_eq!(sorted_ids(&outgoing), sorted_ids(&[out_x.clone(), out_y.clone()]));

    let incoming = b.edges().get_incoming(&ctx(), b.exec(), "hub").unwrap();
    assert_eq!(sorted_ids(&incoming), vec![into_hub.id]);

    let touching = b.edges().get_by_node(&ctx(), b.exec(), "hub").unwrap();
    assert_eq!(
        sorted_ids(&touching),
        sorted_ids(&[out_x.clone(), out_y.clone(), into_hub.clone()])
    );

    let embeds = b.edges().get_by_type(&ctx(), b.exec(), EdgeType::Embed).unwrap();
    assert_eq!(sorted_ids(&embeds), vec![out_y.id]);

    let by_ids = b
        .edges()
        .get_by_ids(&ctx(), b.exec(), &[unrelated.id, Uuid::new_v4()])
        .unwrap();
    assert_eq!(sorted_ids(&by_ids), vec![unrelated.id]);

    let first_page = b.edges().get_all(&ctx(), b.exec(), Page::first(3)).unwrap();
    let second_page = b
        .edges()
        .get_all(&ctx(), b.exec(), Page::first(3).next())
        .unwrap();
    assert_eq!(first_page.len(), 3);
    assert_eq!(second_page.len(), 1);
    assert_eq!(
        sorted_ids(&[first_page, second_page].concat()),
        sorted_ids(&all)
    );
}

fn create_batch_with_dangling_edge_writes_nothing<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b"]);
    let batch = vec![link("a", "b"), link("b", "ghost")];

    let err = b.edges().create_batch(&ctx(), b.exec(), &batch).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 0);
}

fn upsert_batch_matches_by_id_then_natural_key<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b", "c"]);
    let stored = b
        .edges()
        .create(&ctx(), b.exec(), &link("a", "b").with_weight(1.0))
        .unwrap();
    let by_id = b.edges().create(&ctx(), b.exec(), &link("b", "c")).unwrap();

    // A re-parsed vault regenerates ids; the natural key finds the stored edge.
    let reparsed = link("a", "b").with_weight(4.0).with_label("strong");
    let mut relabelled = by_id.clone();
    relabelled.label = Some("renamed".to_string());
    let fresh = link("c", "a");

    b.edges()
        .upsert_batch(&ctx(), b.exec(), &[reparsed.clone(), relabelled, fresh.clone()])
        .unwrap();

    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 3);
    let kept = b.edges().get_by_id(&ctx(), b.exec(), stored.id).unwrap();
    assert_eq!(kept.weight, 4.0);
    assert_eq!(kept.label.as_deref(), Some("strong"));
    assert!(b
        .edges()
        .get_by_id(&ctx(), b.exec(), reparsed.id)
        .unwrap_err()
        .is_not_found());
    assert_eq!(
        b.edges()
            .get_by_id(&ctx(), b.exec(), by_id.id)
            .unwrap()
            .label
            .as_deref(),
        Some("renamed")
    );
    b.edges().get_by_id(&ctx(), b.exec(), fresh.id).unwrap();
}

fn delete_all_reports_removed_rows<B: Backend>(b: &B) {
    seed_nodes(b, &["a", "b", "c"]);
    b.edges()
        .create_batch(&ctx(), b.exec(), &[link("a", "b"), link("b", "c")])
        .unwrap();
    assert_eq!(b.edges().delete_all(&ctx(), b.exec()).unwrap(), 2);
    assert_eq!(b.edges().count(&ctx(), b.exec()).unwrap(), 0);
}

on_both_backends!(
    create_then_get_roundtrips_label_and_weight,
    missing_endpoint_is_a_validation_error,
    self_loops_and_negative_weights_are_rejected,
    natural_key_is_unique,
    duplicates_name_the_colliding_key,
    batch_duplicates_name_the_first_colliding_edge,
    update_rewrites_in_place,
    delete_is_idempotent,
    adjacency_queries_return_matching_sets,
    create_batch_with_dangling_edge_writes_nothing,
    upsert_batch_matches_by_id_then_natural_key,
    delete_all_reports_removed_rows,
);
