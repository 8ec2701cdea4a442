//! Integration tests for the store façade: search ordering, gating,
//! truncation, link derivation, and the round-trip laws.

mod common;

use std::sync::Arc;

use common::ScriptedModel;
use drive_agent::models::{DocMetadata, DocumentInput};
use drive_agent::vector_store::{DocumentStore, MemoryBackend, SearchOptions};
use serde_json::json;

fn metadata(name: &str, folder: &str, mime: &str, extension: &str) -> DocMetadata {
    DocMetadata {
        name: name.to_string(),
        mime_type: mime.to_string(),
        folder_path: folder.to_string(),
        modified_time: "2024-01-01T00:00:00Z".to_string(),
        extension: extension.to_string(),
        drive_link: String::new(),
    }
}

fn doc(id: &str, text: &str, meta: DocMetadata) -> DocumentInput {
    DocumentInput {
        id: id.to_string(),
        text: text.to_string(),
        metadata: meta,
    }
}

/// Store over three documents at controlled distances from the query
/// `"q"`: near (0.0), mid (~0.2), far (1.0).
async fn seeded_store() -> DocumentStore {
    let model = Arc::new(
        ScriptedModel::new(vec![])
            .with_embedding("q", vec![1.0, 0.0])
            .with_embedding("near text jelena", vec![1.0, 0.0])
            .with_embedding("mid text jelena jelena Jelena", vec![0.8, 0.6])
            .with_embedding("far text", vec![0.0, 1.0]),
    );
    let store = DocumentStore::new(Arc::new(MemoryBackend::default()), model, "Drive");

    store
        .add_many(&[
            doc(
                "near",
                "near text jelena",
                metadata("Near", "a", "application/pdf", ".pdf"),
            ),
            doc(
                "mid",
                "mid text jelena jelena Jelena",
                metadata("Mid", "a/b", "text/plain", ".txt"),
            ),
            doc("far", "far text", metadata("Far", "", "text/plain", ".txt")),
        ])
        .await
        .unwrap();

    store
}

#[tokio::test]
async fn plain_search_orders_by_distance() {
    let store = seeded_store().await;
    let hits = store
        .search("q", 10, &SearchOptions::default())
        .await
        .unwrap();

    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["near", "mid", "far"]);
    assert!(hits[0].distance <= hits[1].distance);
    assert!(hits[1].distance <= hits[2].distance);
}

#[tokio::test]
async fn keyword_search_ranks_by_match_count_then_distance() {
    let store = seeded_store().await;
    let hits = store
        .search(
            "q",
            10,
            &SearchOptions {
                keyword: Some("jelena".to_string()),
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    // "mid" has three case-insensitive matches, "near" one, "far" none
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["mid", "near"]);
    assert_eq!(hits[0].keyword_count, 3);
    assert_eq!(hits[1].keyword_count, 1);
}

#[tokio::test]
async fn search_never_exceeds_n() {
    let store = seeded_store().await;

    let plain = store.search("q", 2, &SearchOptions::default()).await.unwrap();
    assert_eq!(plain.len(), 2);

    let with_keyword = store
        .search(
            "q",
            1,
            &SearchOptions {
                keyword: Some("jelena".to_string()),
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(with_keyword.len(), 1);
    assert_eq!(with_keyword[0].id, "mid");
}

#[tokio::test]
async fn max_distance_gates_results() {
    let store = seeded_store().await;
    let hits = store
        .search(
            "q",
            10,
            &SearchOptions {
                max_distance: Some(0.5),
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for hit in &hits {
        assert!(hit.distance <= 0.5);
    }
    assert!(hits.iter().all(|h| h.id != "far"));
}

#[tokio::test]
async fn metadata_filter_is_exact() {
    let store = seeded_store().await;

    let mut filter = serde_json::Map::new();
    filter.insert("name".to_string(), json!("Mid"));

    let hits = store
        .search(
            "q",
            10,
            &SearchOptions {
                metadata_filter: Some(filter),
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "mid");
}

#[tokio::test]
async fn hit_carries_display_path_and_derived_link() {
    let store = seeded_store().await;
    let hits = store
        .search("q", 10, &SearchOptions::default())
        .await
        .unwrap();

    let near = hits.iter().find(|h| h.id == "near").unwrap();
    assert_eq!(near.path, "Drive/a/Near.pdf");
    // metadata stored no link, so it is derived from (id, mimeType)
    assert_eq!(near.drive_link, "https://drive.google.com/file/d/near");

    let far = hits.iter().find(|h| h.id == "far").unwrap();
    assert_eq!(far.path, "Drive/Far.txt");
}

#[tokio::test]
async fn add_many_then_get_all_round_trips() {
    let store = seeded_store().await;
    let all = store.get_all().await.unwrap();

    assert_eq!(all.len(), 3);
    let mid = all.iter().find(|d| d.id == "mid").unwrap();
    assert_eq!(mid.text, "mid text jelena jelena Jelena");
    assert_eq!(mid.metadata.name, "Mid");
    assert_eq!(mid.metadata.folder_path, "a/b");
}

#[tokio::test]
async fn re_adding_an_id_replaces_it() {
    let store = seeded_store().await;

    store
        .add_many(&[doc(
            "near",
            "replacement text",
            metadata("Near v2", "a", "application/pdf", ".pdf"),
        )])
        .await
        .unwrap();

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 3);
    let near = all.iter().find(|d| d.id == "near").unwrap();
    assert_eq!(near.text, "replacement text");
    assert_eq!(near.metadata.name, "Near v2");
}

#[tokio::test]
async fn delete_many_removes_only_named_ids() {
    let store = seeded_store().await;
    store
        .delete_many(&["near".to_string(), "absent".to_string()])
        .await
        .unwrap();

    let all = store.get_all().await.unwrap();
    let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["far", "mid"]);
}

#[tokio::test]
async fn reset_empties_the_collection() {
    let store = seeded_store().await;
    assert_eq!(store.stats().await.unwrap().count, 3);

    store.reset().await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.count, 0);
    assert_eq!(stats.name, "documents");
}
