//! End-to-end scenarios through the index manager.

use simdex_core::{AppError, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use super::*;
use crate::config::{RebuildFailurePolicy, UnknownIdPolicy};
use crate::context::render_context;
use crate::embeddings::providers::mock::MockProvider;
use crate::manager::IndexState;
use crate::types::{DeleteOutcome, ImportMode, ItemDraft, ItemId, UpdateOutcome};

#[tokio::test]
async fn test_search_on_empty_index() {
    let temp = TempDir::new().unwrap();
    let (manager, _store) = mock_manager(&temp, Metric::L2);

    let hits = manager.search("anything", 3).await.unwrap();
    assert!(hits.is_empty());
    assert_eq!(render_context(&hits), "No related items were found.");
}

#[tokio::test]
async fn test_empty_query_and_zero_k() {
    let temp = TempDir::new().unwrap();
    let (manager, _store) = mock_manager(&temp, Metric::L2);
    manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id("c1"))
        .await
        .unwrap();

    let err = manager.search("   ", 3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(manager.search("boating", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_then_search_finds_item() {
    let temp = TempDir::new().unwrap();
    let (manager, _store) = mock_manager(&temp, Metric::L2);

    let id = manager
        .add_item(ItemDraft::new("Lake Trip", "boating and fishing").with_id("c1"))
        .await
        .unwrap();
    assert_eq!(id, ItemId::from("c1"));

    manager
        .add_item(ItemDraft::new("Old Town", "museums and cafes").with_id("c2"))
        .await
        .unwrap();

    let hits = manager.search("boating", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item.id, ItemId::from("c1"));
    assert!(render_context(&hits).contains("- Item: Lake Trip. Description: boating and fishing."));
}

#[tokio::test]
async fn test_synthesized_id_can_be_deleted() {
    let temp = TempDir::new().unwrap();
    let (manager, store) = mock_manager(&temp, Metric::L2);

    let id = manager.add_item(ItemDraft::new("X", "Y")).await.unwrap();
    assert!(!id.key().is_empty());
    assert!(matches!(id, ItemId::Int(_)));

    let outcome = manager.delete_item(&id).await.unwrap();
    assert!(matches!(outcome, DeleteOutcome::Deleted { .. }));
    assert!(store.load_triad().unwrap().corpus.is_empty());
}

#[tokio::test]
async fn test_integer_and_string_ids_are_the_same_item() {
    let temp = TempDir::new().unwrap();
    let (manager, store) = mock_manager(&temp, Metric::L2);

    manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id(7))
        .await
        .unwrap();
    let outcome = manager
        .update_item(ItemDraft::new("Lake Trip", "sailing").with_id("7"))
        .await
        .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Updated { .. }));

    let triad = store.load_triad().unwrap();
    assert_eq!(triad.corpus.len(), 1);
    assert_eq!(triad.corpus.get("7").unwrap().description, "sailing");
}

#[tokio::test]
async fn test_add_with_existing_id_replaces() {
    let temp = TempDir::new().unwrap();
    let (manager, store) = mock_manager(&temp, Metric::L2);

    manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id("c1"))
        .await
        .unwrap();
    manager
        .add_item(ItemDraft::new("Lake Trip", "rowing").with_id("c1"))
        .await
        .unwrap();

    let triad = store.load_triad().unwrap();
    assert_dense(&triad);
    assert_eq!(triad.corpus.len(), 1);
    assert_eq!(triad.corpus.get("c1").unwrap().description, "rowing");
}

#[tokio::test]
async fn test_update_unknown_id_policies() {
    let temp = TempDir::new().unwrap();
    let (manager, store) = mock_manager(&temp, Metric::L2);

    let outcome = manager
        .update_item(ItemDraft::new("Lake Trip", "boating").with_id("c9"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Created {
            id: ItemId::from("c9")
        }
    );
    assert!(store.load_triad().unwrap().corpus.contains("c9"));

    let temp = TempDir::new().unwrap();
    let config = IndexConfig {
        unknown_id_policy: UnknownIdPolicy::Reject,
        ..mock_config(Metric::L2)
    };
    let store = file_store(&temp, Metric::L2);
    let manager = manager_with(config, Arc::new(MockProvider::new(DIM)), store.clone());

    let err = manager
        .update_item(ItemDraft::new("Lake Trip", "boating").with_id("c9"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(store.generation().unwrap(), 0);
}

#[tokio::test]
async fn test_update_without_id_is_validation_error() {
    let temp = TempDir::new().unwrap();
    let (manager, _store) = mock_manager(&temp, Metric::L2);

    let err = manager
        .update_item(ItemDraft::new("Lake Trip", "boating"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = manager.delete_item(&ItemId::from("")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_provider_failure_leaves_store_untouched() {
    let temp = TempDir::new().unwrap();
    let store = file_store(&temp, Metric::L2);
    let manager = manager_with(
        mock_config(Metric::L2),
        Arc::new(PoisonedProvider::new()),
        store.clone(),
    );

    manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id("c1"))
        .await
        .unwrap();

    let err = manager
        .add_item(ItemDraft::new("Bad", "poison ivy walk").with_id("c2"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Embedding(_)));

    let err = manager
        .update_item(ItemDraft::new("Lake Trip", "poison lake").with_id("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Embedding(_)));

    let triad = store.load_triad().unwrap();
    assert_eq!(triad.corpus.len(), 1);
    assert_eq!(triad.corpus.get("c1").unwrap().description, "boating");
    assert_eq!(store.generation().unwrap(), 1);
    assert_eq!(manager.state(), IndexState::Loaded);
}

#[tokio::test]
async fn test_rebuild_skip_policy_reports_partial_failure() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig {
        rebuild_failure_policy: RebuildFailurePolicy::Skip,
        ..mock_config(Metric::L2)
    };
    let store = file_store(&temp, Metric::L2);
    let manager = manager_with(config, Arc::new(PoisonedProvider::new()), store.clone());

    let report = manager
        .import(
            vec![
                ItemDraft::new("Lake Trip", "boating").with_id("c1"),
                ItemDraft::new("Swamp", "poison ivy walk").with_id("c2"),
                ItemDraft::new("Old Town", "museums").with_id("c3"),
            ],
            ImportMode::Merge,
        )
        .await
        .unwrap();

    assert_eq!(report.embedded, 2);
    assert_eq!(report.skipped, vec!["c2".to_string()]);
    let failure = report.partial_failure().unwrap();
    assert_eq!(failure.kind(), ErrorKind::RebuildPartialFailure);

    let triad = store.load_triad().unwrap();
    assert_eq!(triad.corpus.len(), 3);
    assert_eq!(triad.index.size(), 2);
    assert!(!triad.mapping.contains("c2"));
    assert_eq!(triad.mapping.slot_of("c3"), Some(1));

    let hits = manager.search("museums", 3).await.unwrap();
    assert!(hits.iter().all(|h| h.item.key() != "c2"));
}

#[tokio::test]
async fn test_rebuild_abort_policy_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let store = file_store(&temp, Metric::L2);
    let manager = manager_with(
        mock_config(Metric::L2),
        Arc::new(PoisonedProvider::new()),
        store.clone(),
    );

    let err = manager
        .import(
            vec![
                ItemDraft::new("Lake Trip", "boating").with_id("c1"),
                ItemDraft::new("Swamp", "poison ivy walk").with_id("c2"),
            ],
            ImportMode::Merge,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Embedding(_)));
    assert_eq!(store.generation().unwrap(), 0);
}

#[tokio::test]
async fn test_import_drops_invalid_rows_and_replaces() {
    let temp = TempDir::new().unwrap();
    let (manager, store) = mock_manager(&temp, Metric::L2);
    manager
        .add_item(ItemDraft::new("Old", "stale").with_id("old"))
        .await
        .unwrap();

    let rows: Vec<ItemDraft> = serde_json::from_str(
        r#"[
            {"id": 1, "name": "Lake Trip", "description": "boating", "price": 300},
            {"name": "No Id", "description": "dropped"},
            {"id": 2, "description": "no name"},
            {"id": "3", "name": "Old Town", "description": "museums", "cover": "a.png"}
        ]"#,
    )
    .unwrap();

    let report = manager.import(rows, ImportMode::Replace).await.unwrap();
    assert_eq!(report.rejected, 2);
    assert_eq!(report.indexed(), 2);

    let triad = store.load_triad().unwrap();
    assert_dense(&triad);
    assert!(!triad.corpus.contains("old"));
    assert_eq!(triad.corpus.get("3").unwrap().extra["cover"], "a.png");
}

#[tokio::test]
async fn test_timeout_is_embedding_error_and_releases_lock() {
    let temp = TempDir::new().unwrap();
    let store = file_store(&temp, Metric::L2);
    let manager = manager_with(mock_config(Metric::L2), Arc::new(StalledProvider), store.clone());

    let started = Instant::now();
    let err = manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Embedding(_)));
    assert!(started.elapsed() < Duration::from_secs(10));

    // The writer lock was released: another mutation gets through
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        manager.delete_item(&ItemId::from("c1")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(outcome, DeleteOutcome::NotFound);
    assert_eq!(store.generation().unwrap(), 0);
}

#[tokio::test]
async fn test_cache_limits_rebuild_to_changed_records() {
    let temp = TempDir::new().unwrap();
    let mut config = mock_config(Metric::L2);
    config.embedding_cache.enabled = true;
    let provider = Arc::new(CountingProvider::new());
    let manager = manager_with(config, provider.clone(), file_store(&temp, Metric::L2));

    for (id, description) in [("c1", "boating"), ("c2", "museums"), ("c3", "hiking")] {
        manager
            .add_item(ItemDraft::new("Trip", description).with_id(id))
            .await
            .unwrap();
    }
    assert_eq!(provider.calls(), 3);

    let outcome = manager
        .update_item(ItemDraft::new("Trip", "rock climbing").with_id("c3"))
        .await
        .unwrap();
    match outcome {
        UpdateOutcome::Updated { report } => {
            assert_eq!(report.embedded, 1);
            assert_eq!(report.cached, 2);
        }
        other => panic!("expected an update, got {:?}", other),
    }
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn test_without_cache_rebuild_reembeds_everything() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(CountingProvider::new());
    let manager = manager_with(
        mock_config(Metric::L2),
        provider.clone(),
        file_store(&temp, Metric::L2),
    );

    for id in ["c1", "c2", "c3"] {
        manager
            .add_item(ItemDraft::new("Trip", format!("outing {}", id)).with_id(id))
            .await
            .unwrap();
    }
    manager.delete_item(&ItemId::from("c2")).await.unwrap();

    assert_eq!(provider.calls(), 3 + 2);
}

#[tokio::test]
async fn test_rebuild_recovers_from_dimension_change() {
    let temp = TempDir::new().unwrap();
    let old = FileSnapshotStore::new(temp.path().join("snapshots"), 16, Metric::L2);
    let old_manager = manager_with(
        IndexConfig {
            embedding: EmbeddingConfig::mock(16),
            ..mock_config(Metric::L2)
        },
        Arc::new(MockProvider::new(16)),
        Arc::new(old),
    );
    old_manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id("c1"))
        .await
        .unwrap();

    let (manager, store) = mock_manager(&temp, Metric::L2);
    let err = manager.search("boating", 1).await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));

    let report = manager.rebuild().await.unwrap();
    assert_eq!(report.indexed(), 1);
    assert_eq!(store.load_triad().unwrap().index.dimension(), DIM);

    let hits = manager.search("boating", 1).await.unwrap();
    assert_eq!(hits[0].item.id, ItemId::from("c1"));
}

#[tokio::test]
async fn test_min_score_filters_weak_matches() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig {
        min_score: Some(0.99),
        ..mock_config(Metric::Cosine)
    };
    let store = file_store(&temp, Metric::Cosine);
    let manager = manager_with(config, Arc::new(MockProvider::new(DIM)), store.clone());

    manager
        .add_item(ItemDraft::new("Lake Trip", "boating").with_id("c1"))
        .await
        .unwrap();

    assert!(manager.search("museums", 3).await.unwrap().is_empty());

    let text = store
        .load_triad()
        .unwrap()
        .corpus
        .get("c1")
        .unwrap()
        .embedding_text();
    assert_eq!(manager.search(&text, 3).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_on_inconsistent_snapshot_rebuilds() {
    let temp = TempDir::new().unwrap();
    let (manager, store) = mock_manager(&temp, Metric::L2);
    for id in ["c1", "c2"] {
        manager
            .add_item(ItemDraft::new("Trip", format!("outing {}", id)).with_id(id))
            .await
            .unwrap();
    }

    // Hand-edited mapping loses an entry
    let dir = store.current_dir().unwrap().unwrap();
    std::fs::write(dir.join("mapping.json"), r#"{"c1": 0}"#).unwrap();
    assert!(!store.load_triad().unwrap().is_consistent());

    manager
        .add_item(ItemDraft::new("Trip", "outing c3").with_id("c3"))
        .await
        .unwrap();

    let triad = store.load_triad().unwrap();
    assert_eq!(triad.corpus.len(), 3);
    assert_dense(&triad);
}

#[tokio::test]
async fn test_add_fails_on_embedding_error_even_when_rebuild_skips() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig {
        rebuild_failure_policy: RebuildFailurePolicy::Skip,
        ..mock_config(Metric::L2)
    };
    let store = file_store(&temp, Metric::L2);
    let manager = manager_with(config, Arc::new(PoisonedProvider::new()), store.clone());

    manager
        .import(
            vec![
                ItemDraft::new("Lake Trip", "boating").with_id("c1"),
                ItemDraft::new("Swamp", "poison ivy walk").with_id("c2"),
            ],
            ImportMode::Merge,
        )
        .await
        .unwrap();
    assert!(!store.load_triad().unwrap().is_consistent());
    let before = store.generation().unwrap();

    let err = manager
        .add_item(ItemDraft::new("Forest", "poison oak trail").with_id("c9"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Embedding(_)));
    assert_eq!(store.generation().unwrap(), before);
    assert!(!store.load_triad().unwrap().corpus.contains("c9"));

    manager
        .add_item(ItemDraft::new("Old Town", "museums").with_id("c3"))
        .await
        .unwrap();
    let triad = store.load_triad().unwrap();
    assert_eq!(triad.corpus.len(), 3);
    assert!(triad.mapping.contains("c3"));
    assert!(!triad.mapping.contains("c2"));
}

#[tokio::test]
async fn test_stored_vectors_are_reused_by_a_later_manager() {
    let temp = TempDir::new().unwrap();
    let mut config = mock_config(Metric::L2);
    config.embedding_cache.enabled = true;

    let first = Arc::new(CountingProvider::new());
    let manager = manager_with(config.clone(), first.clone(), file_store(&temp, Metric::L2));
    for (id, description) in [("c1", "boating"), ("c2", "museums"), ("c3", "hiking")] {
        manager
            .add_item(ItemDraft::new("Trip", description).with_id(id))
            .await
            .unwrap();
    }
    assert_eq!(first.calls(), 3);
    drop(manager);

    // A fresh manager starts with an empty in-process cache
    let second = Arc::new(CountingProvider::new());
    let manager = manager_with(config.clone(), second.clone(), file_store(&temp, Metric::L2));
    match manager.delete_item(&ItemId::from("c2")).await.unwrap() {
        DeleteOutcome::Deleted { report } => {
            assert_eq!(report.embedded, 0);
            assert_eq!(report.cached, 2);
        }
        other => panic!("expected a delete, got {:?}", other),
    }
    assert_eq!(second.calls(), 0);
    drop(manager);

    let third = Arc::new(CountingProvider::new());
    let manager = manager_with(config, third.clone(), file_store(&temp, Metric::L2));
    manager
        .update_item(ItemDraft::new("Trip", "rock climbing").with_id("c3"))
        .await
        .unwrap();
    assert_eq!(third.calls(), 1);

    let hits = manager.search("rock climbing", 1).await.unwrap();
    assert_eq!(hits[0].item.id, ItemId::from("c3"));
}

#[tokio::test]
async fn test_stored_vectors_from_another_model_are_not_reused() {
    let temp = TempDir::new().unwrap();
    let mut config = mock_config(Metric::L2);
    config.embedding_cache.enabled = true;

    let manager = manager_with(
        config.clone(),
        Arc::new(MockProvider::new(DIM)),
        file_store(&temp, Metric::L2),
    );
    for id in ["c1", "c2"] {
        manager
            .add_item(ItemDraft::new("Trip", format!("outing {}", id)).with_id(id))
            .await
            .unwrap();
    }
    drop(manager);

    let counting = Arc::new(CountingProvider::new());
    let manager = manager_with(config, counting.clone(), file_store(&temp, Metric::L2));
    manager
        .update_item(ItemDraft::new("Trip", "outing c2 by boat").with_id("c2"))
        .await
        .unwrap();
    assert_eq!(counting.calls(), 2);
}
