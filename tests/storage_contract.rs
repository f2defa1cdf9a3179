//! Every embedded engine must honor the same storage contract.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::future::join_all;
use relay_keeper::storage::{MemoryStorage, SqliteStorage};
use relay_keeper::{Event, EventFilter, SaveOutcome, Storage, Tag};
use std::sync::Arc;
use tempfile::TempDir;

fn event(id: &str, pubkey: &str, created_at: u64) -> Event {
    Event {
        id: id.into(),
        pubkey: pubkey.into(),
        created_at,
        kind: 1,
        tags: vec![Tag(vec!["t".into(), "news".into()])],
        content: format!("note {id}"),
        sig: "ab".repeat(64),
    }
}

/// Engines under test; the directory keeps the SQLite file alive.
async fn engines() -> (Vec<Arc<dyn Storage>>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.db");
    let sqlite = SqliteStorage::open(&path.to_string_lossy()).expect("open sqlite");
    let engines: Vec<Arc<dyn Storage>> = vec![Arc::new(MemoryStorage::new()), Arc::new(sqlite)];
    for engine in &engines {
        engine.init().await.expect("init");
    }
    (engines, dir)
}

#[tokio::test]
async fn test_second_save_is_a_duplicate() {
    let (engines, _dir) = engines().await;
    for storage in engines {
        let original = event("e1", "p1", 100);
        assert_eq!(
            storage.save_event(&original).await.expect("save"),
            SaveOutcome::Stored
        );

        let mut altered = original.clone();
        altered.content = "rewritten".into();
        assert_eq!(
            storage.save_event(&altered).await.expect("save again"),
            SaveOutcome::Duplicate,
            "{} engine",
            storage.kind()
        );

        let stored = storage
            .query_events(&EventFilter::by_id("e1"))
            .await
            .expect("query");
        assert_eq!(stored, vec![original]);
    }
}

#[tokio::test]
async fn test_concurrent_saves_store_one_copy() {
    let (engines, _dir) = engines().await;
    for storage in engines {
        let event = event("same", "p1", 100);
        let outcomes = join_all((0..8).map(|_| {
            let storage = Arc::clone(&storage);
            let event = event.clone();
            async move { storage.save_event(&event).await }
        }))
        .await;

        let stored = outcomes
            .into_iter()
            .map(|outcome| outcome.expect("save never errors"))
            .filter(|outcome| *outcome == SaveOutcome::Stored)
            .count();
        assert_eq!(stored, 1, "{} engine", storage.kind());

        let rows = storage
            .query_events(&EventFilter::by_id("same"))
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
    }
}

#[tokio::test]
async fn test_delete_requires_matching_owner() {
    let (engines, _dir) = engines().await;
    for storage in engines {
        storage.save_event(&event("mine", "alice", 10)).await.expect("save");
        storage.save_event(&event("theirs", "bob", 10)).await.expect("save");

        assert_eq!(storage.delete_event("theirs", "alice").await.expect("delete"), 0);
        assert_eq!(storage.delete_event("missing", "alice").await.expect("delete"), 0);
        assert_eq!(storage.delete_event("mine", "alice").await.expect("delete"), 1);

        let left = storage
            .query_events(&EventFilter::default())
            .await
            .expect("query");
        let ids: Vec<_> = left.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["theirs"], "{} engine", storage.kind());
    }
}

#[tokio::test]
async fn test_purge_removes_strictly_older_events() {
    let (engines, _dir) = engines().await;
    for storage in engines {
        for (id, created_at) in [("a", 99), ("b", 100), ("c", 101)] {
            storage
                .save_event(&event(id, "p1", created_at))
                .await
                .expect("save");
        }

        assert_eq!(storage.purge_before(100).await.expect("purge"), 1);
        assert_eq!(storage.purge_before(100).await.expect("purge again"), 0);

        let left = storage
            .query_events(&EventFilter::default())
            .await
            .expect("query");
        assert!(left.iter().all(|e| e.created_at >= 100));
        assert_eq!(left.len(), 2, "{} engine", storage.kind());
    }
}

#[tokio::test]
async fn test_query_orders_newest_first_and_limits() {
    let (engines, _dir) = engines().await;
    for storage in engines {
        for (id, pubkey, created_at) in [("x", "p1", 5), ("y", "p2", 7), ("z", "p1", 9)] {
            storage
                .save_event(&event(id, pubkey, created_at))
                .await
                .expect("save");
        }

        let by_author = storage
            .query_events(&EventFilter::by_author("p1"))
            .await
            .expect("query");
        let ids: Vec<_> = by_author.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "x"], "{} engine", storage.kind());

        let window = EventFilter {
            since: Some(6),
            limit: Some(1),
            ..EventFilter::default()
        };
        let limited = storage.query_events(&window).await.expect("query");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "z");
    }
}
