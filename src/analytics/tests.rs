use super::*;
use crate::events::ChangeEventBus;
use crate::storage::backends::{MemoryDocumentStore, MemoryKeyValueStore};
use crate::storage::schema::upgrade_app_schema;
use crate::storage::{DocumentStore, KeyValueStore, StorageMode};
use serde_json::json;

fn repository() -> Arc<PromptRepository> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
    let docs: Arc<dyn DocumentStore> =
        Arc::new(MemoryDocumentStore::open("test", 2, &upgrade_app_schema).unwrap());
    Arc::new(PromptRepository::new(
        kv,
        Some(docs),
        StorageMode::Document,
        Arc::new(ChangeEventBus::new()),
    ))
}

fn adapter_with(options: AnalyticsOptions) -> (Arc<PromptRepository>, AnalyticalSyncAdapter) {
    let repo = repository();
    let adapter = AnalyticalSyncAdapter::open(None, repo.clone(), options).unwrap();
    adapter.initialize_tables().unwrap();
    adapter.start_sync();
    (repo, adapter)
}

fn adapter() -> (Arc<PromptRepository>, AnalyticalSyncAdapter) {
    adapter_with(AnalyticsOptions::default())
}

fn draft(id: &str) -> Prompt {
    let mut prompt = Prompt::new(format!("Prompt {id}"), "body");
    prompt.id = id.to_string();
    prompt
}

#[tokio::test]
async fn test_create_then_update_mirrors_one_row() {
    let (repo, adapter) = adapter();
    repo.create(draft("a")).await.unwrap();
    let patch = PromptPatch {
        title: Some("Renamed".into()),
        ..PromptPatch::default()
    };
    repo.update("a", patch).await.unwrap();

    let result = adapter
        .execute_sql("SELECT id, title FROM prompts")
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "title"]);
    assert_eq!(result.rows, vec![vec![json!("a"), json!("Renamed")]]);
}

#[tokio::test]
async fn test_soft_and_permanent_delete_reach_mirror() {
    let (repo, adapter) = adapter();
    repo.create(draft("a")).await.unwrap();
    repo.soft_delete("a").await.unwrap();

    let result = adapter
        .execute_sql("SELECT deleted_at IS NOT NULL FROM prompts WHERE id = 'a'")
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!(1)]]);

    repo.permanent_delete("a").await.unwrap();
    assert_eq!(adapter.mirror_row_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resync_never_overwrites_concurrent_writes() {
    let (repo, adapter) = adapter();
    let adapter = Arc::new(adapter);
    repo.create(draft("a")).await.unwrap();

    for round in 0..50 {
        let writer = {
            let repo = repo.clone();
            tokio::spawn(async move {
                let patch = PromptPatch {
                    title: Some(format!("Title {round}")),
                    ..PromptPatch::default()
                };
                repo.update("a", patch).await.unwrap();
            })
        };
        let rebuild = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.resync().await.unwrap() })
        };
        writer.await.unwrap();
        assert_eq!(rebuild.await.unwrap(), 1);

        let result = adapter
            .execute_sql("SELECT title FROM prompts WHERE id = 'a'")
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec![json!(format!("Title {round}"))]]);
    }
}

#[tokio::test]
async fn test_initialize_tables_is_idempotent() {
    let (repo, adapter) = adapter();
    repo.create(draft("a")).await.unwrap();
    adapter.initialize_tables().unwrap();
    assert_eq!(adapter.mirror_row_count().unwrap(), 1);
}

#[tokio::test]
async fn test_console_crud_goes_through_repository() {
    let (repo, adapter) = adapter();
    adapter.create_prompt(draft("a")).await.unwrap();
    assert!(repo.get("a").await.unwrap().is_some());
    assert_eq!(adapter.mirror_row_count().unwrap(), 1);

    let patch = PromptPatch {
        content: Some("changed".into()),
        ..PromptPatch::default()
    };
    let updated = adapter.update_prompt("a", patch).await.unwrap();
    assert_eq!(updated.history.len(), 1);
    let result = adapter
        .execute_sql("SELECT content, history_count FROM prompts")
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!("changed"), json!(1)]]);

    adapter.delete_prompt_by_id("a").await.unwrap();
    assert!(repo.get("a").await.unwrap().is_none());
    assert_eq!(adapter.mirror_row_count().unwrap(), 0);

    // Failed primary writes never reach the mirror
    assert!(adapter.delete_prompt_by_id("a").await.is_err());
}

#[tokio::test]
async fn test_unsynced_adapter_still_mirrors_console_writes() {
    let (repo, adapter) = adapter();
    adapter.stop_sync();
    assert!(!adapter.is_syncing());

    adapter.create_prompt(draft("a")).await.unwrap();
    assert_eq!(adapter.mirror_row_count().unwrap(), 1);

    // Writes from elsewhere are missed until a resync
    repo.create(draft("b")).await.unwrap();
    assert_eq!(adapter.mirror_row_count().unwrap(), 1);
    assert_eq!(adapter.resync().await.unwrap(), 2);
    assert_eq!(adapter.mirror_row_count().unwrap(), 2);
}

#[tokio::test]
async fn test_writes_are_forbidden_by_default() {
    let (repo, adapter) = adapter();
    repo.create(draft("a")).await.unwrap();

    for sql in ["DELETE FROM prompts", "DROP TABLE prompts", "UPDATE prompts SET title = 'x'"] {
        let err = adapter.execute_sql(sql).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::WriteForbidden), "{sql}");
    }
    assert_eq!(adapter.mirror_row_count().unwrap(), 1);
}

#[tokio::test]
async fn test_connection_state_statements_are_forbidden_by_default() {
    let (repo, adapter) = adapter();
    repo.create(draft("a")).await.unwrap();

    for sql in [
        "BEGIN",
        "BEGIN IMMEDIATE",
        "SAVEPOINT console",
        "ATTACH DATABASE ':memory:' AS scratch",
    ] {
        let err = adapter.execute_sql(sql).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::WriteForbidden), "{sql}");
    }

    let result = adapter.execute_sql("SELECT COUNT(*) FROM prompts").await.unwrap();
    assert_eq!(result.rows, vec![vec![json!(1)]]);
    repo.create(draft("b")).await.unwrap();
    assert_eq!(adapter.mirror_row_count().unwrap(), 2);
}

#[tokio::test]
async fn test_allowed_raw_write_is_reconciled_from_primary() {
    let (repo, adapter) = adapter_with(AnalyticsOptions {
        allow_raw_writes: true,
        ..AnalyticsOptions::default()
    });
    repo.create(draft("a")).await.unwrap();
    repo.create(draft("b")).await.unwrap();

    let result = adapter.execute_sql("DELETE FROM prompts").await.unwrap();
    assert!(!result.read_only);
    assert_eq!(result.rows_affected, 2);

    // The mirror never drifts from the primary store
    assert_eq!(adapter.mirror_row_count().unwrap(), 2);
}

#[tokio::test]
async fn test_invalid_sql_reports_error() {
    let (_repo, adapter) = adapter();
    let err = adapter.execute_sql("SELEC nonsense").await.unwrap_err();
    assert!(matches!(err, AnalyticsError::Sqlite(_)));

    let history = adapter.query_history().unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].last_error.is_some());
}

#[tokio::test]
async fn test_query_history_is_bounded_and_newest_first() {
    let (_repo, adapter) = adapter_with(AnalyticsOptions {
        max_query_history: 3,
        ..AnalyticsOptions::default()
    });
    for n in 1..=5 {
        adapter.execute_sql(&format!("SELECT {n}")).await.unwrap();
    }
    adapter.execute_sql("SELECT 4").await.unwrap();

    let history = adapter.query_history().unwrap();
    let queries: Vec<_> = history.iter().map(|h| h.query.as_str()).collect();
    assert_eq!(queries, vec!["SELECT 4", "SELECT 5", "SELECT 3"]);
    assert_eq!(history[0].run_count, 2);
    assert_eq!(history[0].last_row_count, Some(1));

    adapter.clear_query_history().unwrap();
    assert!(adapter.query_history().unwrap().is_empty());
}

#[tokio::test]
async fn test_favorites_upsert_and_delete() {
    let (_repo, adapter) = adapter();
    let favorite = adapter
        .save_favorite(None, "By category", "SELECT category, COUNT(*) FROM prompts GROUP BY 1")
        .unwrap();
    let renamed = adapter
        .save_favorite(Some(&favorite.id), "Per category", &favorite.query)
        .unwrap();
    assert_eq!(renamed.id, favorite.id);
    assert_eq!(renamed.created_at, favorite.created_at);

    let favorites = adapter.favorites().unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].name, "Per category");

    assert!(adapter.delete_favorite(&favorite.id).unwrap());
    assert!(!adapter.delete_favorite(&favorite.id).unwrap());
}

#[tokio::test]
async fn test_drop_unsubscribes_from_bus() {
    let (repo, adapter) = adapter();
    assert_eq!(repo.bus().subscriber_count(), 1);
    drop(adapter);
    assert_eq!(repo.bus().subscriber_count(), 0);
    repo.create(draft("a")).await.unwrap();
}

#[tokio::test]
async fn test_file_backed_mirror_persists() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("analytics").join("mirror.db");
    let repo = repository();
    repo.create(draft("a")).await.unwrap();
    {
        let adapter = AnalyticalSyncAdapter::open(
            Some(path.as_path()),
            repo.clone(),
            AnalyticsOptions::default(),
        )
        .unwrap();
        adapter.initialize_tables().unwrap();
        assert_eq!(adapter.resync().await.unwrap(), 1);
    }
    let reopened =
        AnalyticalSyncAdapter::open(Some(path.as_path()), repo, AnalyticsOptions::default())
            .unwrap();
    assert_eq!(reopened.mirror_row_count().unwrap(), 1);
}
