use super::*;
use crate::diagnostics::FlakyDocumentStore;
use crate::events::ChangeEventBus;
use crate::model::FilterState;
use crate::storage::backends::{MemoryDocumentStore, MemoryKeyValueStore};
use crate::storage::schema::upgrade_app_schema;
use serde_json::json;

struct Fixture {
    kv: Arc<dyn KeyValueStore>,
    docs: Arc<dyn DocumentStore>,
    engine: MigrationEngine,
}

fn fixture() -> Fixture {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new(1024 * 1024));
    let docs: Arc<dyn DocumentStore> =
        Arc::new(MemoryDocumentStore::open("test", 2, &upgrade_app_schema).unwrap());
    let engine = MigrationEngine::new(kv.clone(), Some(docs.clone()));
    Fixture { kv, docs, engine }
}

fn legacy_prompts(count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|i| {
                json!({
                    "id": format!("p{i}"),
                    "title": format!("Prompt {i}"),
                    "content": format!("Content {i}"),
                    "tags": ["legacy"],
                    "createdAt": 1_700_000_000_000i64 + i as i64,
                    "updatedAt": 1_700_000_000_000i64 + i as i64,
                })
            })
            .collect(),
    )
}

fn repo_for(fx: &Fixture) -> PromptRepository {
    PromptRepository::new(
        fx.kv.clone(),
        Some(fx.docs.clone()),
        fx.engine.storage_mode(),
        Arc::new(ChangeEventBus::new()),
    )
}

#[tokio::test]
async fn test_zero_legacy_data_completes_empty() {
    let fx = fixture();
    let status = fx.engine.initialize_storage_migration().await;
    assert!(status.is_completed);
    assert_eq!(status.migrated_items, 0);
    assert_eq!(fx.engine.storage_mode(), StorageMode::Document);
    assert!(fx.engine.get_migration_status().is_completed);
}

#[tokio::test]
async fn test_six_legacy_prompts_migrate() {
    let fx = fixture();
    fx.kv.set(PROMPTS_KEY, &legacy_prompts(6).to_string()).unwrap();

    let status = fx.engine.initialize_storage_migration().await;
    assert!(status.is_completed);
    assert_eq!(status.migrated_items, 6);
    assert!(status.errors.is_empty());
    assert_eq!(fx.docs.count(PROMPTS_STORE).await.unwrap(), 6);

    // Legacy data stays as a backup
    assert!(fx.kv.get(PROMPTS_KEY).unwrap().is_some());
}

#[tokio::test]
async fn test_migration_is_idempotent() {
    let fx = fixture();
    fx.kv.set(PROMPTS_KEY, &legacy_prompts(3).to_string()).unwrap();
    fx.engine.initialize_storage_migration().await;

    // New legacy writes after completion are not picked up again
    fx.kv.set(PROMPTS_KEY, &legacy_prompts(5).to_string()).unwrap();
    let again = fx.engine.migrate_all_data_to_idb().await;
    assert!(again.success);
    assert_eq!(again.migrated_items, 0);
    assert_eq!(fx.docs.count(PROMPTS_STORE).await.unwrap(), 3);
    assert_eq!(fx.engine.get_migration_status().migrated_items, 3);
}

#[tokio::test]
async fn test_malformed_records_are_dropped_with_errors() {
    let fx = fixture();
    let data = json!([
        {"id": "good", "content": "ok"},
        {"title": "no id", "content": "x"},
        "not an object",
        {"id": "good", "content": "older", "updatedAt": 1},
    ]);
    fx.kv.set(PROMPTS_KEY, &data.to_string()).unwrap();

    let result = fx.engine.migrate_all_data_to_idb().await;
    assert!(result.success);
    assert_eq!(result.migrated_items, 1);
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors[0].starts_with("prompts[1]"));

    let stored = fx.docs.get(PROMPTS_STORE, "good").await.unwrap().unwrap();
    assert_eq!(stored["content"], "ok");
    assert!(fx.engine.get_migration_status().is_completed);
}

#[tokio::test]
async fn test_failed_write_leaves_migration_incomplete_and_retries() {
    let fx = fixture();
    let flaky = Arc::new(FlakyDocumentStore::new(fx.docs.clone()));
    flaky.fail_puts_for("p1");
    let flaky_docs: Arc<dyn DocumentStore> = flaky.clone();
    let engine = MigrationEngine::new(fx.kv.clone(), Some(flaky_docs));
    fx.kv.set(PROMPTS_KEY, &legacy_prompts(3).to_string()).unwrap();

    let status = engine.initialize_storage_migration().await;
    assert!(!status.is_completed);
    assert_eq!(status.migrated_items, 2);
    assert_eq!(status.errors.len(), 1);
    assert_eq!(engine.storage_mode(), StorageMode::KeyValueOnly);

    // Written items are not rolled back; a retry upserts without duplicates
    flaky.heal();
    let status = engine.initialize_storage_migration().await;
    assert!(status.is_completed);
    assert_eq!(status.migrated_items, 3);
    assert_eq!(fx.docs.count(PROMPTS_STORE).await.unwrap(), 3);
}

#[tokio::test]
async fn test_without_document_store_stays_key_value_only() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
    kv.set(PROMPTS_KEY, &legacy_prompts(1).to_string()).unwrap();
    let engine = MigrationEngine::new(kv, None);

    let status = engine.initialize_storage_migration().await;
    assert!(!status.is_completed);
    assert_eq!(engine.storage_mode(), StorageMode::KeyValueOnly);
    assert!(!engine.migrate_all_data_to_idb().await.success);
}

#[tokio::test]
async fn test_corrupt_status_reads_as_default() {
    let fx = fixture();
    fx.kv.set(MIGRATION_STATUS_KEY, "{broken").unwrap();
    assert_eq!(fx.engine.get_migration_status(), MigrationStatus::default());
}

#[tokio::test]
async fn test_categories_and_settings_migrate() {
    let fx = fixture();
    fx.kv.set(CATEGORIES_KEY, r#"["Writing","Custom","Custom",5]"#).unwrap();
    fx.kv.set(THEME_KEY, "\"dark\"").unwrap();
    fx.kv.set(FILTERS_KEY, r#"{"selectedCategory":"Custom"}"#).unwrap();
    fx.kv.set("prompts_setting_language", "\"en\"").unwrap();

    let result = fx.engine.migrate_all_data_to_idb().await;
    assert!(result.success, "{:?}", result.errors);

    let repo = repo_for(&fx);
    assert_eq!(repo.mode(), StorageMode::Document);
    assert_eq!(repo.categories().await.unwrap(), vec!["Writing", "Custom"]);
    assert_eq!(repo.theme().await.unwrap(), Theme::Dark);
    assert_eq!(
        repo.filters().await.unwrap().selected_category.as_deref(),
        Some("Custom")
    );
    assert_eq!(repo.setting("language").await.unwrap(), Some(json!("en")));
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let fx = fixture();
    fx.kv.set(PROMPTS_KEY, &legacy_prompts(4).to_string()).unwrap();
    fx.engine.initialize_storage_migration().await;
    let repo = repo_for(&fx);
    repo.add_category("Custom").await.unwrap();
    repo.set_theme(Theme::Light).await.unwrap();
    let filters = FilterState {
        selected_category: Some("Custom".to_string()),
        favorites_only: true,
        ..FilterState::default()
    };
    repo.set_filters(&filters).await.unwrap();

    let bundle = fx.engine.export_all_data(&repo).await.unwrap();
    assert_eq!(bundle.version, "2.0.0");
    assert_eq!(bundle.prompts.len(), 4);
    assert!(bundle.migration_status.is_completed);
    let encoded = serde_json::to_value(&bundle).unwrap();
    assert!(encoded["exportedAt"].is_i64());
    assert!(encoded.get("migrationStatus").is_some());
    let settings = encoded["settings"].as_object().unwrap();
    assert!(settings.values().all(Value::is_string));
    assert_eq!(settings["theme"], json!("light"));

    let target = fixture();
    target.engine.initialize_storage_migration().await;
    let target_repo = repo_for(&target);
    let result = target.engine.import_data(&target_repo, &encoded).await;
    assert!(result.success, "{:?}", result.errors);

    let categories = target_repo.categories().await.unwrap();
    assert_eq!(categories, bundle.categories);
    assert_eq!(target_repo.list_all().await.unwrap(), bundle.prompts);
    assert_eq!(target_repo.theme().await.unwrap(), Theme::Light);
    assert_eq!(target_repo.filters().await.unwrap(), filters);
    assert_eq!(
        result.imported_items,
        4 + bundle.categories.len() + bundle.settings.len()
    );
}

#[tokio::test]
async fn test_import_isolates_wrong_typed_fields() {
    let fx = fixture();
    fx.engine.initialize_storage_migration().await;
    let repo = repo_for(&fx);

    let bundle = json!({
        "prompts": [{"id": "a", "content": "x"}, {"id": "b"}],
        "categories": null,
        "settings": {"theme": 3, "language": "en"}
    });
    let result = fx.engine.import_data(&repo, &bundle).await;
    assert!(!result.success);
    assert_eq!(result.imported_items, 2);
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors.iter().any(|e| e.starts_with("categories:")));
    assert!(result.errors.iter().any(|e| e.starts_with("prompts[1]")));
    assert!(result.errors.iter().any(|e| e.starts_with("settings.theme")));
    assert!(repo.get("a").await.unwrap().is_some());
}

#[tokio::test]
async fn test_import_accepts_text_and_object_filters() {
    let fx = fixture();
    fx.engine.initialize_storage_migration().await;
    let repo = repo_for(&fx);

    let bundle = json!({
        "settings": {
            "theme": "dark",
            "filters": "{\"selectedCategory\":\"Coding\",\"favoritesOnly\":true}",
            "language": "en"
        }
    });
    let result = fx.engine.import_data(&repo, &bundle).await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.imported_items, 3);
    let filters = repo.filters().await.unwrap();
    assert_eq!(filters.selected_category.as_deref(), Some("Coding"));
    assert!(filters.favorites_only);
    assert_eq!(repo.setting("language").await.unwrap(), Some(json!("en")));

    let bundle = json!({"settings": {"filters": {"searchQuery": "email"}}});
    assert!(fx.engine.import_data(&repo, &bundle).await.success);
    assert_eq!(repo.filters().await.unwrap().search_query, "email");

    let bundle = json!({"settings": {"filters": "[1, 2]"}});
    let result = fx.engine.import_data(&repo, &bundle).await;
    assert!(!result.success);
    assert!(result.errors[0].starts_with("settings.filters"));
}

#[tokio::test]
async fn test_import_skips_absent_fields() {
    let fx = fixture();
    let repo = repo_for(&fx);
    let result = fx.engine.import_data(&repo, &json!({"version": "2.0.0"})).await;
    assert!(result.success);
    assert_eq!(result.imported_items, 0);

    let result = fx.engine.import_data(&repo, &json!([])).await;
    assert!(!result.success);
}

#[tokio::test]
async fn test_clear_all_data_is_idempotent() {
    let fx = fixture();
    fx.kv.set(PROMPTS_KEY, &legacy_prompts(2).to_string()).unwrap();
    fx.kv.set("unrelated", "keep").unwrap();
    fx.engine.initialize_storage_migration().await;
    let repo = repo_for(&fx);
    repo.set_theme(Theme::Dark).await.unwrap();

    fx.engine.clear_all_data(&repo).await.unwrap();
    fx.engine.clear_all_data(&repo).await.unwrap();

    assert_eq!(fx.kv.keys().unwrap(), vec!["unrelated"]);
    for store in APP_STORES {
        assert_eq!(fx.docs.count(store).await.unwrap(), 0);
    }
    assert_eq!(fx.engine.get_migration_status(), MigrationStatus::default());
}
