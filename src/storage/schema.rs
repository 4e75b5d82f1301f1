//! Persisted names: legacy key-value keys, document database identity and object stores.

use super::traits::SchemaUpgrade;

/// Legacy flat prompt array
pub const PROMPTS_KEY: &str = "prompts_data_v2";
/// Legacy category list
pub const CATEGORIES_KEY: &str = "prompts_categories_v1";
/// Legacy theme string
pub const THEME_KEY: &str = "prompts_theme_v1";
/// Legacy filter state
pub const FILTERS_KEY: &str = "prompts_filters_v1";
/// Durable migration gate
pub const MIGRATION_STATUS_KEY: &str = "prompts_migration_status_v1";
/// Prefix for settings other than theme and filters in key-value-only mode
pub const SETTING_KEY_PREFIX: &str = "prompts_setting_";

/// Keys holding legacy data that the migration copies
pub const LEGACY_KEYS: [&str; 4] = [PROMPTS_KEY, CATEGORIES_KEY, THEME_KEY, FILTERS_KEY];

pub const DATABASE_NAME: &str = "prompt-vault";
pub const DATABASE_VERSION: u32 = 2;

pub const DIRECTORY_HANDLES_STORE: &str = "directory_handles";
pub const PROMPTS_STORE: &str = "prompts";
pub const CATEGORIES_STORE: &str = "categories";
pub const SETTINGS_STORE: &str = "settings";

/// Object stores owned by the app, wiped on factory reset
pub const APP_STORES: [&str; 4] = [
    DIRECTORY_HANDLES_STORE,
    PROMPTS_STORE,
    CATEGORIES_STORE,
    SETTINGS_STORE,
];

/// Key under which the category list lives in its store
pub const CATEGORY_LIST_KEY: &str = "list";
/// Fixed id of the directory handle used for native file saves
pub const DEFAULT_DIRECTORY_HANDLE: &str = "default_directory";

pub const THEME_SETTING: &str = "theme";
pub const FILTERS_SETTING: &str = "filters";

/// Upgrade callback for the app database.
///
/// Version 1 only knew directory handles; version 2 added the migrated prompt data.
pub fn upgrade_app_schema(upgrade: &mut SchemaUpgrade<'_>) {
    if upgrade.old_version() < 1 {
        upgrade.create_object_store(DIRECTORY_HANDLES_STORE);
    }
    if upgrade.old_version() < 2 {
        upgrade.create_object_store(PROMPTS_STORE);
        upgrade.create_object_store(CATEGORIES_STORE);
        upgrade.create_object_store(SETTINGS_STORE);
    }
}

/// Key-value key used for a named setting in key-value-only mode
pub fn setting_key(name: &str) -> String {
    match name {
        THEME_SETTING => THEME_KEY.to_string(),
        FILTERS_SETTING => FILTERS_KEY.to_string(),
        other => format!("{SETTING_KEY_PREFIX}{other}"),
    }
}

/// Whether a key-value key belongs to this app's namespace
pub fn is_app_key(key: &str) -> bool {
    LEGACY_KEYS.contains(&key) || key == MIGRATION_STATUS_KEY || key.starts_with(SETTING_KEY_PREFIX)
}
