//! User settings: theme, library filters and categories

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Categories every library starts with
pub const DEFAULT_CATEGORIES: [&str; 6] = [
    "General",
    "Writing",
    "Coding",
    "Analysis",
    "Creative",
    "Productivity",
];

pub fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

/// Append `extra` to `categories`, skipping blanks and duplicates
pub fn merge_categories(categories: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for category in extra {
        let category = category.trim().to_string();
        if !category.is_empty() && !categories.contains(&category) {
            categories.push(category);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        };
        f.write_str(name)
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" | "auto" => Ok(Theme::System),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

/// Persisted library filter selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterState {
    pub selected_category: Option<String>,
    pub selected_tags: Vec<String>,
    pub search_query: String,
    pub favorites_only: bool,
}
