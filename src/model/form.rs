//! Editable subset of a prompt as tracked by an editing session

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::prompt::{normalize_tags, Example, Prompt, PromptConfig};

/// Set of form fields that differ from the last persisted snapshot
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DirtyFields(u16);

impl DirtyFields {
    pub const TITLE: Self = Self(1);
    pub const DESCRIPTION: Self = Self(1 << 1);
    pub const CONTENT: Self = Self(1 << 2);
    pub const SYSTEM_INSTRUCTION: Self = Self(1 << 3);
    pub const EXAMPLES: Self = Self(1 << 4);
    pub const CONFIG: Self = Self(1 << 5);
    pub const TAGS: Self = Self(1 << 6);
    pub const CATEGORY: Self = Self(1 << 7);
    pub const VARIABLE_VALUES: Self = Self(1 << 8);

    const NAMED: [(Self, &'static str); 9] = [
        (Self::TITLE, "title"),
        (Self::DESCRIPTION, "description"),
        (Self::CONTENT, "content"),
        (Self::SYSTEM_INSTRUCTION, "systemInstruction"),
        (Self::EXAMPLES, "examples"),
        (Self::CONFIG, "config"),
        (Self::TAGS, "tags"),
        (Self::CATEGORY, "category"),
        (Self::VARIABLE_VALUES, "variableValues"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self((1 << 9) - 1)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Field names in declaration order, as they appear in serialized prompts
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for DirtyFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyFields {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Debug for DirtyFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Structural copy of the editable fields, compared by value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub title: String,
    pub description: String,
    pub content: String,
    pub system_instruction: Option<String>,
    pub examples: Vec<Example>,
    pub config: Option<PromptConfig>,
    pub tags: Vec<String>,
    pub category: String,
    pub variable_values: BTreeMap<String, String>,
}

impl FormSnapshot {
    pub fn from_prompt(prompt: &Prompt) -> Self {
        Self {
            title: prompt.title.clone(),
            description: prompt.description.clone(),
            content: prompt.content.clone(),
            system_instruction: prompt.system_instruction.clone(),
            examples: prompt.examples.clone(),
            config: prompt.config.clone(),
            tags: prompt.tags.clone(),
            category: prompt.category.clone(),
            variable_values: prompt.last_variable_values.clone(),
        }
    }

    /// Fields whose value differs between `self` and `other`
    pub fn diff(&self, other: &FormSnapshot) -> DirtyFields {
        let mut dirty = DirtyFields::empty();
        if self.title != other.title {
            dirty |= DirtyFields::TITLE;
        }
        if self.description != other.description {
            dirty |= DirtyFields::DESCRIPTION;
        }
        if self.content != other.content {
            dirty |= DirtyFields::CONTENT;
        }
        if self.system_instruction != other.system_instruction {
            dirty |= DirtyFields::SYSTEM_INSTRUCTION;
        }
        if self.examples != other.examples {
            dirty |= DirtyFields::EXAMPLES;
        }
        if self.config != other.config {
            dirty |= DirtyFields::CONFIG;
        }
        if normalize_tags(&self.tags) != normalize_tags(&other.tags) {
            dirty |= DirtyFields::TAGS;
        }
        if self.category != other.category {
            dirty |= DirtyFields::CATEGORY;
        }
        if self.variable_values != other.variable_values {
            dirty |= DirtyFields::VARIABLE_VALUES;
        }
        dirty
    }

    /// Copy the `dirty` fields onto `prompt`, leaving every other field alone
    pub fn apply_to(&self, prompt: &mut Prompt, dirty: DirtyFields) {
        if dirty.contains(DirtyFields::TITLE) {
            prompt.title = self.title.clone();
        }
        if dirty.contains(DirtyFields::DESCRIPTION) {
            prompt.description = self.description.clone();
        }
        if dirty.contains(DirtyFields::CONTENT) {
            prompt.content = self.content.clone();
        }
        if dirty.contains(DirtyFields::SYSTEM_INSTRUCTION) {
            prompt.system_instruction = self.system_instruction.clone();
        }
        if dirty.contains(DirtyFields::EXAMPLES) {
            prompt.examples = self.examples.clone();
        }
        if dirty.contains(DirtyFields::CONFIG) {
            prompt.config = self.config.clone();
        }
        if dirty.contains(DirtyFields::TAGS) {
            prompt.tags = normalize_tags(&self.tags);
        }
        if dirty.contains(DirtyFields::CATEGORY) {
            prompt.category = self.category.clone();
        }
        if dirty.contains(DirtyFields::VARIABLE_VALUES) {
            prompt.last_variable_values = self.variable_values.clone();
        }
    }
}

/// Live form values as reported by the editor.
///
/// A `None` field was absent from the edit. Absent required fields mark the
/// edit as anomalous, see [`FormState::resolve`]. Optional prompt fields nest
/// a second `Option`: `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormState {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub system_instruction: Option<Option<String>>,
    pub examples: Option<Vec<Example>>,
    pub config: Option<Option<PromptConfig>>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub variable_values: Option<BTreeMap<String, String>>,
}

impl From<FormSnapshot> for FormState {
    fn from(snapshot: FormSnapshot) -> Self {
        Self {
            title: Some(snapshot.title),
            description: Some(snapshot.description),
            content: Some(snapshot.content),
            system_instruction: Some(snapshot.system_instruction),
            examples: Some(snapshot.examples),
            config: Some(snapshot.config),
            tags: Some(snapshot.tags),
            category: Some(snapshot.category),
            variable_values: Some(snapshot.variable_values),
        }
    }
}

/// Outcome of resolving live form values into a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub snapshot: FormSnapshot,
    /// Required fields restored from the last known good snapshot
    pub recovered: Vec<&'static str>,
}

impl Resolution {
    pub fn is_recovered(&self) -> bool {
        !self.recovered.is_empty()
    }
}

trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl<T> Blank for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

fn pick<T: Blank + Clone + Default>(
    name: &'static str,
    live: Option<T>,
    fallback: Option<&T>,
    recovering: bool,
    recovered: &mut Vec<&'static str>,
) -> T {
    match live {
        Some(value) if !(recovering && value.is_blank()) => value,
        _ => match fallback {
            Some(known) if recovering => {
                recovered.push(name);
                known.clone()
            }
            Some(known) => known.clone(),
            None => T::default(),
        },
    }
}

impl FormState {
    /// Required fields absent from this edit
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push("title");
        }
        if self.content.is_none() {
            missing.push("content");
        }
        if self.category.is_none() {
            missing.push("category");
        }
        if self.tags.is_none() {
            missing.push("tags");
        }
        if self.examples.is_none() {
            missing.push("examples");
        }
        missing
    }

    /// Turn live values into a complete snapshot.
    ///
    /// When a required field is absent and `last_good` exists the edit is
    /// treated as an anomaly: required fields come from `last_good` unless the
    /// live value is present and non-blank.
    pub fn resolve(self, last_good: Option<&FormSnapshot>) -> Resolution {
        let recovering = last_good.is_some() && !self.missing_required().is_empty();
        let mut recovered = Vec::new();
        let r = &mut recovered;

        let title = pick("title", self.title, last_good.map(|s| &s.title), recovering, r);
        let content = pick("content", self.content, last_good.map(|s| &s.content), recovering, r);
        let category = pick(
            "category",
            self.category,
            last_good.map(|s| &s.category),
            recovering,
            r,
        );
        let tags = pick("tags", self.tags, last_good.map(|s| &s.tags), recovering, r);
        let examples = pick(
            "examples",
            self.examples,
            last_good.map(|s| &s.examples),
            recovering,
            r,
        );

        let snapshot = FormSnapshot {
            title,
            description: self
                .description
                .or_else(|| last_good.map(|s| s.description.clone()))
                .unwrap_or_default(),
            content,
            system_instruction: self
                .system_instruction
                .unwrap_or_else(|| last_good.and_then(|s| s.system_instruction.clone())),
            examples,
            config: self
                .config
                .unwrap_or_else(|| last_good.and_then(|s| s.config.clone())),
            tags,
            category,
            variable_values: self
                .variable_values
                .or_else(|| last_good.map(|s| s.variable_values.clone()))
                .unwrap_or_default(),
        };
        Resolution {
            snapshot,
            recovered,
        }
    }
}
