//! Built-in starter prompts used when no prompt data exists or it is corrupt

use super::prompt::{normalize_tags, Example, Prompt};

struct Seed {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    content: &'static str,
    category: &'static str,
    tags: &'static [&'static str],
}

const SEEDS: [Seed; 3] = [
    Seed {
        id: "seed-summarize",
        title: "Summarize text",
        description: "Condense a passage into key points",
        content: "Summarize the following text in {{count}} bullet points:\n\n{{text}}",
        category: "Writing",
        tags: &["summary", "writing"],
    },
    Seed {
        id: "seed-code-review",
        title: "Code review",
        description: "Review a diff for bugs and style issues",
        content: "Review this code and list bugs, risks and style issues:\n\n{{code}}",
        category: "Coding",
        tags: &["code", "review"],
    },
    Seed {
        id: "seed-brainstorm",
        title: "Brainstorm ideas",
        description: "Generate varied ideas on a topic",
        content: "Give me {{count}} distinct ideas about {{topic}}.",
        category: "Creative",
        tags: &["ideas"],
    },
];

/// The starter dataset, stamped with `now`
pub fn seed_prompts(now: i64) -> Vec<Prompt> {
    SEEDS
        .iter()
        .map(|seed| {
            let mut prompt = Prompt::new(seed.title, seed.content);
            prompt.id = seed.id.to_string();
            prompt.description = seed.description.to_string();
            prompt.category = seed.category.to_string();
            prompt.tags = normalize_tags(seed.tags);
            prompt.created_at = now;
            prompt.updated_at = now;
            if seed.id == "seed-summarize" {
                prompt.examples = vec![Example::new(
                    "count=2, text=Rust guarantees memory safety without a GC.",
                    "- Memory safe\n- No garbage collector",
                )];
            }
            prompt
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_ids_are_stable_and_unique() {
        let first = seed_prompts(1);
        let second = seed_prompts(2);
        let ids: Vec<_> = first.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, second.iter().map(|p| p.id.clone()).collect::<Vec<_>>());

        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert!(first.iter().all(|p| p.created_at == 1 && !p.is_deleted()));
    }
}
