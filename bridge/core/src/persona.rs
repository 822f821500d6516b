//! Persona Catalog
//!
//! A persona is a named reviewing stance: the key a surface sends, the
//! metadata it renders on a button, and a prompt builder parameterised by
//! [`Strictness`]. The catalog is read-only once built.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::session::Strictness;

/// Builds a system prompt for a strictness level
pub type PromptBuilder = Arc<dyn Fn(Strictness) -> String + Send + Sync>;

/// A reviewing persona
#[derive(Clone)]
pub struct PersonaDescriptor {
    /// Lookup key sent by surfaces
    pub key: String,
    /// Name shown on buttons
    pub display_name: String,
    /// Icon name
    pub icon: String,
    /// CSS colour
    pub color: String,
    prompt: PromptBuilder,
}

impl PersonaDescriptor {
    /// Create a persona
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        icon: impl Into<String>,
        color: impl Into<String>,
        prompt: impl Fn(Strictness) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            icon: icon.into(),
            color: color.into(),
            prompt: Arc::new(prompt),
        }
    }

    /// System prompt for the given strictness
    #[must_use]
    pub fn prompt_for(&self, strictness: Strictness) -> String {
        (self.prompt)(strictness)
    }

    /// Serializable metadata (no prompt)
    #[must_use]
    pub fn summary(&self) -> PersonaSummary {
        PersonaSummary {
            key: self.key.clone(),
            display_name: self.display_name.clone(),
            icon: self.icon.clone(),
            color: self.color.clone(),
        }
    }
}

impl fmt::Debug for PersonaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonaDescriptor")
            .field("key", &self.key)
            .field("display_name", &self.display_name)
            .field("icon", &self.icon)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

/// Persona metadata sent to surfaces
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSummary {
    /// Lookup key
    pub key: String,
    /// Display name
    pub display_name: String,
    /// Icon name
    pub icon: String,
    /// CSS colour
    pub color: String,
}

/// Ordered, read-only set of personas
#[derive(Clone, Debug, Default)]
pub struct PersonaCatalog {
    personas: Vec<PersonaDescriptor>,
}

impl PersonaCatalog {
    /// Build a catalog. Later duplicates of a key are ignored.
    #[must_use]
    pub fn new(personas: Vec<PersonaDescriptor>) -> Self {
        let mut unique: Vec<PersonaDescriptor> = Vec::with_capacity(personas.len());
        for persona in personas {
            if unique.iter().any(|p| p.key == persona.key) {
                tracing::warn!(key = %persona.key, "Duplicate persona key ignored");
                continue;
            }
            unique.push(persona);
        }
        Self { personas: unique }
    }

    /// The nine personas that ship with the bridge
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|def| {
                    let focus = def.focus;
                    PersonaDescriptor::new(def.key, def.name, def.icon, def.color, move |s| {
                        compose_prompt(s, focus)
                    })
                })
                .collect(),
        )
    }

    /// Find a persona by key
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<&PersonaDescriptor> {
        self.personas.iter().find(|p| p.key == key)
    }

    /// All personas in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &PersonaDescriptor> {
        self.personas.iter()
    }

    /// Metadata for every persona
    #[must_use]
    pub fn summaries(&self) -> Vec<PersonaSummary> {
        self.personas.iter().map(PersonaDescriptor::summary).collect()
    }

    /// Number of personas
    #[must_use]
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

struct BuiltinPersona {
    key: &'static str,
    name: &'static str,
    icon: &'static str,
    color: &'static str,
    focus: &'static str,
}

const BUILTIN: &[BuiltinPersona] = &[
    BuiltinPersona {
        key: "security",
        name: "Security Scan",
        icon: "shield-check",
        color: "#ef4444",
        focus: "Look for security weaknesses: injection, broken authentication or access \
                control, unsafe deserialization, secret exposure and data leaks. Rate each \
                finding by severity.",
    },
    BuiltinPersona {
        key: "performance",
        name: "Performance",
        icon: "zap",
        color: "#f59e0b",
        focus: "Look for performance problems: algorithmic complexity, redundant work, \
                blocking calls on async paths, memory growth and N+1 queries. Estimate the \
                impact of each fix.",
    },
    BuiltinPersona {
        key: "docstring",
        name: "Auto Docs",
        icon: "file-text",
        color: "#3b82f6",
        focus: "Write documentation for the code: a summary, parameters, return values, \
                errors and a short usage example, in the idiomatic doc comment style of the \
                language.",
    },
    BuiltinPersona {
        key: "tests",
        name: "Write Tests",
        icon: "flask-conical",
        color: "#8b5cf6",
        focus: "Write tests for the code: the happy path, edge cases and failure modes, \
                using the test framework conventional for the language.",
    },
    BuiltinPersona {
        key: "refactor",
        name: "Refactor",
        icon: "wrench",
        color: "#06b6d4",
        focus: "Refactor the code for clarity and maintainability without changing its \
                behaviour. Show the refactored code and explain each change.",
    },
    BuiltinPersona {
        key: "explain",
        name: "Explain",
        icon: "lightbulb",
        color: "#10b981",
        focus: "Explain what the code does and how: the overall purpose, the key logic \
                flow and any non-obvious behaviour. End with a one-sentence summary.",
    },
    BuiltinPersona {
        key: "bugfind",
        name: "Find Bugs",
        icon: "bug",
        color: "#f97316",
        focus: "Find bugs: logic errors, off-by-one mistakes, unhandled errors, null or \
                missing values, race conditions and resource leaks. Give a fix for each.",
    },
    BuiltinPersona {
        key: "prsummary",
        name: "PR Summary",
        icon: "clipboard-check",
        color: "#84cc16",
        focus: "Write a pull request description for the code: what changed, why, how to \
                test it and any risks reviewers should check.",
    },
    BuiltinPersona {
        key: "reviewcomment",
        name: "Review Comment",
        icon: "message-square-more",
        color: "#ec4899",
        focus: "Write a single code review comment on the most important issue: name the \
                problem, explain the consequence and suggest a concrete change.",
    },
];

fn compose_prompt(strictness: Strictness, focus: &str) -> String {
    let tone = match strictness.level() {
        1 => {
            "You are a friendly mentor reviewing code written by a junior developer. \
             Keep the language encouraging, explain why each point matters and cover only \
             the most important findings."
        }
        3 => {
            "You are a senior engineer performing a thorough review. Be methodical and \
             direct, assume a competent reader and include code for every fix."
        }
        4 => {
            "You are a principal engineer conducting a formal review. Be exhaustive and \
             precise, cite relevant standards or identifiers and cover architectural as \
             well as code-level concerns."
        }
        _ => {
            "You are an experienced engineer reviewing production code. Be clear and \
             specific, group findings by severity and give a concrete fix for each."
        }
    };

    format!("{tone}\n\n{focus}\n\nFormat the response in Markdown.")
}
