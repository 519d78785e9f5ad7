//! Routing tables consulted by the selection policy.
//!
//! - `@name` mention extraction
//! - keyword routes, checked in declaration order
//! - the sequence table (`last actor -> next actor`)
//!
//! Every actor named by a table is resolved against the registry when the
//! table is built, so an unknown name fails construction instead of a turn.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::registry::ActorRegistry;
use crate::config::{KeywordRoute, SequenceStep};

fn mention_regex() -> &'static Regex {
    static MENTION_RE: OnceLock<Regex> = OnceLock::new();
    // A mention must not be glued to a preceding word character (e.g. e-mail addresses).
    MENTION_RE.get_or_init(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9_])@([A-Za-z0-9_-]+)").expect("valid regex")
    })
}

/// Whether `name` can be written as an `@name` mention.
pub fn is_mention_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// All `@name` tokens of `content`, in order of appearance.
pub fn extract_mentions(content: &str) -> Vec<&str> {
    mention_regex()
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        // `@coder-` at the end of a clause still means `@coder`.
        .map(|m| m.as_str().trim_end_matches('-'))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Declaration-ordered keyword routes.
#[derive(Debug, Clone, Default)]
pub struct KeywordRouter {
    routes: Vec<CompiledRoute>,
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    actor: String,
    keywords: Vec<String>,
}

/// Route hit: which actor and which keyword triggered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch<'a> {
    pub actor: &'a str,
    pub keyword: &'a str,
}

impl KeywordRouter {
    pub fn new(routes: &[KeywordRoute], registry: &ActorRegistry) -> Result<Self, ConductorError> {
        let mut compiled = Vec::with_capacity(routes.len());
        for route in routes {
            let actor = registry.require(&route.actor)?.to_string();
            let keywords: Vec<String> = route
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                tracing::warn!(actor = %actor, "Keyword route has no usable keywords; skipping");
                continue;
            }
            compiled.push(CompiledRoute { actor, keywords });
        }
        Ok(Self { routes: compiled })
    }

    /// First route (in declaration order) with a keyword contained in `content`.
    pub fn route(&self, content: &str) -> Option<KeywordMatch<'_>> {
        let haystack = content.to_lowercase();
        self.routes.iter().find_map(|route| {
            route
                .keywords
                .iter()
                .find(|keyword| haystack.contains(keyword.as_str()))
                .map(|keyword| KeywordMatch {
                    actor: route.actor.as_str(),
                    keyword: keyword.as_str(),
                })
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Static `last actor -> next actor` table.
#[derive(Debug, Clone, Default)]
pub struct SequenceTable {
    next: HashMap<String, String>,
}

impl SequenceTable {
    pub fn new(steps: &[SequenceStep], registry: &ActorRegistry) -> Result<Self, ConductorError> {
        let mut next = HashMap::with_capacity(steps.len());
        for step in steps {
            let from = registry.require(&step.from)?;
            let to = registry.require(&step.to)?.to_string();
            if next.insert(from.to_lowercase(), to).is_some() {
                return Err(ConductorError::InvalidConfig(format!(
                    "sequence table lists {from} more than once"
                )));
            }
        }
        Ok(Self { next })
    }

    pub fn next_after(&self, actor: &str) -> Option<&str> {
        self.next.get(&actor.to_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }
}
