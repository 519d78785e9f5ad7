//! Actor registry for a scheduler.
//!
//! Built once from `{name, role, provider}` triples and never mutated. Names
//! are matched case-insensitively, so `@Coder` and `coder` resolve to the same
//! actor; the declared spelling is kept as the canonical name.

use std::collections::HashMap;
use std::sync::Arc;

use shared_types::ActorRole;

use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::router::is_mention_name;
use crate::actors::conductor::workers::SharedCompletionProvider;

pub type SharedActorRegistry = Arc<ActorRegistry>;

/// Name and role of an actor, handed to the completion provider on each call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorIdentity {
    pub name: String,
    pub role: ActorRole,
}

/// Registration input
#[derive(Clone)]
pub struct ActorSpec {
    pub name: String,
    pub role: ActorRole,
    pub provider: SharedCompletionProvider,
}

impl ActorSpec {
    pub fn new(name: impl Into<String>, role: ActorRole, provider: SharedCompletionProvider) -> Self {
        Self {
            name: name.into(),
            role,
            provider,
        }
    }
}

#[derive(Clone)]
pub struct RegisteredActor {
    pub identity: ActorIdentity,
    pub provider: SharedCompletionProvider,
}

impl std::fmt::Debug for RegisteredActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredActor")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ActorRegistry {
    actors: Vec<RegisteredActor>,
    index: HashMap<String, usize>,
}

impl ActorRegistry {
    pub fn new(specs: Vec<ActorSpec>) -> Result<Self, ConductorError> {
        if specs.is_empty() {
            return Err(ConductorError::InvalidConfig(
                "actor registry needs at least one actor".to_string(),
            ));
        }

        let mut actors = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());

        for spec in specs {
            if !is_mention_name(&spec.name) {
                return Err(ConductorError::InvalidActorName(spec.name));
            }
            let key = spec.name.to_lowercase();
            if index.contains_key(&key) {
                return Err(ConductorError::DuplicateActor(spec.name));
            }
            index.insert(key, actors.len());
            actors.push(RegisteredActor {
                identity: ActorIdentity {
                    name: spec.name,
                    role: spec.role,
                },
                provider: spec.provider,
            });
        }

        Ok(Self { actors, index })
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredActor> {
        self.index
            .get(&name.to_lowercase())
            .and_then(|&i| self.actors.get(i))
    }

    /// Canonical (declared) spelling of a registered name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name).map(|actor| actor.identity.name.as_str())
    }

    /// Like [`resolve`](Self::resolve) but reports unknown names as an error.
    pub fn require(&self, name: &str) -> Result<&str, ConductorError> {
        self.resolve(name)
            .ok_or_else(|| ConductorError::UnknownActor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actors.iter().map(|actor| actor.identity.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::conductor::workers::ScriptedProvider;

    fn spec(name: &str, role: ActorRole) -> ActorSpec {
        ActorSpec::new(name, role, Arc::new(ScriptedProvider::new()))
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_canonical() {
        let registry = ActorRegistry::new(vec![
            spec("Planner", ActorRole::Manager),
            spec("coder", ActorRole::Worker),
        ])
        .unwrap();

        assert_eq!(registry.resolve("planner"), Some("Planner"));
        assert_eq!(registry.resolve("CODER"), Some("coder"));
        assert_eq!(
            registry.get("coder").unwrap().identity.role,
            ActorRole::Worker
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Planner", "coder"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ActorRegistry::new(vec![
            spec("coder", ActorRole::Worker),
            spec("Coder", ActorRole::Worker),
        ])
        .unwrap_err();
        assert_eq!(err, ConductorError::DuplicateActor("Coder".to_string()));
    }

    #[test]
    fn test_unmentionable_names_rejected() {
        let err = ActorRegistry::new(vec![spec("code reviewer", ActorRole::Worker)]).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidActorName(_)));
        assert!(ActorRegistry::new(vec![spec("", ActorRole::Worker)]).is_err());
    }

    #[test]
    fn test_require_reports_unknown_actor() {
        let registry = ActorRegistry::new(vec![spec("coder", ActorRole::Worker)]).unwrap();
        assert_eq!(
            registry.require("tester").unwrap_err(),
            ConductorError::UnknownActor("tester".to_string())
        );
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(
            ActorRegistry::new(vec![]),
            Err(ConductorError::InvalidConfig(_))
        ));
    }
}
