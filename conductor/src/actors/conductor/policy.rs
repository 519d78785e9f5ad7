//! Turn selection authority.
//!
//! The policy decides who speaks next from the conversation log and the
//! session counters alone. Rules are evaluated in a fixed order and the first
//! match wins:
//!
//! 1. termination pre-check (turn limit, consecutive-actor limit, marker)
//! 2. explicit `@name` mention
//! 3. keyword routes
//! 4. sequence table
//! 5. default actor (only before any actor has spoken)
//!
//! When nothing matches the policy fails closed and terminates the session.
//! Selection never returns an error; bad routing input is rejected when the
//! policy is built.

use shared_types::{MessageRole, TerminationReason};

use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::registry::SharedActorRegistry;
use crate::actors::conductor::router::{extract_mentions, KeywordRouter, SequenceTable};
use crate::actors::conductor::state::SessionCounters;
use crate::config::{RoutingConfig, SchedulerConfig};
use crate::conversation::ConversationLog;

/// Which rule produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    Mention,
    Keyword,
    Sequence,
    Default,
}

impl SelectionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Keyword => "keyword",
            Self::Sequence => "sequence",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Actor { name: String, rule: SelectionRule },
    Terminate(TerminationReason),
}

impl Selection {
    fn actor(name: &str, rule: SelectionRule) -> Self {
        Self::Actor {
            name: name.to_string(),
            rule,
        }
    }
}

#[derive(Debug)]
pub struct SelectionPolicy {
    registry: SharedActorRegistry,
    keywords: KeywordRouter,
    sequence: SequenceTable,
    default_actor: Option<String>,
    max_turns: u32,
    max_consecutive: u32,
    /// Lowercased, non-empty markers
    markers: Vec<String>,
}

impl SelectionPolicy {
    pub fn new(
        routing: &RoutingConfig,
        config: &SchedulerConfig,
        registry: SharedActorRegistry,
    ) -> Result<Self, ConductorError> {
        let keywords = KeywordRouter::new(&routing.keyword_routes, &registry)?;
        let sequence = SequenceTable::new(&routing.sequence, &registry)?;
        let default_actor = routing
            .default_actor
            .as_deref()
            .map(|name| registry.require(name).map(ToString::to_string))
            .transpose()?;

        let markers: Vec<String> = config
            .termination_markers
            .iter()
            .map(|marker| marker.trim().to_lowercase())
            .filter(|marker| !marker.is_empty())
            .collect();
        if markers.is_empty() {
            tracing::warn!("No termination markers configured; sessions end only on limits");
        }

        Ok(Self {
            registry,
            keywords,
            sequence,
            default_actor,
            max_turns: config.max_turns,
            max_consecutive: config.max_consecutive,
            markers,
        })
    }

    pub fn select(&self, log: &ConversationLog, counters: &SessionCounters) -> Selection {
        if let Some(reason) = self.termination_check(log, counters) {
            return Selection::Terminate(reason);
        }

        let last_content = log
            .last_message()
            .map(|message| message.content.as_str())
            .unwrap_or_default();

        for mention in extract_mentions(last_content) {
            match self.registry.resolve(mention) {
                Some(name) => return Selection::actor(name, SelectionRule::Mention),
                None => tracing::debug!(mention = %mention, "Ignoring mention of unregistered actor"),
            }
        }

        if let Some(hit) = self.keywords.route(last_content) {
            tracing::debug!(actor = %hit.actor, keyword = %hit.keyword, "Keyword route matched");
            return Selection::actor(hit.actor, SelectionRule::Keyword);
        }

        let last_actor = counters.last_actor.clone().or_else(|| log.last_actor());
        if let Some(next) = last_actor
            .as_deref()
            .and_then(|last| self.sequence.next_after(last))
        {
            return Selection::actor(next, SelectionRule::Sequence);
        }

        if let Some(default_actor) = &self.default_actor {
            if !Self::has_prior_actor(log, counters) {
                return Selection::actor(default_actor, SelectionRule::Default);
            }
        }

        Selection::Terminate(TerminationReason::NoCandidate)
    }

    fn termination_check(
        &self,
        log: &ConversationLog,
        counters: &SessionCounters,
    ) -> Option<TerminationReason> {
        if counters.turn_count >= self.max_turns {
            return Some(TerminationReason::TurnLimit);
        }
        if counters.consecutive_count > self.max_consecutive {
            return Some(TerminationReason::ConsecutiveLimit);
        }

        // Only actor turns can end a session; the user's request never does.
        let last = log.last_message().filter(|message| message.actor_name.is_some())?;
        let content = last.content.to_lowercase();
        self.markers
            .iter()
            .find(|marker| content.contains(marker.as_str()))
            .map(|marker| TerminationReason::Marker(marker.clone()))
    }

    fn has_prior_actor(log: &ConversationLog, counters: &SessionCounters) -> bool {
        counters.last_actor.is_some()
            || log.last_actor_of_role(MessageRole::Manager).is_some()
            || log.last_actor_of_role(MessageRole::Worker).is_some()
    }
}
