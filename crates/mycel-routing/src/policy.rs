//! Tag-based ACL policy gating route reinforcement.
//!
//! Rules are an ordered list matched against the local node's tags and
//! the target's tags; the first matching rule wins. `*` matches any
//! tag. An empty rule list means allow-everything (development mode);
//! any configured rule flips the default to deny (zero trust).

use std::collections::{HashMap, HashSet};

use mycel_crypto::NodeId;
use serde::{Deserialize, Serialize};

/// Wildcard tag matching anything.
pub const WILDCARD: &str = "*";

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

/// A single ACL rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRule {
    /// Tag the local node must carry (or `*`).
    pub source_tag: String,
    /// Tag the target must carry (or `*`).
    pub target_tag: String,
    pub action: Action,
}

impl TagRule {
    /// Convenience constructor.
    pub fn new(source_tag: &str, target_tag: &str, action: Action) -> Self {
        Self {
            source_tag: source_tag.to_string(),
            target_tag: target_tag.to_string(),
            action,
        }
    }
}

/// Ordered rule set plus the tag assignments it is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct TagPolicy {
    rules: Vec<TagRule>,
    local_tags: HashSet<String>,
    peer_tags: HashMap<NodeId, HashSet<String>>,
}

impl TagPolicy {
    /// Empty policy: everything allowed.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Build a policy from rules and tag assignments.
    pub fn new(
        rules: Vec<TagRule>,
        local_tags: HashSet<String>,
        peer_tags: HashMap<NodeId, HashSet<String>>,
    ) -> Self {
        Self {
            rules,
            local_tags,
            peer_tags,
        }
    }

    /// Replace the rule list and peer tag mapping in one step.
    pub fn replace(&mut self, rules: Vec<TagRule>, peer_tags: HashMap<NodeId, HashSet<String>>) {
        self.rules = rules;
        self.peer_tags = peer_tags;
    }

    /// Whether routing toward `target` is permitted.
    pub fn is_allowed(&self, target: &NodeId) -> bool {
        if self.rules.is_empty() {
            return true;
        }

        let empty = HashSet::new();
        let target_tags = self.peer_tags.get(target).unwrap_or(&empty);

        for rule in &self.rules {
            let source_matches =
                rule.source_tag == WILDCARD || self.local_tags.contains(&rule.source_tag);
            let target_matches =
                rule.target_tag == WILDCARD || target_tags.contains(&rule.target_tag);
            if source_matches && target_matches {
                return rule.action == Action::Allow;
            }
        }

        // Zero trust: configured policy with no matching rule denies.
        false
    }

    /// Number of configured rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeId {
        NodeId::from_bytes([n; 32])
    }

    fn tags(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_policy_allows_everything() {
        let policy = TagPolicy::permissive();
        assert!(policy.is_allowed(&node(1)));
    }

    #[test]
    fn configured_policy_defaults_to_deny() {
        let policy = TagPolicy::new(
            vec![TagRule::new("web", "db", Action::Allow)],
            tags(&["cache"]),
            HashMap::new(),
        );
        // Local node is not tagged "web" and the target is untagged.
        assert!(!policy.is_allowed(&node(1)));
    }

    #[test]
    fn matching_allow_rule_permits() {
        let target = node(2);
        let policy = TagPolicy::new(
            vec![TagRule::new("web", "db", Action::Allow)],
            tags(&["web"]),
            HashMap::from([(target, tags(&["db"]))]),
        );
        assert!(policy.is_allowed(&target));
    }

    #[test]
    fn first_matching_rule_wins() {
        let target = node(3);
        let policy = TagPolicy::new(
            vec![
                TagRule::new("web", "db", Action::Deny),
                TagRule::new(WILDCARD, WILDCARD, Action::Allow),
            ],
            tags(&["web"]),
            HashMap::from([(target, tags(&["db"]))]),
        );
        assert!(!policy.is_allowed(&target));
    }

    #[test]
    fn wildcard_matches_any_tag() {
        let target = node(4);
        let policy = TagPolicy::new(
            vec![TagRule::new(WILDCARD, "db", Action::Allow)],
            HashSet::new(),
            HashMap::from([(target, tags(&["db", "prod"]))]),
        );
        assert!(policy.is_allowed(&target));
    }

    #[test]
    fn replace_swaps_rules_and_tags() {
        let target = node(5);
        let mut policy = TagPolicy::new(
            vec![TagRule::new(WILDCARD, WILDCARD, Action::Deny)],
            HashSet::new(),
            HashMap::new(),
        );
        assert!(!policy.is_allowed(&target));

        policy.replace(
            vec![TagRule::new(WILDCARD, "edge", Action::Allow)],
            HashMap::from([(target, tags(&["edge"]))]),
        );
        assert!(policy.is_allowed(&target));
    }
}
