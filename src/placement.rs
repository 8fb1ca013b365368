//! Placement rule creation
//!
//! The host owns the placement map; the engine only asks it for a rule by
//! name and, if none exists, adds a simple one that spreads shards across
//! hosts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Root bucket new rules start from.
pub const DEFAULT_ROOT: &str = "default";

/// Failure domain new rules spread shards across.
pub const DEFAULT_FAILURE_DOMAIN: &str = "host";

/// Kind of pool a rule serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Erasure,
}

/// How replicas or shards are chosen under the failure domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChooseMode {
    /// Positions are independent; a failed slot is refilled in place
    Indep,
}

/// One placement rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRule {
    pub id: i32,
    pub name: String,
    pub root: String,
    pub failure_domain: String,
    pub rule_type: RuleType,
    pub mode: ChooseMode,
}

/// Port onto the host's placement map.
pub trait PlacementRules {
    /// Id of the rule called `name`, if any.
    fn rule_id(&self, name: &str) -> Option<i32>;

    /// Add a rule and return its id.
    fn add_simple_rule(
        &mut self,
        name: &str,
        root: &str,
        failure_domain: &str,
        mode: ChooseMode,
        rule_type: RuleType,
    ) -> i32;
}

/// Return the id of rule `name`, creating an erasure rule across hosts if it
/// does not exist yet.
pub fn create_rule(name: &str, rules: &mut dyn PlacementRules) -> i32 {
    if let Some(id) = rules.rule_id(name) {
        return id;
    }
    let id = rules.add_simple_rule(
        name,
        DEFAULT_ROOT,
        DEFAULT_FAILURE_DOMAIN,
        ChooseMode::Indep,
        RuleType::Erasure,
    );
    info!(rule = name, id, "created erasure placement rule");
    id
}

/// In-memory placement map.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RuleTable {
    rules: BTreeMap<i32, PlacementRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a rule by id.
    pub fn get(&self, id: i32) -> Option<&PlacementRule> {
        self.rules.get(&id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl PlacementRules for RuleTable {
    fn rule_id(&self, name: &str) -> Option<i32> {
        self.rules
            .values()
            .find(|rule| rule.name == name)
            .map(|rule| rule.id)
    }

    fn add_simple_rule(
        &mut self,
        name: &str,
        root: &str,
        failure_domain: &str,
        mode: ChooseMode,
        rule_type: RuleType,
    ) -> i32 {
        let id = self.rules.keys().next_back().map_or(0, |last| last + 1);
        self.rules.insert(
            id,
            PlacementRule {
                id,
                name: name.to_string(),
                root: root.to_string(),
                failure_domain: failure_domain.to_string(),
                rule_type,
                mode,
            },
        );
        id
    }
}
