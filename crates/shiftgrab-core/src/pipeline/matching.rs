use std::collections::HashMap;

use tracing::debug;

use crate::models::{Credential, RuleInterval, ShiftOpportunity};

/// Available to this user: eligible, unblocked, and of an accepted skill.
pub fn is_candidate(opportunity: &ShiftOpportunity, credential: &Credential) -> bool {
    if !opportunity.is_available() {
        debug!(opportunity = %opportunity, "Shift is not eligible");
        return false;
    }
    if !credential.accepts_skill(&opportunity.skill) {
        debug!(opportunity = %opportunity, "Shift skill not wanted");
        return false;
    }
    true
}

/// Collapse opportunities by id. The last copy seen wins; output keeps the
/// order in which ids first appeared.
pub fn merge(opportunities: impl IntoIterator<Item = ShiftOpportunity>) -> Vec<ShiftOpportunity> {
    let mut merged: Vec<ShiftOpportunity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for opportunity in opportunities {
        match index.get(&opportunity.id) {
            Some(&i) => merged[i] = opportunity,
            None => {
                index.insert(opportunity.id.clone(), merged.len());
                merged.push(opportunity);
            }
        }
    }
    merged
}

/// The shift lies entirely inside at least one rule interval.
pub fn within_rules(opportunity: &ShiftOpportunity, rules: &[RuleInterval]) -> bool {
    rules.iter().any(|r| r.contains(opportunity.start, opportunity.end))
}
