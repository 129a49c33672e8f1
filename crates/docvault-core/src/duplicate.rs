// ABOUTME: Ordered key-extractor rules deciding whether an incoming record re-submits an existing one.
// ABOUTME: Rules are checked in priority order and the first rule producing a collision wins.

use crate::entity::Entity;

/// One duplicate-detection rule: a named key extractor. Two records collide
/// under a rule when both produce a key and the keys are equal. Extractors
/// return None to opt a record out of the rule (empty email, missing id, ...).
pub struct DuplicateRule<T> {
    name: &'static str,
    key: fn(&T) -> Option<String>,
}

impl<T> DuplicateRule<T> {
    pub const fn new(name: &'static str, key: fn(&T) -> Option<String>) -> Self {
        Self { name, key }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self, record: &T) -> Option<String> {
        (self.key)(record)
    }

    pub fn collides(&self, candidate: &T, existing: &T) -> bool {
        match (self.key(candidate), self.key(existing)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Clone for DuplicateRule<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DuplicateRule<T> {}

/// The rule that fired and the record it matched.
#[derive(Debug)]
pub struct Conflict<'a, T> {
    pub rule: &'static str,
    pub existing: &'a T,
}

/// An ordered list of duplicate rules.
pub struct DuplicatePolicy<T> {
    rules: Vec<DuplicateRule<T>>,
}

impl<T: Entity> DuplicatePolicy<T> {
    pub fn new(rules: Vec<DuplicateRule<T>>) -> Self {
        Self { rules }
    }

    /// Only identical non-empty ids collide.
    pub fn id_only() -> Self {
        Self::new(vec![id_rule::<T>()])
    }

    pub fn with_rule(mut self, rule: DuplicateRule<T>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Find the first collision for `candidate` among `existing`, checking
    /// rules in priority order.
    pub fn find_conflict<'a>(&self, candidate: &T, existing: &'a [T]) -> Option<Conflict<'a, T>> {
        for rule in &self.rules {
            let Some(key) = rule.key(candidate) else {
                continue;
            };
            if let Some(hit) = existing
                .iter()
                .find(|record| rule.key(record).is_some_and(|k| k == key))
            {
                return Some(Conflict {
                    rule: rule.name(),
                    existing: hit,
                });
            }
        }
        None
    }
}

/// The identity rule every policy starts with.
pub fn id_rule<T: Entity>() -> DuplicateRule<T> {
    DuplicateRule::new("id", |record: &T| non_empty(record.id()))
}

/// Trimmed, lowercased copy of `value`, or None when it is blank.
pub fn normalized(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
