//! Message visibility conditions (§4.4, "Conditions"): a message with a
//! condition is only visible to lookup while its condition holds.
//!
//! `Condition/SimpleCondition/CombinedCondition` become a tagged union
//! rather than an inheritance hierarchy (§9), the same treatment given to
//! `Device` and `Transport` elsewhere in this crate.

use crate::error::{Error, Result};
use std::collections::HashSet;

/// Callback the catalog uses to resolve a referenced message's current
/// value, bootstrapping a fresh read if it has never been read.
///
/// Plain (non-async) by design: the dispatcher either already has a
/// cached value or performs the read itself before returning, keeping
/// condition evaluation a synchronous call from the catalog's point of
/// view (the protocol thread is the only task that ever awaits I/O).
pub trait ConditionResolver {
    /// The referenced message's last decoded numeric value, or `None` if
    /// it has never been read and a refresh failed.
    fn resolve(&self, circuit: &str, name: &str, field: &str) -> Option<f64>;
}

/// Comparison a [`SimpleCondition`] applies to the resolved value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Equal(f64),
    NotEqual(f64),
    Less(f64),
    Greater(f64),
}

impl Comparison {
    fn holds(self, value: f64) -> bool {
        match self {
            Comparison::Equal(v) => value == v,
            Comparison::NotEqual(v) => value != v,
            Comparison::Less(v) => value < v,
            Comparison::Greater(v) => value > v,
        }
    }
}

/// A single `circuit.name.field <op> value` predicate.
#[derive(Debug, Clone)]
pub struct SimpleCondition {
    pub circuit: String,
    pub name: String,
    pub field: String,
    pub comparison: Comparison,
}

impl SimpleCondition {
    pub fn new(circuit: impl Into<String>, name: impl Into<String>, field: impl Into<String>, comparison: Comparison) -> Self {
        Self {
            circuit: circuit.into(),
            name: name.into(),
            field: field.into(),
            comparison,
        }
    }

    fn evaluate(&self, resolver: &dyn ConditionResolver) -> bool {
        match resolver.resolve(&self.circuit, &self.name, &self.field) {
            Some(value) => self.comparison.holds(value),
            None => false,
        }
    }

    fn references(&self) -> (&str, &str) {
        (&self.circuit, &self.name)
    }
}

/// A conjunction of conditions, all of which must hold.
#[derive(Debug, Clone)]
pub struct CombinedCondition {
    pub parts: Vec<Condition>,
}

/// `Condition/SimpleCondition/CombinedCondition` as a tagged union.
#[derive(Debug, Clone)]
pub enum Condition {
    Simple(SimpleCondition),
    Combined(CombinedCondition),
}

impl Condition {
    /// Whether this condition currently holds.
    pub fn evaluate(&self, resolver: &dyn ConditionResolver) -> bool {
        match self {
            Condition::Simple(c) => c.evaluate(resolver),
            Condition::Combined(c) => c.parts.iter().all(|p| p.evaluate(resolver)),
        }
    }

    /// Every `(circuit, name)` pair this condition (transitively)
    /// references.
    fn referenced_messages<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            Condition::Simple(c) => out.push(c.references()),
            Condition::Combined(c) => {
                for part in &c.parts {
                    part.referenced_messages(out);
                }
            }
        }
    }
}

/// A named condition definition plus the DAG edge it introduces: `owner`
/// (the message or condition name it was defined under) depends on every
/// message the condition references.
pub struct ConditionGraph {
    edges: Vec<(String, Vec<(String, String)>)>,
}

impl ConditionGraph {
    pub fn new() -> Self {
        Self { edges: Vec::new() }
    }

    /// Register `owner`'s condition, recording the dependency edges it
    /// introduces. Call [`ConditionGraph::check_acyclic`] after all
    /// conditions for a catalog have been registered.
    pub fn register(&mut self, owner: impl Into<String>, condition: &Condition) {
        let mut refs = Vec::new();
        condition.referenced_messages(&mut refs);
        let refs = refs
            .into_iter()
            .map(|(c, n)| (c.to_string(), n.to_string()))
            .collect();
        self.edges.push((owner.into(), refs));
    }

    /// Reject the graph if any condition reference forms a cycle back to
    /// its own owner, directly or transitively (§9, "cyclic structures").
    pub fn check_acyclic(&self) -> Result<()> {
        for (owner, _) in &self.edges {
            let mut visited = HashSet::new();
            if self.reaches(owner, owner, &mut visited) {
                return Err(Error::InvalidField {
                    field: "condition".into(),
                    reason: format!("condition graph has a cycle through `{owner}`"),
                });
            }
        }
        Ok(())
    }

    fn reaches(&self, from: &str, target: &str, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(from.to_string()) {
            return false;
        }
        let Some((_, refs)) = self.edges.iter().find(|(owner, _)| owner == from) else {
            return false;
        };
        for (_, name) in refs {
            if name == target {
                return true;
            }
            if self.reaches(name, target, visited) {
                return true;
            }
        }
        false
    }
}

impl Default for ConditionGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(f64);
    impl ConditionResolver for FixedResolver {
        fn resolve(&self, _circuit: &str, _name: &str, _field: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn s8_condition_gating() {
        let condition = Condition::Simple(SimpleCondition::new("heating", "M1", "field", Comparison::Equal(5.0)));
        assert!(condition.evaluate(&FixedResolver(5.0)));
        assert!(!condition.evaluate(&FixedResolver(4.0)));
    }

    #[test]
    fn combined_condition_requires_all_parts() {
        let combined = Condition::Combined(CombinedCondition {
            parts: vec![
                Condition::Simple(SimpleCondition::new("c", "a", "f", Comparison::Equal(5.0))),
                Condition::Simple(SimpleCondition::new("c", "b", "f", Comparison::Greater(1.0))),
            ],
        });
        assert!(combined.evaluate(&FixedResolver(5.0)));
    }

    #[test]
    fn missing_reference_is_not_satisfied() {
        struct Empty;
        impl ConditionResolver for Empty {
            fn resolve(&self, _: &str, _: &str, _: &str) -> Option<f64> {
                None
            }
        }
        let condition = Condition::Simple(SimpleCondition::new("c", "a", "f", Comparison::Equal(5.0)));
        assert!(!condition.evaluate(&Empty));
    }

    #[test]
    fn direct_self_reference_is_rejected() {
        let mut graph = ConditionGraph::new();
        let condition = Condition::Simple(SimpleCondition::new("c", "m1", "f", Comparison::Equal(1.0)));
        graph.register("m1", &condition);
        assert!(graph.check_acyclic().is_err());
    }

    #[test]
    fn acyclic_chain_is_accepted() {
        let mut graph = ConditionGraph::new();
        graph.register(
            "m2",
            &Condition::Simple(SimpleCondition::new("c", "m1", "f", Comparison::Equal(1.0))),
        );
        graph.register(
            "m1",
            &Condition::Simple(SimpleCondition::new("c", "m0", "f", Comparison::Equal(1.0))),
        );
        assert!(graph.check_acyclic().is_ok());
    }

    #[test]
    fn indirect_cycle_is_rejected() {
        let mut graph = ConditionGraph::new();
        graph.register(
            "m2",
            &Condition::Simple(SimpleCondition::new("c", "m1", "f", Comparison::Equal(1.0))),
        );
        graph.register(
            "m1",
            &Condition::Simple(SimpleCondition::new("c", "m2", "f", Comparison::Equal(1.0))),
        );
        assert!(graph.check_acyclic().is_err());
    }
}
