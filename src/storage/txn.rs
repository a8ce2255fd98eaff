//! Conditional multi-statement transactions
//!
//! A transaction first evaluates read-only bindings (existence lookups),
//! then applies every mutation whose condition holds over the binding
//! counts. There is no branching inside a transaction: callers enumerate
//! mutually exclusive variants up front and the store commits exactly the
//! ones that fire, atomically.

use crate::graph::{NodeId, NodeKind};
use std::collections::{BTreeMap, HashMap};

/// Node properties, stored as a JSON object.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Number of nodes each binding variable matched.
pub type BindingCounts = HashMap<String, usize>;

/// A read-only existence lookup evaluated at the start of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    RecipeByExternalId(String),
    FoodByStem(String),
    TagByStem(String),
}

impl Binding {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::RecipeByExternalId(_) => NodeKind::Recipe,
            Self::FoodByStem(_) => NodeKind::Food,
            Self::TagByStem(_) => NodeKind::Tag,
        }
    }
}

/// Expected cardinality of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    Absent,
    Present,
}

impl Presence {
    fn expected_len(self) -> usize {
        match self {
            Self::Absent => 0,
            Self::Present => 1,
        }
    }

    pub fn holds(self, len: usize) -> bool {
        len == self.expected_len()
    }
}

/// Conjunction of `eq(len(var), n)` clauses.
///
/// The empty condition always holds. A variable missing from the counts
/// is treated as matching nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Condition {
    clauses: Vec<(String, Presence)>,
}

impl Condition {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn when(var: impl Into<String>, presence: Presence) -> Self {
        Self::always().and(var, presence)
    }

    pub fn and(mut self, var: impl Into<String>, presence: Presence) -> Self {
        self.clauses.push((var.into(), presence));
        self
    }

    pub fn clauses(&self) -> &[(String, Presence)] {
        &self.clauses
    }

    pub fn evaluate(&self, counts: &BindingCounts) -> bool {
        self.clauses
            .iter()
            .all(|(var, presence)| presence.holds(counts.get(var).copied().unwrap_or(0)))
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.clauses.is_empty() {
            return Ok(());
        }
        f.write_str("@if(")?;
        for (i, (var, presence)) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "eq(len({}), {})", var, presence.expected_len())?;
        }
        f.write_str(")")
    }
}

/// Reference to a node from inside a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// The single node a binding variable matched: `uid(var)`
    Bound(String),
    /// A node created by this transaction: `_:name`
    Blank(String),
}

impl NodeRef {
    pub fn bound(var: impl Into<String>) -> Self {
        Self::Bound(var.into())
    }

    pub fn blank(name: impl Into<String>) -> Self {
        Self::Blank(name.into())
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bound(var) => write!(f, "uid({})", var),
            Self::Blank(name) => write!(f, "_:{}", name),
        }
    }
}

/// Content of a node to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub kind: NodeKind,
    pub external_id: Option<String>,
    pub stem: Option<String>,
    pub properties: Properties,
}

impl NodeData {
    pub fn new(kind: NodeKind, properties: Properties) -> Self {
        Self {
            kind,
            external_id: None,
            stem: None,
            properties,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = Some(stem.into());
        self
    }
}

/// A primitive graph write.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Create the blank node `_:blank`. Creating the same blank twice in one
    /// transaction yields a single node.
    CreateNode { blank: String, data: NodeData },
    /// Replace the properties of an existing node and bump its modification time.
    UpdateNode { target: NodeRef, properties: Properties },
    /// Add an edge; `position` orders owned children.
    Link {
        from: NodeRef,
        relationship: String,
        to: NodeRef,
        position: Option<usize>,
    },
    /// Delete every owned child reached from `anchor` over `relationship`,
    /// with the child's own edges. Shared nodes are refused.
    DetachOwned { anchor: NodeRef, relationship: String },
    /// Drop edges from `anchor` over `relationship`, leaving targets intact.
    Unlink { anchor: NodeRef, relationship: String },
    /// Delete a node and every edge touching it. Shared nodes are refused.
    DeleteNode { target: NodeRef },
}

impl Op {
    pub fn link(from: NodeRef, relationship: &str, to: NodeRef, position: Option<usize>) -> Self {
        Self::Link {
            from,
            relationship: relationship.to_string(),
            to,
            position,
        }
    }
}

/// A set of ops guarded by a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Short name for logs, e.g. `ingredient[0]:food-present`
    pub label: String,
    pub condition: Condition,
    pub ops: Vec<Op>,
}

impl Mutation {
    pub fn new(label: impl Into<String>, condition: Condition) -> Self {
        Self {
            label: label.into(),
            condition,
            ops: Vec::new(),
        }
    }

    pub fn with_op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }
}

/// Bindings plus candidate mutations, submitted as one unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transaction {
    bindings: Vec<(String, Binding)>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a binding. Rebinding an existing variable is ignored.
    pub fn bind(&mut self, var: impl Into<String>, binding: Binding) {
        let var = var.into();
        if !self.bindings.iter().any(|(v, _)| *v == var) {
            self.bindings.push((var, binding));
        }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn bindings(&self) -> &[(String, Binding)] {
        &self.bindings
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Mutations whose condition holds for the given counts, in order.
    pub fn fired<'a>(&'a self, counts: &'a BindingCounts) -> impl Iterator<Item = &'a Mutation> + 'a {
        self.mutations.iter().filter(move |m| m.condition.evaluate(counts))
    }
}

/// What a committed transaction did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxnOutcome {
    /// Blank name → identity of the node created for it
    pub created: BTreeMap<String, NodeId>,
    /// Labels of the mutations that fired
    pub fired: Vec<String>,
}

impl TxnOutcome {
    pub fn created_id(&self, blank: &str) -> Option<&NodeId> {
        self.created.get(blank)
    }

    pub fn is_noop(&self) -> bool {
        self.fired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> BindingCounts {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_condition_always_holds() {
        assert!(Condition::always().evaluate(&BindingCounts::new()));
        assert_eq!(Condition::always().to_string(), "");
    }

    #[test]
    fn condition_renders_as_conjunction() {
        let cond = Condition::when("r", Presence::Absent).and("f0", Presence::Present);
        assert_eq!(cond.to_string(), "@if(eq(len(r), 0) AND eq(len(f0), 1))");
    }

    #[test]
    fn unbound_variable_counts_as_absent() {
        let cond = Condition::when("t3", Presence::Absent);
        assert!(cond.evaluate(&BindingCounts::new()));
        assert!(!Condition::when("t3", Presence::Present).evaluate(&BindingCounts::new()));
    }

    #[test]
    fn present_means_exactly_one() {
        let cond = Condition::when("f0", Presence::Present);
        assert!(cond.evaluate(&counts(&[("f0", 1)])));
        assert!(!cond.evaluate(&counts(&[("f0", 2)])));
    }

    #[test]
    fn rebinding_is_ignored() {
        let mut txn = Transaction::new();
        txn.bind("f0", Binding::FoodByStem("pomodor".into()));
        txn.bind("f0", Binding::FoodByStem("basil".into()));
        assert_eq!(txn.bindings().len(), 1);
        assert_eq!(txn.bindings()[0].1, Binding::FoodByStem("pomodor".into()));
    }

    #[test]
    fn fired_filters_by_condition() {
        let mut txn = Transaction::new();
        txn.push(Mutation::new("a", Condition::when("r", Presence::Absent)));
        txn.push(Mutation::new("b", Condition::when("r", Presence::Present)));
        let c = counts(&[("r", 1)]);
        let fired: Vec<_> = txn.fired(&c).map(|m| m.label.as_str()).collect();
        assert_eq!(fired, vec!["b"]);
    }

    #[test]
    fn node_refs_render_like_query_variables() {
        assert_eq!(NodeRef::bound("r").to_string(), "uid(r)");
        assert_eq!(NodeRef::blank("recipe").to_string(), "_:recipe");
    }
}
