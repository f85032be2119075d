//! Structural trust boundaries between agents.
//!
//! Two agents may exchange messages when they are siblings, parent and child, or
//! both masters. Nothing else is consulted: the check is a pure function of the two
//! identities, so it can be evaluated against registry snapshots or unit-tested
//! directly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::{AgentId, AgentIdentity, AgentKind, AgentRegistry};

/// The rule that allowed a message, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Sibling,
    ParentToChild,
    ChildToParent,
    MasterToMaster,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Sibling => write!(f, "sibling"),
            Rule::ParentToChild => write!(f, "parent-to-child"),
            Rule::ChildToParent => write!(f, "child-to-parent"),
            Rule::MasterToMaster => write!(f, "master-to-master"),
        }
    }
}

/// Audit view of one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: AgentId,
    pub parent_id: Option<AgentId>,
    pub kind: AgentKind,
}

impl From<&AgentIdentity> for Party {
    fn from(identity: &AgentIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            parent_id: identity.parent_id.clone(),
            kind: identity.kind,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent_id {
            Some(parent) => write!(f, "{} (type={}, parent={})", self.id, self.kind, parent),
            None => write!(f, "{} (type={}, parent=none)", self.id, self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// A referenced id is absent from the registry (never existed or destroyed).
    AgentNotFound { missing: AgentId },
    /// Both agents exist but share no trusted relationship.
    NoRelationship,
    /// Broadcast from an agent without a parent.
    NoParent,
}

/// Why a message was refused, with both parties for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub reason: DenialReason,
    pub sender: Option<Party>,
    pub receiver: Option<Party>,
}

impl Denial {
    pub fn not_found(missing: &AgentId) -> Self {
        Self {
            reason: DenialReason::AgentNotFound {
                missing: missing.clone(),
            },
            sender: None,
            receiver: None,
        }
    }

    pub fn no_parent(sender: &AgentIdentity) -> Self {
        Self {
            reason: DenialReason::NoParent,
            sender: Some(sender.into()),
            receiver: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.reason, DenialReason::AgentNotFound { .. })
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reason, &self.sender, &self.receiver) {
            (DenialReason::AgentNotFound { missing }, _, _) => {
                write!(f, "agent not found: {}", missing)
            }
            (DenialReason::NoParent, Some(sender), _) => {
                write!(f, "{} has no parent to broadcast under", sender)
            }
            (_, Some(sender), Some(receiver)) => write!(
                f,
                "no trust relationship from {} to {}",
                sender, receiver
            ),
            _ => write!(f, "no trust relationship"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed(Rule),
    Denied(Denial),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed(_))
    }

    pub fn rule(&self) -> Option<Rule> {
        match self {
            Verdict::Allowed(rule) => Some(*rule),
            Verdict::Denied(_) => None,
        }
    }
}

/// Apply the trust rules to two identities. First match wins.
pub fn evaluate(sender: &AgentIdentity, receiver: &AgentIdentity) -> Verdict {
    if sender.parent_id.is_some() && sender.parent_id == receiver.parent_id {
        return Verdict::Allowed(Rule::Sibling);
    }
    if receiver.parent_id.as_ref() == Some(&sender.id) {
        return Verdict::Allowed(Rule::ParentToChild);
    }
    if sender.parent_id.as_ref() == Some(&receiver.id) {
        return Verdict::Allowed(Rule::ChildToParent);
    }
    if sender.is_master() && receiver.is_master() {
        return Verdict::Allowed(Rule::MasterToMaster);
    }
    Verdict::Denied(Denial {
        reason: DenialReason::NoRelationship,
        sender: Some(sender.into()),
        receiver: Some(receiver.into()),
    })
}

/// Answers "may A send to B" against the live registry.
#[derive(Clone)]
pub struct TrustValidator {
    registry: AgentRegistry,
}

impl TrustValidator {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }

    /// Check the trust rules for `sender` → `receiver`. No side effects.
    pub fn can_communicate(&self, sender: &AgentId, receiver: &AgentId) -> Verdict {
        let sender = match self.registry.descriptor(sender) {
            Some(identity) => identity,
            None => return Verdict::Denied(Denial::not_found(sender)),
        };
        let receiver = match self.registry.descriptor(receiver) {
            Some(identity) => identity,
            None => return Verdict::Denied(Denial::not_found(receiver)),
        };
        evaluate(&sender, &receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task_fn;

    struct Topology {
        validator: TrustValidator,
        registry: AgentRegistry,
        m1: AgentId,
        m2: AgentId,
        a: AgentId,
        b: AgentId,
        c: AgentId,
    }

    /// m1 owns a and b; m2 owns c.
    fn topology() -> Topology {
        let registry = AgentRegistry::default();
        let task = task_fn(|v| async move { Ok(v) });
        let m1 = registry.create_master("m1", []);
        let m2 = registry.create_master("m2", []);
        let a = registry.create_worker(m1.id(), "a", task.clone(), []).unwrap();
        let b = registry.create_worker(m1.id(), "b", task.clone(), []).unwrap();
        let c = registry.create_worker(m2.id(), "c", task, []).unwrap();
        Topology {
            validator: TrustValidator::new(registry.clone()),
            registry,
            m1: m1.id().clone(),
            m2: m2.id().clone(),
            a: a.id().clone(),
            b: b.id().clone(),
            c: c.id().clone(),
        }
    }

    #[test]
    fn test_sibling_rule_is_symmetric() {
        let t = topology();
        assert_eq!(t.validator.can_communicate(&t.a, &t.b).rule(), Some(Rule::Sibling));
        assert_eq!(t.validator.can_communicate(&t.b, &t.a).rule(), Some(Rule::Sibling));
    }

    #[test]
    fn test_parent_child_rules_swap_with_arguments() {
        let t = topology();
        assert_eq!(
            t.validator.can_communicate(&t.m1, &t.a).rule(),
            Some(Rule::ParentToChild)
        );
        assert_eq!(
            t.validator.can_communicate(&t.a, &t.m1).rule(),
            Some(Rule::ChildToParent)
        );
    }

    #[test]
    fn test_master_to_master_is_symmetric() {
        let t = topology();
        assert_eq!(
            t.validator.can_communicate(&t.m1, &t.m2).rule(),
            Some(Rule::MasterToMaster)
        );
        assert_eq!(
            t.validator.can_communicate(&t.m2, &t.m1).rule(),
            Some(Rule::MasterToMaster)
        );
    }

    #[test]
    fn test_unrelated_agents_denied_with_audit_detail() {
        let t = topology();
        for (from, to) in [(&t.a, &t.c), (&t.c, &t.a), (&t.m2, &t.a), (&t.a, &t.m2)] {
            match t.validator.can_communicate(from, to) {
                Verdict::Denied(denial) => {
                    assert_eq!(denial.reason, DenialReason::NoRelationship);
                    assert_eq!(&denial.sender.as_ref().unwrap().id, from);
                    assert_eq!(&denial.receiver.as_ref().unwrap().id, to);
                    let text = denial.to_string();
                    assert!(text.contains("type=worker") || text.contains("type=master"));
                }
                other => panic!("expected denial, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_agent_has_distinct_reason() {
        let t = topology();
        let ghost = AgentId::from("ghost");
        match t.validator.can_communicate(&ghost, &t.a) {
            Verdict::Denied(denial) => {
                assert!(denial.is_not_found());
                assert_eq!(denial.to_string(), "agent not found: ghost");
            }
            other => panic!("expected denial, got {:?}", other),
        }

        t.registry.destroy(&t.b);
        match t.validator.can_communicate(&t.a, &t.b) {
            Verdict::Denied(denial) => assert!(denial.is_not_found()),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let t = topology();
        let a = t.registry.descriptor(&t.a).unwrap();
        let c = t.registry.descriptor(&t.c).unwrap();
        assert_eq!(evaluate(&a, &c), evaluate(&a, &c));
        assert!(evaluate(&a, &a).is_allowed());
    }
}
