#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use core::fmt;

/// Stable neuron identifier. Ids are dense: `0..neuron_count`, inputs first,
/// then hidden, then outputs.
pub type NeuronId = u32;

/// Neuron activation level.
pub type Activation = f32;

/// Functional role of a neuron.
///
/// `Input` and `Output` are fixed at construction. Neurons of the hidden pool
/// flip between `Hidden` and `Dynamic` under self-organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    Input,
    Hidden,
    Output,
    /// Hidden-pool neuron currently considered for reuse.
    Dynamic,
}

impl Role {
    /// Whether self-organization may change this role.
    pub fn is_reassignable(self) -> bool {
        matches!(self, Role::Hidden | Role::Dynamic)
    }

    /// Layer rank used to orient grown synapses (lower rank feeds higher rank).
    pub(crate) fn rank(self) -> u8 {
        match self {
            Role::Input => 0,
            Role::Hidden | Role::Dynamic => 1,
            Role::Output => 2,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Role::Input => 0,
            Role::Hidden => 1,
            Role::Output => 2,
            Role::Dynamic => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Role::Input),
            1 => Some(Role::Hidden),
            2 => Some(Role::Output),
            3 => Some(Role::Dynamic),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Input => "input",
            Role::Hidden => "hidden",
            Role::Output => "output",
            Role::Dynamic => "dynamic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neuron {
    pub id: NeuronId,
    pub role: Role,
    pub activation: Activation,

    // Slow running mean of |activation| (learning_rate EMA).
    pub activity: f32,

    // Consecutive steps spent below the quiet weight threshold.
    pub quiet_steps: u32,
}

impl Neuron {
    pub fn new(id: NeuronId, role: Role) -> Self {
        Self {
            id,
            role,
            activation: 0.0,
            activity: 0.0,
            quiet_steps: 0,
        }
    }
}

/// Persisted slice of a neuron: everything except transient activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NeuronRecord {
    pub id: NeuronId,
    pub role: Role,
    #[cfg_attr(feature = "serde", serde(default))]
    pub quiet_steps: u32,
}

impl From<&Neuron> for NeuronRecord {
    fn from(n: &Neuron) -> Self {
        Self {
            id: n.id,
            role: n.role,
            quiet_steps: n.quiet_steps,
        }
    }
}

/// Role a neuron is born with, given the layer sizes.
pub fn initial_role(id: NeuronId, input_size: usize, hidden_size: usize) -> Role {
    let id = id as usize;
    if id < input_size {
        Role::Input
    } else if id < input_size + hidden_size {
        Role::Hidden
    } else {
        Role::Output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_assigns_roles_in_order() {
        assert_eq!(initial_role(0, 2, 3), Role::Input);
        assert_eq!(initial_role(1, 2, 3), Role::Input);
        assert_eq!(initial_role(2, 2, 3), Role::Hidden);
        assert_eq!(initial_role(4, 2, 3), Role::Hidden);
        assert_eq!(initial_role(5, 2, 3), Role::Output);
    }

    #[test]
    fn role_codes_roundtrip() {
        for role in [Role::Input, Role::Hidden, Role::Output, Role::Dynamic] {
            assert_eq!(Role::from_u8(role.to_u8()), Some(role));
        }
        assert_eq!(Role::from_u8(9), None);
    }

    #[test]
    fn only_hidden_pool_is_reassignable() {
        assert!(!Role::Input.is_reassignable());
        assert!(!Role::Output.is_reassignable());
        assert!(Role::Hidden.is_reassignable());
        assert!(Role::Dynamic.is_reassignable());
    }
}
