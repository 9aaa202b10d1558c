//! Role Capabilities
//!
//! Each pipeline role runs with its own named capability set instead of a
//! catch-all grant. Components check the set they were handed at their
//! boundary: the worker pool refuses to start without the worker set, object
//! access checks every read and write, and the operator endpoints check the
//! operator set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    ReadSource,
    WriteSource,
    ReadDestination,
    WriteDestination,
    ReadMetadata,
    WriteMetadata,
    ConsumeQueue,
    PublishQueue,
    AdmitQuarantine,
    ReadQuarantine,
    ReplayQuarantine,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    /// Leases messages, runs the processor, records outcomes.
    Worker,
    /// Accepts storage notifications and publishes them to queues.
    Notifier,
    /// Inspects state and drives the pipeline by hand: uploads, replays, forced reprocessing.
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Worker => "worker",
            Role::Notifier => "notifier",
            Role::Operator => "operator",
        };
        f.write_str(name)
    }
}

/// Everything the worker role needs, and nothing else.
pub const WORKER_CAPABILITIES: &[Capability] = &[
    Capability::ReadSource,
    Capability::ReadDestination,
    Capability::WriteDestination,
    Capability::ReadMetadata,
    Capability::WriteMetadata,
    Capability::ConsumeQueue,
    Capability::AdmitQuarantine,
];

pub const NOTIFIER_CAPABILITIES: &[Capability] = &[Capability::PublishQueue];

pub const OPERATOR_CAPABILITIES: &[Capability] = &[
    Capability::WriteSource,
    Capability::ReadMetadata,
    Capability::WriteMetadata,
    Capability::ReadQuarantine,
    Capability::ReplayQuarantine,
    Capability::PublishQueue,
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("role '{role}' lacks capability {missing:?}")]
pub struct CapabilityError {
    pub role: Role,
    pub missing: Capability,
}

/// The credentials one role runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    role: Role,
    granted: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// The standard grant for `role`.
    pub fn for_role(role: Role) -> Self {
        let granted = match role {
            Role::Worker => WORKER_CAPABILITIES,
            Role::Notifier => NOTIFIER_CAPABILITIES,
            Role::Operator => OPERATOR_CAPABILITIES,
        };
        Self::custom(role, granted.iter().copied())
    }

    /// An explicit grant, e.g. a narrowed set for a read-only deployment.
    pub fn custom(role: Role, granted: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            role,
            granted: granted.into_iter().collect(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), CapabilityError> {
        if self.allows(capability) {
            Ok(())
        } else {
            tracing::warn!("Denied {:?} to role '{}'", capability, self.role);
            Err(CapabilityError {
                role: self.role,
                missing: capability,
            })
        }
    }

    pub fn require_all(&self, capabilities: &[Capability]) -> Result<(), CapabilityError> {
        capabilities.iter().try_for_each(|cap| self.require(*cap))
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.granted.iter().copied()
    }
}
