//! Create-or-adopt rules for the account/region singleton domain.
//!
//! The platform allows one Studio domain per account and region. A deployment
//! either adopts the domain it finds or creates its own, and only a domain it
//! created may ever be deleted by it. The choice is carried as an explicit
//! [`DomainOrigin`] tag through properties and attributes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::contract::ValidationError;
use crate::stack::RemovalPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DomainOrigin {
    Adopted,
    Created,
}

impl DomainOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adopted => "Adopted",
            Self::Created => "Created",
        }
    }
}

impl fmt::Display for DomainOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainOrigin {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "adopted" => Ok(Self::Adopted),
            "created" => Ok(Self::Created),
            other => Err(ValidationError::new(format!(
                "Unknown domain origin '{other}', expected 'Adopted' or 'Created'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainIdentity {
    pub domain_name: String,
    pub domain_id: String,
}

/// Result of listing domains before deciding to create one.
///
/// Both fields are empty strings when no domain exists, matching the
/// attribute shape the graph engine consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub domain_name: String,
    pub domain_id: String,
}

impl ProbeOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn found(identity: DomainIdentity) -> Self {
        Self {
            domain_name: identity.domain_name,
            domain_id: identity.domain_id,
        }
    }

    pub fn existing(&self) -> Option<DomainIdentity> {
        if self.domain_id.trim().is_empty() {
            return None;
        }
        Some(DomainIdentity {
            domain_name: self.domain_name.clone(),
            domain_id: self.domain_id.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPlan {
    Adopt(DomainIdentity),
    Create { domain_name: String },
}

impl DomainPlan {
    pub fn origin(&self) -> DomainOrigin {
        match self {
            Self::Adopt(_) => DomainOrigin::Adopted,
            Self::Create { .. } => DomainOrigin::Created,
        }
    }

    /// Removal policy the domain resource must carry. Adopted domains are
    /// shared with consumers outside this deployment and are always retained.
    pub fn effective_removal(&self, stack_removal: RemovalPolicy) -> RemovalPolicy {
        match self {
            Self::Adopt(_) => RemovalPolicy::Retain,
            Self::Create { .. } => stack_removal,
        }
    }

    pub fn deletes_on_teardown(&self, stack_removal: RemovalPolicy) -> bool {
        self.effective_removal(stack_removal) == RemovalPolicy::Destroy
    }
}

/// Chooses adopt or create from the probe result. `owned_domain_id` is the
/// domain a previous deployment of this stack created; finding it again keeps
/// the Create plan so the stack stays the owner.
pub fn plan_domain(
    probe: &ProbeOutcome,
    desired_name: &str,
    owned_domain_id: Option<&str>,
) -> DomainPlan {
    match probe.existing() {
        Some(identity) if owned_domain_id == Some(identity.domain_id.as_str()) => {
            DomainPlan::Create {
                domain_name: identity.domain_name,
            }
        }
        Some(identity) => DomainPlan::Adopt(identity),
        None => DomainPlan::Create {
            domain_name: desired_name.to_string(),
        },
    }
}
