//! Resource-graph planning for the ML-platform stack and its deployment stage.
//!
//! A [`StackPlan`] is the declared dependency graph the engine deploys. Creation
//! follows a deterministic topological order; deletion walks that order in
//! reverse and skips retained resources.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contract::ValidationError;
use crate::ownership::DomainPlan;
use crate::poll::TEARDOWN_CEILING;

pub const PROBE_INVOCATION_TIMEOUT: Duration = Duration::from_secs(3);
pub const DOMAIN_INVOCATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const TEARDOWN_INVOCATION_TIMEOUT: Duration = TEARDOWN_CEILING;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
}

impl RemovalPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Destroy => "destroy",
            Self::Retain => "retain",
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalPolicy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "destroy" => Ok(Self::Destroy),
            "retain" => Ok(Self::Retain),
            other => Err(ValidationError::new(format!(
                "Unknown removal policy '{other}', expected 'destroy' or 'retain'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Policy,
    Role,
    Stream,
    Layer,
    Waiter,
    DomainProbe,
    Domain,
    AdoptedDomain,
    UserProfile,
    App,
    AppCleanup,
    UserCleanup,
    FeatureGroup,
}

impl ResourceKind {
    /// Custom resources run a handler whose invocation is time bounded.
    pub fn invocation_timeout(self) -> Option<Duration> {
        match self {
            Self::DomainProbe => Some(PROBE_INVOCATION_TIMEOUT),
            Self::Domain => Some(DOMAIN_INVOCATION_TIMEOUT),
            Self::AppCleanup | Self::UserCleanup => Some(TEARDOWN_INVOCATION_TIMEOUT),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub removal: RemovalPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_timeout_secs: Option<u64>,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, kind: ResourceKind, removal: RemovalPolicy) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            removal,
            invocation_timeout_secs: kind.invocation_timeout().map(|timeout| timeout.as_secs()),
        }
    }

    pub fn after(mut self, ids: &[&str]) -> Self {
        self.depends_on
            .extend(ids.iter().map(|id| (*id).to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("resource '{id}' is declared twice in stack '{stack}'")]
    DuplicateResource { stack: String, id: String },
    #[error("resource '{id}' in stack '{stack}' depends on undeclared '{dependency}'")]
    UnknownDependency {
        stack: String,
        id: String,
        dependency: String,
    },
    #[error("dependency cycle in stack '{stack}' involving {}", remaining.join(", "))]
    Cycle { stack: String, remaining: Vec<String> },
    #[error("stack '{0}' is declared twice in the stage")]
    DuplicateStack(String),
    #[error("stack '{stack}' depends on undeclared stack '{dependency}'")]
    UnknownStack { stack: String, dependency: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackPlan {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub resources: Vec<ResourceNode>,
}

impl StackPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Adds a node; dependencies must already be declared.
    pub fn add(&mut self, node: ResourceNode) -> Result<(), StackError> {
        if self.get(&node.id).is_some() {
            return Err(StackError::DuplicateResource {
                stack: self.name.clone(),
                id: node.id,
            });
        }
        if let Some(dependency) = node
            .depends_on
            .iter()
            .find(|dependency| self.get(dependency).is_none())
        {
            return Err(StackError::UnknownDependency {
                stack: self.name.clone(),
                id: node.id.clone(),
                dependency: dependency.clone(),
            });
        }
        self.resources.push(node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.resources.iter().find(|node| node.id == id)
    }

    pub fn contains_kind(&self, kind: ResourceKind) -> bool {
        self.resources.iter().any(|node| node.kind == kind)
    }

    pub fn creation_order(&self) -> Result<Vec<&ResourceNode>, StackError> {
        let ids: Vec<&str> = self.resources.iter().map(|node| node.id.as_str()).collect();
        let edges: Vec<(&str, Vec<&str>)> = self
            .resources
            .iter()
            .map(|node| {
                (
                    node.id.as_str(),
                    node.depends_on.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let ordered = topological_order(&ids, &edges).map_err(|remaining| StackError::Cycle {
            stack: self.name.clone(),
            remaining,
        })?;
        Ok(ordered
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect())
    }

    /// Reverse creation order, restricted to resources the engine deletes.
    pub fn deletion_order(&self) -> Result<Vec<&ResourceNode>, StackError> {
        let mut order = self.creation_order()?;
        order.reverse();
        order.retain(|node| node.removal == RemovalPolicy::Destroy);
        Ok(order)
    }
}

/// Kahn's algorithm; ties resolve in declaration order. On a cycle, returns
/// the ids that could not be ordered.
fn topological_order<'a>(
    ids: &[&'a str],
    edges: &[(&'a str, Vec<&'a str>)],
) -> Result<Vec<&'a str>, Vec<String>> {
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = edges
        .iter()
        .map(|(id, deps)| (*id, deps.iter().copied().collect()))
        .collect();
    let mut ordered = Vec::with_capacity(ids.len());

    while ordered.len() < ids.len() {
        let Some(next) = ids
            .iter()
            .copied()
            .find(|id| pending.get(id).is_some_and(BTreeSet::is_empty))
        else {
            return Err(pending.keys().map(|id| (*id).to_string()).collect());
        };
        pending.remove(next);
        for deps in pending.values_mut() {
            deps.remove(next);
        }
        ordered.push(next);
    }

    Ok(ordered)
}

pub const DATA_BUCKET: &str = "DataBucket";
pub const DATA_ACCESS_POLICY: &str = "DataAccessPolicy";
pub const DOMAIN_EXECUTION_ROLE: &str = "DomainExecutionRole";
pub const USER_EXECUTION_ROLE: &str = "UserExecutionRole";
pub const FEATURE_STORE_ROLE: &str = "FeatureStoreRole";
pub const DOMAIN_PROBE: &str = "StudioDomainProbe";
pub const STUDIO_DOMAIN: &str = "StudioDomain";
pub const USER_PROFILE: &str = "StudioUserProfile";
pub const DECLARED_APP: &str = "StudioDefaultApp";
pub const APP_CLEANUP: &str = "StudioAppCleanup";
pub const USER_CLEANUP: &str = "StudioUserCleanup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlPlatformStackInput {
    pub prefix: String,
    pub removal: RemovalPolicy,
    pub domain: DomainPlan,
    pub feature_groups: Vec<String>,
}

pub fn ml_platform_stack(input: &MlPlatformStackInput) -> Result<StackPlan, StackError> {
    let removal = input.removal;
    let mut stack = StackPlan::new(format!("{}-ml-platform", input.prefix));

    stack.add(ResourceNode::new(DATA_BUCKET, ResourceKind::Bucket, removal))?;
    stack.add(
        ResourceNode::new(DATA_ACCESS_POLICY, ResourceKind::Policy, removal)
            .after(&[DATA_BUCKET]),
    )?;
    stack.add(ResourceNode::new(
        DOMAIN_EXECUTION_ROLE,
        ResourceKind::Role,
        removal,
    ))?;
    stack.add(
        ResourceNode::new(USER_EXECUTION_ROLE, ResourceKind::Role, removal)
            .after(&[DATA_ACCESS_POLICY]),
    )?;
    stack.add(
        ResourceNode::new(FEATURE_STORE_ROLE, ResourceKind::Role, removal)
            .after(&[DATA_ACCESS_POLICY]),
    )?;

    // The probe is read-only and has nothing to clean up.
    stack.add(ResourceNode::new(
        DOMAIN_PROBE,
        ResourceKind::DomainProbe,
        RemovalPolicy::Retain,
    ))?;

    let domain_kind = match input.domain {
        DomainPlan::Adopt(_) => ResourceKind::AdoptedDomain,
        DomainPlan::Create { .. } => ResourceKind::Domain,
    };
    stack.add(
        ResourceNode::new(
            STUDIO_DOMAIN,
            domain_kind,
            input.domain.effective_removal(removal),
        )
        .after(&[DOMAIN_PROBE, DOMAIN_EXECUTION_ROLE]),
    )?;

    stack.add(
        ResourceNode::new(USER_PROFILE, ResourceKind::UserProfile, removal)
            .after(&[STUDIO_DOMAIN, USER_EXECUTION_ROLE]),
    )?;
    stack.add(
        ResourceNode::new(DECLARED_APP, ResourceKind::App, removal).after(&[USER_PROFILE]),
    )?;

    // Cleanup handlers depend on the profile so the engine deletes them, and
    // therefore every app under the profile, before the profile itself.
    if removal == RemovalPolicy::Destroy {
        stack.add(
            ResourceNode::new(APP_CLEANUP, ResourceKind::AppCleanup, RemovalPolicy::Destroy)
                .after(&[USER_PROFILE]),
        )?;
        stack.add(
            ResourceNode::new(USER_CLEANUP, ResourceKind::UserCleanup, RemovalPolicy::Destroy)
                .after(&[USER_PROFILE, STUDIO_DOMAIN]),
        )?;
    }

    for group in &input.feature_groups {
        stack.add(
            ResourceNode::new(
                format!("FeatureGroup-{group}"),
                ResourceKind::FeatureGroup,
                removal,
            )
            .after(&[DATA_BUCKET, FEATURE_STORE_ROLE]),
        )?;
    }

    Ok(stack)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagePlan {
    pub prefix: String,
    pub stacks: Vec<StackPlan>,
}

impl StagePlan {
    pub fn stack(&self, name: &str) -> Option<&StackPlan> {
        self.stacks.iter().find(|stack| stack.name == name)
    }

    pub fn deployment_order(&self) -> Result<Vec<&StackPlan>, StackError> {
        let ids: Vec<&str> = self.stacks.iter().map(|stack| stack.name.as_str()).collect();
        let mut seen = BTreeSet::new();
        for id in &ids {
            if !seen.insert(*id) {
                return Err(StackError::DuplicateStack((*id).to_string()));
            }
        }

        let mut edges = Vec::with_capacity(self.stacks.len());
        for stack in &self.stacks {
            if let Some(dependency) = stack.depends_on.iter().find(|dep| !seen.contains(dep.as_str())) {
                return Err(StackError::UnknownStack {
                    stack: stack.name.clone(),
                    dependency: dependency.clone(),
                });
            }
            edges.push((
                stack.name.as_str(),
                stack.depends_on.iter().map(String::as_str).collect(),
            ));
        }

        let ordered = topological_order(&ids, &edges).map_err(|remaining| StackError::Cycle {
            stack: self.prefix.clone(),
            remaining,
        })?;
        Ok(ordered
            .into_iter()
            .filter_map(|name| self.stack(name))
            .collect())
    }
}

/// Composes ingestion, cleanup-waiter and ML-platform stacks. The ML-platform
/// stack consumes ingestion outputs through parameters, and the waiter keeps
/// it from deploying before the ingestion resources settle.
pub fn deployment_stage(ml_platform: &MlPlatformStackInput) -> Result<StagePlan, StackError> {
    let prefix = &ml_platform.prefix;
    let removal = ml_platform.removal;

    let mut ingestion = StackPlan::new(format!("{prefix}-ingestion"));
    ingestion.add(ResourceNode::new(DATA_BUCKET, ResourceKind::Bucket, removal))?;
    ingestion.add(
        ResourceNode::new("IngestionStream", ResourceKind::Stream, removal)
            .after(&[DATA_BUCKET]),
    )?;
    ingestion.add(ResourceNode::new(
        "SharedLayer",
        ResourceKind::Layer,
        removal,
    ))?;

    let mut waiter = StackPlan::new(format!("{prefix}-cleanup-waiter"));
    waiter.depends_on.push(ingestion.name.clone());
    waiter.add(ResourceNode::new(
        "CleanupWaiter",
        ResourceKind::Waiter,
        removal,
    ))?;

    let mut platform = ml_platform_stack(ml_platform)?;
    platform.depends_on = vec![ingestion.name.clone(), waiter.name.clone()];

    Ok(StagePlan {
        prefix: prefix.clone(),
        stacks: vec![ingestion, waiter, platform],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::{plan_domain, DomainIdentity, ProbeOutcome};

    fn input(removal: RemovalPolicy, domain: DomainPlan) -> MlPlatformStackInput {
        MlPlatformStackInput {
            prefix: "dev".to_string(),
            removal,
            domain,
            feature_groups: vec!["blocks".to_string()],
        }
    }

    fn created() -> DomainPlan {
        DomainPlan::Create {
            domain_name: "feature-studio".to_string(),
        }
    }

    fn adopted() -> DomainPlan {
        DomainPlan::Adopt(DomainIdentity {
            domain_name: "shared".to_string(),
            domain_id: "d-shared".to_string(),
        })
    }

    fn position(order: &[&ResourceNode], id: &str) -> usize {
        order
            .iter()
            .position(|node| node.id == id)
            .unwrap_or_else(|| panic!("{id} missing from order"))
    }

    #[test]
    fn creation_order_follows_declared_dependencies() {
        let stack = ml_platform_stack(&input(RemovalPolicy::Destroy, created()))
            .expect("stack should build");
        let order = stack.creation_order().expect("graph should be acyclic");

        assert!(position(&order, DATA_BUCKET) < position(&order, STUDIO_DOMAIN));
        assert!(position(&order, DOMAIN_PROBE) < position(&order, STUDIO_DOMAIN));
        assert!(position(&order, STUDIO_DOMAIN) < position(&order, USER_PROFILE));
        assert!(position(&order, USER_PROFILE) < position(&order, DECLARED_APP));
        assert!(position(&order, USER_PROFILE) < position(&order, APP_CLEANUP));
    }

    #[test]
    fn destroy_deletes_apps_before_profile_and_profile_before_domain() {
        let stack = ml_platform_stack(&input(RemovalPolicy::Destroy, created()))
            .expect("stack should build");
        let order = stack.deletion_order().expect("graph should be acyclic");

        assert!(position(&order, APP_CLEANUP) < position(&order, USER_PROFILE));
        assert!(position(&order, USER_CLEANUP) < position(&order, USER_PROFILE));
        assert!(position(&order, DECLARED_APP) < position(&order, USER_PROFILE));
        assert!(position(&order, USER_PROFILE) < position(&order, STUDIO_DOMAIN));
    }

    #[test]
    fn retain_policy_wires_no_cleanup_handlers() {
        let stack = ml_platform_stack(&input(RemovalPolicy::Retain, created()))
            .expect("stack should build");

        assert!(!stack.contains_kind(ResourceKind::AppCleanup));
        assert!(!stack.contains_kind(ResourceKind::UserCleanup));
        assert!(stack
            .deletion_order()
            .expect("graph should be acyclic")
            .is_empty());
    }

    #[test]
    fn adopted_domain_is_retained_even_when_stack_destroys() {
        let stack = ml_platform_stack(&input(RemovalPolicy::Destroy, adopted()))
            .expect("stack should build");
        let domain = stack.get(STUDIO_DOMAIN).expect("domain node should exist");

        assert_eq!(domain.kind, ResourceKind::AdoptedDomain);
        assert_eq!(domain.removal, RemovalPolicy::Retain);
        let order = stack.deletion_order().expect("graph should be acyclic");
        assert!(order.iter().all(|node| node.id != STUDIO_DOMAIN));
        assert!(order.iter().any(|node| node.id == USER_PROFILE));
    }

    #[test]
    fn redeployed_owner_keeps_domain_kind_and_its_removal_policy() {
        let found = ProbeOutcome::found(DomainIdentity {
            domain_name: "feature-studio".to_string(),
            domain_id: "d-owned".to_string(),
        });
        let plan = plan_domain(&found, "feature-studio", Some("d-owned"));
        let stack = ml_platform_stack(&input(RemovalPolicy::Retain, plan))
            .expect("stack should build");
        let domain = stack.get(STUDIO_DOMAIN).expect("domain node should exist");

        assert_eq!(domain.kind, ResourceKind::Domain);
        assert_eq!(domain.removal, RemovalPolicy::Retain);
        assert!(stack
            .deletion_order()
            .expect("graph should be acyclic")
            .is_empty());
    }

    #[test]
    fn custom_resources_carry_documented_invocation_bounds() {
        let stack = ml_platform_stack(&input(RemovalPolicy::Destroy, created()))
            .expect("stack should build");

        let timeout = |id: &str| stack.get(id).and_then(|node| node.invocation_timeout_secs);
        assert_eq!(timeout(DOMAIN_PROBE), Some(3));
        assert_eq!(timeout(STUDIO_DOMAIN), Some(600));
        assert_eq!(timeout(APP_CLEANUP), Some(900));
        assert_eq!(timeout(USER_CLEANUP), Some(900));
        assert_eq!(timeout(DATA_BUCKET), None);
    }

    #[test]
    fn rejects_duplicate_and_dangling_nodes() {
        let mut stack = StackPlan::new("dev-test");
        stack
            .add(ResourceNode::new("A", ResourceKind::Bucket, RemovalPolicy::Destroy))
            .expect("first node should add");

        let duplicate = stack.add(ResourceNode::new("A", ResourceKind::Bucket, RemovalPolicy::Destroy));
        assert!(matches!(duplicate, Err(StackError::DuplicateResource { .. })));

        let dangling = stack.add(
            ResourceNode::new("B", ResourceKind::Role, RemovalPolicy::Destroy).after(&["C"]),
        );
        assert!(matches!(
            dangling,
            Err(StackError::UnknownDependency { ref dependency, .. }) if dependency == "C"
        ));
    }

    #[test]
    fn reports_cycles() {
        let mut stack = StackPlan::new("dev-cycle");
        stack.resources.push(
            ResourceNode::new("A", ResourceKind::Bucket, RemovalPolicy::Destroy).after(&["B"]),
        );
        stack.resources.push(
            ResourceNode::new("B", ResourceKind::Bucket, RemovalPolicy::Destroy).after(&["A"]),
        );

        let error = stack.creation_order().expect_err("cycle should be reported");
        assert_eq!(
            error,
            StackError::Cycle {
                stack: "dev-cycle".to_string(),
                remaining: vec!["A".to_string(), "B".to_string()],
            }
        );
    }

    #[test]
    fn stage_deploys_ingestion_then_waiter_then_platform() {
        let stage = deployment_stage(&input(RemovalPolicy::Destroy, created()))
            .expect("stage should build");
        let names: Vec<&str> = stage
            .deployment_order()
            .expect("stage should order")
            .iter()
            .map(|stack| stack.name.as_str())
            .collect();

        assert_eq!(
            names,
            vec!["dev-ingestion", "dev-cleanup-waiter", "dev-ml-platform"]
        );
    }

    #[test]
    fn removal_policy_parses_engine_tags() {
        assert_eq!("DESTROY".parse::<RemovalPolicy>(), Ok(RemovalPolicy::Destroy));
        assert_eq!("retain".parse::<RemovalPolicy>(), Ok(RemovalPolicy::Retain));
        assert!("snapshot".parse::<RemovalPolicy>().is_err());
    }
}
