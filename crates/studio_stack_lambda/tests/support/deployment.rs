#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use studio_stack_core::contract::{
    CustomResourceEvent, CustomResourceResponse, RequestType, ATTR_DOMAIN_ID, ATTR_DOMAIN_NAME,
};
use studio_stack_core::ownership::{plan_domain, DomainPlan, ProbeOutcome};
use studio_stack_core::poll::PollPolicy;
use studio_stack_core::stack::RemovalPolicy;
use studio_stack_lambda::handlers::domain::handle_domain_event;
use studio_stack_lambda::handlers::probe::handle_probe_event;
use studio_stack_lambda::testing::{
    custom_resource_event, FakePortfolios, FakeStudio, ManualClock,
};

pub const DOMAIN_NAME: &str = "dev-ml-platform";
pub const EXECUTION_ROLE: &str = "arn:aws:iam::123456789012:role/dev-studio-execution";
pub const USER_PROFILE: &str = "data-scientist";
pub const DECLARED_APP: &str = "default";

pub fn poll_policy() -> PollPolicy {
    PollPolicy::new(
        Duration::from_secs(5),
        Duration::from_secs(30),
        Duration::from_secs(870),
    )
}

/// Runs the probe resource the way the engine does before the domain resource.
pub fn probe(studio: &FakeStudio) -> ProbeOutcome {
    let response = handle_probe_event(
        &custom_resource_event(RequestType::Create, json!({})),
        studio,
    )
    .expect("probe should succeed");

    ProbeOutcome {
        domain_name: response
            .attribute(ATTR_DOMAIN_NAME)
            .unwrap_or_default()
            .to_string(),
        domain_id: response
            .attribute(ATTR_DOMAIN_ID)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Properties the stack passes to the domain resource for a given plan.
pub fn domain_properties(plan: &DomainPlan, removal: RemovalPolicy) -> Value {
    match plan {
        DomainPlan::Adopt(identity) => json!({
            "DomainOrigin": "Adopted",
            "DomainName": identity.domain_name,
            "DomainId": identity.domain_id,
            "RemovalPolicy": removal.as_str(),
        }),
        DomainPlan::Create { domain_name } => json!({
            "DomainOrigin": "Created",
            "DomainName": domain_name,
            "VpcId": "vpc-0abc",
            "SubnetIds": ["subnet-a", "subnet-b"],
            "ExecutionRoleArn": EXECUTION_ROLE,
            "RemovalPolicy": removal.as_str(),
        }),
    }
}

#[derive(Debug)]
pub struct DeployedDomain {
    pub plan: DomainPlan,
    pub properties: Value,
    pub response: CustomResourceResponse,
}

impl DeployedDomain {
    pub fn domain_id(&self) -> &str {
        self.response
            .attribute(ATTR_DOMAIN_ID)
            .expect("domain id attribute")
    }

    pub fn delete_event(&self) -> CustomResourceEvent {
        lifecycle_event(
            RequestType::Delete,
            self.properties.clone(),
            &self.response.physical_resource_id,
        )
    }
}

/// First deployment of a stack: probe, plan, then create the domain resource.
pub fn deploy_domain(
    studio: &FakeStudio,
    portfolios: &FakePortfolios,
    removal: RemovalPolicy,
) -> DeployedDomain {
    let plan = plan_domain(&probe(studio), DOMAIN_NAME, None);
    let properties = domain_properties(&plan, removal);
    let response = handle_domain_event(
        &custom_resource_event(RequestType::Create, properties.clone()),
        studio,
        portfolios,
        &ManualClock::new(),
        &poll_policy(),
    )
    .expect("domain create should succeed");

    DeployedDomain {
        plan,
        properties,
        response,
    }
}

/// Later deployment of the same stack: probe and plan again, knowing which
/// domain the previous deployment created, then update the domain resource.
pub fn redeploy_domain(
    studio: &FakeStudio,
    portfolios: &FakePortfolios,
    previous: &DeployedDomain,
    removal: RemovalPolicy,
) -> DeployedDomain {
    let owned = match previous.plan {
        DomainPlan::Create { .. } => Some(previous.domain_id()),
        DomainPlan::Adopt(_) => None,
    };
    let plan = plan_domain(&probe(studio), DOMAIN_NAME, owned);
    let properties = domain_properties(&plan, removal);
    let mut update = lifecycle_event(
        RequestType::Update,
        properties.clone(),
        &previous.response.physical_resource_id,
    );
    update.old_resource_properties = Some(previous.delete_event().resource_properties);
    let response = handle_domain_event(
        &update,
        studio,
        portfolios,
        &ManualClock::new(),
        &poll_policy(),
    )
    .expect("domain update should succeed");

    DeployedDomain {
        plan,
        properties,
        response,
    }
}

pub fn lifecycle_event(
    request_type: RequestType,
    properties: Value,
    physical_id: &str,
) -> CustomResourceEvent {
    let mut event = custom_resource_event(request_type, properties);
    event.physical_resource_id = Some(physical_id.to_string());
    event
}
