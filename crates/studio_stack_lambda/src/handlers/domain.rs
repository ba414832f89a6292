//! Create/update/delete of the account's Studio domain.
//!
//! The physical id records who owns the domain and whether it may be deleted:
//! a created domain uses its provider id, or [`RETAINED_PHYSICAL_PREFIX`] plus
//! the id when it was created under a retain policy; an adopted one uses
//! [`ADOPTED_PHYSICAL_PREFIX`] plus the id. Update and Delete trust the
//! recorded values over the properties, so a domain this stack created stays
//! owned, and stays retained, even after a later probe finds it.

use studio_stack_core::contract::{
    optional_str, required_str, string_list, CustomResourceEvent, CustomResourceResponse,
    RequestType, ResourceProperties, ValidationError, ATTR_DOMAIN_ID, ATTR_DOMAIN_NAME,
    ATTR_DOMAIN_ORIGIN, ATTR_PORTFOLIO_ID, PROP_DOMAIN_ID, PROP_DOMAIN_NAME, PROP_DOMAIN_ORIGIN,
    PROP_EXECUTION_ROLE_ARN, PROP_REMOVAL_POLICY, PROP_SUBNET_IDS, PROP_VPC_ID,
};
use studio_stack_core::ownership::DomainOrigin;
use studio_stack_core::poll::{poll_until, Clock, PollError, PollPolicy, PollStatus};
use studio_stack_core::stack::RemovalPolicy;
use tracing::{info, warn};

use crate::adapters::error::ProviderError;
use crate::adapters::portfolio::PortfolioApi;
use crate::adapters::studio::{CreateDomainRequest, DomainStatus, StudioApi};
use crate::handlers::HandlerError;

pub const ADOPTED_PHYSICAL_PREFIX: &str = "adopted-";
pub const RETAINED_PHYSICAL_PREFIX: &str = "retained-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainProperties {
    pub origin: DomainOrigin,
    pub domain_name: String,
    pub domain_id: Option<String>,
    pub vpc_id: Option<String>,
    pub subnet_ids: Vec<String>,
    pub execution_role_arn: Option<String>,
    pub removal: RemovalPolicy,
}

impl DomainProperties {
    pub fn from_properties(properties: &ResourceProperties) -> Result<Self, ValidationError> {
        let origin: DomainOrigin = required_str(properties, PROP_DOMAIN_ORIGIN)?.parse()?;
        let removal = match optional_str(properties, PROP_REMOVAL_POLICY)? {
            Some(value) => value.parse()?,
            None => RemovalPolicy::Destroy,
        };
        let parsed = Self {
            origin,
            domain_name: optional_str(properties, PROP_DOMAIN_NAME)?
                .unwrap_or_default()
                .to_string(),
            domain_id: optional_str(properties, PROP_DOMAIN_ID)?.map(str::to_string),
            vpc_id: optional_str(properties, PROP_VPC_ID)?.map(str::to_string),
            subnet_ids: string_list(properties, PROP_SUBNET_IDS)?,
            execution_role_arn: optional_str(properties, PROP_EXECUTION_ROLE_ARN)?
                .map(str::to_string),
            removal,
        };

        match origin {
            DomainOrigin::Adopted if parsed.domain_id.is_none() => Err(ValidationError::new(
                format!("Property '{PROP_DOMAIN_ID}' is required for an adopted domain"),
            )),
            DomainOrigin::Created => {
                parsed.create_request()?;
                Ok(parsed)
            }
            DomainOrigin::Adopted => Ok(parsed),
        }
    }

    pub fn create_request(&self) -> Result<CreateDomainRequest, ValidationError> {
        let missing =
            |key: &str| ValidationError::new(format!("Property '{key}' is required to create a domain"));
        if self.domain_name.is_empty() {
            return Err(missing(PROP_DOMAIN_NAME));
        }
        if self.subnet_ids.is_empty() {
            return Err(missing(PROP_SUBNET_IDS));
        }
        Ok(CreateDomainRequest {
            domain_name: self.domain_name.clone(),
            vpc_id: self.vpc_id.clone().ok_or_else(|| missing(PROP_VPC_ID))?,
            subnet_ids: self.subnet_ids.clone(),
            execution_role_arn: self
                .execution_role_arn
                .clone()
                .ok_or_else(|| missing(PROP_EXECUTION_ROLE_ARN))?,
        })
    }

    /// Fields the provider cannot change in place.
    fn immutable_changes(&self, old: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.domain_name != old.domain_name {
            changed.push(PROP_DOMAIN_NAME);
        }
        if self.vpc_id != old.vpc_id {
            changed.push(PROP_VPC_ID);
        }
        if self.subnet_ids != old.subnet_ids {
            changed.push(PROP_SUBNET_IDS);
        }
        changed
    }
}

/// Ownership recorded in a physical id returned by this handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedDomain<'a> {
    pub origin: DomainOrigin,
    pub removal: RemovalPolicy,
    pub domain_id: &'a str,
}

pub fn recorded_domain(physical_resource_id: &str) -> RecordedDomain<'_> {
    if let Some(domain_id) = physical_resource_id.strip_prefix(ADOPTED_PHYSICAL_PREFIX) {
        return RecordedDomain {
            origin: DomainOrigin::Adopted,
            removal: RemovalPolicy::Retain,
            domain_id,
        };
    }
    match physical_resource_id.strip_prefix(RETAINED_PHYSICAL_PREFIX) {
        Some(domain_id) => RecordedDomain {
            origin: DomainOrigin::Created,
            removal: RemovalPolicy::Retain,
            domain_id,
        },
        None => RecordedDomain {
            origin: DomainOrigin::Created,
            removal: RemovalPolicy::Destroy,
            domain_id: physical_resource_id,
        },
    }
}

/// Physical id for a domain this stack created. Fixed at creation: an update
/// cannot change it without the engine deleting the old record.
pub fn created_physical_id(domain_id: &str, removal: RemovalPolicy) -> String {
    match removal {
        RemovalPolicy::Destroy => domain_id.to_string(),
        RemovalPolicy::Retain => format!("{RETAINED_PHYSICAL_PREFIX}{domain_id}"),
    }
}

pub fn handle_domain_event(
    event: &CustomResourceEvent,
    studio: &dyn StudioApi,
    portfolios: &dyn PortfolioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    let properties = DomainProperties::from_properties(&event.resource_properties)?;
    info!(
        component = "domain_lifecycle",
        request_type = event.request_type.as_str(),
        origin = %properties.origin,
        domain_name = %properties.domain_name,
        "handling domain event"
    );

    match event.request_type {
        RequestType::Create => create(&properties, studio, portfolios, clock, policy),
        RequestType::Update => update(event, &properties, studio, portfolios, clock, policy),
        RequestType::Delete => delete(event, &properties, studio),
    }
}

fn create(
    properties: &DomainProperties,
    studio: &dyn StudioApi,
    portfolios: &dyn PortfolioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    match properties.origin {
        DomainOrigin::Adopted => adopt(properties, portfolios),
        DomainOrigin::Created => create_domain(properties, studio, portfolios, clock, policy),
    }
}

fn adopt(
    properties: &DomainProperties,
    portfolios: &dyn PortfolioApi,
) -> Result<CustomResourceResponse, HandlerError> {
    let domain_id = properties.domain_id.clone().unwrap_or_default();
    let portfolio_id = portfolios
        .find_studio_portfolio_id()
        .map_err(HandlerError::provider("find studio portfolio", domain_id.as_str()))?
        .unwrap_or_default();

    info!(
        component = "domain_lifecycle",
        domain_id = %domain_id,
        portfolio_id = %portfolio_id,
        "adopted existing domain without changes"
    );
    Ok(domain_response(
        format!("{ADOPTED_PHYSICAL_PREFIX}{domain_id}"),
        &domain_id,
        &properties.domain_name,
        DomainOrigin::Adopted,
        &portfolio_id,
    ))
}

fn create_domain(
    properties: &DomainProperties,
    studio: &dyn StudioApi,
    portfolios: &dyn PortfolioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    let request = properties.create_request()?;
    let domain_id = studio
        .create_domain(&request)
        .map_err(HandlerError::provider("create domain", request.domain_name.as_str()))?;
    info!(
        component = "domain_lifecycle",
        domain_id = %domain_id,
        domain_name = %request.domain_name,
        "domain creation submitted"
    );

    wait_until_in_service(studio, clock, policy, &domain_id)?;
    let portfolio_id = share_portfolio(portfolios, &domain_id, &request.execution_role_arn)?;

    Ok(domain_response(
        created_physical_id(&domain_id, properties.removal),
        &domain_id,
        &request.domain_name,
        DomainOrigin::Created,
        &portfolio_id,
    ))
}

fn update(
    event: &CustomResourceEvent,
    properties: &DomainProperties,
    studio: &dyn StudioApi,
    portfolios: &dyn PortfolioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    let physical_id = event.physical_id_or_request_id();
    let recorded = recorded_domain(physical_id);
    let recorded_id = recorded.domain_id;

    match (recorded.origin, properties.origin) {
        // The adopted domain went away and this stack now owns a new one; the
        // changed physical id makes the engine retire the adopted record.
        (DomainOrigin::Adopted, DomainOrigin::Created) => {
            create_domain(properties, studio, portfolios, clock, policy)
        }
        (DomainOrigin::Adopted, DomainOrigin::Adopted) => adopt(properties, portfolios),
        (DomainOrigin::Created, DomainOrigin::Adopted) => {
            if properties.domain_id.as_deref() != Some(recorded_id) {
                return Err(ValidationError::new(format!(
                    "Domain '{recorded_id}' created by this stack still exists; cannot adopt '{}'",
                    properties.domain_id.as_deref().unwrap_or_default()
                ))
                .into());
            }
            // The probe found the domain this stack created; it stays owned.
            let portfolio_id = find_portfolio(portfolios, recorded_id)?;
            Ok(domain_response(
                physical_id.to_string(),
                recorded_id,
                &properties.domain_name,
                DomainOrigin::Created,
                &portfolio_id,
            ))
        }
        (DomainOrigin::Created, DomainOrigin::Created) => {
            update_created_domain(event, properties, recorded, studio, portfolios, clock, policy)
        }
    }
}

fn update_created_domain(
    event: &CustomResourceEvent,
    properties: &DomainProperties,
    recorded: RecordedDomain<'_>,
    studio: &dyn StudioApi,
    portfolios: &dyn PortfolioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    let domain_id = recorded.domain_id;
    if recorded.removal == RemovalPolicy::Retain && properties.removal == RemovalPolicy::Destroy {
        warn!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            "domain was created under retain and stays retained"
        );
    }
    let old = event
        .old_resource_properties
        .as_ref()
        .map(DomainProperties::from_properties)
        .transpose()?
        .filter(|old| old.origin == DomainOrigin::Created);

    if let Some(old) = &old {
        let changed = properties.immutable_changes(old);
        if !changed.is_empty() {
            return Err(ValidationError::new(format!(
                "Changing {} of domain '{domain_id}' requires replacing it, which is not supported in place",
                changed.join(", ")
            ))
            .into());
        }
    }

    let role = properties.create_request()?.execution_role_arn;
    let role_changed = old
        .as_ref()
        .map(|old| old.execution_role_arn.as_deref() != Some(role.as_str()))
        .unwrap_or(true);

    let portfolio_id = if role_changed {
        studio
            .update_default_execution_role(domain_id, &role)
            .map_err(HandlerError::provider("update domain execution role", domain_id))?;
        info!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            execution_role_arn = %role,
            "default execution role updated"
        );
        wait_until_in_service(studio, clock, policy, domain_id)?;
        share_portfolio(portfolios, domain_id, &role)?
    } else {
        info!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            "execution role unchanged, nothing to update"
        );
        find_portfolio(portfolios, domain_id)?
    };

    Ok(domain_response(
        event.physical_id_or_request_id().to_string(),
        domain_id,
        &properties.domain_name,
        DomainOrigin::Created,
        &portfolio_id,
    ))
}

fn delete(
    event: &CustomResourceEvent,
    properties: &DomainProperties,
    studio: &dyn StudioApi,
) -> Result<CustomResourceResponse, HandlerError> {
    let physical_id = event.physical_id_or_request_id().to_string();
    let response = CustomResourceResponse::new(physical_id.clone());

    // No physical id means the Create never produced a domain.
    if event
        .physical_resource_id
        .as_deref()
        .map_or(true, |value| value.trim().is_empty())
    {
        info!(component = "domain_lifecycle", "no domain was created, nothing to delete");
        return Ok(response);
    }

    let recorded = recorded_domain(&physical_id);
    let domain_id = recorded.domain_id;
    if recorded.origin == DomainOrigin::Adopted {
        info!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            "domain was adopted, leaving it in place"
        );
        return Ok(response);
    }
    if recorded.removal == RemovalPolicy::Retain || properties.removal == RemovalPolicy::Retain {
        info!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            "removal policy is retain, leaving domain in place"
        );
        return Ok(response);
    }

    match studio.delete_domain(domain_id) {
        Ok(()) => info!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            "domain deletion submitted"
        ),
        Err(error) if error.is_not_found() => warn!(
            component = "domain_lifecycle",
            domain_id = %domain_id,
            "domain already deleted"
        ),
        Err(error) => return Err(HandlerError::provider("delete domain", domain_id)(error)),
    }
    Ok(response)
}

fn wait_until_in_service(
    studio: &dyn StudioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
    domain_id: &str,
) -> Result<(), HandlerError> {
    let result = poll_until(policy, clock, || -> Result<PollStatus<()>, ProviderError> {
        let description = studio.describe_domain(domain_id)?;
        Ok(match description.status {
            DomainStatus::InService => PollStatus::Ready(()),
            status if status.is_failed() => PollStatus::Failed(format!(
                "{}: {}",
                status.as_str(),
                description
                    .failure_reason
                    .as_deref()
                    .unwrap_or("no failure reason reported")
            )),
            status => PollStatus::Pending(status.as_str().to_string()),
        })
    });

    match result {
        Ok(()) => {
            info!(
                component = "domain_lifecycle",
                domain_id = %domain_id,
                elapsed_secs = clock.elapsed().as_secs(),
                "domain is InService"
            );
            Ok(())
        }
        Err(PollError::Check(error)) => {
            Err(HandlerError::provider("describe domain", domain_id)(error))
        }
        Err(error @ (PollError::TimedOut { .. } | PollError::Terminal(_))) => {
            Err(HandlerError::DomainActivation {
                domain_id: domain_id.to_string(),
                reason: error.to_string(),
            })
        }
    }
}

fn share_portfolio(
    portfolios: &dyn PortfolioApi,
    domain_id: &str,
    execution_role_arn: &str,
) -> Result<String, HandlerError> {
    portfolios
        .enable_studio_portfolio()
        .map_err(HandlerError::provider("enable studio portfolio", domain_id))?;
    let portfolio_id = portfolios
        .find_studio_portfolio_id()
        .map_err(HandlerError::provider("find studio portfolio", domain_id))?
        .ok_or_else(|| HandlerError::PortfolioMissing {
            domain_id: domain_id.to_string(),
        })?;
    portfolios
        .associate_principal(&portfolio_id, execution_role_arn)
        .map_err(HandlerError::provider(
            "associate execution role with portfolio",
            portfolio_id.as_str(),
        ))?;

    info!(
        component = "domain_lifecycle",
        domain_id = %domain_id,
        portfolio_id = %portfolio_id,
        "execution role associated with studio portfolio"
    );
    Ok(portfolio_id)
}

fn find_portfolio(portfolios: &dyn PortfolioApi, domain_id: &str) -> Result<String, HandlerError> {
    Ok(portfolios
        .find_studio_portfolio_id()
        .map_err(HandlerError::provider("find studio portfolio", domain_id))?
        .unwrap_or_default())
}

fn domain_response(
    physical_id: String,
    domain_id: &str,
    domain_name: &str,
    origin: DomainOrigin,
    portfolio_id: &str,
) -> CustomResourceResponse {
    CustomResourceResponse::new(physical_id)
        .with_attribute(ATTR_DOMAIN_ID, domain_id)
        .with_attribute(ATTR_DOMAIN_NAME, domain_name)
        .with_attribute(ATTR_DOMAIN_ORIGIN, origin.as_str())
        .with_attribute(ATTR_PORTFOLIO_ID, portfolio_id)
}
