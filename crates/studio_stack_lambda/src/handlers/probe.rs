use studio_stack_core::contract::{
    CustomResourceEvent, CustomResourceResponse, RequestType, ATTR_DOMAIN_ID, ATTR_DOMAIN_NAME,
};
use studio_stack_core::ownership::{DomainIdentity, ProbeOutcome};
use tracing::info;

use crate::adapters::studio::{DomainStatus, StudioApi};
use crate::handlers::HandlerError;

pub const PROBE_PHYSICAL_ID: &str = "studio-domain-probe";

/// Lists the account's domains and reports the first one that can still be
/// adopted. Domains already being deleted are skipped.
pub fn probe_existing_domain(studio: &dyn StudioApi) -> Result<ProbeOutcome, HandlerError> {
    let domains = studio
        .list_domains()
        .map_err(HandlerError::provider("list domains", "account"))?;

    let outcome = domains
        .into_iter()
        .find(|domain| domain.status != DomainStatus::Deleting && !domain.domain_id.is_empty())
        .map(|domain| {
            ProbeOutcome::found(DomainIdentity {
                domain_name: domain.domain_name,
                domain_id: domain.domain_id,
            })
        })
        .unwrap_or_else(ProbeOutcome::none);

    info!(
        component = "domain_probe",
        domain_id = %outcome.domain_id,
        domain_name = %outcome.domain_name,
        found = outcome.existing().is_some(),
        "probed for existing studio domain"
    );
    Ok(outcome)
}

pub fn handle_probe_event(
    event: &CustomResourceEvent,
    studio: &dyn StudioApi,
) -> Result<CustomResourceResponse, HandlerError> {
    if event.request_type == RequestType::Delete {
        return Ok(CustomResourceResponse::new(event.physical_id_or_request_id()));
    }

    let outcome = probe_existing_domain(studio)?;
    Ok(CustomResourceResponse::new(PROBE_PHYSICAL_ID)
        .with_attribute(ATTR_DOMAIN_NAME, outcome.domain_name)
        .with_attribute(ATTR_DOMAIN_ID, outcome.domain_id))
}
