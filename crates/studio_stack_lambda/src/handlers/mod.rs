//! Custom-resource handlers. Each one is a synchronous function over the
//! provider traits so it can be exercised with the fakes in `testing`.

pub mod domain;
pub mod probe;
pub mod teardown;

use std::time::Duration;

use studio_stack_core::contract::ValidationError;
use thiserror::Error;

use crate::adapters::error::ProviderError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid resource properties: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to {action} for '{target}': {source}")]
    Provider {
        action: &'static str,
        target: String,
        #[source]
        source: ProviderError,
    },

    #[error("domain '{domain_id}' did not become InService: {reason}")]
    DomainActivation { domain_id: String, reason: String },

    #[error(
        "apps under user profile '{user_profile}' in domain '{domain_id}' were not deleted within {waited:?}; remaining: {}; retry the stack deletion once they are gone",
        remaining.join(", ")
    )]
    TeardownIncomplete {
        domain_id: String,
        user_profile: String,
        waited: Duration,
        remaining: Vec<String>,
    },

    #[error("no portfolio from provider 'Amazon SageMaker' is shared with the account after enabling it for domain '{domain_id}'")]
    PortfolioMissing { domain_id: String },
}

impl HandlerError {
    /// Adapter for `map_err` that attaches the attempted action and target.
    pub fn provider(
        action: &'static str,
        target: impl Into<String>,
    ) -> impl FnOnce(ProviderError) -> Self {
        let target = target.into();
        move |source| Self::Provider {
            action,
            target,
            source,
        }
    }
}
