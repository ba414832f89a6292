//! In-memory fakes for the provider traits and the poll clock.
//!
//! The fakes model the provider behaviour the handlers rely on: domain
//! activation takes a few describe calls, app deletion takes a few listing
//! rounds, and only one live domain may exist per account.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use studio_stack_core::contract::{CustomResourceEvent, RequestType, ResourceProperties};
use studio_stack_core::poll::Clock;

use crate::adapters::error::ProviderError;
use crate::adapters::portfolio::PortfolioApi;
use crate::adapters::studio::{
    AppStatus, AppSummary, CreateDomainRequest, DomainDescription, DomainStatus, DomainSummary,
    StudioApi,
};

/// Builds a lifecycle event with the given properties object.
pub fn custom_resource_event(request_type: RequestType, properties: Value) -> CustomResourceEvent {
    let resource_properties: ResourceProperties = match properties {
        Value::Object(entries) => entries.into_iter().collect(),
        _ => ResourceProperties::new(),
    };
    CustomResourceEvent {
        request_type,
        stack_id: "arn:aws:cloudformation:eu-west-1:123456789012:stack/dev-ml-platform/1"
            .to_string(),
        request_id: format!("request-{}", request_type.as_str().to_ascii_lowercase()),
        logical_resource_id: "StudioResource".to_string(),
        resource_type: "Custom::StudioResource".to_string(),
        physical_resource_id: None,
        resource_properties,
        old_resource_properties: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioCall {
    ListDomains,
    CreateDomain(CreateDomainRequest),
    DescribeDomain(String),
    UpdateExecutionRole {
        domain_id: String,
        execution_role_arn: String,
    },
    DeleteDomain(String),
    ListApps {
        domain_id: String,
        user_profile: String,
    },
    DeleteApp {
        domain_id: String,
        user_profile: String,
        app_name: String,
    },
}

#[derive(Debug, Clone)]
struct FakeDomain {
    summary: DomainSummary,
    pending_describes: u32,
    failure_reason: Option<String>,
    execution_role_arn: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeApp {
    domain_id: String,
    user_profile: String,
    summary: AppSummary,
    /// Listing rounds left before a deleting app reports `Deleted`.
    rounds_until_deleted: Option<u32>,
    /// Stays `Deleting` forever once deleted.
    stuck: bool,
}

#[derive(Debug, Clone)]
struct ScheduledSpawn {
    after_list_calls: usize,
    app: FakeApp,
}

#[derive(Debug, Default)]
struct FakeStudioState {
    domains: Vec<FakeDomain>,
    apps: Vec<FakeApp>,
    scheduled_spawns: Vec<ScheduledSpawn>,
    calls: Vec<StudioCall>,
    failures: BTreeMap<&'static str, ProviderError>,
    created_domains: u32,
    activation_describes: u32,
    activation_failure: Option<String>,
    deletion_rounds: u32,
    list_app_calls: usize,
}

#[derive(Debug, Default)]
pub struct FakeStudio {
    state: Mutex<FakeStudioState>,
}

impl FakeStudio {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeStudioState {
                deletion_rounds: 1,
                ..FakeStudioState::default()
            }),
        }
    }

    pub fn with_domain(self, domain_id: &str, domain_name: &str, status: DomainStatus) -> Self {
        self.lock().domains.push(FakeDomain {
            summary: DomainSummary {
                domain_id: domain_id.to_string(),
                domain_name: domain_name.to_string(),
                status,
            },
            pending_describes: 0,
            failure_reason: None,
            execution_role_arn: None,
        });
        self
    }

    /// Newly created domains report `Pending` for this many describe calls.
    pub fn activating_after(self, describes: u32) -> Self {
        self.lock().activation_describes = describes;
        self
    }

    /// Newly created domains end in `Failed` with this reason.
    pub fn failing_activation(self, reason: &str) -> Self {
        self.lock().activation_failure = Some(reason.to_string());
        self
    }

    /// Deleted apps report `Deleted` after this many listing rounds.
    pub fn with_app_deletion_rounds(self, rounds: u32) -> Self {
        self.lock().deletion_rounds = rounds;
        self
    }

    /// Every call to `operation` fails with `error`.
    pub fn failing(self, operation: &'static str, error: ProviderError) -> Self {
        self.lock().failures.insert(operation, error);
        self
    }

    pub fn spawn_app(&self, domain_id: &str, user_profile: &str, app_type: &str, app_name: &str) {
        self.lock()
            .apps
            .push(fake_app(domain_id, user_profile, app_type, app_name, false));
    }

    /// An app whose deletion never completes.
    pub fn spawn_stuck_app(
        &self,
        domain_id: &str,
        user_profile: &str,
        app_type: &str,
        app_name: &str,
    ) {
        self.lock()
            .apps
            .push(fake_app(domain_id, user_profile, app_type, app_name, true));
    }

    /// Spawns an app once `list_apps` has been called `after_list_calls` times,
    /// as an end user would while teardown is running.
    pub fn spawn_app_after_listing(
        &self,
        after_list_calls: usize,
        domain_id: &str,
        user_profile: &str,
        app_type: &str,
        app_name: &str,
    ) {
        self.lock().scheduled_spawns.push(ScheduledSpawn {
            after_list_calls,
            app: fake_app(domain_id, user_profile, app_type, app_name, false),
        });
    }

    pub fn calls(&self) -> Vec<StudioCall> {
        self.lock().calls.clone()
    }

    pub fn create_domain_requests(&self) -> Vec<CreateDomainRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StudioCall::CreateDomain(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_domains(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StudioCall::DeleteDomain(domain_id) => Some(domain_id),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_app_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StudioCall::DeleteApp { app_name, .. } => Some(app_name),
                _ => None,
            })
            .collect()
    }

    /// Apps under the profile that have not reached `Deleted`.
    pub fn live_apps(&self, domain_id: &str, user_profile: &str) -> Vec<AppSummary> {
        self.lock()
            .apps
            .iter()
            .filter(|app| app.domain_id == domain_id && app.user_profile == user_profile)
            .filter(|app| app.summary.status != AppStatus::Deleted)
            .map(|app| app.summary.clone())
            .collect()
    }

    pub fn domain_status(&self, domain_id: &str) -> Option<DomainStatus> {
        self.lock()
            .domains
            .iter()
            .find(|domain| domain.summary.domain_id == domain_id)
            .map(|domain| domain.summary.status.clone())
    }

    pub fn execution_role(&self, domain_id: &str) -> Option<String> {
        self.lock()
            .domains
            .iter()
            .find(|domain| domain.summary.domain_id == domain_id)
            .and_then(|domain| domain.execution_role_arn.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeStudioState> {
        self.state.lock().expect("poisoned mutex")
    }
}

fn fake_app(
    domain_id: &str,
    user_profile: &str,
    app_type: &str,
    app_name: &str,
    stuck: bool,
) -> FakeApp {
    FakeApp {
        domain_id: domain_id.to_string(),
        user_profile: user_profile.to_string(),
        summary: AppSummary {
            app_name: app_name.to_string(),
            app_type: app_type.to_string(),
            status: AppStatus::InService,
        },
        rounds_until_deleted: None,
        stuck,
    }
}

impl FakeStudioState {
    fn record(&mut self, operation: &'static str, call: StudioCall) -> Result<(), ProviderError> {
        self.calls.push(call);
        match self.failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn domain_mut(
        &mut self,
        operation: &'static str,
        domain_id: &str,
    ) -> Result<&mut FakeDomain, ProviderError> {
        self.domains
            .iter_mut()
            .find(|domain| domain.summary.domain_id == domain_id)
            .ok_or_else(|| ProviderError::NotFound {
                operation,
                message: format!("Domain {domain_id} does not exist"),
            })
    }
}

impl StudioApi for FakeStudio {
    fn list_domains(&self) -> Result<Vec<DomainSummary>, ProviderError> {
        let mut state = self.lock();
        state.record("ListDomains", StudioCall::ListDomains)?;
        Ok(state
            .domains
            .iter()
            .map(|domain| domain.summary.clone())
            .collect())
    }

    fn create_domain(&self, request: &CreateDomainRequest) -> Result<String, ProviderError> {
        let mut state = self.lock();
        state.record("CreateDomain", StudioCall::CreateDomain(request.clone()))?;

        if state
            .domains
            .iter()
            .any(|domain| domain.summary.status != DomainStatus::Deleting)
        {
            return Err(ProviderError::Conflict {
                operation: "CreateDomain",
                code: "ResourceLimitExceeded".to_string(),
                message: "The account-level service limit 'Maximum number of domains' is 1"
                    .to_string(),
            });
        }

        state.created_domains += 1;
        let domain_id = format!("d-fake{:06}", state.created_domains);
        let pending_describes = state.activation_describes;
        let failure_reason = state.activation_failure.clone();
        state.domains.push(FakeDomain {
            summary: DomainSummary {
                domain_id: domain_id.clone(),
                domain_name: request.domain_name.clone(),
                status: DomainStatus::Pending,
            },
            pending_describes,
            failure_reason,
            execution_role_arn: Some(request.execution_role_arn.clone()),
        });
        Ok(domain_id)
    }

    fn describe_domain(&self, domain_id: &str) -> Result<DomainDescription, ProviderError> {
        let mut state = self.lock();
        state.record(
            "DescribeDomain",
            StudioCall::DescribeDomain(domain_id.to_string()),
        )?;
        let domain = state.domain_mut("DescribeDomain", domain_id)?;

        if matches!(
            domain.summary.status,
            DomainStatus::Pending | DomainStatus::Updating
        ) {
            if domain.pending_describes > 0 {
                domain.pending_describes -= 1;
            } else if domain.failure_reason.is_some() {
                domain.summary.status = DomainStatus::Failed;
            } else {
                domain.summary.status = DomainStatus::InService;
            }
        }

        Ok(DomainDescription {
            domain_id: domain_id.to_string(),
            status: domain.summary.status.clone(),
            failure_reason: domain.failure_reason.clone(),
        })
    }

    fn update_default_execution_role(
        &self,
        domain_id: &str,
        execution_role_arn: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.record(
            "UpdateDomain",
            StudioCall::UpdateExecutionRole {
                domain_id: domain_id.to_string(),
                execution_role_arn: execution_role_arn.to_string(),
            },
        )?;
        let domain = state.domain_mut("UpdateDomain", domain_id)?;
        domain.execution_role_arn = Some(execution_role_arn.to_string());
        domain.summary.status = DomainStatus::Updating;
        Ok(())
    }

    fn delete_domain(&self, domain_id: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.record("DeleteDomain", StudioCall::DeleteDomain(domain_id.to_string()))?;
        let domain = state.domain_mut("DeleteDomain", domain_id)?;
        domain.summary.status = DomainStatus::Deleting;
        Ok(())
    }

    fn list_apps(
        &self,
        domain_id: &str,
        user_profile_name: &str,
    ) -> Result<Vec<AppSummary>, ProviderError> {
        let mut state = self.lock();
        state.record(
            "ListApps",
            StudioCall::ListApps {
                domain_id: domain_id.to_string(),
                user_profile: user_profile_name.to_string(),
            },
        )?;

        for app in &mut state.apps {
            if app.summary.status != AppStatus::Deleting || app.stuck {
                continue;
            }
            match app.rounds_until_deleted {
                Some(0) | None => app.summary.status = AppStatus::Deleted,
                Some(rounds) => app.rounds_until_deleted = Some(rounds - 1),
            }
        }

        state.list_app_calls += 1;
        let list_app_calls = state.list_app_calls;
        let (due, waiting): (Vec<_>, Vec<_>) = state
            .scheduled_spawns
            .drain(..)
            .partition(|spawn| spawn.after_list_calls < list_app_calls);
        state.scheduled_spawns = waiting;
        state.apps.extend(due.into_iter().map(|spawn| spawn.app));

        Ok(state
            .apps
            .iter()
            .filter(|app| app.domain_id == domain_id && app.user_profile == user_profile_name)
            .map(|app| app.summary.clone())
            .collect())
    }

    fn delete_app(
        &self,
        domain_id: &str,
        user_profile_name: &str,
        app: &AppSummary,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.record(
            "DeleteApp",
            StudioCall::DeleteApp {
                domain_id: domain_id.to_string(),
                user_profile: user_profile_name.to_string(),
                app_name: app.app_name.clone(),
            },
        )?;

        let rounds = state.deletion_rounds;
        let target = state.apps.iter_mut().find(|candidate| {
            candidate.domain_id == domain_id
                && candidate.user_profile == user_profile_name
                && candidate.summary.app_name == app.app_name
                && candidate.summary.app_type == app.app_type
                && candidate.summary.status != AppStatus::Deleted
        });
        let Some(target) = target else {
            return Err(ProviderError::NotFound {
                operation: "DeleteApp",
                message: format!("App {} does not exist", app.app_name),
            });
        };

        target.summary.status = AppStatus::Deleting;
        target.rounds_until_deleted = Some(rounds.saturating_sub(1));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortfolioCall {
    Enable,
    FindStudioPortfolio,
    Associate {
        portfolio_id: String,
        principal_arn: String,
    },
}

#[derive(Debug, Default)]
struct FakePortfolioState {
    shared_portfolio_id: Option<String>,
    share_on_enable: Option<String>,
    calls: Vec<PortfolioCall>,
}

#[derive(Debug, Default)]
pub struct FakePortfolios {
    state: Mutex<FakePortfolioState>,
}

pub const FAKE_PORTFOLIO_ID: &str = "port-studio0001";

impl FakePortfolios {
    /// Enabling the SageMaker portfolio shares [`FAKE_PORTFOLIO_ID`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakePortfolioState {
                share_on_enable: Some(FAKE_PORTFOLIO_ID.to_string()),
                ..FakePortfolioState::default()
            }),
        }
    }

    pub fn already_shared(portfolio_id: &str) -> Self {
        Self {
            state: Mutex::new(FakePortfolioState {
                shared_portfolio_id: Some(portfolio_id.to_string()),
                share_on_enable: Some(portfolio_id.to_string()),
                calls: Vec::new(),
            }),
        }
    }

    /// Enabling succeeds but no portfolio is ever shared.
    pub fn without_share() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PortfolioCall> {
        self.lock().calls.clone()
    }

    pub fn associations(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PortfolioCall::Associate {
                    portfolio_id,
                    principal_arn,
                } => Some((portfolio_id, principal_arn)),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakePortfolioState> {
        self.state.lock().expect("poisoned mutex")
    }
}

impl PortfolioApi for FakePortfolios {
    fn enable_studio_portfolio(&self) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.push(PortfolioCall::Enable);
        if state.shared_portfolio_id.is_none() {
            state.shared_portfolio_id = state.share_on_enable.clone();
        }
        Ok(())
    }

    fn find_studio_portfolio_id(&self) -> Result<Option<String>, ProviderError> {
        let mut state = self.lock();
        state.calls.push(PortfolioCall::FindStudioPortfolio);
        Ok(state.shared_portfolio_id.clone())
    }

    fn associate_principal(
        &self,
        portfolio_id: &str,
        principal_arn: &str,
    ) -> Result<(), ProviderError> {
        self.lock().calls.push(PortfolioCall::Associate {
            portfolio_id: portfolio_id.to_string(),
            principal_arn: principal_arn.to_string(),
        });
        Ok(())
    }
}

/// Clock that advances only when slept on.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().expect("poisoned mutex") += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("poisoned mutex").clone()
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock().expect("poisoned mutex")
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.lock().expect("poisoned mutex").push(duration);
    }
}
