//! Deletes every app under a user profile before the profile is removed.
//!
//! Apps spawned by end users are not part of the resource graph, so the graph
//! engine cannot delete the profile while they exist. Each poll round re-lists
//! the profile's apps and re-issues deletes for anything still live.

use std::collections::BTreeSet;

use studio_stack_core::contract::{
    fingerprinted_physical_id, optional_str, required_str, CustomResourceEvent,
    CustomResourceResponse, RequestType, ResourceProperties, ValidationError, ATTR_DELETED_APPS,
    ATTR_DOMAIN_ID, PROP_APP_NAME, PROP_DOMAIN_ID, PROP_REMOVAL_POLICY, PROP_USER_PROFILE_NAME,
};
use studio_stack_core::poll::{poll_until, Clock, PollError, PollPolicy, PollStatus};
use studio_stack_core::stack::RemovalPolicy;
use tracing::{info, warn};

use crate::adapters::studio::{AppStatus, AppSummary, StudioApi};
use crate::handlers::HandlerError;

pub const ATTR_DECLARED_APP_DELETED: &str = "DeclaredAppDeleted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownTarget {
    pub domain_id: String,
    pub user_profile_name: String,
    pub declared_app: Option<String>,
    pub removal: RemovalPolicy,
}

impl TeardownTarget {
    pub fn from_properties(
        properties: &ResourceProperties,
        require_declared_app: bool,
    ) -> Result<Self, ValidationError> {
        let declared_app = if require_declared_app {
            Some(required_str(properties, PROP_APP_NAME)?.to_string())
        } else {
            optional_str(properties, PROP_APP_NAME)?.map(str::to_string)
        };
        Ok(Self {
            domain_id: required_str(properties, PROP_DOMAIN_ID)?.to_string(),
            user_profile_name: required_str(properties, PROP_USER_PROFILE_NAME)?.to_string(),
            declared_app,
            removal: match optional_str(properties, PROP_REMOVAL_POLICY)? {
                Some(value) => value.parse()?,
                None => RemovalPolicy::Destroy,
            },
        })
    }

    fn label(&self) -> String {
        format!("{}/{}", self.domain_id, self.user_profile_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// `{app_type}/{app_name}` of every app seen live and confirmed gone.
    pub deleted_apps: Vec<String>,
    pub declared_app_deleted: bool,
    pub rounds: u32,
}

fn app_key(app: &AppSummary) -> String {
    format!("{}/{}", app.app_type, app.app_name)
}

/// Deletes every app under the profile and waits until the provider reports
/// none left, or fails naming the apps still present when the budget ran out.
pub fn purge_user_apps(
    target: &TeardownTarget,
    studio: &dyn StudioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<TeardownReport, HandlerError> {
    let mut observed = BTreeSet::new();
    let mut remaining: Vec<String> = Vec::new();
    let mut rounds = 0u32;

    let result = poll_until(policy, clock, || -> Result<PollStatus<()>, HandlerError> {
        rounds += 1;
        let live: Vec<AppSummary> = list_profile_apps(target, studio)?
            .into_iter()
            .filter(|app| app.status != AppStatus::Deleted)
            .collect();

        remaining = live.iter().map(app_key).collect();
        if live.is_empty() {
            return Ok(PollStatus::Ready(()));
        }

        for app in &live {
            if observed.insert(app_key(app)) {
                info!(
                    component = "teardown",
                    domain_id = %target.domain_id,
                    user_profile = %target.user_profile_name,
                    app = %app_key(app),
                    status = app.status.as_str(),
                    "discovered app"
                );
            }
            if app.status.needs_delete() {
                delete_app(target, studio, app)?;
            }
        }

        Ok(PollStatus::Pending(format!(
            "{} app(s) remaining: {}",
            remaining.len(),
            remaining.join(", ")
        )))
    });

    match result {
        Ok(()) => {}
        Err(PollError::Check(error)) => return Err(error),
        Err(PollError::TimedOut { elapsed, .. }) => {
            return Err(HandlerError::TeardownIncomplete {
                domain_id: target.domain_id.clone(),
                user_profile: target.user_profile_name.clone(),
                waited: elapsed,
                remaining,
            })
        }
        Err(PollError::Terminal(reason)) => {
            return Err(HandlerError::TeardownIncomplete {
                domain_id: target.domain_id.clone(),
                user_profile: target.user_profile_name.clone(),
                waited: clock.elapsed(),
                remaining: vec![reason],
            })
        }
    }

    let declared_app_deleted = target.declared_app.as_deref().is_some_and(|declared| {
        observed
            .iter()
            .any(|key| key.rsplit_once('/').map(|(_, name)| name) == Some(declared))
    });
    let report = TeardownReport {
        deleted_apps: observed.into_iter().collect(),
        declared_app_deleted,
        rounds,
    };
    info!(
        component = "teardown",
        domain_id = %target.domain_id,
        user_profile = %target.user_profile_name,
        deleted = report.deleted_apps.len(),
        rounds = report.rounds,
        "all apps deleted"
    );
    Ok(report)
}

fn list_profile_apps(
    target: &TeardownTarget,
    studio: &dyn StudioApi,
) -> Result<Vec<AppSummary>, HandlerError> {
    match studio.list_apps(&target.domain_id, &target.user_profile_name) {
        Ok(apps) => Ok(apps),
        // Profile or domain already gone: nothing left to delete.
        Err(error) if error.is_not_found() => Ok(Vec::new()),
        Err(error) => Err(HandlerError::provider("list apps", target.label())(error)),
    }
}

fn delete_app(
    target: &TeardownTarget,
    studio: &dyn StudioApi,
    app: &AppSummary,
) -> Result<(), HandlerError> {
    match studio.delete_app(&target.domain_id, &target.user_profile_name, app) {
        Ok(()) => Ok(()),
        Err(error) if error.is_not_found() => {
            warn!(
                component = "teardown",
                app = %app_key(app),
                "app already deleted"
            );
            Ok(())
        }
        Err(error) => Err(HandlerError::provider(
            "delete app",
            format!("{}/{}", target.label(), app_key(app)),
        )(error)),
    }
}

pub fn handle_app_cleanup_event(
    event: &CustomResourceEvent,
    studio: &dyn StudioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    let target = TeardownTarget::from_properties(&event.resource_properties, true)?;
    let declared_app = target.declared_app.as_deref().unwrap_or_default();
    let physical_id = fingerprinted_physical_id(
        "app-cleanup",
        &[target.domain_id.as_str(), target.user_profile_name.as_str(), declared_app],
    );
    handle_cleanup(event, &target, physical_id, studio, clock, policy)
}

pub fn handle_user_cleanup_event(
    event: &CustomResourceEvent,
    studio: &dyn StudioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    let target = TeardownTarget::from_properties(&event.resource_properties, false)?;
    let physical_id = fingerprinted_physical_id(
        "user-cleanup",
        &[target.domain_id.as_str(), target.user_profile_name.as_str()],
    );
    handle_cleanup(event, &target, physical_id, studio, clock, policy)
}

fn handle_cleanup(
    event: &CustomResourceEvent,
    target: &TeardownTarget,
    physical_id: String,
    studio: &dyn StudioApi,
    clock: &dyn Clock,
    policy: &PollPolicy,
) -> Result<CustomResourceResponse, HandlerError> {
    if event.request_type != RequestType::Delete {
        return Ok(CustomResourceResponse::new(physical_id)
            .with_attribute(ATTR_DOMAIN_ID, target.domain_id.as_str()));
    }

    // A retargeted resource is deleted under its old physical id; keep it.
    let physical_id = event.physical_id_or_request_id().to_string();
    if target.removal == RemovalPolicy::Retain {
        info!(
            component = "teardown",
            domain_id = %target.domain_id,
            user_profile = %target.user_profile_name,
            "removal policy is retain, leaving apps in place"
        );
        return Ok(CustomResourceResponse::new(physical_id));
    }

    let report = purge_user_apps(target, studio, clock, policy)?;
    Ok(CustomResourceResponse::new(physical_id)
        .with_attribute(ATTR_DOMAIN_ID, target.domain_id.as_str())
        .with_attribute(ATTR_DELETED_APPS, report.deleted_apps.join(","))
        .with_attribute(
            ATTR_DECLARED_APP_DELETED,
            report.declared_app_deleted.to_string(),
        ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::adapters::error::ProviderError;
    use crate::testing::{custom_resource_event, FakeStudio, ManualClock, StudioCall};

    fn policy() -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
            Duration::from_secs(870),
        )
    }

    fn target() -> TeardownTarget {
        TeardownTarget {
            domain_id: "d-own".to_string(),
            user_profile_name: "alice".to_string(),
            declared_app: Some("default".to_string()),
            removal: RemovalPolicy::Destroy,
        }
    }

    fn delete_event(properties: serde_json::Value) -> CustomResourceEvent {
        let mut event = custom_resource_event(RequestType::Delete, properties);
        event.physical_resource_id = Some("app-cleanup-0123456789abcdef".to_string());
        event
    }

    #[test]
    fn deletes_declared_and_user_spawned_apps() {
        let studio = FakeStudio::new().with_app_deletion_rounds(2);
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");
        studio.spawn_app("d-own", "alice", "KernelGateway", "datascience-1");
        studio.spawn_app("d-own", "bob", "KernelGateway", "other-user");

        let report = purge_user_apps(&target(), &studio, &ManualClock::new(), &policy())
            .expect("teardown should finish");

        assert_eq!(
            report.deleted_apps,
            vec!["JupyterServer/default", "KernelGateway/datascience-1"]
        );
        assert!(report.declared_app_deleted);
        assert!(studio.live_apps("d-own", "alice").is_empty());
        assert_eq!(studio.live_apps("d-own", "bob").len(), 1);
    }

    #[test]
    fn empty_profile_finishes_in_one_round() {
        let studio = FakeStudio::new();
        let clock = ManualClock::new();

        let report =
            purge_user_apps(&target(), &studio, &clock, &policy()).expect("nothing to delete");

        assert_eq!(report.rounds, 1);
        assert!(report.deleted_apps.is_empty());
        assert!(!report.declared_app_deleted);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn catches_apps_spawned_during_teardown() {
        let studio = FakeStudio::new();
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");
        studio.spawn_app_after_listing(1, "d-own", "alice", "KernelGateway", "late-kernel");

        let report = purge_user_apps(&target(), &studio, &ManualClock::new(), &policy())
            .expect("teardown should finish");

        assert!(report
            .deleted_apps
            .contains(&"KernelGateway/late-kernel".to_string()));
        assert!(studio.live_apps("d-own", "alice").is_empty());
    }

    #[test]
    fn stuck_app_fails_loudly_naming_it() {
        let studio = FakeStudio::new();
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");
        studio.spawn_stuck_app("d-own", "alice", "KernelGateway", "wedged");
        let clock = ManualClock::new();

        let error = purge_user_apps(&target(), &studio, &clock, &policy())
            .expect_err("stuck app must not be a silent success");

        match error {
            HandlerError::TeardownIncomplete {
                remaining, waited, ..
            } => {
                assert_eq!(remaining, vec!["KernelGateway/wedged".to_string()]);
                assert_eq!(waited, Duration::from_secs(870));
            }
            other => panic!("expected incomplete teardown, got {other:?}"),
        }
    }

    #[test]
    fn missing_profile_counts_as_already_clean() {
        let studio = FakeStudio::new().failing(
            "ListApps",
            ProviderError::NotFound {
                operation: "ListApps",
                message: "User profile alice does not exist".to_string(),
            },
        );

        let report = purge_user_apps(&target(), &studio, &ManualClock::new(), &policy())
            .expect("missing profile is not an error");
        assert!(report.deleted_apps.is_empty());
    }

    #[test]
    fn delete_failures_name_the_app() {
        let studio = FakeStudio::new().failing(
            "DeleteApp",
            ProviderError::Sdk {
                operation: "DeleteApp",
                code: Some("AccessDeniedException".to_string()),
                message: "not authorized".to_string(),
            },
        );
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");

        let error = purge_user_apps(&target(), &studio, &ManualClock::new(), &policy())
            .expect_err("access denied must surface");
        assert!(error
            .to_string()
            .contains("'d-own/alice/JupyterServer/default'"));
    }

    #[test]
    fn app_cleanup_create_is_a_noop_with_stable_id() {
        let studio = FakeStudio::new();
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");
        let properties = json!({
            "DomainId": "d-own",
            "UserProfileName": "alice",
            "AppName": "default"
        });

        let first = handle_app_cleanup_event(
            &custom_resource_event(RequestType::Create, properties.clone()),
            &studio,
            &ManualClock::new(),
            &policy(),
        )
        .expect("create should succeed");
        let second = handle_app_cleanup_event(
            &custom_resource_event(RequestType::Update, properties),
            &studio,
            &ManualClock::new(),
            &policy(),
        )
        .expect("update should succeed");

        assert!(first.physical_resource_id.starts_with("app-cleanup-"));
        assert_eq!(first.physical_resource_id, second.physical_resource_id);
        assert!(studio.calls().is_empty());
    }

    #[test]
    fn app_cleanup_requires_declared_app_name() {
        let error = handle_app_cleanup_event(
            &custom_resource_event(
                RequestType::Delete,
                json!({"DomainId": "d-own", "UserProfileName": "alice"}),
            ),
            &FakeStudio::new(),
            &ManualClock::new(),
            &policy(),
        )
        .expect_err("app name is required");
        assert!(error.to_string().contains("AppName"));
    }

    #[test]
    fn app_cleanup_delete_reports_deleted_apps() {
        let studio = FakeStudio::new();
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");
        studio.spawn_app("d-own", "alice", "KernelGateway", "datascience-1");

        let response = handle_app_cleanup_event(
            &delete_event(json!({
                "DomainId": "d-own",
                "UserProfileName": "alice",
                "AppName": "default"
            })),
            &studio,
            &ManualClock::new(),
            &policy(),
        )
        .expect("delete should succeed");

        assert_eq!(response.physical_resource_id, "app-cleanup-0123456789abcdef");
        assert_eq!(
            response.attribute(ATTR_DELETED_APPS),
            Some("JupyterServer/default,KernelGateway/datascience-1")
        );
        assert_eq!(response.attribute(ATTR_DECLARED_APP_DELETED), Some("true"));
    }

    #[test]
    fn retain_policy_disables_cleanup() {
        let studio = FakeStudio::new();
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");

        handle_user_cleanup_event(
            &delete_event(json!({
                "DomainId": "d-own",
                "UserProfileName": "alice",
                "RemovalPolicy": "retain"
            })),
            &studio,
            &ManualClock::new(),
            &policy(),
        )
        .expect("retain should succeed");

        assert!(studio.calls().is_empty());
        assert_eq!(studio.live_apps("d-own", "alice").len(), 1);
    }

    #[test]
    fn user_cleanup_acts_only_on_delete() {
        let studio = FakeStudio::new();
        studio.spawn_app("d-own", "alice", "JupyterServer", "default");
        let properties = json!({"DomainId": "d-own", "UserProfileName": "alice"});

        handle_user_cleanup_event(
            &custom_resource_event(RequestType::Create, properties.clone()),
            &studio,
            &ManualClock::new(),
            &policy(),
        )
        .expect("create should succeed");
        assert!(studio.calls().is_empty());

        handle_user_cleanup_event(
            &delete_event(properties),
            &studio,
            &ManualClock::new(),
            &policy(),
        )
        .expect("delete should succeed");
        assert!(studio.calls().contains(&StudioCall::DeleteApp {
            domain_id: "d-own".to_string(),
            user_profile: "alice".to_string(),
            app_name: "default".to_string(),
        }));
        assert!(studio.live_apps("d-own", "alice").is_empty());
    }
}
