use aws_sdk_sagemaker::types::{AppType, AuthMode, RetentionPolicy, RetentionType, UserSettings};

use crate::adapters::block_on;
use crate::adapters::error::{from_sdk_error, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainStatus {
    InService,
    Pending,
    Updating,
    Deleting,
    Failed,
    UpdateFailed,
    DeleteFailed,
    Unknown(String),
}

impl DomainStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "InService" => Self::InService,
            "Pending" => Self::Pending,
            "Updating" => Self::Updating,
            "Deleting" => Self::Deleting,
            "Failed" => Self::Failed,
            "Update_Failed" => Self::UpdateFailed,
            "Delete_Failed" => Self::DeleteFailed,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InService => "InService",
            Self::Pending => "Pending",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
            Self::UpdateFailed => "Update_Failed",
            Self::DeleteFailed => "Delete_Failed",
            Self::Unknown(value) => value,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::UpdateFailed | Self::DeleteFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppStatus {
    InService,
    Pending,
    Deleting,
    Deleted,
    Failed,
    Unknown(String),
}

impl AppStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "InService" => Self::InService,
            "Pending" => Self::Pending,
            "Deleting" => Self::Deleting,
            "Deleted" => Self::Deleted,
            "Failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InService => "InService",
            Self::Pending => "Pending",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
            Self::Failed => "Failed",
            Self::Unknown(value) => value,
        }
    }

    /// Whether a delete request still has to be issued for an app in this state.
    pub fn needs_delete(&self) -> bool {
        !matches!(self, Self::Deleting | Self::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSummary {
    pub domain_id: String,
    pub domain_name: String,
    pub status: DomainStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescription {
    pub domain_id: String,
    pub status: DomainStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDomainRequest {
    pub domain_name: String,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub execution_role_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSummary {
    pub app_name: String,
    pub app_type: String,
    pub status: AppStatus,
}

/// SageMaker Studio operations the handlers depend on.
pub trait StudioApi {
    fn list_domains(&self) -> Result<Vec<DomainSummary>, ProviderError>;
    /// Returns the provider-assigned domain id.
    fn create_domain(&self, request: &CreateDomainRequest) -> Result<String, ProviderError>;
    fn describe_domain(&self, domain_id: &str) -> Result<DomainDescription, ProviderError>;
    fn update_default_execution_role(
        &self,
        domain_id: &str,
        execution_role_arn: &str,
    ) -> Result<(), ProviderError>;
    fn delete_domain(&self, domain_id: &str) -> Result<(), ProviderError>;
    fn list_apps(
        &self,
        domain_id: &str,
        user_profile_name: &str,
    ) -> Result<Vec<AppSummary>, ProviderError>;
    fn delete_app(
        &self,
        domain_id: &str,
        user_profile_name: &str,
        app: &AppSummary,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone)]
pub struct SageMakerStudio {
    client: aws_sdk_sagemaker::Client,
}

impl SageMakerStudio {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_sagemaker::Client::new(config),
        }
    }
}

impl StudioApi for SageMakerStudio {
    fn list_domains(&self) -> Result<Vec<DomainSummary>, ProviderError> {
        let client = self.client.clone();
        block_on(async move {
            let mut domains = Vec::new();
            let mut next_token = None;
            loop {
                let output = client
                    .list_domains()
                    .set_next_token(next_token)
                    .send()
                    .await
                    .map_err(|error| from_sdk_error("ListDomains", error))?;

                domains.extend(output.domains().iter().map(|domain| DomainSummary {
                    domain_id: domain.domain_id().unwrap_or_default().to_string(),
                    domain_name: domain.domain_name().unwrap_or_default().to_string(),
                    status: DomainStatus::parse(
                        domain.status().map(|status| status.as_str()).unwrap_or_default(),
                    ),
                }));

                next_token = output.next_token().map(str::to_string);
                if next_token.is_none() {
                    return Ok(domains);
                }
            }
        })
    }

    fn create_domain(&self, request: &CreateDomainRequest) -> Result<String, ProviderError> {
        let client = self.client.clone();
        let request = request.clone();
        block_on(async move {
            let output = client
                .create_domain()
                .domain_name(&request.domain_name)
                .auth_mode(AuthMode::Iam)
                .vpc_id(&request.vpc_id)
                .set_subnet_ids(Some(request.subnet_ids.clone()))
                .default_user_settings(
                    UserSettings::builder()
                        .execution_role(&request.execution_role_arn)
                        .build(),
                )
                .send()
                .await
                .map_err(|error| from_sdk_error("CreateDomain", error))?;

            output
                .domain_id()
                .map(str::to_string)
                .ok_or_else(|| ProviderError::Sdk {
                    operation: "CreateDomain",
                    code: None,
                    message: format!(
                        "response for domain '{}' did not include a domain id",
                        request.domain_name
                    ),
                })
        })
    }

    fn describe_domain(&self, domain_id: &str) -> Result<DomainDescription, ProviderError> {
        let client = self.client.clone();
        let domain_id = domain_id.to_string();
        block_on(async move {
            let output = client
                .describe_domain()
                .domain_id(&domain_id)
                .send()
                .await
                .map_err(|error| from_sdk_error("DescribeDomain", error))?;

            Ok(DomainDescription {
                status: DomainStatus::parse(
                    output.status().map(|status| status.as_str()).unwrap_or_default(),
                ),
                failure_reason: output.failure_reason().map(str::to_string),
                domain_id,
            })
        })
    }

    fn update_default_execution_role(
        &self,
        domain_id: &str,
        execution_role_arn: &str,
    ) -> Result<(), ProviderError> {
        let client = self.client.clone();
        let domain_id = domain_id.to_string();
        let execution_role_arn = execution_role_arn.to_string();
        block_on(async move {
            client
                .update_domain()
                .domain_id(domain_id)
                .default_user_settings(
                    UserSettings::builder()
                        .execution_role(execution_role_arn)
                        .build(),
                )
                .send()
                .await
                .map(|_| ())
                .map_err(|error| from_sdk_error("UpdateDomain", error))
        })
    }

    fn delete_domain(&self, domain_id: &str) -> Result<(), ProviderError> {
        let client = self.client.clone();
        let domain_id = domain_id.to_string();
        block_on(async move {
            client
                .delete_domain()
                .domain_id(domain_id)
                .retention_policy(
                    RetentionPolicy::builder()
                        .home_efs_file_system(RetentionType::Delete)
                        .build(),
                )
                .send()
                .await
                .map(|_| ())
                .map_err(|error| from_sdk_error("DeleteDomain", error))
        })
    }

    fn list_apps(
        &self,
        domain_id: &str,
        user_profile_name: &str,
    ) -> Result<Vec<AppSummary>, ProviderError> {
        let client = self.client.clone();
        let domain_id = domain_id.to_string();
        let user_profile_name = user_profile_name.to_string();
        block_on(async move {
            let mut apps = Vec::new();
            let mut next_token = None;
            loop {
                let output = client
                    .list_apps()
                    .domain_id_equals(&domain_id)
                    .user_profile_name_equals(&user_profile_name)
                    .set_next_token(next_token)
                    .send()
                    .await
                    .map_err(|error| from_sdk_error("ListApps", error))?;

                apps.extend(output.apps().iter().map(|app| AppSummary {
                    app_name: app.app_name().unwrap_or_default().to_string(),
                    app_type: app
                        .app_type()
                        .map(|app_type| app_type.as_str().to_string())
                        .unwrap_or_default(),
                    status: AppStatus::parse(
                        app.status().map(|status| status.as_str()).unwrap_or_default(),
                    ),
                }));

                next_token = output.next_token().map(str::to_string);
                if next_token.is_none() {
                    return Ok(apps);
                }
            }
        })
    }

    fn delete_app(
        &self,
        domain_id: &str,
        user_profile_name: &str,
        app: &AppSummary,
    ) -> Result<(), ProviderError> {
        let client = self.client.clone();
        let domain_id = domain_id.to_string();
        let user_profile_name = user_profile_name.to_string();
        let app = app.clone();
        block_on(async move {
            client
                .delete_app()
                .domain_id(domain_id)
                .user_profile_name(user_profile_name)
                .app_type(AppType::from(app.app_type.as_str()))
                .app_name(app.app_name)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| from_sdk_error("DeleteApp", error))
        })
    }
}
