use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const ATTR_DOMAIN_ID: &str = "DomainId";
pub const ATTR_DOMAIN_NAME: &str = "DomainName";
pub const ATTR_DOMAIN_ORIGIN: &str = "DomainOrigin";
pub const ATTR_PORTFOLIO_ID: &str = "PortfolioId";
pub const ATTR_DELETED_APPS: &str = "DeletedApps";

pub const PROP_DOMAIN_ID: &str = "DomainId";
pub const PROP_DOMAIN_NAME: &str = "DomainName";
pub const PROP_DOMAIN_ORIGIN: &str = "DomainOrigin";
pub const PROP_VPC_ID: &str = "VpcId";
pub const PROP_SUBNET_IDS: &str = "SubnetIds";
pub const PROP_EXECUTION_ROLE_ARN: &str = "ExecutionRoleArn";
pub const PROP_USER_PROFILE_NAME: &str = "UserProfileName";
pub const PROP_APP_NAME: &str = "AppName";
pub const PROP_REMOVAL_POLICY: &str = "RemovalPolicy";

/// Property bag delivered by the resource graph engine.
pub type ResourceProperties = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    pub request_type: RequestType,
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub logical_resource_id: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: ResourceProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<ResourceProperties>,
}

impl CustomResourceEvent {
    /// Physical id assigned by an earlier Create, falling back to the request id
    /// when the engine never received one (failed Create followed by Delete).
    pub fn physical_id_or_request_id(&self) -> &str {
        self.physical_resource_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.request_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub physical_resource_id: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CustomResourceResponse {
    pub fn new(physical_resource_id: impl Into<String>) -> Self {
        Self {
            physical_resource_id: physical_resource_id.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn required_str<'a>(
    properties: &'a ResourceProperties,
    key: &str,
) -> Result<&'a str, ValidationError> {
    match optional_str(properties, key)? {
        Some(value) => Ok(value),
        None => Err(ValidationError::new(format!(
            "Property '{key}' is required"
        ))),
    }
}

/// Returns `None` for absent, null, or blank string properties.
pub fn optional_str<'a>(
    properties: &'a ResourceProperties,
    key: &str,
) -> Result<Option<&'a str>, ValidationError> {
    match properties.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            Ok((!trimmed.is_empty()).then_some(trimmed))
        }
        Some(_) => Err(ValidationError::new(format!(
            "Property '{key}' must be a string"
        ))),
    }
}

/// Accepts a JSON array of strings or a comma-separated string.
pub fn string_list(
    properties: &ResourceProperties,
    key: &str,
) -> Result<Vec<String>, ValidationError> {
    let values = match properties.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let Some(text) = item.as_str() else {
                    return Err(ValidationError::new(format!(
                        "Property '{key}' must contain only strings"
                    )));
                };
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    values.push(trimmed.to_string());
                }
            }
            values
        }
        Some(_) => {
            return Err(ValidationError::new(format!(
                "Property '{key}' must be a list of strings"
            )))
        }
    };
    Ok(values)
}

/// Deterministic physical id so that retargeting a resource forces replacement.
pub fn fingerprinted_physical_id(kind: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{kind}-{}", &digest[..16])
}
