//! Cross-stack outputs published under a deployment prefix.
//!
//! Parameters are looked up by naming convention only; nothing guarantees the
//! producing stack ran first, so the consuming side validates presence and
//! ARN shape before using a value.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutput {
    DataBucketArn,
    StreamArn,
    SharedLayerArn,
}

impl UpstreamOutput {
    pub fn key(self) -> &'static str {
        match self {
            Self::DataBucketArn => "data-bucket-arn",
            Self::StreamArn => "stream-arn",
            Self::SharedLayerArn => "shared-layer-arn",
        }
    }

    fn expected_service(self) -> &'static str {
        match self {
            Self::DataBucketArn => "s3",
            Self::StreamArn => "kinesis",
            Self::SharedLayerArn => "lambda",
        }
    }
}

pub fn parameter_name(prefix: &str, output: UpstreamOutput) -> String {
    format!("/{}/ingestion/{}", prefix.trim_matches('/'), output.key())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("parameter '{name}' is not published; deploy the ingestion stack first")]
    Missing { name: String },
    #[error("parameter '{name}' holds '{value}', which is not a valid ARN: {reason}")]
    InvalidArn {
        name: String,
        value: String,
        reason: &'static str,
    },
    #[error("parameter '{name}' holds an ARN for service '{actual}', expected '{expected}'")]
    WrongService {
        name: String,
        expected: &'static str,
        actual: String,
    },
    #[error("parameter lookup for '{name}' failed: {message}")]
    Lookup { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl Arn {
    /// Resource segment with any `type:` / `type/` qualifier removed.
    pub fn resource_name(&self) -> &str {
        self.resource
            .rsplit_once(|c: char| c == '/' || c == ':')
            .map(|(_, name)| name)
            .unwrap_or(&self.resource)
    }
}

impl FromStr for Arn {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(6, ':');
        if parts.next() != Some("arn") {
            return Err("must start with 'arn:'");
        }
        let (Some(partition), Some(service), Some(region), Some(account_id), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err("must have six ':'-separated segments");
        };
        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err("partition, service and resource must be non-empty");
        }
        if !account_id.is_empty() && !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err("account id must be numeric");
        }

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl TryFrom<String> for Arn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|reason: &str| reason.to_string())
    }
}

impl From<Arn> for String {
    fn from(value: Arn) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

pub trait ParameterLookup {
    fn get_parameter(&self, name: &str) -> Result<Option<String>, String>;
}

impl ParameterLookup for BTreeMap<String, String> {
    fn get_parameter(&self, name: &str) -> Result<Option<String>, String> {
        Ok(self.get(name).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamOutputs {
    pub data_bucket_arn: Arn,
    pub stream_arn: Arn,
    pub shared_layer_arn: Arn,
}

impl UpstreamOutputs {
    pub fn data_bucket_name(&self) -> &str {
        self.data_bucket_arn.resource_name()
    }
}

pub fn resolve_upstream(
    prefix: &str,
    lookup: &impl ParameterLookup,
) -> Result<UpstreamOutputs, ParameterError> {
    Ok(UpstreamOutputs {
        data_bucket_arn: resolve_arn(prefix, UpstreamOutput::DataBucketArn, lookup)?,
        stream_arn: resolve_arn(prefix, UpstreamOutput::StreamArn, lookup)?,
        shared_layer_arn: resolve_arn(prefix, UpstreamOutput::SharedLayerArn, lookup)?,
    })
}

fn resolve_arn(
    prefix: &str,
    output: UpstreamOutput,
    lookup: &impl ParameterLookup,
) -> Result<Arn, ParameterError> {
    let name = parameter_name(prefix, output);
    let value = lookup
        .get_parameter(&name)
        .map_err(|message| ParameterError::Lookup {
            name: name.clone(),
            message,
        })?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ParameterError::Missing { name: name.clone() })?;

    let arn: Arn = value.parse().map_err(|reason| ParameterError::InvalidArn {
        name: name.clone(),
        value: value.clone(),
        reason,
    })?;

    let expected = output.expected_service();
    if arn.service != expected {
        return Err(ParameterError::WrongService {
            name,
            expected,
            actual: arn.service,
        });
    }
    Ok(arn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(prefix: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                parameter_name(prefix, UpstreamOutput::DataBucketArn),
                "arn:aws:s3:::dev-ml-data".to_string(),
            ),
            (
                parameter_name(prefix, UpstreamOutput::StreamArn),
                "arn:aws:kinesis:eu-west-1:123456789012:stream/dev-blocks".to_string(),
            ),
            (
                parameter_name(prefix, UpstreamOutput::SharedLayerArn),
                "arn:aws:lambda:eu-west-1:123456789012:layer:dev-shared:3".to_string(),
            ),
        ])
    }

    #[test]
    fn parameter_names_follow_prefix_convention() {
        assert_eq!(
            parameter_name("/dev/", UpstreamOutput::StreamArn),
            "/dev/ingestion/stream-arn"
        );
    }

    #[test]
    fn resolves_all_outputs_and_bucket_name() {
        let outputs = resolve_upstream("dev", &published("dev")).expect("outputs should resolve");
        assert_eq!(outputs.data_bucket_name(), "dev-ml-data");
        assert_eq!(outputs.stream_arn.resource_name(), "dev-blocks");
        assert_eq!(outputs.shared_layer_arn.service, "lambda");
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let mut parameters = published("dev");
        parameters.remove(&parameter_name("dev", UpstreamOutput::StreamArn));

        let error = resolve_upstream("dev", &parameters).expect_err("stream is missing");
        assert_eq!(
            error,
            ParameterError::Missing {
                name: "/dev/ingestion/stream-arn".to_string()
            }
        );
    }

    #[test]
    fn rejects_values_that_are_not_arns() {
        let mut parameters = published("dev");
        parameters.insert(
            parameter_name("dev", UpstreamOutput::DataBucketArn),
            "dev-ml-data".to_string(),
        );

        let error = resolve_upstream("dev", &parameters).expect_err("bare name is not an ARN");
        assert!(matches!(error, ParameterError::InvalidArn { .. }));
    }

    #[test]
    fn rejects_arns_for_the_wrong_service() {
        let mut parameters = published("dev");
        parameters.insert(
            parameter_name("dev", UpstreamOutput::StreamArn),
            "arn:aws:sqs:eu-west-1:123456789012:dev-blocks".to_string(),
        );

        let error = resolve_upstream("dev", &parameters).expect_err("sqs is not kinesis");
        assert!(matches!(
            error,
            ParameterError::WrongService { expected: "kinesis", .. }
        ));
    }

    #[test]
    fn arn_round_trips_through_display() {
        let text = "arn:aws:kinesis:eu-west-1:123456789012:stream/dev-blocks";
        let arn: Arn = text.parse().expect("arn should parse");
        assert_eq!(arn.to_string(), text);
    }
}
