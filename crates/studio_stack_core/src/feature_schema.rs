//! Static feature-schema input and its mapping onto Feature Store definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OFFLINE_STORE_PREFIX: &str = "feature-store";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown feature type '{value}', expected one of DOUBLE, BIGINT, STRING")]
    UnknownFeatureType { value: String },
    #[error("malformed feature schema: {0}")]
    Malformed(String),
    #[error("feature schema must declare at least one feature")]
    NoFeatures,
    #[error("feature '{name}' is declared more than once")]
    DuplicateFeature { name: String },
    #[error("{role} feature '{name}' is not declared in features")]
    MissingKeyFeature { role: &'static str, name: String },
    #[error("{role} feature '{name}' has type {feature_type}, which the feature store does not accept")]
    InvalidKeyFeatureType {
        role: &'static str,
        name: String,
        feature_type: FeatureType,
    },
    #[error("feature group name '{name}' is invalid: {reason}")]
    InvalidGroupName { name: String, reason: &'static str },
}

/// Type tag used by the schema input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum SchemaFeatureType {
    Double,
    Bigint,
    String,
}

impl SchemaFeatureType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Double => "DOUBLE",
            Self::Bigint => "BIGINT",
            Self::String => "STRING",
        }
    }

    pub fn feature_type(self) -> FeatureType {
        match self {
            Self::Double => FeatureType::Fractional,
            Self::Bigint => FeatureType::Integral,
            Self::String => FeatureType::String,
        }
    }
}

impl FromStr for SchemaFeatureType {
    type Err = SchemaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DOUBLE" => Ok(Self::Double),
            "BIGINT" => Ok(Self::Bigint),
            "STRING" => Ok(Self::String),
            other => Err(SchemaError::UnknownFeatureType {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for SchemaFeatureType {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaFeatureType> for String {
    fn from(value: SchemaFeatureType) -> Self {
        value.as_str().to_string()
    }
}

/// Type tag understood by the feature store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeatureType {
    Fractional,
    Integral,
    String,
}

impl FeatureType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fractional => "Fractional",
            Self::Integral => "Integral",
            Self::String => "String",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: SchemaFeatureType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSchema {
    pub event_time_feature_name: String,
    pub record_identifier_feature_name: String,
    #[serde(default)]
    pub description: String,
    pub features: Vec<FeatureSpec>,
}

#[derive(Debug, Deserialize)]
struct RawFeatureSpec {
    name: String,
    #[serde(rename = "type")]
    feature_type: String,
}

#[derive(Debug, Deserialize)]
struct RawFeatureSchema {
    event_time_feature_name: String,
    record_identifier_feature_name: String,
    #[serde(default)]
    description: String,
    features: Vec<RawFeatureSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureDefinition {
    pub feature_name: String,
    pub feature_type: FeatureType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureGroupSpec {
    pub feature_group_name: String,
    pub record_identifier_feature_name: String,
    pub event_time_feature_name: String,
    pub description: String,
    pub feature_definitions: Vec<FeatureDefinition>,
    pub offline_store_s3_uri: String,
    pub role_arn: String,
}

impl FeatureSchema {
    /// Parses and validates schema JSON. Type tags are checked before any
    /// structural validation so an unknown tag is reported as such.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let raw: RawFeatureSchema =
            serde_json::from_str(text).map_err(|error| SchemaError::Malformed(error.to_string()))?;
        let features = raw
            .features
            .into_iter()
            .map(|feature| {
                Ok(FeatureSpec {
                    name: feature.name,
                    feature_type: feature.feature_type.parse()?,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let schema = Self {
            event_time_feature_name: raw.event_time_feature_name,
            record_identifier_feature_name: raw.record_identifier_feature_name,
            description: raw.description,
            features,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.features.is_empty() {
            return Err(SchemaError::NoFeatures);
        }

        let mut seen = BTreeSet::new();
        for feature in &self.features {
            if !seen.insert(feature.name.as_str()) {
                return Err(SchemaError::DuplicateFeature {
                    name: feature.name.clone(),
                });
            }
        }

        let record_type =
            self.key_feature_type("record identifier", &self.record_identifier_feature_name)?;
        if record_type == FeatureType::Fractional {
            return Err(SchemaError::InvalidKeyFeatureType {
                role: "record identifier",
                name: self.record_identifier_feature_name.clone(),
                feature_type: record_type,
            });
        }

        let event_time_type = self.key_feature_type("event time", &self.event_time_feature_name)?;
        if event_time_type == FeatureType::Integral {
            return Err(SchemaError::InvalidKeyFeatureType {
                role: "event time",
                name: self.event_time_feature_name.clone(),
                feature_type: event_time_type,
            });
        }

        Ok(())
    }

    fn key_feature_type(
        &self,
        role: &'static str,
        name: &str,
    ) -> Result<FeatureType, SchemaError> {
        self.features
            .iter()
            .find(|feature| feature.name == name)
            .map(|feature| feature.feature_type.feature_type())
            .ok_or_else(|| SchemaError::MissingKeyFeature {
                role,
                name: name.to_string(),
            })
    }
}

/// Maps every declared feature in order; the mapping is total over the
/// closed schema type set, so no feature is ever dropped or defaulted.
pub fn feature_definitions(schema: &FeatureSchema) -> Vec<FeatureDefinition> {
    schema
        .features
        .iter()
        .map(|feature| FeatureDefinition {
            feature_name: feature.name.clone(),
            feature_type: feature.feature_type.feature_type(),
        })
        .collect()
}

pub fn offline_store_uri(bucket_name: &str, feature_group_name: &str) -> String {
    format!(
        "s3://{}/{OFFLINE_STORE_PREFIX}/{feature_group_name}",
        bucket_name.trim_matches('/')
    )
}

pub fn feature_group_spec(
    feature_group_name: &str,
    schema: &FeatureSchema,
    bucket_name: &str,
    role_arn: &str,
) -> Result<FeatureGroupSpec, SchemaError> {
    validate_group_name(feature_group_name)?;
    schema.validate()?;

    Ok(FeatureGroupSpec {
        feature_group_name: feature_group_name.to_string(),
        record_identifier_feature_name: schema.record_identifier_feature_name.clone(),
        event_time_feature_name: schema.event_time_feature_name.clone(),
        description: schema.description.clone(),
        feature_definitions: feature_definitions(schema),
        offline_store_s3_uri: offline_store_uri(bucket_name, feature_group_name),
        role_arn: role_arn.to_string(),
    })
}

fn validate_group_name(name: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidGroupName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() || name.len() > 64 {
        return Err(invalid("must be 1-64 characters"));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid("must start with a letter or digit"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid("may only contain letters, digits and hyphens"));
    }
    Ok(())
}
