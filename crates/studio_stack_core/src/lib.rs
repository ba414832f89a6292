//! Provider-agnostic primitives for the studio feature stack.
//!
//! This crate owns custom-resource contracts, domain ownership rules, feature
//! schema mapping, the poll-with-timeout primitive, and stack/stage planning.
//! It intentionally excludes AWS SDK and Lambda runtime concerns.

pub mod contract;
pub mod feature_schema;
pub mod ownership;
pub mod parameters;
pub mod poll;
pub mod stack;
