//! Lambda adapters and custom-resource handlers for the Studio domain stack.
//!
//! Handlers are synchronous functions over the `StudioApi` and `PortfolioApi`
//! traits; the binaries under `src/bin` wire them to the AWS SDK clients and
//! the Lambda runtime. Pure rules (ownership, polling, stack ordering) live in
//! `studio_stack_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod logging;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
