use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use studio_stack_core::contract::{CustomResourceEvent, CustomResourceResponse};
use studio_stack_core::poll::SystemClock;
use studio_stack_lambda::adapters::run_blocking;
use studio_stack_lambda::adapters::studio::SageMakerStudio;
use studio_stack_lambda::config::{remaining_invocation_time, HandlerConfig};
use studio_stack_lambda::handlers::teardown::handle_user_cleanup_event;
use studio_stack_lambda::logging;

async fn handle_request(
    event: LambdaEvent<CustomResourceEvent>,
) -> Result<CustomResourceResponse, Error> {
    let clock = SystemClock::start();
    let config = HandlerConfig::from_env()?;
    let policy =
        config.teardown_poll_policy(remaining_invocation_time(event.context.deadline, Utc::now()));

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let studio = SageMakerStudio::new(&aws_config);

    run_blocking(|| handle_user_cleanup_event(&event.payload, &studio, &clock, &policy))
        .inspect_err(|error| {
            tracing::error!(
                component = "user_cleanup",
                request_type = event.payload.request_type.as_str(),
                %error,
                "cleanup event failed"
            )
        })
        .map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init();
    lambda_runtime::run(service_fn(handle_request)).await
}
