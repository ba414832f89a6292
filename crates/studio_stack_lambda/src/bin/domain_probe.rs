use lambda_runtime::{service_fn, Error, LambdaEvent};
use studio_stack_core::contract::{CustomResourceEvent, CustomResourceResponse};
use studio_stack_lambda::adapters::run_blocking;
use studio_stack_lambda::adapters::studio::SageMakerStudio;
use studio_stack_lambda::handlers::probe::handle_probe_event;
use studio_stack_lambda::logging;

async fn handle_request(
    event: LambdaEvent<CustomResourceEvent>,
) -> Result<CustomResourceResponse, Error> {
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let studio = SageMakerStudio::new(&aws_config);

    run_blocking(|| handle_probe_event(&event.payload, &studio))
        .inspect_err(|error| tracing::error!(component = "domain_probe", %error, "probe failed"))
        .map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init();
    lambda_runtime::run(service_fn(handle_request)).await
}
