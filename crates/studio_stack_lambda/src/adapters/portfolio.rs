use aws_sdk_servicecatalog::types::PrincipalType;

use crate::adapters::block_on;
use crate::adapters::error::{from_sdk_error, ProviderError};

/// Provider name Service Catalog reports for the portfolio SageMaker shares.
pub const STUDIO_PORTFOLIO_PROVIDER: &str = "Amazon SageMaker";

/// Service Catalog steps that make Studio project templates available to the
/// domain's execution role.
pub trait PortfolioApi {
    fn enable_studio_portfolio(&self) -> Result<(), ProviderError>;
    fn find_studio_portfolio_id(&self) -> Result<Option<String>, ProviderError>;
    fn associate_principal(
        &self,
        portfolio_id: &str,
        principal_arn: &str,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ServiceCatalogPortfolios {
    sagemaker: aws_sdk_sagemaker::Client,
    servicecatalog: aws_sdk_servicecatalog::Client,
}

impl ServiceCatalogPortfolios {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            sagemaker: aws_sdk_sagemaker::Client::new(config),
            servicecatalog: aws_sdk_servicecatalog::Client::new(config),
        }
    }
}

impl PortfolioApi for ServiceCatalogPortfolios {
    fn enable_studio_portfolio(&self) -> Result<(), ProviderError> {
        let client = self.sagemaker.clone();
        block_on(async move {
            client
                .enable_sagemaker_servicecatalog_portfolio()
                .send()
                .await
                .map(|_| ())
                .map_err(|error| from_sdk_error("EnableSagemakerServicecatalogPortfolio", error))
        })
    }

    fn find_studio_portfolio_id(&self) -> Result<Option<String>, ProviderError> {
        let client = self.servicecatalog.clone();
        block_on(async move {
            let mut page_token = None;
            loop {
                let output = client
                    .list_accepted_portfolio_shares()
                    .set_page_token(page_token)
                    .send()
                    .await
                    .map_err(|error| from_sdk_error("ListAcceptedPortfolioShares", error))?;

                let found = output
                    .portfolio_details()
                    .iter()
                    .find(|detail| detail.provider_name() == Some(STUDIO_PORTFOLIO_PROVIDER))
                    .and_then(|detail| detail.id())
                    .map(str::to_string);
                if found.is_some() {
                    return Ok(found);
                }

                page_token = output.next_page_token().map(str::to_string);
                if page_token.is_none() {
                    return Ok(None);
                }
            }
        })
    }

    fn associate_principal(
        &self,
        portfolio_id: &str,
        principal_arn: &str,
    ) -> Result<(), ProviderError> {
        let client = self.servicecatalog.clone();
        let portfolio_id = portfolio_id.to_string();
        let principal_arn = principal_arn.to_string();
        block_on(async move {
            client
                .associate_principal_with_portfolio()
                .portfolio_id(portfolio_id)
                .principal_arn(principal_arn)
                .principal_type(PrincipalType::Iam)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| from_sdk_error("AssociatePrincipalWithPortfolio", error))
        })
    }
}
