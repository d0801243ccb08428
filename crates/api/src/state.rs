use std::sync::Arc;

use musafir_domain::ports::gateway::PaymentGateway;
use musafir_infra::config::AppConfig;
use musafir_infra::gateway::{GatewayConfig, StripeGateway};
use musafir_infra::repositories::Repositories;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repos: Repositories,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let repos = Repositories::from_config(&config).await?;
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(StripeGateway::new(GatewayConfig::from_app_config(&config)));
        Ok(Self {
            config,
            repos,
            gateway,
        })
    }

    #[allow(dead_code)]
    pub fn with_parts(
        config: AppConfig,
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            config,
            repos,
            gateway,
        }
    }
}
