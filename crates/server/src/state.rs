//! Application state
//!
//! Shared across all handlers. Everything heavy lives behind an `Arc`,
//! so the state clones per request for free.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use vaas_config::{ConfigStore, Settings};
use vaas_pipeline::Orchestrator;
use vaas_storage::TenantStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub config_store: Arc<ConfigStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        orchestrator: Arc<Orchestrator>,
        config_store: Arc<ConfigStore>,
        tenants: Arc<dyn TenantStore>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            settings,
            orchestrator,
            config_store,
            tenants,
            metrics,
        }
    }
}
