//! Gateway server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use vaas_adapter::{AdapterConfig, DataAdapter};
use vaas_analytics::AnalyticsSink;
use vaas_config::{load_settings, ConfigStore, RuntimeEnvironment, Settings};
use vaas_core::{mask_api_key, Tenant};
use vaas_pipeline::{
    HttpContentModerator, HttpIntentParser, HttpSpeechToText, HttpTextToSpeech, Orchestrator,
    PipelineDeps,
};
use vaas_policy::PolicyPlanner;
use vaas_server::{create_router, AppState};
use vaas_session::SessionManager;
use vaas_storage::{
    EventStore, InMemoryStore, InMemoryTtlStore, MessageStore, ScyllaClient, ScyllaConfig,
    ScyllaStore, TenantStore, TtlStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VAAS_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };
    settings.validate()?;

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "starting gateway"
    );

    let metrics_handle = init_metrics();
    tracing::info!("Prometheus metrics available at /metrics");

    // Domain definitions
    let config_store = Arc::new(ConfigStore::new(&settings.domains_dir));
    let loaded = config_store.load_all();
    tracing::info!(
        dir = %settings.domains_dir,
        domains = loaded,
        "domain configurations loaded"
    );

    // Shared TTL store backs sessions and rate-limit windows
    let kv: Arc<dyn TtlStore> = Arc::new(InMemoryTtlStore::new());

    // Durable stores: ScyllaDB when enabled, in-memory otherwise
    let (messages, tenants, events) = init_stores(&settings).await;
    bootstrap_tenant(tenants.clone()).await;

    let sessions = Arc::new(SessionManager::new(
        kv.clone(),
        Duration::from_secs(settings.session.ttl_secs),
    ));
    let policy = Arc::new(PolicyPlanner::new(
        kv.clone(),
        settings.policy.rate_limit_per_minute,
    ));
    let adapter = DataAdapter::new(AdapterConfig {
        max_retries: settings.adapter.max_retries,
        backoff_base: Duration::from_secs(settings.adapter.backoff_base_secs),
        backoff_cap: Duration::from_secs(settings.adapter.backoff_cap_secs),
        timeout: Duration::from_secs(settings.adapter.timeout_secs),
    })?;
    let analytics = AnalyticsSink::new(
        events,
        settings.analytics.enabled,
        settings.analytics.persist_events,
    );

    // Provider is selected once at startup from configuration
    let llm = vaas_llm::create_backend(&settings.llm)?;
    tracing::info!(
        provider = ?settings.llm.provider,
        model = %settings.llm.model,
        "language model backend initialized"
    );

    let retriever = match vaas_rag::QdrantRetriever::new(&settings.rag) {
        Ok(retriever) => {
            tracing::info!(endpoint = %settings.rag.qdrant_endpoint, "vector retriever initialized");
            Some(Arc::new(retriever) as Arc<dyn vaas_core::ContextRetriever>)
        }
        Err(e) => {
            tracing::warn!(error = %e, "vector retriever unavailable, retrieval disabled");
            None
        }
    };

    let caps = &settings.capabilities;
    let deps = PipelineDeps {
        config_store: config_store.clone(),
        sessions,
        policy,
        adapter,
        analytics,
        messages,
        kv,
        llm,
        moderator: Arc::new(HttpContentModerator::new(
            &caps.moderation_url,
            caps.moderation_threshold,
        )),
        nlu: Arc::new(HttpIntentParser::new(&caps.nlu_url)),
        retriever,
        asr: Some(Arc::new(HttpSpeechToText::new(&caps.asr_url))),
        tts: Some(Arc::new(HttpTextToSpeech::new(&caps.tts_url))),
        prompt_history_limit: settings.session.prompt_history_limit,
    };
    let orchestrator = Arc::new(Orchestrator::new(deps));

    let state = AppState::new(
        Arc::new(settings.clone()),
        orchestrator,
        config_store,
        tenants,
        metrics_handle,
    );
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vaas=info,tower_http=info".into());

    let fmt_layer = if settings.environment == RuntimeEnvironment::Production {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Connect the durable stores. A ScyllaDB failure falls back to
/// in-memory stores rather than refusing to start.
async fn init_stores(
    settings: &Settings,
) -> (
    Arc<dyn MessageStore>,
    Arc<dyn TenantStore>,
    Arc<dyn EventStore>,
) {
    if settings.persistence.enabled {
        let config = ScyllaConfig {
            hosts: settings.persistence.hosts.clone(),
            keyspace: settings.persistence.keyspace.clone(),
            replication_factor: settings.persistence.replication_factor,
        };
        match connect_scylla(config).await {
            Ok(store) => {
                tracing::info!(
                    hosts = ?settings.persistence.hosts,
                    keyspace = %settings.persistence.keyspace,
                    "ScyllaDB persistence initialized"
                );
                return (store.clone(), store.clone(), store);
            }
            Err(e) => {
                tracing::error!(error = %e, "ScyllaDB unavailable, falling back to in-memory stores");
            }
        }
    } else {
        tracing::info!("persistence disabled, using in-memory stores");
    }

    let store = Arc::new(InMemoryStore::new());
    (store.clone(), store.clone(), store)
}

async fn connect_scylla(
    config: ScyllaConfig,
) -> Result<Arc<ScyllaStore>, vaas_storage::PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;
    Ok(Arc::new(ScyllaStore::new(client)))
}

/// Create a tenant at startup when `VAAS_BOOTSTRAP_TENANT` names one.
/// The generated key is printed once so an operator can hand it out.
async fn bootstrap_tenant(tenants: Arc<dyn TenantStore>) {
    let name = match std::env::var("VAAS_BOOTSTRAP_TENANT") {
        Ok(name) if !name.trim().is_empty() => name,
        _ => return,
    };

    let tenant_id = uuid::Uuid::new_v4().to_string();
    let tenant = Tenant::new(&tenant_id, &name);
    let api_key = tenant.api_key.clone();

    match tenants.create_tenant(&tenant).await {
        Ok(()) => {
            tracing::info!(
                tenant_id = %tenant_id,
                name = %name,
                api_key = %mask_api_key(&api_key),
                "bootstrap tenant created"
            );
            // Printed to stdout, not the structured log
            println!("Bootstrap tenant '{}' api key: {}", name, api_key);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to create bootstrap tenant");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
