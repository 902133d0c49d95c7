use crate::{
    acl::Acl,
    app::{AppState, build_router},
    auth::{AccessProvider, AclAccessProvider, AuthorizationGate},
    auth_plugin::HttpAccessProvider,
    config::{AuthBackend, Config},
    error::RegistryError,
    listing::ListingPipeline,
    observability,
    storage::Store,
};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::instrument;

/// Builds the application state. Embedding programs (and tests) may inject
/// their own capability-check provider; otherwise one is constructed from
/// the configured auth backend.
#[instrument(skip(config, provider), fields(injected_provider = provider.is_some()))]
pub async fn build_state(
    config: &Config,
    provider: Option<Arc<dyn AccessProvider>>,
) -> Result<AppState, RegistryError> {
    let store = Arc::new(Store::open(config).await?);

    let provider: Arc<dyn AccessProvider> = match provider {
        Some(provider) => provider,
        None => match config.auth_plugin.backend {
            AuthBackend::Local => {
                Arc::new(AclAccessProvider::new(Acl::new(config.acl_rules.clone())))
            }
            AuthBackend::Http => {
                let plugin_cfg = config.auth_plugin.http.as_ref().ok_or_else(|| {
                    RegistryError::http(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "auth backend http requires auth.http config",
                    )
                })?;
                Arc::new(HttpAccessProvider::new(plugin_cfg)?)
            }
        },
    };

    let pipeline = ListingPipeline::new(
        AuthorizationGate::new(provider),
        config.sort_packages,
        config.gravatar,
        config.url_prefix.clone(),
    );

    Ok(AppState {
        store,
        pipeline,
        web_enabled: config.web_enabled,
        web_login_enabled: config.web_login,
        url_prefix: config.url_prefix.clone(),
        trust_proxy: config.trust_proxy,
    })
}

pub async fn run(
    config: Config,
    provider: Option<Arc<dyn AccessProvider>>,
) -> Result<(), RegistryError> {
    let bind = config.bind;
    let data_dir = config.data_dir.display().to_string();
    let state = build_state(&config, provider).await?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!(
        bind = %bind,
        data_dir,
        web_enabled = config.web_enabled,
        web_title = config.web_title.as_str(),
        "listaccio listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|_| RegistryError::Internal)
}

pub async fn run_standalone(config: Config) -> Result<(), RegistryError> {
    let default_level = startup_log_level(&config).to_string();
    let tracing_settings = observability::init_from_env(&default_level);
    tracing::debug!(
        log_filter = tracing_settings.filter,
        log_format = tracing_settings.log_format.as_str(),
        "initialized tracing subscriber"
    );
    run(config, None).await
}

pub async fn run_from_env() -> Result<(), RegistryError> {
    let config = Config::from_env().map_err(|err| {
        RegistryError::http(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid runtime configuration: {err}"),
        )
    })?;
    run_standalone(config).await
}

fn startup_log_level(config: &Config) -> &str {
    config.log_level.as_str()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                let _ = sigterm.recv().await;
            }
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
