//! Bytebin server entry point: loads configuration, wires the storage
//! backends and durable index, and serves the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use bytebin::config::{self, Config, RoutingRule};
use bytebin::handlers;
use bytebin::housekeeper::Housekeeper;
use bytebin::index::ContentIndex;
use bytebin::storage::local::LocalStorage;
use bytebin::storage::s3::S3Storage;
use bytebin::storage::selector::{BackendSelector, Rule};
use bytebin::storage::StorageBackend;
use bytebin::AppState;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const LOCAL_BACKEND_ID: &str = "local";
const S3_BACKEND_ID: &str = "s3";

#[derive(Parser, Debug)]
#[command(name = "bytebind", about = "Content-addressed any-bytes storage service")]
struct Cli {
    /// Path to the TOML configuration file. Falls back to
    /// `BYTEBIN_CONFIG_BASE64` or the XDG config path if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    init_tracing(config.logging.json);

    let listen = config.listen;
    let state = build_state(config).await?;

    let housekeeper = Arc::new(Housekeeper::new(state.coordinator.clone(), state.config.housekeeper.clone()));
    housekeeper.spawn();
    state.log_sink.clone().spawn();

    let router = handlers::router(state);

    tracing::info!(%listen, "starting bytebin");
    axum::Server::bind(&listen)
        .serve(router.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let local: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(LOCAL_BACKEND_ID, config.storage.local.path.clone()));

    let mut backends: Vec<Arc<dyn StorageBackend>> = vec![local.clone()];
    let s3_backend: Option<Arc<dyn StorageBackend>> = if let Some(s3_config) = &config.storage.s3 {
        let mut loader = aws_config::from_env();
        if let Some(region) = &s3_config.region {
            loader = loader.region(aws_sdk_s3::Region::new(region.clone()));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &s3_config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(s3_config.path_style);

        let client = aws_sdk_s3::Client::from_conf(builder.build());
        let backend: Arc<dyn StorageBackend> = Arc::new(S3Storage::new(S3_BACKEND_ID, client, s3_config.bucket.clone()));
        backends.push(backend.clone());
        Some(backend)
    } else {
        None
    };

    let selector = build_selector(&config.storage.routing, &local, s3_backend.as_ref());

    let index = ContentIndex::connect(&config.database.url).await?;
    if index.is_empty().await? {
        tracing::info!("index is empty, rebuilding from backends");
        index.rebuild_from_backends(&backends).await?;
    }

    AppState::new(config, index, backends, selector).await
}

/// Builds the selector chain from configured routing rules, terminating in
/// the local backend (always present) as the default `Static` leaf.
fn build_selector(
    rules: &[RoutingRule],
    local: &Arc<dyn StorageBackend>,
    s3: Option<&Arc<dyn StorageBackend>>,
) -> BackendSelector {
    let resolve = |name: &str| -> Arc<dyn StorageBackend> {
        match name {
            LOCAL_BACKEND_ID => local.clone(),
            S3_BACKEND_ID => s3.cloned().unwrap_or_else(|| local.clone()),
            other => {
                tracing::warn!(backend = other, "unknown routing backend, falling back to local");
                local.clone()
            }
        }
    };

    let root = rules.iter().rev().fold(Rule::Static(local.clone()), |next, rule| match rule {
        RoutingRule::SizeGt { threshold_bytes, backend } => Rule::IfSizeGt {
            threshold_bytes: *threshold_bytes,
            backend: resolve(backend),
            next: Box::new(next),
        },
        RoutingRule::ExpiryGt { threshold_minutes, backend } => Rule::IfExpiryGt {
            threshold_minutes: *threshold_minutes,
            backend: resolve(backend),
            next: Box::new(next),
        },
    });

    BackendSelector::new(root)
}
