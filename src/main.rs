// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use hsyncd::{
    agent::registry::{AgentRegistry, RegistryConfig},
    api::{
        mgmt::{mgmt_router, MgmtApiState},
        server::serve_tls,
        sync::{sync_router, SyncApiState},
        tls::{build_mgmt_server_config, build_sync_server_config, TlsMaterial},
    },
    combiner::{spawn_combiner, Combiner},
    config::{Cli, Config},
    constants::TOKIO_WORKER_THREADS,
    engine::{engine_channels, HsyncEngine},
    resolver::HickoryResolver,
    validator::PolicyValidator,
    zonestore::{MemoryZoneStore, ZoneStore},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("hsyncd-agent")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting hsyncd zone synchronization agent");
    debug!("Logging initialized with file and line number tracking");
}

async fn async_main() -> Result<()> {
    initialize_logging();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    info!(
        identity = %config.identity,
        active = config.active,
        beatinterval = config.beat_interval,
        locateinterval = config.locate_interval,
        helloretry = config.hello_retry,
        "Configuration loaded"
    );
    if !config.active {
        info!("Synchronization disabled by configuration (active: false), idling");
    }

    let tls_material = Arc::new(
        TlsMaterial::load(&config.cert_file, &config.key_file)
            .context("loading API TLS material")?,
    );

    // Process-wide singletons, created in dependency order and torn
    // down in reverse on shutdown.
    let validator = Arc::new(PolicyValidator::new(config.dnssec_policy));
    let resolver = Arc::new(HickoryResolver::new(
        config.resolver_servers.clone(),
        validator,
    ));
    let zonestore = Arc::new(MemoryZoneStore::new());
    let combiner = Arc::new(Combiner::new());
    let combiner_handle = spawn_combiner(Arc::clone(&combiner));

    let (handles, receivers) = engine_channels();
    zonestore.attach_engine(handles.sync_tx.clone());

    let registry = Arc::new(AgentRegistry::new(
        RegistryConfig {
            local_identity: config.identity.clone(),
            local_beat_interval: config.beat_interval,
            locate_interval: Duration::from_secs(config.locate_interval),
            hello_retry_interval: Duration::from_secs(config.hello_retry),
            dnssec_policy: config.dnssec_policy,
        },
        resolver,
        Arc::clone(&tls_material),
        handles.stop_tx.subscribe(),
    ));

    let zonestore_dyn: Arc<dyn ZoneStore> = Arc::clone(&zonestore) as Arc<dyn ZoneStore>;
    let engine = HsyncEngine::new(
        Arc::clone(&registry),
        Arc::clone(&combiner),
        combiner_handle,
        Arc::clone(&zonestore_dyn),
        Duration::from_secs(config.beat_interval),
        Duration::from_secs(config.hello_retry),
    );
    let engine_task = tokio::spawn(engine.run(receivers));

    // Peer-facing sync API, mutual TLS pinned to TLSA.
    let sync_state = SyncApiState {
        registry: Arc::clone(&registry),
        zonestore: Arc::clone(&zonestore_dyn),
        engine: handles.clone(),
    };
    let sync_config = Arc::new(build_sync_server_config(&tls_material)?);
    let sync_task = tokio::spawn(serve_tls(
        config.api_listen,
        sync_config,
        sync_router(sync_state),
        handles.stop_tx.subscribe(),
        "sync",
    ));

    // Operator-facing management API, shared-secret auth.
    let mgmt_state = MgmtApiState {
        registry: Arc::clone(&registry),
        combiner: Arc::clone(&combiner),
        zonestore: Arc::clone(&zonestore_dyn),
        engine: handles.clone(),
        api_key: Arc::new(config.mgmt_api_key.clone()),
        config_view: Arc::new(config.redacted_view()),
        started_at: Instant::now(),
    };
    let mgmt_config = Arc::new(build_mgmt_server_config(&tls_material)?);
    let mgmt_task = tokio::spawn(serve_tls(
        config.mgmt_listen,
        mgmt_config,
        mgmt_router(mgmt_state),
        handles.stop_tx.subscribe(),
        "mgmt",
    ));

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    // Teardown in reverse order: listeners and engine first (the stop
    // signal reaches every per-peer task through the registry), then
    // the combiner goes away when its handle senders drop.
    handles.stop();
    let _ = engine_task.await;
    for (name, task) in [("sync", sync_task), ("mgmt", mgmt_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(listener = name, error = %e, "Listener failed"),
            Err(e) => error!(listener = name, error = %e, "Listener task panicked"),
        }
    }

    info!("hsyncd stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
