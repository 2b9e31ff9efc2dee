use std::{process, sync::Arc, time::Duration};

use serde::Serialize;
use sitecache::{
    cache::{CacheNamespace, EntryStats, VersionedCache},
    config::{self, Command, EntryArgs, MonitorArgs, Settings},
    connection::{ConnectOptions, ConnectionManager, ConnectionState, ConnectionStats},
    error::AppError,
    infra::{
        error::InfraError,
        shutdown::{or_shutdown, shutdown_signal},
        telemetry,
    },
    store::{KvStore, SchemeConnector, SharedStore, redact_url},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const MONITOR_PROBE_KEY: &str = "sitecache:monitor:probe";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let command = cli_args.command.unwrap_or(Command::Status);
    if let Command::Versions = command {
        return print_versions();
    }

    let manager = ConnectionManager::new(
        settings.store.manager_config(),
        Arc::new(SchemeConnector::new()),
    );

    let work = run_command(&manager, &settings, command);
    let result = match or_shutdown(work, shutdown_signal()).await {
        Ok(Some(result)) => result,
        Ok(None) => {
            info!("stopping on shutdown signal");
            Ok(())
        }
        Err(err) => Err(AppError::from(err)),
    };

    manager.shutdown().await;
    result
}

async fn run_command(
    manager: &ConnectionManager,
    settings: &Settings,
    command: Command,
) -> Result<(), AppError> {
    match command {
        Command::Status => run_status(manager, settings).await,
        Command::Inspect(args) => run_inspect(manager, settings, args).await,
        Command::Purge(args) => run_purge(manager, settings, args).await,
        Command::Monitor(args) => run_monitor(manager, settings, args).await,
        Command::Versions => print_versions(),
    }
}

#[derive(Serialize)]
struct StatusReport {
    name: String,
    url: Option<String>,
    mode: String,
    state: ConnectionState,
    stats: Option<ConnectionStats>,
}

#[derive(Serialize)]
struct EntryReport {
    namespace: &'static str,
    key: String,
    versioned_key: String,
    #[serde(flatten)]
    stats: EntryStats,
}

#[derive(Serialize)]
struct PurgeReport {
    namespace: &'static str,
    key: String,
    deleted: u64,
}

fn print_versions() -> Result<(), AppError> {
    println!("{:<18} {:>7} {:>9}  DESCRIPTION", "NAMESPACE", "VERSION", "TTL (s)");
    for namespace in CacheNamespace::all() {
        println!(
            "{:<18} {:>7} {:>9}  {}",
            namespace.name(),
            namespace.version(),
            namespace.default_ttl_seconds(),
            namespace.description()
        );
    }
    Ok(())
}

async fn run_status(manager: &ConnectionManager, settings: &Settings) -> Result<(), AppError> {
    let name = settings.store.connection_name.as_str();
    if let Err(err) = manager
        .get_client(name, None, ConnectOptions::default())
        .await
    {
        warn!(name, error = %err, "store connection failed");
    }

    let report = StatusReport {
        name: name.to_string(),
        url: settings.store.url.as_deref().map(redact_url),
        mode: settings.store.mode.to_string(),
        state: manager.state(name),
        stats: manager.get_stats(name),
    };
    print_json(&report)
}

async fn run_inspect(
    manager: &ConnectionManager,
    settings: &Settings,
    args: EntryArgs,
) -> Result<(), AppError> {
    let store = connected_store(manager, settings).await?;
    let cache: VersionedCache<serde_json::Value> =
        VersionedCache::for_namespace(args.namespace, store);

    let stats = cache.get_stats(&args.key).await;
    let report = EntryReport {
        namespace: args.namespace.name(),
        versioned_key: cache.versioned_key(&args.key),
        key: args.key,
        stats,
    };
    print_json(&report)
}

async fn run_purge(
    manager: &ConnectionManager,
    settings: &Settings,
    args: EntryArgs,
) -> Result<(), AppError> {
    let store = connected_store(manager, settings).await?;
    let cache: VersionedCache<serde_json::Value> =
        VersionedCache::for_namespace(args.namespace, store);

    let deleted = cache.delete_all_versions(&args.key).await;
    info!(namespace = args.namespace.name(), key = %args.key, deleted, "purged cache entry");
    print_json(&PurgeReport {
        namespace: args.namespace.name(),
        key: args.key,
        deleted,
    })
}

async fn run_monitor(
    manager: &ConnectionManager,
    settings: &Settings,
    args: MonitorArgs,
) -> Result<(), AppError> {
    let name = settings.store.connection_name.clone();
    if settings.store.url.is_none() {
        return Err(AppError::StoreDisabled);
    }

    info!(name = %name, interval_seconds = args.interval_seconds, "monitoring store connection");
    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_seconds));
    loop {
        interval.tick().await;
        let outcome = manager
            .with_timeout(&name, "probe", None, |client| async move {
                client.ttl(MONITOR_PROBE_KEY).await
            })
            .await;
        match outcome {
            Ok(Some(_)) => info!(name = %name, "store probe succeeded"),
            Ok(None) => warn!(name = %name, "store probe returned no result"),
            Err(err) => warn!(name = %name, error = %err, "store probe failed"),
        }
        manager.log_status();
    }
}

/// Open the configured connection and wrap it so every call goes through the manager.
async fn connected_store(
    manager: &ConnectionManager,
    settings: &Settings,
) -> Result<SharedStore, AppError> {
    let name = settings.store.connection_name.as_str();
    manager
        .get_client(name, None, ConnectOptions::default())
        .await?
        .ok_or(AppError::StoreDisabled)?;
    Ok(Arc::new(manager.managed(name)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| InfraError::output(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}
