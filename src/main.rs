use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pbx_archive_sync::archive::{self, Archive};
use pbx_archive_sync::config::Config;
use pbx_archive_sync::models::Stage;
use pbx_archive_sync::probe;
use pbx_archive_sync::registry;
use pbx_archive_sync::scheduler::Scheduler;
use pbx_archive_sync::sftp::SftpClient;
use pbx_archive_sync::storage::ObjectStore;
use pbx_archive_sync::tunnel::TunnelManager;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_PARTIAL: i32 = 2;
const EXIT_FATAL: i32 = 3;

#[derive(Parser)]
#[command(name = "pbx-archive-sync", about = "Multi-tenant 3CX archive sync daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until interrupted.
    Run,
    /// One-shot sync for a single tenant (optionally a single stage).
    Sync {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        stage: Option<String>,
    },
    /// Probe a tenant's PBX schema and SFTP paths and print the findings.
    Diag {
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_CONFIG;
        }
    };

    let archive = match Archive::connect(&config.archive_database_url).await {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("cannot reach archive database: {e}");
            return EXIT_FATAL;
        }
    };
    if let Err(e) = archive.migrate().await {
        eprintln!("archive migration failed: {e}");
        return EXIT_FATAL;
    }

    let store = match ObjectStore::new(&config.s3) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_CONFIG;
        }
    };

    match cli.command {
        Command::Run => run_scheduler(config, archive, store).await,
        Command::Sync { tenant, stage } => run_one_shot(config, archive, store, &tenant, stage).await,
        Command::Diag { tenant } => run_diag(archive, &tenant).await,
    }
}

async fn run_scheduler(config: Config, archive: Archive, store: ObjectStore) -> i32 {
    println!(
        "🗄️  pbx-archive-sync starting ({} concurrent tenants)",
        config.max_concurrent_tenants
    );
    archive::spawn_log_retention(archive.clone());

    let scheduler = Scheduler::new(config, archive, store);
    let runner = scheduler.clone();

    tokio::select! {
        result = runner.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "scheduler stopped with error");
                return EXIT_FATAL;
            }
        }
        _ = shutdown_signal() => {
            println!("shutting down, closing tunnels...");
            scheduler.shutdown().await;
        }
    }
    EXIT_OK
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn run_one_shot(
    config: Config,
    archive: Archive,
    store: ObjectStore,
    tenant_id: &str,
    stage: Option<String>,
) -> i32 {
    let stage = match stage {
        Some(name) => match Stage::from_name(&name) {
            Some(stage) => Some(stage),
            None => {
                eprintln!(
                    "unknown stage '{name}' (expected one of: {})",
                    Stage::ALL.map(|s| s.name()).join(", ")
                );
                return EXIT_CONFIG;
            }
        },
        None => None,
    };

    let tenant = match registry::get_tenant(archive.pool(), tenant_id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            eprintln!("tenant {tenant_id} not found");
            return EXIT_CONFIG;
        }
        Err(e) => {
            eprintln!("tenant lookup failed: {e}");
            return EXIT_FATAL;
        }
    };

    let scheduler = Scheduler::new(config, archive, store);
    let code = match scheduler.run_tick(&tenant, stage).await {
        Ok(summary) => {
            println!(
                "synced {} / skipped {} / {} record errors across {} stages ({} failed)",
                summary.synced,
                summary.skipped,
                summary.record_errors,
                summary.stages_run + summary.stages_failed,
                summary.stages_failed
            );
            if summary.stages_failed > 0 {
                EXIT_PARTIAL
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            eprintln!("sync failed: {e}");
            EXIT_FATAL
        }
    };
    scheduler.shutdown().await;
    code
}

async fn run_diag(archive: Archive, tenant_id: &str) -> i32 {
    let tenant = match registry::get_tenant(archive.pool(), tenant_id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            eprintln!("tenant {tenant_id} not found");
            return EXIT_CONFIG;
        }
        Err(e) => {
            eprintln!("tenant lookup failed: {e}");
            return EXIT_FATAL;
        }
    };

    println!("tenant: {} ({})", tenant.name, tenant.id);
    println!("pbx host: {}:{}", tenant.pbx_host, tenant.ssh_port);

    if registry::db_config_for(&tenant).is_none() {
        println!("credentials: incomplete (SSH user/password or DB password missing)");
        return EXIT_PARTIAL;
    }
    println!("credentials: present");

    let tunnels = TunnelManager::new();
    let pool = match tunnels.acquire_pool(&tenant).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("tunnel failed: {e}");
            return EXIT_PARTIAL;
        }
    };
    println!("tunnel: up");

    match probe::probe(&pool).await {
        Ok(report) => {
            println!("schema:");
            for line in report.describe() {
                println!("  {line}");
            }
        }
        Err(e) => {
            eprintln!("schema probe failed: {e}");
            tunnels.shutdown().await;
            return EXIT_PARTIAL;
        }
    }

    let paths = registry::paths_for(&tenant);
    match registry::sftp_config_for(&tenant) {
        Some(cfg) => match SftpClient::connect(&cfg).await {
            Ok(sftp) => {
                println!("sftp: up");
                for (label, path) in [
                    ("chat files", &paths.chat_files),
                    ("recordings", &paths.recordings),
                    ("voicemails", &paths.voicemails),
                    ("faxes", &paths.faxes),
                    ("meetings", &paths.meetings),
                ] {
                    match sftp.exists(path).await {
                        Ok(true) => println!("  {label}: {path} (exists)"),
                        Ok(false) => println!("  {label}: {path} (MISSING)"),
                        Err(e) => println!("  {label}: {path} (error: {e})"),
                    }
                }
                sftp.close().await;
            }
            Err(e) => println!("sftp: unavailable ({e})"),
        },
        None => println!("sftp: not configured"),
    }

    tunnels.shutdown().await;
    EXIT_OK
}
