//! `iz` - command-line entry point and role process.
//!
//! Run with `IZ_ROLE` set (as the supervisor does when it forks a role), the
//! binary becomes that role; otherwise it is the command-line client.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use iz_supervisor::ipc::{client, Command};
use iz_supervisor::launch::LaunchCoordinator;
use iz_supervisor::metrics::SysinfoMetrics;
use iz_supervisor::observability::init_tracing;
use iz_supervisor::process::NativeProcessControl;
use iz_supervisor::store::{RoleRecord, RunDocument, RunStateStore};
use iz_supervisor::supervisor::{run_role, RoleDeps, RoleLaunch};
use iz_supervisor::types::{FileServiceResolver, Paths, Role, ServiceResolver};
use iz_supervisor::{Config, Error, Result};

#[derive(Parser)]
#[command(name = "iz", about = "Supervise service Controllers and Brokers", version)]
struct Cli {
    /// Supervisor home directory (defaults to ~/.iz).
    #[arg(long, global = true, env = "IZ_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a service's Controller and wait for its tree to come up.
    Start { name: String },
    /// Stop a service and everything it manages.
    Stop { name: String },
    /// Print status documents of one service, or of every running service.
    Status { name: Option<String> },
    /// Check whether a service's roles answer.
    Ping { name: String },
    /// List registered services.
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("iz: cannot start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("iz: {}", e);
            match e {
                Error::Configuration(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let paths = Paths::resolve(cli.home)?;
    let config = Config::load(&paths)?;
    let resolver: Arc<dyn ServiceResolver> =
        Arc::new(FileServiceResolver::new(paths.services_file()));

    if let Some(launch) = RoleLaunch::from_env()? {
        let log_file = paths.log_file(&launch.name, launch.role);
        let _guard = init_tracing(&config.observability, Some(log_file.as_path()));
        let deps = RoleDeps {
            process: Arc::new(NativeProcessControl::current(paths.home(), true)?),
            metrics: Arc::new(SysinfoMetrics::new()),
            paths,
            config,
            resolver,
        };
        run_role(launch, deps).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let _guard = init_tracing(&config.observability, None);
    let store = RunStateStore::new(&paths.run_dir);
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return Ok(ExitCode::from(2));
    };

    match command {
        Commands::Start { name } => {
            let process = Arc::new(NativeProcessControl::current(paths.home(), false)?);
            let coordinator =
                LaunchCoordinator::new(resolver, store, process, config.launch.clone());
            let report = coordinator.start(&name).await?;
            for advertisement in &report.advertisements {
                println!(
                    "{} started (pid {}, port {})",
                    advertisement.role, advertisement.pid, advertisement.port
                );
            }
            if report.startable {
                println!("{} is running", name);
                Ok(ExitCode::SUCCESS)
            } else {
                for reason in &report.reasons {
                    eprintln!("{}", reason);
                }
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Stop { name } => {
            let document = store.read(&name).await?;
            let Some(controller) = RoleRecord::from_document(&document, Role::Controller) else {
                eprintln!("{} is not running", name);
                return Ok(ExitCode::FAILURE);
            };
            match client::request(controller.listening_port, &Command::Stop(None)).await {
                Ok(ack) => {
                    println!("{}", serde_json::to_string_pretty(&ack)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) if e.is_connectivity() => {
                    eprintln!("{} is not running: {}", name, e);
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => Err(e),
            }
        }
        Commands::Status { name } => {
            let services = match name {
                Some(name) => {
                    let document = store.read(&name).await?;
                    vec![(name, document)]
                }
                None => store.scan().await?,
            };
            let mut all_answered = !services.is_empty();
            for (name, document) in services {
                all_answered &= print_status(&name, &document).await?;
            }
            Ok(exit_code(all_answered))
        }
        Commands::Ping { name } => {
            let document = store.read(&name).await?;
            let mut all_answered = !document.is_empty();
            for role in [Role::Controller, Role::Broker] {
                let Some(record) = RoleRecord::from_document(&document, role) else {
                    continue;
                };
                let alive = client::ping(record.listening_port).await;
                println!(
                    "{} {} port {}: {}",
                    name,
                    role,
                    record.listening_port,
                    if alive { "ok" } else { "not answering" }
                );
                all_answered &= alive;
            }
            if document.is_empty() {
                eprintln!("{} is not running", name);
            }
            Ok(exit_code(all_answered))
        }
        Commands::List => {
            for (name, document) in store.scan().await? {
                for role in [Role::Controller, Role::Broker] {
                    if let Some(record) = RoleRecord::from_document(&document, role) {
                        println!(
                            "{}\t{}\tpid {}\tport {}",
                            name, role, record.pid, record.listening_port
                        );
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the status document of every role registered for `name`.
/// Returns whether every registered role answered.
async fn print_status(name: &str, document: &RunDocument) -> Result<bool> {
    if document.is_empty() {
        eprintln!("{} is not running", name);
        return Ok(false);
    }
    let mut answered = true;
    for role in [Role::Controller, Role::Broker] {
        let Some(record) = RoleRecord::from_document(document, role) else {
            continue;
        };
        match client::request(record.listening_port, &Command::Status).await {
            Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            Err(e) if e.is_connectivity() => {
                eprintln!("{} {} is not running: {}", name, role, e);
                answered = false;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(answered)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
