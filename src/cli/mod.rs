#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory as _, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::client::OfflineRpc;
use crate::config;
use crate::coord::SystemClock;
use crate::coord::status::SharedStatus;
use crate::coord::worker::{Coordinator, CoordinatorOptions, LaunchVia};
use crate::gfx::supervisor::{LaunchMode, PidChannel, ProcessSupervisor};

#[derive(Debug, Parser)]
#[command(
    name = "gridsaver",
    version,
    about = "Screensaver coordinator for the grid compute client"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the coordinator worker until interrupted
    Run(RunArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Default, Parser)]
pub struct RunArgs {
    /// Blank the screen after this many seconds (0 = never)
    #[arg(long = "blank-after", default_value_t = 0)]
    pub blank_after: u64,
    /// Override saver.install_dir
    #[arg(long = "install-dir")]
    pub install_dir: Option<String>,
    /// Override saver.data_dir
    #[arg(long = "data-dir")]
    pub data_dir: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        None => cmd_run(RunArgs::default()).await,
        Some(Commands::Run(args)) => cmd_run(args).await,
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "gridsaver", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Config(args)) => match args.cmd {
            ConfigCmd::List => {
                print!("{}", config::list_resolved_toml()?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Set(set) => {
                config::set_value_string(&set.key, &set.value)?;
                println!("Set {} = {}", set.key, set.value);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Get(get) => {
                let val = config::get_value_string(&get.key)?;
                match val {
                    Some(v) => {
                        println!("{v}");
                        Ok(ExitCode::SUCCESS)
                    }
                    None => anyhow::bail!(
                        "configuration key '{}' not found - use 'gridsaver config list' to see available keys",
                        get.key
                    ),
                }
            }
        },
        Some(Commands::Version) => {
            println!("gridsaver {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<ExitCode> {
    init_tracing();
    info!(started_at = %now_rfc3339(), "gridsaver starting");

    // The data dir also anchors the config search; the file it holds may
    // then point the default saver's working dir elsewhere.
    let data_dir = config::resolve_dir(
        args.data_dir.as_deref().unwrap_or(&config::default_data_dir()),
    );
    let search_dir = data_dir.clone();
    let (cfg, _config_path) =
        tokio::task::spawn_blocking(move || config::load(&search_dir)).await??;

    let install_dir =
        config::resolve_dir(args.install_dir.as_deref().unwrap_or(&cfg.saver.install_dir));
    let data_dir = if args.data_dir.is_some() {
        data_dir
    } else {
        config::resolve_dir(&cfg.saver.data_dir)
    };

    let user = if cfg.helper.user.trim().is_empty() {
        current_user()
    } else {
        cfg.helper.user.clone()
    };

    let (launch_via, mode) = if cfg.helper.enabled {
        let channel_dir = config::resolve_dir(&cfg.helper.channel_dir);
        let channel = PidChannel::for_user(&channel_dir, &user);
        channel.reset()?;
        if cfg.helper.via_client {
            (
                LaunchVia::Client { user: user.clone() },
                LaunchMode::ClientAssisted { channel },
            )
        } else {
            // Bare helper names pass through untouched and resolve via PATH.
            let helper_path = config::resolve_dir(&cfg.helper.path);
            (
                LaunchVia::Helper(helper_path.clone()),
                LaunchMode::Helper {
                    helper_path,
                    channel,
                },
            )
        }
    } else {
        (LaunchVia::Direct, LaunchMode::Direct)
    };

    let opts = CoordinatorOptions {
        periods: cfg.periods(),
        install_dir,
        data_dir,
        blank_after: (args.blank_after > 0).then(|| Duration::from_secs(args.blank_after)),
        launch_via,
    };

    let status = SharedStatus::new();
    // No client is linked in from the standalone binary; the worker stays
    // disconnected and keeps the default saver retrying. Embedders hand
    // `Coordinator::new` their own `ClientRpc`.
    let coordinator = Coordinator::new(
        opts,
        OfflineRpc,
        ProcessSupervisor::new(mode),
        Box::new(SystemClock::new()),
        status.clone(),
    );

    let worker = tokio::spawn(coordinator.run());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping");
    status.request_stop();
    let _ = worker.await;

    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_owned())
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_owned())
}
