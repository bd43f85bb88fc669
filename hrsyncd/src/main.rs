use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use azdo_core::{DevOpsClient, ResponseCache};
use clap::{Args, Parser, Subcommand};
use hrsyncd::api::{AppState, build_router};
use hrsyncd::bamboohr::BambooClient;
use hrsyncd::config::Config;
use hrsyncd::identity::{IdentitySpace, Reconciler};
use hrsyncd::progress::TracingProgress;
use hrsyncd::store::{SqliteCache, Store};
use hrsyncd::sync::{SyncEngine, SyncOptions, SyncResource};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TIME_OFF_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Parser)]
#[command(name = "hrsyncd", version, about = "Mirror Azure DevOps and BambooHR into a local database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sync Azure DevOps resources. Without resource flags, all of them.
    Sync(SyncArgs),
    /// Sync BambooHR employees and time off. Without flags, both.
    Bamboo(BambooArgs),
    /// Print sync checkpoints.
    Status,
    /// Drop cached API responses.
    ClearCache,
    /// Serve the JSON API.
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Suggest identity matches for a roster employee.
    Suggest {
        inatech_id: i64,
        #[arg(long, default_value = "bamboo", value_parser = parse_space)]
        space: IdentitySpace,
    },
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    #[arg(long)]
    projects: bool,
    #[arg(long)]
    users: bool,
    #[arg(long)]
    teams: bool,
    #[arg(long)]
    iterations: bool,
    #[arg(long)]
    team_iterations: bool,
    #[arg(long)]
    work_items: bool,
    /// Iteration tree depth.
    #[arg(long)]
    depth: Option<u32>,
    /// Drop cached API responses before syncing.
    #[arg(long)]
    clear_cache: bool,
    /// Fetch only the first batch of work items per project.
    #[arg(long)]
    first_batch_only: bool,
    /// Ignore checkpoints and rescan all work items.
    #[arg(long)]
    full: bool,
}

impl SyncArgs {
    fn resources(&self) -> Vec<SyncResource> {
        let flags = [
            (self.projects, SyncResource::Projects),
            (self.users, SyncResource::Users),
            (self.teams, SyncResource::Teams),
            (self.iterations, SyncResource::Iterations),
            (self.team_iterations, SyncResource::TeamIterations),
            (self.work_items, SyncResource::WorkItems),
        ];
        let selected: Vec<_> = flags
            .into_iter()
            .filter_map(|(on, resource)| on.then_some(resource))
            .collect();
        if selected.is_empty() {
            SyncResource::ORDER.to_vec()
        } else {
            selected
        }
    }

    fn options(&self, defaults: SyncOptions) -> SyncOptions {
        SyncOptions {
            iteration_depth: self
                .depth
                .filter(|depth| *depth > 0)
                .unwrap_or(defaults.iteration_depth),
            first_batch_only: self.first_batch_only,
            force_full: self.full,
        }
    }
}

#[derive(Debug, Default, Args)]
struct BambooArgs {
    #[arg(long)]
    employees: bool,
    #[arg(long)]
    time_off: bool,
    /// First day of the time-off window (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    start: Option<String>,
    /// Last day of the time-off window (YYYY-MM-DD). Defaults to 30 days out.
    #[arg(long)]
    end: Option<String>,
}

fn parse_space(value: &str) -> Result<IdentitySpace, String> {
    IdentitySpace::parse(value).ok_or_else(|| format!("unknown identity space: {value}"))
}

async fn open_store(config: &Config) -> anyhow::Result<Store> {
    let store = match &config.database_url {
        Some(url) => Store::connect(url).await,
        None => Store::new_default().await,
    };
    store.context("failed to open database")
}

fn response_cache(config: &Config, store: &Store) -> SqliteCache {
    SqliteCache::new(store.clone(), config.cache_ttl)
}

fn build_engine(config: &Config, store: Store) -> anyhow::Result<SyncEngine> {
    let client = DevOpsClient::with_config(config.client_config()?)?
        .with_cache(Arc::new(response_cache(config, &store)));
    let mut engine = SyncEngine::new(client, store)
        .with_progress(Arc::new(TracingProgress))
        .with_team_delay(config.team_delay)
        .with_team_scope(config.team_scope);
    if let Some(bamboo) = &config.bamboo {
        engine = engine.with_bamboo(BambooClient::new(bamboo.clone())?);
    }
    Ok(engine)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = open_store(&config).await?;

    match cli.command {
        Command::Sync(args) => {
            let engine = build_engine(&config, store)?;
            if args.clear_cache {
                engine.clear_cache().await;
            }
            let summary = engine
                .sync_selected(&args.resources(), args.options(config.sync_options()))
                .await;
            print_json(&summary)?;
            if !summary.success {
                anyhow::bail!("sync failed: {}", summary.errors.join("; "));
            }
        }
        Command::Bamboo(args) => {
            let engine = build_engine(&config, store)?;
            let both = !args.employees && !args.time_off;
            if args.employees || both {
                let tally = engine.sync_bamboo_employees().await?;
                print_json(&tally)?;
            }
            if args.time_off || both {
                let today = time::OffsetDateTime::now_utc().date();
                let start = args.start.unwrap_or_else(|| today.to_string());
                let end = args.end.unwrap_or_else(|| {
                    (today + time::Duration::days(TIME_OFF_WINDOW_DAYS)).to_string()
                });
                let tally = engine.sync_time_off(&start, &end).await?;
                print_json(&tally)?;
            }
        }
        Command::Status => print_json(&store.list_checkpoints().await?)?,
        Command::ClearCache => {
            let cleared = response_cache(&config, &store).clear().await;
            println!("cleared {cleared} cached responses");
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(config.bind);
            let engine = build_engine(&config, store.clone())?;
            let state = AppState::new(engine, Reconciler::new(store), config.sync_options());
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            info!(%bind, "serving api");
            axum::serve(listener, build_router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Suggest { inatech_id, space } => {
            let suggestions = Reconciler::new(store)
                .suggest_matches(inatech_id, space)
                .await?;
            if suggestions.is_empty() {
                println!("no suggestions for employee {inatech_id}");
            }
            for suggestion in suggestions {
                println!(
                    "{:>5.1}  {:<5}  {}  {}",
                    suggestion.score,
                    format!("{:?}", suggestion.reason).to_lowercase(),
                    suggestion.candidate.id,
                    suggestion.candidate.name
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_without_flags_selects_everything() {
        let Command::Sync(args) = parse(&["hrsyncd", "sync"]).command else {
            panic!("expected sync");
        };
        assert_eq!(args.resources(), SyncResource::ORDER.to_vec());
        assert_eq!(args.options(SyncOptions::default()), SyncOptions::default());
    }

    #[test]
    fn sync_flags_select_resources_and_options() {
        let Command::Sync(args) = parse(&[
            "hrsyncd",
            "sync",
            "--work-items",
            "--team-iterations",
            "--depth",
            "3",
            "--first-batch-only",
            "--clear-cache",
        ])
        .command
        else {
            panic!("expected sync");
        };
        assert_eq!(
            args.resources(),
            [SyncResource::TeamIterations, SyncResource::WorkItems]
        );
        assert!(args.clear_cache);
        let options = args.options(SyncOptions::default());
        assert_eq!(options.iteration_depth, 3);
        assert!(options.first_batch_only);
        assert!(!options.force_full);
    }

    #[test]
    fn suggest_parses_space() {
        let Command::Suggest { inatech_id, space } =
            parse(&["hrsyncd", "suggest", "5", "--space", "devops"]).command
        else {
            panic!("expected suggest");
        };
        assert_eq!(inatech_id, 5);
        assert_eq!(space, IdentitySpace::DevOps);
        assert!(Cli::try_parse_from(["hrsyncd", "suggest", "5", "--space", "ldap"]).is_err());
    }

    #[test]
    fn serve_accepts_bind_address() {
        let Command::Serve { bind } = parse(&["hrsyncd", "serve", "--bind", "0.0.0.0:9000"]).command
        else {
            panic!("expected serve");
        };
        assert_eq!(bind.map(|addr| addr.port()), Some(9000));
    }
}
