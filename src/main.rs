use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use resolvr::{
    config::Settings,
    http::ReqwestFetcher,
    providers::{
        StreamResolver,
        animepahe::{AnimePaheResolver, PaheEpisode},
        kisskh::{KissEpisode, KissKhResolver},
        resolve_batch,
    },
    quality::SelectorStrategy,
    session::{ChallengeSolver, ChromeLauncher, SessionCache, SessionManager, ThreadSleeper},
    token::QuickJsSandbox,
    types::ResolutionRecord,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Site {
    Animepahe,
    Kisskh,
}

#[derive(Debug, Parser)]
#[command(
    name = "resolvr",
    about = "Resolve episode descriptors into direct stream links.",
    version
)]
struct Cli {
    #[arg(long, value_enum)]
    site: Site,

    /// JSON array of episode descriptors for the chosen site.
    #[arg(long)]
    episodes: PathBuf,

    /// Preferred resolution label, e.g. 720.
    #[arg(long)]
    resolution: Option<String>,

    #[arg(long, value_enum)]
    strategy: Option<SelectorStrategy>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = run().await;
    if let Err(err) = &result {
        eprintln!("error: {err:?}");
    }
    result
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    let http = ReqwestFetcher::new(settings.request_timeout())?;

    let records = match cli.site {
        Site::Animepahe => {
            let site = &mut settings.animepahe;
            apply_overrides(&cli, &mut site.resolution, &mut site.selector);
            let episodes: Vec<PaheEpisode> = read_manifest(&cli.episodes)?;

            let cache = SessionCache::new(settings.session_cache_dir()?);
            let solver = ChallengeSolver::new(
                ChromeLauncher::new(settings.challenge.headless),
                ThreadSleeper,
                settings.challenge.retries,
                settings.challenge.backoff(),
            );
            let sessions = SessionManager::new(cache, solver);
            let mut resolver = AnimePaheResolver::new(http, sessions, settings.animepahe);
            run_batch(&mut resolver, &episodes).await?
        }
        Site::Kisskh => {
            let site = &mut settings.kisskh;
            apply_overrides(&cli, &mut site.resolution, &mut site.selector);
            let episodes: Vec<KissEpisode> = read_manifest(&cli.episodes)?;

            let mut resolver = KissKhResolver::new(http, QuickJsSandbox::new(), settings.kisskh);
            run_batch(&mut resolver, &episodes).await?
        }
    };

    let json =
        serde_json::to_string_pretty(&records).context("failed to serialize resolution records")?;
    println!("{json}");
    Ok(())
}

async fn run_batch<R: StreamResolver>(
    resolver: &mut R,
    episodes: &[R::Episode],
) -> Result<Vec<ResolutionRecord>> {
    let site = resolver.site().to_string();
    info!(%site, episodes = episodes.len(), "resolving episodes");
    let records = resolve_batch(resolver, episodes)
        .await
        .with_context(|| format!("could not establish a session with {site}"))?;
    let resolved = records.iter().filter(|r| r.is_resolved()).count();
    info!(%site, resolved, failed = records.len() - resolved, "done");
    Ok(records)
}

fn apply_overrides(cli: &Cli, resolution: &mut String, strategy: &mut SelectorStrategy) {
    if let Some(requested) = &cli.resolution {
        *resolution = requested.clone();
    }
    if let Some(requested) = cli.strategy {
        *strategy = requested;
    }
}

fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read episode manifest {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse episode manifest {}", path.display()))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("resolvr=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resolvr=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
