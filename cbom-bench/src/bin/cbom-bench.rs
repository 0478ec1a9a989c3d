use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use cbom_bench::github::GithubMetadataProvider;
use cbom_bench::{
    BenchmarkConfig, CommandProducer, CreateRun, GithubConfig, LifecycleController, RedisStore,
    RunId, StoreConfig, WorkerConfig, WorkerRuntimeBuilder,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for invalid configuration or an unreachable store.
const EXIT_CONFIG: u8 = 2;
/// Exit code when `run --wait` gives up.
const EXIT_WAIT_TIMEOUT: u8 = 124;

#[derive(Parser, Debug)]
#[command(name = "cbom-bench", version, about = "Drive CBOM benchmark runs over a shared Redis store")]
struct Args {
    /// Full connection URL; overrides host and port.
    #[arg(long, env = "REDIS_URL", global = true)]
    redis_url: Option<String>,
    #[arg(long, env = "REDIS_HOST", default_value = "localhost", global = true)]
    redis_host: String,
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379, global = true)]
    redis_port: u16,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a run from a config file, start it and optionally wait.
    Run {
        /// Path to the config JSON, or `-` for stdin.
        #[arg(long, short = 'c')]
        config: String,
        /// Override the run name from the config.
        #[arg(long, short = 'n')]
        name: Option<String>,
        /// Poll for results until every job is terminal.
        #[arg(long)]
        wait: bool,
        /// Seconds between collection passes while waiting.
        #[arg(long, default_value_t = 2.0)]
        poll_interval: f64,
        /// Give up waiting after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show per-status counts for a run.
    Status {
        /// Run id or a unique prefix of one.
        run: String,
        #[arg(long)]
        json: bool,
    },
    /// List runs, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Write a config that recreates the run.
    Export {
        run: String,
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Remove queued instructions and mark pending jobs cancelled.
    Cancel { run: String },
    /// Re-dispatch every pair whose current job did not complete.
    Retry { run: String },
    /// Discard all jobs and dispatch the full matrix again.
    Reexecute { run: String },
    /// Remove the run and everything stored for it.
    Delete { run: String },
    /// Run one collection pass and print `done/total`.
    Collect { run: String },
    /// Serve a worker queue by running a program per instruction.
    Worker {
        #[arg(long, env = "WORKER_NAME")]
        name: String,
        /// Per-instruction timeout; defaults to WORKER_TIMEOUT_SEC or 60.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Program and arguments; `{repo}`, `{git_url}`, `{branch}` and
        /// `{job_id}` are substituted.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let store_config = match &args.redis_url {
        Some(url) => StoreConfig::new(url.clone()),
        None => StoreConfig::from_host_port(&args.redis_host, args.redis_port),
    };

    // Parse the config before connecting so a bad file never touches the store.
    let bench_config = match &args.cmd {
        Cmd::Run { config, .. } => match BenchmarkConfig::load(config) {
            Ok(config) => Some(config),
            Err(err) => {
                eprintln!("Error: invalid CLI config: {err:#}");
                return Ok(ExitCode::from(EXIT_CONFIG));
            }
        },
        _ => None,
    };

    let store = match RedisStore::connect(&store_config).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("Error: {err:#}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    if let Cmd::Worker {
        name,
        timeout_secs,
        command,
    } = args.cmd
    {
        return serve_worker(store, name, timeout_secs, command).await;
    }

    let metadata = GithubMetadataProvider::new(Arc::clone(&store), GithubConfig::from_env())?;
    let controller = LifecycleController::new(store).with_metadata_provider(Arc::new(metadata));

    match args.cmd {
        Cmd::Run {
            name,
            wait,
            poll_interval,
            timeout,
            ..
        } => {
            let Some(config) = bench_config else {
                return Ok(ExitCode::from(EXIT_CONFIG));
            };
            run_benchmark(&controller, config, name, wait, poll_interval, timeout).await
        }
        Cmd::Status { run, json } => {
            let run_id = resolve(&controller, &run).await?;
            let summary = controller.summarize(run_id).await?;
            if json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!("{}", summary.line());
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::List { json } => {
            let mut summaries = Vec::new();
            for meta in controller.list_runs().await? {
                summaries.push(controller.summarize(meta.id).await?);
            }
            if json {
                println!("{}", serde_json::to_string(&summaries)?);
            } else if summaries.is_empty() {
                eprintln!("No runs found.");
            } else {
                for summary in &summaries {
                    println!("{}", summary.line());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Export { run, out } => {
            let run_id = resolve(&controller, &run).await?;
            let text = controller.export(run_id).await?.to_json_pretty()?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, format!("{text}\n"))
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("Wrote {}", path.display());
                }
                None => println!("{text}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Cancel { run } => {
            let run_id = resolve(&controller, &run).await?;
            let cancelled = controller.cancel(run_id).await?;
            println!("Cancelled {cancelled} pending job(s) for {}", run_id.short());
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Retry { run } => {
            let run_id = resolve(&controller, &run).await?;
            let issued = controller.retry_incomplete(run_id).await?;
            println!("Re-issued {issued} job(s) for {}", run_id.short());
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Reexecute { run } => {
            let run_id = resolve(&controller, &run).await?;
            let issued = controller.reexecute_all(run_id).await?;
            println!("Issued {issued} job(s) for {}", run_id.short());
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Delete { run } => {
            let run_id = resolve(&controller, &run).await?;
            let deleted = controller.delete_run(run_id).await?;
            println!("Deleted run {} ({deleted} job record(s))", run_id.short());
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Collect { run } => {
            let run_id = resolve(&controller, &run).await?;
            let (done, total) = controller.collect_once(run_id).await?;
            println!("{done}/{total}");
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Worker { .. } => Ok(ExitCode::SUCCESS),
    }
}

async fn resolve(controller: &LifecycleController<RedisStore>, raw: &str) -> anyhow::Result<RunId> {
    let run_id = controller.resolve_run(raw).await?;
    if run_id.to_string() != raw.trim() {
        eprintln!("Resolved run id '{raw}' -> '{run_id}'");
    }
    Ok(run_id)
}

async fn run_benchmark(
    controller: &LifecycleController<RedisStore>,
    config: BenchmarkConfig,
    name: Option<String>,
    wait: bool,
    poll_interval: f64,
    timeout: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let name = name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| Some(config.name.clone()).filter(|n| !n.trim().is_empty()))
        .unwrap_or_else(|| format!("cli-{}", chrono::Utc::now().timestamp()));
    let params = serde_json::json!({
        "source": "cli",
        "schema_version": config.schema_version,
    });
    let request = CreateRun::new(name, config.repo_refs(), config.workers.clone()).with_params(params);

    let run_id = match controller.create(request).await {
        Ok(run_id) => run_id,
        Err(err) if err.is_validation() => {
            eprintln!("Error: invalid CLI config: {err}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
        Err(err) => return Err(err.into()),
    };
    println!("{run_id}");
    let issued = controller.start(run_id).await?;
    eprintln!("Issued jobs: {issued}");

    if !wait {
        return Ok(ExitCode::SUCCESS);
    }

    let poll = Duration::from_secs_f64(poll_interval.max(0.1));
    let limit = timeout.map(Duration::from_secs);
    let started = Instant::now();
    loop {
        let (done, total) = controller.collect_once(run_id).await?;
        let summary = controller.summarize(run_id).await?;
        eprintln!(
            "Progress: {done}/{total} (completed={} failed={})",
            summary.counts.completed, summary.counts.failed
        );
        if total > 0 && done >= total {
            break;
        }
        if limit.is_some_and(|limit| started.elapsed() > limit) {
            eprintln!("Timeout waiting for completion");
            return Ok(ExitCode::from(EXIT_WAIT_TIMEOUT));
        }
        tokio::time::sleep(poll).await;
    }

    let summary = controller.summarize(run_id).await?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn serve_worker(
    store: Arc<RedisStore>,
    name: String,
    timeout_secs: Option<u64>,
    command: Vec<String>,
) -> anyhow::Result<ExitCode> {
    let mut config = match WorkerConfig::from_env(name) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    if let Some(secs) = timeout_secs {
        config = config.with_timeout_secs(secs);
    }

    let mut command = command.into_iter();
    let Some(program) = command.next() else {
        eprintln!("Error: worker needs a program to run");
        return Ok(ExitCode::from(EXIT_CONFIG));
    };

    let runtime = Arc::new(
        WorkerRuntimeBuilder::new(config)
            .with_store(store)
            .with_producer(CommandProducer::new(program, command))
            .build()?,
    );

    let shutdown = runtime.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing current instruction");
            shutdown.cancel();
        }
    });

    Arc::clone(&runtime)
        .spawn()
        .await
        .context("worker task failed")?;
    Ok(ExitCode::SUCCESS)
}
