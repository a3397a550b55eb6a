use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use skill_harness::config::{CliArgs, Command, HarnessConfig, EXIT_INCONCLUSIVE};
use skill_harness::error::HarnessError;
use skill_harness::evaluation::session::{RunOptions, Session, SessionSummary, Verdict};
use skill_harness::evaluation::{discover_rubrics, TraceStore};
use skill_harness::llm::OpenAiClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_logging(&args)?;

    match dotenvy::from_path(&args.env_file) {
        Ok(()) => debug!("Loaded environment from {:?}", args.env_file),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load {:?}: {}", args.env_file, e),
    }

    let store = TraceStore::new(&args.traces_dir);

    match args.command.clone() {
        Command::List => list(&args, &store),
        Command::RebuildIndex => {
            let count = store
                .rebuild_index()
                .with_context(|| format!("rebuilding index in {:?}", args.traces_dir))?;
            println!("Indexed {} traces into {:?}", count, store.index_path());
            Ok(())
        }
        Command::Run {
            rerun,
            model_index,
            filter,
            no_baseline,
            minimum_score,
            jobs,
            eval_workers,
        } => {
            let options = RunOptions {
                rerun,
                model_index,
                filter,
                include_baseline: !no_baseline,
                minimum_score,
                jobs,
                eval_workers,
            };
            let code = run(&args, &store, &options).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

fn init_logging(args: &CliArgs) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if args.verbose {
        "skill_harness=debug"
    } else {
        "skill_harness=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log file {:?} has no file name", path))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {:?}", dir))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

fn list(args: &CliArgs, store: &TraceStore) -> anyhow::Result<()> {
    let discovery = discover_rubrics(&args.skills_dir)
        .with_context(|| format!("discovering skills in {:?}", args.skills_dir))?;

    if discovery.is_empty() {
        println!("No skills with a rubric found under {:?}", args.skills_dir);
    }
    for skill in &discovery.cases {
        println!(
            "{} v{} ({}) - {}",
            skill.skill_name(),
            skill.version,
            skill.persona(),
            skill.skill_path.display()
        );
        println!("  rubric: {}", skill.rubric_path.display());
        println!(
            "  {} criteria, {} scenarios",
            skill.rubric.criteria_count(),
            skill.rubric.test_scenarios.len()
        );
        for scenario in &skill.rubric.test_scenarios {
            println!("  - {} ({} turns)", scenario.id, scenario.messages.len());
        }
    }
    for rubric_path in &discovery.unpaired {
        println!("UNPAIRED {} (no skill document)", rubric_path.display());
    }

    let index = store
        .load_index()
        .with_context(|| format!("reading {:?}", store.index_path()))?;
    println!("\nTrace index: {} traces", index.traces.len());
    Ok(())
}

async fn run(args: &CliArgs, store: &TraceStore, options: &RunOptions) -> anyhow::Result<i32> {
    let config = HarnessConfig::load(&args.config)
        .with_context(|| format!("loading harness config {:?}", args.config))?;

    let client = match OpenAiClient::from_config(&config.api) {
        Ok(client) => client,
        Err(HarnessError::MissingCredentials(var)) => {
            error!(
                "No API key configured: set {} (or add it to {:?}). Run is inconclusive.",
                var, args.env_file
            );
            return Ok(EXIT_INCONCLUSIVE);
        }
        Err(e) => return Err(e).context("creating model client"),
    };
    info!("Model endpoint: {}", client.endpoint());

    let discovery = discover_rubrics(&args.skills_dir)
        .with_context(|| format!("discovering skills in {:?}", args.skills_dir))?;
    if discovery.is_empty() {
        warn!("No skills with a rubric found under {:?}", args.skills_dir);
    }

    let session = Session::new(&client, store, &config, options);
    let summary = session.run(&discovery).await.context("evaluation session")?;
    print_summary(&summary);

    Ok(summary.exit_code())
}

fn print_summary(summary: &SessionSummary) {
    println!();
    for outcome in &summary.outcomes {
        let judge = outcome
            .judge
            .as_deref()
            .map(|j| format!(" judged by {}", j))
            .unwrap_or_default();
        match &outcome.verdict {
            Verdict::Passed => println!("PASSED  {}{}", outcome.label, judge),
            Verdict::Skipped(reason) => println!("SKIPPED {}{}: {}", outcome.label, judge, reason),
            Verdict::Failed(msg) => println!("FAILED  {}{}\n{}\n", outcome.label, judge, msg),
            Verdict::Errored(msg) => println!("ERROR   {}{}: {}", outcome.label, judge, msg),
            Verdict::Inconclusive(reason) => {
                println!("INCONCLUSIVE {}: {}", outcome.label, reason)
            }
        }
    }
    if summary.outcomes.is_empty() {
        println!("No cases ran; the session is inconclusive");
    }
    println!(
        "\n{} passed, {} failed, {} errored, {} skipped, {} inconclusive; {} traces indexed",
        summary.passed(),
        summary.failed(),
        summary.errored(),
        summary.skipped(),
        summary.inconclusive(),
        summary.indexed
    );
}
