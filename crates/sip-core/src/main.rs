use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use sip_core::telemetry::init_tracing;
use sip_core::{EvidenceBundle, InspectionPipeline, PipelineConfig};
use sip_retrieval::{Finding, RetrievalGroupingPlanner, DEFAULT_MAX_QUERIES, DEFAULT_TOP_K};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn cli() -> Command {
    Command::new("sip")
        .version(sip_core::VERSION)
        .about("School inspection evaluation pipeline")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the pipeline over one evidence bundle")
                .arg(
                    Arg::new("text-file")
                        .long("text-file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Textual evidence (lesson plans, reports, notes)"),
                )
                .arg(
                    Arg::new("video-uri")
                        .long("video-uri")
                        .help("Location of classroom video evidence"),
                )
                .arg(
                    Arg::new("audio-transcript-file")
                        .long("audio-transcript-file")
                        .value_parser(value_parser!(PathBuf))
                        .help("Transcript of classroom audio"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory for the rendered report"),
                )
                .arg(
                    Arg::new("corpus")
                        .long("corpus")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory of framework passages (.md/.txt)"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the retrieval grouping plan for a findings document")
                .arg(
                    Arg::new("findings-file")
                        .long("findings-file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Consolidated findings document"),
                )
                .arg(
                    Arg::new("max-queries")
                        .long("max-queries")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Upper bound on retrieval queries"),
                ),
        )
        .subcommand(Command::new("graph").about("Print the stage graph in topological order"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("plan", args)) => plan(args),
        Some(("graph", _)) => graph(),
        _ => Ok(false),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

async fn run(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env()?;
            config
        }
    };
    if let Some(dir) = args.get_one::<PathBuf>("output-dir") {
        config = config.with_output_dir(dir);
    }
    if let Some(dir) = args.get_one::<PathBuf>("corpus") {
        config = config.with_corpus_dir(dir);
    }

    let text_file = args
        .get_one::<PathBuf>("text-file")
        .context("--text-file is required")?;
    let mut evidence = EvidenceBundle::new(read(text_file)?);
    if let Some(uri) = args.get_one::<String>("video-uri") {
        evidence = evidence.with_video(uri);
    }
    if let Some(path) = args.get_one::<PathBuf>("audio-transcript-file") {
        evidence = evidence.with_audio(read(path)?);
    }

    let pipeline = InspectionPipeline::builder(config).build()?;
    let outcome = pipeline.run(evidence).await;

    println!("Run {} {}", outcome.run.id(), outcome.run.status());
    for (id, record) in outcome.run.trace() {
        let attempts = if record.attempts > 1 {
            format!(" ({} attempts)", record.attempts)
        } else {
            String::new()
        };
        println!("  {id:<16} {}{attempts}", record.status);
    }

    match outcome.into_result() {
        Ok(path) => {
            println!("Report: {}", path.display());
            Ok(true)
        }
        Err(err) => {
            eprintln!("run failed: {err}");
            Ok(false)
        }
    }
}

fn plan(args: &ArgMatches) -> anyhow::Result<bool> {
    let path = args
        .get_one::<PathBuf>("findings-file")
        .context("--findings-file is required")?;
    let k = args
        .get_one::<usize>("max-queries")
        .copied()
        .unwrap_or(DEFAULT_MAX_QUERIES);

    let findings = Finding::parse_document(&read(path)?);
    let plan = RetrievalGroupingPlanner::new(k, DEFAULT_TOP_K)?.plan(&findings);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(true)
}

fn graph() -> anyhow::Result<bool> {
    let pipeline = InspectionPipeline::offline()?;
    for stage in pipeline.graph().topological_order() {
        let spec = &stage.spec;
        let join = |fields: &mut dyn Iterator<Item = String>| fields.collect::<Vec<_>>().join(", ");
        let reads = join(
            &mut spec
                .reads
                .iter()
                .map(ToString::to_string)
                .chain(spec.optional_reads.iter().map(|f| format!("{f}?"))),
        );
        let writes = join(&mut spec.writes.iter().map(ToString::to_string));
        println!("{:<16} {:<10} [{reads}] -> [{writes}]", spec.id, format!("{:?}", spec.kind));
    }
    Ok(true)
}
