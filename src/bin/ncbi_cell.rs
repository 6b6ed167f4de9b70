use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ncbi_cell::app::{Clients, Pipeline, PipelineOptions};
use ncbi_cell::cellxgene::CellxgeneHttpClient;
use ncbi_cell::census::{CensusHttpClient, TissueGeneralMap};
use ncbi_cell::citation::{CitationResolver, CurlPageFetcher, HttpPageFetcher};
use ncbi_cell::config::{ConfigLoader, ResolvedConfig};
use ncbi_cell::error::CellError;
use ncbi_cell::eutils::EutilsHttpClient;
use ncbi_cell::output::{OutputMode, ReportOutput};
use ncbi_cell::pool::WorkerPool;
use ncbi_cell::store::Store;
use ncbi_cell::tools::OntoGptCli;

#[derive(Parser)]
#[command(name = "ncbi-cell")]
#[command(about = "Harvest lung single-cell datasets, their publications and PubMed annotations")]
#[command(version)]
struct Cli {
    /// JSON config file; must exist when given.
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    work_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    #[command(about = "Run every stage in order (default)")]
    Run,
    #[command(about = "Locate lung datasets in the census")]
    Locate,
    #[command(about = "Resolve publication titles from dataset citations")]
    Titles,
    #[command(about = "Resolve PubMed ids for publication titles")]
    Pmids,
    #[command(about = "Run ontogpt pubmed-annotate for each PMID")]
    Annotate,
    #[command(about = "Download dataset assets")]
    Download,
    #[command(about = "Show which cache artifacts exist")]
    Status,
}

impl Command {
    fn runs_annotation(self) -> bool {
        matches!(self, Command::Run | Command::Annotate)
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CellError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CellError) -> u8 {
    match error {
        CellError::ConfigRead(_) | CellError::ConfigParse(_) | CellError::InvalidFileType(_) => 2,
        CellError::CensusHttp(_)
        | CellError::CensusStatus { .. }
        | CellError::CensusVersion(_)
        | CellError::PageHttp(_)
        | CellError::EutilsHttp(_)
        | CellError::EutilsStatus { .. }
        | CellError::CellxgeneHttp(_)
        | CellError::CellxgeneStatus { .. }
        | CellError::DatasetMismatch { .. }
        | CellError::MissingTool(_)
        | CellError::AnnotationFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    apply_overrides(&mut config, cli.work_dir, cli.workers)?;

    let output = ReportOutput::new(if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    });
    let command = cli.command.unwrap_or(Command::Run);
    let pipeline = build_pipeline(&config, command.runs_annotation())?;

    let printed = match command {
        Command::Run => output.print_pipeline(&pipeline.run()?),
        Command::Locate => output.print_locate(&pipeline.locate()?),
        Command::Titles => output.print_stage(&pipeline.titles()?),
        Command::Pmids => output.print_stage(&pipeline.pmids()?),
        Command::Annotate => output.print_stage(&pipeline.annotate()?),
        Command::Download => output.print_stage(&pipeline.download()?),
        Command::Status => output.print_status(&pipeline.status()?),
    };
    printed.into_diagnostic()
}

fn apply_overrides(
    config: &mut ResolvedConfig,
    work_dir: Option<Utf8PathBuf>,
    workers: Option<usize>,
) -> Result<(), CellError> {
    if let Some(work_dir) = work_dir {
        config.work_dir = work_dir;
    }
    if let Some(workers) = workers {
        if workers == 0 {
            return Err(CellError::ConfigParse(
                "workers must be at least 1".to_string(),
            ));
        }
        config.workers = workers;
    }
    Ok(())
}

type HttpPipeline = Pipeline<
    CensusHttpClient,
    HttpPageFetcher,
    CurlPageFetcher,
    EutilsHttpClient,
    OntoGptCli,
    CellxgeneHttpClient,
>;

fn build_pipeline(
    config: &ResolvedConfig,
    check_annotator: bool,
) -> Result<HttpPipeline, CellError> {
    let store = Store::new(config.work_dir.clone());
    store.ensure_dirs()?;

    let annotator = OntoGptCli::new(
        &config.annotation.program,
        &config.annotation.template,
        config.annotation.limit,
    );
    if check_annotator {
        match annotator.version() {
            Some(version) => tracing::debug!(%version, "found annotation tool"),
            None => tracing::warn!(
                program = %config.annotation.program,
                "annotation tool not found on PATH"
            ),
        }
    }

    let clients = Clients {
        census: CensusHttpClient::new(
            &config.census_release_url,
            &config.cellxgene_api_base,
            config.http_retries,
            TissueGeneralMap::with_defaults(&config.tissue_general_terms),
        )?,
        citations: CitationResolver::new(HttpPageFetcher::new()?, CurlPageFetcher::new())?,
        eutils: EutilsHttpClient::new(config.eutils.clone(), config.http_retries)?,
        annotator,
        cellxgene: CellxgeneHttpClient::new(&config.cellxgene_api_base, config.http_retries)?,
    };

    Ok(Pipeline::new(
        store,
        PipelineOptions::from(config),
        WorkerPool::new(config.workers)?,
        clients,
    ))
}
