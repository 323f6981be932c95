// In: src/bin/arrow_interop.rs

//! `arrow-interop`: the verifier's command line.
//!
//! `run` drives the cross-implementation matrix. `produce` and `consume`
//! speak the external implementation protocol, so this binary can itself be
//! registered as an external implementation. `flight-server` and
//! `flight-check` are the two ends of the RPC contract.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use arrow_interop::config::{BodyCompression, CodecOptions, InteropConfig};
use arrow_interop::error::{IntegrityError, Result};
use arrow_interop::golden::{CaseDescription, Corpus, GoldenCase};
use arrow_interop::observability::{init_logging, level_from_verbosity};
use arrow_interop::rpc::{self, scenarios, IntegrationClient};
use arrow_interop::{codec, log_event, orchestrator};

#[derive(Parser)]
#[command(name = "arrow-interop")]
#[command(version)]
#[command(about = "Cross-implementation Arrow columnar format verifier", long_about = None)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Append log records to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every case through every producer/consumer pair
    Run(RunArgs),
    /// Write the generated corpus to a directory
    Generate(GenerateArgs),
    /// Encode one case description to stdout
    Produce(ProduceArgs),
    /// Decode a stream from stdin and re-encode what was read to stdout
    Consume(CodecArgs),
    /// Serve the Flight contract
    FlightServer(ServerArgs),
    /// Run the Flight scenarios against a server
    FlightCheck(CheckArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory of golden files
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Leave the generated cases out
    #[arg(long)]
    no_generated: bool,

    /// Worker threads (default: all cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(long)]
    exclude_self_pairs: bool,

    /// Where `integration-report.json` is written
    #[arg(long)]
    report_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Only run cases whose name contains this
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Args)]
struct GenerateArgs {
    /// Output directory
    #[arg(short, long)]
    out: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    codec: CodecArgs,
}

#[derive(Args)]
struct ProduceArgs {
    /// Case description written by the orchestrator
    #[arg(long)]
    case_json: PathBuf,

    #[command(flatten)]
    codec: CodecArgs,
}

#[derive(Args)]
struct CodecArgs {
    /// Body buffer alignment, 8 or 64
    #[arg(long)]
    alignment: Option<usize>,

    #[arg(long, value_enum)]
    compression: Option<CompressionArg>,

    /// Send dictionary growth as delta batches
    #[arg(long)]
    dictionary_deltas: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CompressionArg {
    None,
    Lz4,
    Zstd,
}

impl From<CompressionArg> for BodyCompression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => BodyCompression::None,
            CompressionArg::Lz4 => BodyCompression::Lz4Frame,
            CompressionArg::Zstd => BodyCompression::Zstd,
        }
    }
}

impl CodecArgs {
    fn apply(&self, mut options: CodecOptions) -> Result<CodecOptions> {
        if let Some(alignment) = self.alignment {
            options = options.with_alignment(alignment);
        }
        if let Some(compression) = self.compression {
            options = options.with_compression(compression.into());
        }
        if self.dictionary_deltas {
            options = options.with_dictionary_deltas(true);
        }
        options.validate()?;
        Ok(options)
    }
}

#[derive(Args)]
struct ServerArgs {
    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Require this token in the handshake
    #[arg(long)]
    token: Option<String>,

    /// Start with an empty dataset store
    #[arg(long)]
    no_preload: bool,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct CheckArgs {
    /// Server address, e.g. http://127.0.0.1:50051
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    url: String,

    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Only use cases whose name contains this
    #[arg(long)]
    filter: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let level = level_from_verbosity(cli.verbose, cli.quiet);
    if let Err(e) = init_logging(Some(level), cli.log_file.as_deref()) {
        eprintln!("arrow-interop: cannot set up logging: {e}");
    }
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            log::error!("{e}");
            eprintln!("arrow-interop: {e}");
            process::exit(2);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<InteropConfig> {
    match path {
        Some(path) => InteropConfig::from_file(path),
        None => Ok(InteropConfig::default()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Run(args) => {
            let orch = &mut config.orchestrator;
            if args.corpus.is_some() {
                orch.corpus_dir = args.corpus;
            }
            if args.no_generated {
                orch.include_generated = false;
            }
            if args.jobs.is_some() {
                orch.jobs = args.jobs;
            }
            orch.exclude_self_pairs |= args.exclude_self_pairs;
            if let Some(dir) = args.report_dir {
                orch.report_dir = dir;
            }
            if let Some(seed) = args.seed {
                orch.seed = seed;
            }
            if args.filter.is_some() {
                orch.case_filter = args.filter;
            }
            config.validate()?;

            let report = orchestrator::run_from_config(&config)?;
            print!("{}", report.render_table());
            log::info!(
                "report written to {}",
                config
                    .orchestrator
                    .report_dir
                    .join(orchestrator::report::REPORT_FILE_NAME)
                    .display()
            );
            Ok(report.exit_code())
        }

        Command::Generate(args) => {
            let options = args.codec.apply(config.codec.clone())?;
            let seed = args.seed.unwrap_or(config.orchestrator.seed);
            let written = Corpus::generated(seed)?.write_corpus(&args.out, &options)?;
            log_event!("corpus_written", cases = written, dir = args.out.display());
            Ok(0)
        }

        Command::Produce(args) => {
            let options = args.codec.apply(config.codec.clone())?;
            let text = std::fs::read_to_string(&args.case_json)?;
            let description: CaseDescription = serde_json::from_str(&text)?;
            let name = args
                .case_json
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "case".to_string());
            let case = GoldenCase::from_description(name, &description)?;
            let bytes = codec::encode_dataset(&case.expected, &options)?;
            write_stdout(&bytes)?;
            Ok(0)
        }

        Command::Consume(args) => {
            let options = args.apply(config.codec.clone())?;
            let mut input = Vec::new();
            std::io::stdin().lock().read_to_end(&mut input)?;
            let dataset = codec::read_dataset(&input)?;
            log::debug!(
                "consumed {} batches, {} rows",
                dataset.num_batches(),
                dataset.num_rows()
            );
            write_stdout(&codec::encode_dataset(&dataset, &options)?)?;
            Ok(0)
        }

        Command::FlightServer(args) => {
            if let Some(host) = args.host {
                config.rpc.host = host;
            }
            if let Some(port) = args.port {
                config.rpc.port = port;
            }
            if args.token.is_some() {
                config.rpc.auth_token = args.token;
            }
            if args.no_preload {
                config.rpc.preload_generated = false;
            }
            let seed = args.seed.unwrap_or(config.orchestrator.seed);
            config.validate()?;
            runtime()?.block_on(rpc::serve(config.rpc, seed))?;
            Ok(0)
        }

        Command::FlightCheck(args) => {
            let seed = args.seed.unwrap_or(config.orchestrator.seed);
            let mut cases = Corpus::generated(seed)?;
            if let Some(pattern) = &args.filter {
                cases = cases.filter(pattern);
            }
            let results = runtime()?.block_on(async {
                let mut client =
                    IntegrationClient::connect(&args.url, config.rpc.codec.clone()).await?;
                if let Some(token) = args.token.as_deref().or(config.rpc.auth_token.as_deref()) {
                    client.handshake(Some(token)).await?;
                }
                Ok::<_, IntegrityError>(
                    scenarios::run_scenarios(&mut client, &cases, &config.compare).await,
                )
            })?;
            print!("{}", scenarios::render_scenarios(&results));
            Ok(scenarios::exit_code(&results))
        }
    }
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}
