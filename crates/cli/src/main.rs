//! MedSearch command line
//!
//! Usage:
//!   medsearch "Patients with high-grade glioma treated with TTFields"
//!   medsearch --offline --max-iterations 2 adults with migraine on erenumab
//!   echo "children with asthma" | medsearch --json

use clap::Parser;
use medsearch_common::{
    config::AppConfig, create_refinement_loop, refinement::MAX_REQUEST_INITIAL_ITERATIONS,
    LoopResult, RefinementOutcome, RefinementRequest,
};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "medsearch")]
#[command(about = "Refine a clinical question into a PubMed query and list the matching articles")]
struct Args {
    /// Clinical question; read from stdin when omitted
    question: Vec<String>,

    /// Configuration file (overrides config/default and config/local)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Initial iteration budget for this run
    #[arg(
        short = 'm',
        long,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_REQUEST_INITIAL_ITERATIONS))
    )]
    max_iterations: Option<u32>,

    /// Use the keyword translator and heuristic refiner (no oracle calls)
    #[arg(long)]
    offline: bool,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Show refinement progress on stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Exit status for a rejected question
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config, args.verbose);

    if args.offline {
        config.refinement.translator = "keyword".to_string();
        config.refinement.refiner = "heuristic".to_string();
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let question = match read_question(&args.question, io::stdin().lock()) {
        Ok(Some(question)) => question,
        Ok(None) => {
            eprintln!("No question given");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error reading question: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match create_refinement_loop(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let request = RefinementRequest {
        text: question,
        max_initial_iterations: args.max_iterations,
    };

    match engine.run(&request).await {
        Ok(RefinementOutcome::Completed(result)) => {
            let rendered = if args.json {
                serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
            } else {
                Ok(render_text(&result))
            };
            match rendered {
                Ok(text) => {
                    println!("{}", text);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Ok(RefinementOutcome::Rejected { reason }) => {
            eprintln!("Question rejected: {}", reason);
            ExitCode::from(EXIT_REJECTED)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<AppConfig, medsearch_common::config::ConfigError> {
    match &args.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    }
}

/// Human-readable logs on stderr; quiet unless asked
fn init_tracing(config: &AppConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(&config.observability.log_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Join argument words, or prompt for one line on stdin
fn read_question(words: &[String], mut input: impl BufRead) -> io::Result<Option<String>> {
    let joined = words.join(" ");
    if !joined.trim().is_empty() {
        return Ok(Some(joined.trim().to_string()));
    }

    if io::stdin().is_terminal() {
        eprint!("Enter your clinical question: ");
        io::stderr().flush()?;
    }

    let mut line = String::new();
    input.read_line(&mut line)?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}

fn render_text(result: &LoopResult) -> String {
    let mut out = format!(
        "Query: {}\nStatus: {} after {} iteration(s), {} result(s)\n",
        result.query,
        result.status.as_str(),
        result.iterations,
        result.total_results()
    );

    for document in &result.documents.documents {
        out.push_str(&format!("\nPMID: {}\n{}\n", document.id, document.text));
    }

    out
}
