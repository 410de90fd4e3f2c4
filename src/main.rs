use clap::{Parser, Subcommand};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use yieldkit::analysis::calibration::{self, Spectrometer};
use yieldkit::analysis::comparison;
use yieldkit::analysis::run_info::{ReportMarkers, RunReport};
use yieldkit::analysis::run_range::parse_run_list;
use yieldkit::analysis::settings::{AnalysisSettings, QuickSettings};
use yieldkit::error::{YieldError, YieldResult};

/// Charge-normalized data against simulation comparisons for spectrometer runs.
#[derive(Parser)]
#[command(name = "yieldkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare every configured variable between data and simulation
    Compare {
        /// Analysis settings (YAML)
        settings: PathBuf,
    },

    /// Area-normalized comparison of one data run against one simulation run
    Quick {
        /// Data run number (asked on stdin when absent)
        #[arg(long)]
        data_run: Option<u32>,

        /// Simulation run number (asked on stdin when absent)
        #[arg(long)]
        sim_run: Option<u32>,

        /// Quick comparison settings (YAML)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// Calibration quality checks over a batch of runs
    Qc {
        #[arg(value_enum)]
        spectrometer: Spectrometer,

        /// Directory holding the skimmed datasets
        dataset_dir: PathBuf,

        /// Runs, e.g. "6126,6128-6130"
        runs: String,

        /// Output base directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Parse a run report and print it in the YAML schema
    Report {
        path: PathBuf,

        /// Run number to record and validate against
        #[arg(short, long)]
        run: Option<u32>,
    },

    /// Expand a run list
    Runs { list: String },
}

/// Run numbers typed at a prompt, either one per line or several on a line.
struct RunPrompt<R> {
    input: R,
    pending: VecDeque<String>,
}

impl<R: BufRead> RunPrompt<R> {
    fn new(input: R) -> Self {
        Self {
            input,
            pending: VecDeque::new(),
        }
    }

    fn next_run(&mut self, prompt: &str) -> YieldResult<u32> {
        while self.pending.is_empty() {
            eprint!("{prompt}");
            io::stderr().flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(YieldError::RunRange("<end of input>".to_string()));
            }
            self.pending
                .extend(line.split_whitespace().map(str::to_string));
        }

        let token = self.pending.pop_front().unwrap_or_default();
        token.parse().map_err(|_| YieldError::RunRange(token))
    }
}

fn run(cli: Cli) -> YieldResult<()> {
    match cli.command {
        Commands::Compare { settings } => {
            let plan = AnalysisSettings::load(&settings)?;
            let sim_events = plan.load_simulation()?;
            let summary = comparison::run_comparison(&plan, &plan.source, &sim_events)?;
            for (variable, reason) in &summary.failed {
                log::warn!("{variable}: {reason}");
            }
        }

        Commands::Quick {
            data_run,
            sim_run,
            settings,
        } => {
            let settings = match settings {
                Some(path) => QuickSettings::from_yaml_file(&path)?,
                None => QuickSettings::default(),
            };
            let mut prompt = RunPrompt::new(io::stdin().lock());
            let data_run = match data_run {
                Some(run) => run,
                None => prompt.next_run("Enter data run number: ")?,
            };
            let sim_run = match sim_run {
                Some(run) => run,
                None => prompt.next_run("Enter simulation run number: ")?,
            };
            comparison::quick_compare(&settings, data_run, sim_run)?;
        }

        Commands::Qc {
            spectrometer,
            dataset_dir,
            runs,
            output,
        } => {
            let runs = parse_run_list(&runs)?;
            if runs.is_empty() {
                log::info!("No runs provided");
                return Ok(());
            }
            calibration::run_qc(spectrometer, &dataset_dir, &runs, &output)?;
        }

        Commands::Report { path, run } => {
            let report = RunReport::load(&path, &ReportMarkers::default())?;
            if let Some(run) = run
                && let Err(err) = report.validate(run)
            {
                log::warn!("{err}");
            }
            log::info!("Per-event scale: {}", report.scale());
            print!("{}", report.to_yaml(run)?);
        }

        Commands::Runs { list } => {
            let runs = parse_run_list(&list)?;
            let listed: Vec<String> = runs.iter().map(u32::to_string).collect();
            println!("{}", listed.join(","));
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=info`)

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
