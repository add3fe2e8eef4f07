mod scenarios;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;

use scenarios::{ScenarioOutcome, list_scenarios, run_scenario};

#[derive(Debug, Parser)]
#[command(name = "tandem-tester", version = "0.1.0")]
#[command(about = "Automated QA harness for the Tandem sync core - scripted and seeded scenarios")]
struct Args {
    /// Scenarios to run (comma-separated, or "all")
    #[arg(long, default_value = "smoke")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Seeds to run (comma-separated)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Number of iterations per scenario and seed
    #[arg(long, default_value_t = 1)]
    iterations: usize,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["console", "json"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let scenario_names = expand_scenarios(&args.scenarios);
    let seeds = parse_seeds(&args.seeds)?;

    log::debug!(
        "running {} scenario(s) x {} seed(s) x {} iteration(s)",
        scenario_names.len(),
        seeds.len(),
        args.iterations
    );

    let mut outcomes: Vec<ScenarioOutcome> = Vec::new();
    for name in &scenario_names {
        for &seed in &seeds {
            for iteration in 0..args.iterations {
                // distinct seed per iteration so repeats explore new orderings
                let run_seed = seed.wrapping_add(iteration as u64);
                let outcome = run_scenario(name, run_seed)
                    .await
                    .with_context(|| format!("scenario '{name}' seed {run_seed}"))?;
                print_progress(&outcome, args.verbose);
                outcomes.push(outcome);
            }
        }
    }

    write_report(&args, &outcomes, start_time)?;

    if outcomes.iter().any(|o| !o.passed) {
        std::process::exit(1);
    }

    Ok(())
}

fn maybe_list_scenarios(args: &Args) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let mut target = OutputTarget::new(args.output.clone())?;
    writeln!(target, "Available scenarios:")?;
    for name in list_scenarios() {
        writeln!(target, "  {name}")?;
    }
    target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "Tandem Sync Core Tester".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn expand_scenarios(scenarios_arg: &str) -> Vec<String> {
    let mut names = split_csv(scenarios_arg);
    if names.contains(&"all".to_string()) {
        names.retain(|s| s != "all");
        for name in list_scenarios() {
            if !names.contains(&name.to_string()) {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn split_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_seeds(input: &str) -> Result<Vec<u64>> {
    split_csv(input)
        .iter()
        .map(|token| {
            token
                .parse::<u64>()
                .with_context(|| format!("invalid seed '{token}'"))
        })
        .collect()
}

fn print_progress(outcome: &ScenarioOutcome, verbose: bool) {
    if outcome.passed {
        println!(
            "{} [seed {}] {} - {}ms",
            "PASS".green().bold(),
            outcome.seed,
            outcome.scenario,
            outcome.duration_ms
        );
    } else {
        eprintln!(
            "{} [seed {}] {} - {}ms",
            "FAIL".red().bold(),
            outcome.seed,
            outcome.scenario,
            outcome.duration_ms
        );
    }
    if verbose || !outcome.passed {
        for check in &outcome.checks {
            if check.passed {
                if verbose {
                    println!("    {} {}", "ok".green(), check.name);
                }
            } else {
                eprintln!("    {} {}: {}", "x".red(), check.name, check.detail);
            }
        }
    }
}

fn write_report(args: &Args, outcomes: &[ScenarioOutcome], start_time: Instant) -> Result<()> {
    let mut target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => {
            serde_json::to_writer_pretty(&mut target, outcomes)?;
            writeln!(target)?;
        }
        _ => {
            write_console_report(&mut target, outcomes)?;
        }
    }

    let duration = start_time.elapsed();
    writeln!(target)?;
    writeln!(target, "Total time: {duration:?}")?;
    target.flush_inner()?;
    Ok(())
}

fn write_console_report(target: &mut OutputTarget, outcomes: &[ScenarioOutcome]) -> Result<()> {
    if outcomes.is_empty() {
        writeln!(target, "No scenarios executed.")?;
        return Ok(());
    }
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let checks: usize = outcomes.iter().map(|o| o.checks.len()).sum();
    writeln!(target)?;
    writeln!(target, "Summary")?;
    writeln!(target, "-------")?;
    writeln!(
        target,
        "runs: {} passed / {} total ({checks} checks)",
        passed,
        outcomes.len()
    )?;
    for outcome in outcomes.iter().filter(|o| !o.passed) {
        for check in outcome.checks.iter().filter(|c| !c.passed) {
            writeln!(
                target,
                "  {} [seed {}] {}: {}",
                outcome.scenario, outcome.seed, check.name, check.detail
            )?;
        }
    }
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::Check;

    fn base_args() -> Args {
        Args {
            scenarios: "smoke".to_string(),
            list_scenarios: false,
            seeds: "1337".to_string(),
            iterations: 1,
            report: "console".to_string(),
            verbose: false,
            output: None,
        }
    }

    fn sample_outcome(passed: bool) -> ScenarioOutcome {
        ScenarioOutcome {
            scenario: "smoke".to_string(),
            seed: 1337,
            passed,
            duration_ms: 4,
            checks: vec![Check {
                name: "single credit".to_string(),
                passed,
                detail: "expected 1, got 1".to_string(),
            }],
        }
    }

    #[test]
    fn expand_scenarios_resolves_all_keyword() {
        let expanded = expand_scenarios("all");
        assert!(expanded.contains(&"smoke".to_string()));
        assert!(expanded.contains(&"random_play".to_string()));
    }

    #[test]
    fn expand_scenarios_preserves_explicit_order() {
        let expanded = expand_scenarios("word_caps,smoke");
        assert_eq!(
            expanded,
            vec!["word_caps".to_string(), "smoke".to_string()]
        );
    }

    #[test]
    fn parse_seeds_accepts_csv() {
        let seeds = parse_seeds("1, 42,1337").unwrap();
        assert_eq!(seeds, vec![1, 42, 1337]);
    }

    #[test]
    fn parse_seeds_rejects_garbage() {
        assert!(parse_seeds("1,banana").is_err());
    }

    #[test]
    fn maybe_list_scenarios_writes_output() {
        let temp = std::env::temp_dir().join("tandem-scenarios.txt");
        let args = Args {
            list_scenarios: true,
            output: Some(temp.clone()),
            ..base_args()
        };
        assert!(maybe_list_scenarios(&args).unwrap());
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("Available scenarios"));
        assert!(content.contains("credit_race"));
    }

    #[test]
    fn maybe_list_scenarios_returns_false_when_disabled() {
        let args = base_args();
        assert!(!maybe_list_scenarios(&args).unwrap());
    }

    #[test]
    fn write_report_emits_json() {
        let temp = std::env::temp_dir().join("tandem-report.json");
        let args = Args {
            report: "json".to_string(),
            output: Some(temp.clone()),
            ..base_args()
        };
        write_report(&args, &[sample_outcome(true)], Instant::now()).unwrap();
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("\"scenario\": \"smoke\""));
    }

    #[test]
    fn write_report_console_lists_failures() {
        let temp = std::env::temp_dir().join("tandem-report.txt");
        let args = Args {
            output: Some(temp.clone()),
            ..base_args()
        };
        write_report(&args, &[sample_outcome(false)], Instant::now()).unwrap();
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("0 passed / 1 total"));
        assert!(content.contains("single credit"));
    }

    #[test]
    fn write_report_console_handles_empty() {
        let temp = std::env::temp_dir().join("tandem-report-empty.txt");
        let args = Args {
            output: Some(temp.clone()),
            ..base_args()
        };
        write_report(&args, &[], Instant::now()).unwrap();
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("No scenarios executed"));
    }
}
