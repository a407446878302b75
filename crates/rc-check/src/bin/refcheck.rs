//! refcheck: runs the built-in leak scenarios against a tracked heap.
//!
//! Each scenario is a numbered unit of work exercising one behavior the
//! harness must classify: balanced allocation, cache warm-up, collectable
//! cycles, a genuine leak, an over-release and a unit that writes to stderr.
//! The leak and over-release scenarios are skipped unless
//! `--include-broken` is given. The exit status is non-zero on any failure.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rc_check::{BatchRunner, HarnessConfig, Suite, Suppression, UnitOfWork};
use rc_runtime::{ObjId, TrackedHeap};

/// References held on the object the over-release scenario drains.
const PINNED_REFS: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "refcheck", version, about = "Reference-count leak regression checks")]
struct Cli {
    /// JSON harness configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rounds a scenario gets to stabilize
    #[arg(long)]
    max_rounds: Option<usize>,

    /// List the objects whose count changed when a scenario fails
    #[arg(long)]
    explain: bool,

    /// Let noisy scenarios write to stderr
    #[arg(long)]
    no_suppress: bool,

    /// Print the batch report as JSON
    #[arg(long)]
    json: bool,

    /// Also run the scenarios that are expected to fail
    #[arg(long)]
    include_broken: bool,

    /// Skip a scenario
    #[arg(long = "skip", value_name = "ID=REASON", value_parser = parse_skip)]
    skip: Vec<(u32, String)>,

    /// Mark a scenario as writing to stderr
    #[arg(long = "noisy", value_name = "ID")]
    noisy: Vec<u32>,
}

fn parse_skip(arg: &str) -> Result<(u32, String), String> {
    let (id, reason) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ID=REASON, got '{}'", arg))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid scenario id '{}'", id))?;
    Ok((id, reason.to_string()))
}

fn unit<'a>(body: impl FnMut() + 'a) -> UnitOfWork<'a> {
    Box::new(body)
}

fn scenarios<'a>(
    heap: &'a TrackedHeap,
    pinned: ObjId,
    registry: ObjId,
) -> Vec<(&'static str, UnitOfWork<'a>)> {
    vec![
        (
            "scenario1",
            unit(move || {
                let list = heap.alloc("list");
                let item = heap.alloc("int");
                heap.trap(heap.link(list, item));
                heap.trap(heap.decref(item));
                heap.trap(heap.decref(list));
            }),
        ),
        (
            "scenario2",
            unit(move || {
                let name = heap.intern("__name__");
                heap.trap(heap.decref(name));
            }),
        ),
        (
            "scenario3",
            unit(move || {
                let frame = heap.alloc("frame");
                let traceback = heap.alloc("traceback");
                heap.trap(heap.link(frame, traceback));
                heap.trap(heap.link(traceback, frame));
                heap.trap(heap.decref(frame));
                heap.trap(heap.decref(traceback));
            }),
        ),
        (
            "scenario4",
            unit(move || {
                let entry = heap.alloc("entry");
                heap.trap(heap.link(registry, entry));
                heap.trap(heap.decref(entry));
            }),
        ),
        (
            "scenario5",
            unit(move || {
                heap.trap(heap.decref(pinned));
            }),
        ),
        (
            "scenario6",
            unit(move || {
                eprintln!("warning: scenario6 called a deprecated entry point");
                let tmp = heap.alloc("str");
                heap.trap(heap.decref(tmp));
            }),
        ),
    ]
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_path(path)?,
        None => HarnessConfig::default(),
    };
    config.apply_env().context("reading environment overrides")?;
    if let Some(rounds) = cli.max_rounds {
        config.max_rounds = rounds;
    }
    if cli.explain {
        config.explain = true;
    }
    if cli.no_suppress {
        config.suppression = Suppression::Off;
    }
    config.validate()?;
    Ok(config)
}

fn build_suite<'a>(
    cli: &Cli,
    heap: &'a TrackedHeap,
    pinned: ObjId,
    registry: ObjId,
) -> Suite<'a> {
    let mut suite = Suite::new();
    suite.discover("scenario", scenarios(heap, pinned, registry));
    if !cli.include_broken {
        suite
            .skip(4, "retains one reference per call")
            .skip(5, "releases one reference too many per call");
    }
    suite.noisy(6);
    for (id, reason) in &cli.skip {
        suite.skip(*id, reason.clone());
    }
    for id in &cli.noisy {
        suite.noisy(*id);
    }
    suite
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;

    let heap = TrackedHeap::new();
    let pinned = heap.alloc("module");
    for _ in 0..PINNED_REFS {
        heap.incref(pinned)?;
    }
    let registry = heap.alloc("registry");

    let mut suite = build_suite(&cli, &heap, pinned, registry);
    let runner = BatchRunner::new(&heap, &config)?;
    let report = runner.run(&mut suite, &mut io::stdout().lock())?;

    if cli.json {
        println!("{}", report.to_json());
    } else {
        report.print_summary();
    }
    Ok(report.exit_code())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("refcheck: {:#}", err);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(args: &[&str]) -> (Cli, TrackedHeap) {
        let cli = Cli::try_parse_from(std::iter::once("refcheck").chain(args.iter().copied()))
            .unwrap();
        (cli, TrackedHeap::new())
    }

    #[test]
    fn test_broken_scenarios_skipped_by_default() {
        let (cli, heap) = fixture(&[]);
        let (pinned, registry) = (heap.alloc("module"), heap.alloc("registry"));
        let suite = build_suite(&cli, &heap, pinned, registry);

        assert_eq!(suite.len(), 6);
        assert!(suite.skip_reason(4).is_some());
        assert!(suite.skip_reason(5).is_some());
        assert!(suite.is_noisy(6));
    }

    #[test]
    fn test_include_broken_runs_every_scenario() {
        let (cli, heap) = fixture(&["--include-broken", "--skip", "2=flaky", "--noisy", "3"]);
        let (pinned, registry) = (heap.alloc("module"), heap.alloc("registry"));
        let suite = build_suite(&cli, &heap, pinned, registry);

        assert_eq!(suite.skip_reason(4), None);
        assert_eq!(suite.skip_reason(5), None);
        assert_eq!(suite.skip_reason(2), Some("flaky"));
        assert!(suite.is_noisy(3));
    }

    #[test]
    fn test_parse_skip_rejects_missing_reason() {
        assert_eq!(parse_skip("7=slow"), Ok((7, "slow".to_string())));
        assert!(parse_skip("7").is_err());
        assert!(parse_skip("x=slow").is_err());
    }
}
