mod config;
mod source;
mod tree;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use hexpat::{DataSource, Endianness, EvalOptions, PatternEngine, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Settings;
use source::{FileSource, MMAP_THRESHOLD};
use tree::TreePrinter;

// Evaluation recurses once per nested type, so it runs on its own thread
const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EndianArg {
    Little,
    Big,
}

impl From<EndianArg> for Endianness {
    fn from(arg: EndianArg) -> Self {
        match arg {
            EndianArg::Little => Endianness::Little,
            EndianArg::Big => Endianness::Big,
        }
    }
}

/// Print the pattern tree a layout description produces over a file
#[derive(Debug, Parser)]
#[command(name = "hexpat-dump", version)]
struct Cli {
    /// Pattern source file
    pattern: PathBuf,
    /// File to describe
    data: PathBuf,
    /// Settings file (defaults to <config dir>/hexpat/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Default endianness for declarations without `le`/`be`
    #[arg(long, value_enum)]
    endian: Option<EndianArg>,
    /// Step budget for the evaluation (0 = unlimited)
    #[arg(long)]
    max_steps: Option<u64>,
    /// Also print nodes marked [[hidden]]
    #[arg(long)]
    show_hidden: bool,
    /// Value for an `in` variable, as NAME=VALUE
    #[arg(long = "define", short = 'D', value_parser = parse_define)]
    defines: Vec<(String, u128)>,
}

fn parse_define(arg: &str) -> Result<(String, u128), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", arg))?;
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => value.parse(),
    };
    let value = parsed.map_err(|e| format!("invalid value '{}': {}", value, e))?;
    Ok((name.trim().to_string(), value))
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };
    if let Some(endian) = cli.endian {
        settings.limits.default_endian = endian.into();
    }
    if let Some(max_steps) = cli.max_steps {
        settings.limits.max_steps = max_steps;
    }
    settings.output.show_hidden |= cli.show_hidden;
    Ok(settings)
}

fn dump(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(&cli.pattern)
        .with_context(|| format!("failed to read pattern {}", cli.pattern.display()))?;
    let data = FileSource::open(&cli.data, MMAP_THRESHOLD)
        .with_context(|| format!("failed to open {}", cli.data.display()))?;
    debug!(size = data.size(), mapped = data.is_mapped(), "opened data file");

    let engine = PatternEngine::with_config(settings.limits.clone());
    let program = engine
        .parse(&source)
        .with_context(|| format!("in {}", cli.pattern.display()))?;
    let options = EvalOptions {
        in_variables: cli
            .defines
            .into_iter()
            .map(|(name, value)| (name, Value::Unsigned(value)))
            .collect(),
        ..EvalOptions::default()
    };
    let evaluation = engine
        .evaluate_with_options(&program, &data, options)
        .with_context(|| format!("evaluating {}", cli.pattern.display()))?;
    info!(
        patterns = evaluation.stats.patterns,
        steps = evaluation.stats.steps,
        "evaluation complete"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    TreePrinter::new(&engine, &program, &data, &settings.output)
        .print(&evaluation.patterns, &mut out)?;
    for (name, value) in &evaluation.out_variables {
        writeln!(out, "out {} = {}", name, value)?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Log to stderr (stdout carries the tree)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let worker = std::thread::Builder::new()
        .name("evaluate".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || dump(cli, settings))
        .context("failed to spawn evaluation thread")?;
    match worker.join() {
        Ok(result) => result,
        Err(_) => bail!("evaluation thread panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define() {
        assert_eq!(parse_define("count=3").unwrap(), ("count".to_string(), 3));
        assert_eq!(parse_define("base = 0x10").unwrap(), ("base".to_string(), 16));
        assert!(parse_define("count").is_err());
        assert!(parse_define("count=abc").is_err());
    }

    #[test]
    fn test_cli_overrides_settings() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(b"[limits]\nmax_steps = 5\nmax_patterns = 7\n")
            .unwrap();
        let config_path = config.path().to_str().unwrap();
        let cli = Cli::parse_from([
            "hexpat-dump",
            "a.hexpat",
            "a.bin",
            "--config",
            config_path,
            "--endian",
            "big",
            "--max-steps",
            "99",
            "--show-hidden",
            "-D",
            "n=2",
        ]);
        assert_eq!(cli.defines, [("n".to_string(), 2)]);

        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.limits.default_endian, Endianness::Big);
        assert_eq!(settings.limits.max_steps, 99);
        assert_eq!(settings.limits.max_patterns, 7);
        assert!(settings.output.show_hidden);
    }

    #[test]
    fn test_dump_reports_parse_errors() {
        use std::ffi::OsStr;
        let mut pattern = tempfile::NamedTempFile::new().unwrap();
        pattern.write_all(b"struct A { u8 x").unwrap();
        let data = tempfile::NamedTempFile::new().unwrap();
        let cli = Cli::parse_from([
            OsStr::new("hexpat-dump"),
            pattern.path().as_os_str(),
            data.path().as_os_str(),
        ]);
        let err = dump(cli, Settings::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("parse error at line 1"));
    }
}
