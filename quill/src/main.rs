#![forbid(unsafe_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, NamedSource};
use quill_core::{CheckedProgram, Checker, CheckerConfig};
use quill_interpret::{Vm, VmConfig};
use quill_parse::ParseConfig;
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

mod manifest;
mod report;

#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "Quill compiler front end with compile-time expansion statements")]
struct Cli {
    /// Language edition (e.g. "2026"). Overrides `quill.toml`.
    #[arg(long, global = true)]
    edition: Option<String>,

    /// Maximum nesting of instantiations. Overrides `[expansion]` in `quill.toml`.
    #[arg(long, global = true)]
    max_instantiation_depth: Option<usize>,

    /// Maximum elements one expansion statement may unroll.
    #[arg(long, global = true)]
    max_expansion_size: Option<u64>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Parse and check source files.
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Check a file and run its entry cell.
    Run {
        #[arg(default_value = "main.quill")]
        path: PathBuf,

        #[arg(long, default_value = "main")]
        entry: String,
    },
    /// Print the program with every expansion statement unrolled.
    Expand {
        #[arg(default_value = "main.quill")]
        path: PathBuf,

        /// Also write a JSON expansion report here.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Format a source file.
    Fmt {
        #[arg(default_value = "main.quill")]
        path: PathBuf,

        /// Fail if the file is not already formatted.
        #[arg(long, default_value_t = false)]
        check: bool,

        /// Rewrite the file in place.
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

struct Settings {
    parse: ParseConfig,
    checker: CheckerConfig,
}

fn resolve_settings(cli: &Cli, path: &Path) -> miette::Result<Settings> {
    let resolved = manifest::load_resolved_manifest(path)?;
    tracing::debug!(manifest = ?resolved.manifest_path, "resolved manifest");
    let mut checker = resolved.checker.clone();
    if let Some(d) = cli.max_instantiation_depth {
        checker.max_instantiation_depth = d;
    }
    if let Some(n) = cli.max_expansion_size {
        checker.max_expansion_size = n;
    }
    Ok(Settings {
        parse: ParseConfig {
            edition: cli.edition.clone().or(resolved.edition),
        },
        checker,
    })
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Read, parse, and check one file, attaching the source to any diagnostic.
fn check_file(path: &Path, settings: &Settings) -> miette::Result<(String, CheckedProgram)> {
    let src = fs::read_to_string(path).into_diagnostic()?;
    let source = NamedSource::new(display_path(path), src.clone());
    let program = quill_parse::parse_source_with_config(&src, &settings.parse)
        .map_err(|e| e.with_source_code(source.clone()))?;
    let mut checker = Checker::with_config(settings.checker.clone());
    let checked = checker.check_program(&program).map_err(|e| {
        // Every collected diagnostic is printed; the first becomes the error.
        for extra in checker.diagnostics().iter().skip(1) {
            let report = miette::Report::new(extra.clone()).with_source_code(source.clone());
            eprintln!("{report:?}");
        }
        miette::Report::new(e).with_source_code(source.clone())
    })?;
    Ok((src, checked))
}

fn init_tracing() {
    // QUILL_LOG_STYLE: "compact" (default) or "full" (timestamps and span events).
    let Ok(filter) = EnvFilter::try_from_env("QUILL_LOG") else {
        return;
    };
    let style = std::env::var("QUILL_LOG_STYLE").unwrap_or_default();
    if style == "full" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
    tracing::debug!("tracing initialized");
}

fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.cmd {
        Cmd::Check { paths } => {
            // Files share nothing, so each gets its own checker.
            let results: Vec<(PathBuf, miette::Result<()>)> = paths
                .par_iter()
                .map(|p| {
                    let res = resolve_settings(&cli, p).and_then(|s| check_file(p, &s).map(|_| ()));
                    (p.clone(), res)
                })
                .collect();
            let mut failed = 0usize;
            for (path, res) in results {
                match res {
                    Ok(()) => println!("ok: {}", display_path(&path)),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{e:?}");
                    }
                }
            }
            if failed > 0 {
                return Err(miette::miette!("{failed} of {} files failed to check", paths.len()));
            }
            Ok(())
        }
        Cmd::Run { path, entry } => {
            let settings = resolve_settings(&cli, path)?;
            let (src, checked) = check_file(path, &settings)?;
            let outcome = Vm::new(&checked, VmConfig::default())
                .run_entry(entry)
                .map_err(|e| {
                    miette::Report::new(e)
                        .with_source_code(NamedSource::new(display_path(path), src.clone()))
                })?;
            print!("{}", outcome.stdout);
            Ok(())
        }
        Cmd::Expand {
            path,
            report: report_path,
        } => {
            let settings = resolve_settings(&cli, path)?;
            let (_, checked) = check_file(path, &settings)?;
            let mut program = checked.program.clone();
            program
                .stmts
                .extend(checked.instantiations.iter().cloned().map(quill_ast::Stmt::CellDef));
            print!("{}", quill_parse::format_elaborated(&program));
            if let Some(out) = report_path {
                let r = report::expansion_report(&display_path(path), &checked);
                report::write_report(out, &r)?;
                tracing::info!(path = %display_path(out), "wrote expansion report");
            }
            Ok(())
        }
        Cmd::Fmt { path, check, write } => {
            let settings = resolve_settings(&cli, path)?;
            let src = fs::read_to_string(path).into_diagnostic()?;
            let program = quill_parse::parse_source_with_config(&src, &settings.parse)?;
            let formatted = quill_parse::format_program(&program);

            if *check {
                if formatted != src {
                    return Err(miette::miette!("formatting differs: {}", display_path(path)));
                }
                return Ok(());
            }
            if *write {
                fs::write(path, formatted).into_diagnostic()?;
                return Ok(());
            }
            print!("{formatted}");
            Ok(())
        }
    }
}
