use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use docsink_core::{ParserRegistry, Severity, sinks};
use std::io::Write;
use std::path::{Path, PathBuf};

mod build;
mod config;
mod convert;

use convert::RunOpts;

#[derive(Parser)]
#[command(
    name = "docsink",
    version,
    about = "Convert documentation between markup formats through a shared event stream"
)]
struct Cli {
    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log debug detail to stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Fail on invalid nesting instead of repairing it
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one document
    Convert {
        /// Source document
        file: PathBuf,

        /// Source format (default: from the file extension)
        #[arg(long)]
        from: Option<String>,

        /// Target format (default: docsink.json target, else xhtml)
        #[arg(long)]
        to: Option<String>,

        /// Output file (default: stdout)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Check document(s) for markup and nesting problems
    Validate {
        /// Documents to check
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Source format (default: from each file extension)
        #[arg(long)]
        from: Option<String>,
    },

    /// Dump a document's event stream as JSON lines
    Events {
        file: PathBuf,

        #[arg(long)]
        from: Option<String>,
    },

    /// List the registered source and target formats
    Formats,

    /// Convert every document under a directory
    Build {
        /// Source directory (default: current directory)
        dir: Option<PathBuf>,

        /// Output directory (default: docsink.json outDir, else "site")
        #[arg(long)]
        out: Option<PathBuf>,

        /// Target format (default: docsink.json target, else xhtml)
        #[arg(long)]
        to: Option<String>,

        /// Rebuild whenever a source changes
        #[arg(long)]
        watch: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = config::load_for_cwd()?;
    let opts = RunOpts::new(cli.strict, &config);

    match cli.command {
        Commands::Convert {
            file,
            from,
            to,
            out,
        } => {
            let to = to.unwrap_or_else(|| config.target.clone());
            handle_convert(&file, from.as_deref(), &to, out.as_deref(), &config, opts, cli.quiet)?;
        }
        Commands::Validate { files, from } => {
            handle_validate(&files, from.as_deref(), &config, opts)?;
        }
        Commands::Events { file, from } => {
            handle_convert(&file, from.as_deref(), "events", None, &config, opts, true)?;
        }
        Commands::Formats => handle_formats(),
        Commands::Build {
            dir,
            out,
            to,
            watch,
        } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from("."));
            // The tree being built may carry its own docsink.json
            let config = config::load_nearest(&dir)?;
            let opts = RunOpts::new(cli.strict, &config);
            let out = out.unwrap_or_else(|| dir.join(&config.out_dir));
            let build_opts = build::BuildOpts {
                to: to.unwrap_or_else(|| config.target.clone()),
                run: opts,
                fail_fast: config.fail_fast,
                quiet: cli.quiet,
            };
            let report = build::build_dir(&dir, &out, &config, &build_opts)?;
            if !cli.quiet {
                report.print_summary();
            }
            if watch {
                build::watch_and_rebuild(&dir, &out, &config, &build_opts)?;
            } else if report.failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn handle_convert(
    file: &Path,
    from: Option<&str>,
    to: &str,
    out: Option<&Path>,
    config: &config::DocsinkConfig,
    opts: RunOpts,
    quiet: bool,
) -> Result<()> {
    let registry = ParserRegistry::with_defaults();
    let from = convert::resolve_parser(file, from, config, &registry)?;

    let report = match out {
        Some(out_path) => {
            let mut buffer = Vec::new();
            let report = convert::render_file(file, &from, to, &mut buffer, opts)?;
            if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create '{}'", parent.display()))?;
            }
            std::fs::write(out_path, &buffer)
                .with_context(|| format!("Failed to write '{}'", out_path.display()))?;
            report
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let report = convert::render_file(file, &from, to, &mut lock, opts)?;
            lock.flush()?;
            report
        }
    };

    // Diagnostics go to stderr so stdout stays a clean document
    for diag in &report.diagnostics {
        let line_info = match diag.line {
            Some(line) => format!("{}:{}", file.display(), line),
            None => file.display().to_string(),
        };
        eprintln!("{}: {}", line_info, diag.message);
    }

    if let Some(out_path) = out {
        if !quiet {
            println!(
                "{} {} {} {}",
                "Converted".green().bold(),
                file.display(),
                "→".dimmed(),
                out_path.display()
            );
        }
    }

    Ok(())
}

fn handle_validate(
    files: &[PathBuf],
    from: Option<&str>,
    config: &config::DocsinkConfig,
    opts: RunOpts,
) -> Result<()> {
    let registry = ParserRegistry::with_defaults();
    let mut has_errors = false;

    for file in files {
        let parser = convert::resolve_parser(file, from, config, &registry)?;
        let diagnostics = convert::check_file(file, &parser, opts)?;

        if diagnostics.is_empty() {
            println!("{}: {}", file.display(), "OK".green());
            continue;
        }

        for diag in &diagnostics {
            let severity_str = match diag.severity {
                Severity::Error => {
                    has_errors = true;
                    format!("{}", "error".red().bold())
                }
                Severity::Warning => format!("{}", "warning".yellow().bold()),
                Severity::Info => format!("{}", "info".cyan().bold()),
            };

            let line_info = match diag.line {
                Some(line) => format!("{}:{}", file.display(), line),
                None => file.display().to_string(),
            };

            let code_str = match &diag.code {
                Some(c) => format!("[{}] ", c),
                None => String::new(),
            };

            println!("{line_info}: {severity_str}: {code_str}{}", diag.message);
        }
    }

    if has_errors {
        std::process::exit(1);
    }

    Ok(())
}

fn handle_formats() {
    let registry = ParserRegistry::with_defaults();

    println!("{}", "Parsers:".bold());
    for id in registry.ids() {
        let extensions = registry
            .get_parser(&id)
            .map(|p| p.extensions().join(", "))
            .unwrap_or_default();
        println!("  {:<12} {}", id, extensions.dimmed());
    }

    println!("{}", "Sinks:".bold());
    for id in sinks::SINK_IDS {
        let extension = sinks::extension(id).unwrap_or_default();
        println!("  {:<12} {}", id, extension.dimmed());
    }
}
