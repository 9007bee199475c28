//! `docsink build`: convert every recognised document under a directory.
//!
//! Outputs mirror the source tree under the output directory, with the
//! target format's extension. An output whose content hash is unchanged is
//! left untouched, so timestamps only move when a document really changed.

use anyhow::{Context, Result};
use colored::Colorize;
use docsink_core::{ParserRegistry, sinks};
use notify::{EventKind, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::config::DocsinkConfig;
use crate::convert::{self, RunOpts};

/// Options passed from the CLI to a build.
pub struct BuildOpts {
    pub to: String,
    pub run: RunOpts,
    pub fail_fast: bool,
    pub quiet: bool,
}

/// Outcome for a single document.
#[derive(Debug, PartialEq)]
enum FileStatus {
    New,
    Updated,
    Unchanged,
}

/// Aggregate report from one build pass.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub warnings: usize,
}

impl BuildReport {
    fn record(&mut self, status: FileStatus) {
        match status {
            FileStatus::New => self.new += 1,
            FileStatus::Updated => self.updated += 1,
            FileStatus::Unchanged => self.unchanged += 1,
        }
    }

    pub fn print_summary(&self) {
        println!();
        println!("{}", "========================================".dimmed());
        if self.failed > 0 {
            println!("{}", "Build finished with errors".red().bold());
        } else {
            println!("{}", "Build complete!".green().bold());
        }
        println!();

        let mut parts = Vec::new();
        if self.new > 0 {
            parts.push(format!("{} new", self.new));
        }
        if self.updated > 0 {
            parts.push(format!("{} updated", self.updated));
        }
        if self.unchanged > 0 {
            parts.push(format!("{} unchanged", self.unchanged));
        }
        if self.failed > 0 {
            parts.push(format!("{} failed", self.failed));
        }

        if parts.is_empty() {
            println!("{}", "No documents found.".dimmed());
        } else {
            println!("Documents: {}", parts.join(", "));
        }

        if self.warnings > 0 {
            println!("{} {} diagnostics reported", "WARNING:".yellow(), self.warnings);
        }
    }
}

/// Convert every matching document under `src_dir` into `out_dir`.
pub fn build_dir(
    src_dir: &Path,
    out_dir: &Path,
    config: &DocsinkConfig,
    opts: &BuildOpts,
) -> Result<BuildReport> {
    let extension = sinks::extension(&opts.to)
        .with_context(|| format!("No sink registered for format '{}'", opts.to))?;
    let registry = ParserRegistry::with_defaults();
    let mut report = BuildReport::default();

    if !opts.quiet {
        println!(
            "{} {} {}",
            "docsink build".bold(),
            src_dir.display().to_string().dimmed(),
            format!("→ {} ({})", out_dir.display(), opts.to).dimmed()
        );
    }

    for rel in list_sources(src_dir, out_dir)? {
        if !matches_include(&rel, config.include.as_deref())
            || matches_exclude(&rel, config.exclude.as_deref())
        {
            continue;
        }
        let source = src_dir.join(&rel);
        let Some(parser) = config.parser_for(&source, &registry) else {
            continue;
        };
        let target = out_dir.join(output_name(&rel, extension));

        match build_one(&source, &parser, &target, opts, &mut report) {
            Ok(status) => {
                if !opts.quiet && status != FileStatus::Unchanged {
                    let label = match status {
                        FileStatus::New => "[NEW]".green(),
                        _ => "[UPD]".cyan(),
                    };
                    println!("  {} {}", label, rel.display());
                }
                report.record(status);
            }
            Err(e) => {
                report.failed += 1;
                eprintln!("  {} {}: {:#}", "[FAIL]".red(), rel.display(), e);
                if opts.fail_fast {
                    return Err(e.context("Build stopped at the first failure"));
                }
            }
        }
    }

    Ok(report)
}

fn build_one(
    source: &Path,
    parser: &str,
    target: &Path,
    opts: &BuildOpts,
    report: &mut BuildReport,
) -> Result<FileStatus> {
    let mut rendered = Vec::new();
    let result = convert::render_file(source, parser, &opts.to, &mut rendered, opts.run)?;
    for diag in &result.diagnostics {
        log::warn!("{}: {}", source.display(), diag.message);
    }
    report.warnings += result.diagnostics.len();

    let status = if !target.exists() {
        FileStatus::New
    } else if file_hash(target)? == content_hash(&rendered) {
        return Ok(FileStatus::Unchanged);
    } else {
        FileStatus::Updated
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(target, &rendered).with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(status)
}

/// `guide/intro.apt` becomes `guide/intro.html` for an xhtml build.
fn output_name(rel: &Path, extension: &str) -> PathBuf {
    let stem = rel
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    rel.with_file_name(format!("{stem}.{extension}"))
}

fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn file_hash(path: &Path) -> Result<String> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content_hash(&content))
}

/// Recursively list files under `dir` as relative paths, skipping anything
/// inside `out_dir`.
fn list_sources(dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !dir.exists() {
        anyhow::bail!("Source directory {} does not exist", dir.display());
    }

    let out_dir = fs::canonicalize(out_dir).ok();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match &out_dir {
            Some(out) => fs::canonicalize(entry.path()).ok().as_ref() != Some(out),
            None => true,
        });

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(rel);
        }
    }

    Ok(files)
}

/// Whether any filter names the full relative path, the filename, or the
/// top-level directory.
fn matches_filter(rel_path: &Path, filters: &[String]) -> bool {
    let path_str = rel_path.to_string_lossy();
    let filename = rel_path
        .file_name()
        .map(|f| f.to_string_lossy())
        .unwrap_or_default();
    let top_dir = rel_path
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy())
        .unwrap_or_default();

    filters
        .iter()
        .any(|f| f == path_str.as_ref() || f == filename.as_ref() || f == top_dir.as_ref())
}

/// If include is None, everything matches.
fn matches_include(rel_path: &Path, include: Option<&[String]>) -> bool {
    include.is_none_or(|filters| matches_filter(rel_path, filters))
}

/// If exclude is None, nothing is excluded.
fn matches_exclude(rel_path: &Path, exclude: Option<&[String]>) -> bool {
    exclude.is_some_and(|filters| matches_filter(rel_path, filters))
}

/// Watch the source directory and rebuild on each change.
///
/// Debounces rapid events (e.g. editors that write in stages) with a 200ms
/// window. Changes under the output directory are ignored. Ctrl+C exits.
pub fn watch_and_rebuild(
    src_dir: &Path,
    out_dir: &Path,
    config: &DocsinkConfig,
    opts: &BuildOpts,
) -> Result<()> {
    let watch_dir = fs::canonicalize(src_dir)
        .with_context(|| format!("Cannot resolve path '{}'", src_dir.display()))?;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let out_abs = fs::canonicalize(out_dir)
        .with_context(|| format!("Cannot resolve path '{}'", out_dir.display()))?;

    println!(
        "{} {} for changes (Ctrl+C to stop)",
        "Watching".cyan().bold(),
        src_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;

    watcher.watch(&watch_dir, RecursiveMode::Recursive)?;

    let mut last_rebuild = Instant::now();
    let debounce = Duration::from_millis(200);

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(event) => {
                let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
                let affects_sources = event.paths.iter().any(|p| !p.starts_with(&out_abs));

                if relevant && affects_sources && last_rebuild.elapsed() > debounce {
                    // Let the editor finish writing
                    std::thread::sleep(Duration::from_millis(50));

                    match build_dir(src_dir, out_dir, config, opts) {
                        Ok(report) => {
                            if !opts.quiet {
                                report.print_summary();
                            }
                            last_rebuild = Instant::now();
                        }
                        Err(e) => {
                            eprintln!("{} {:#}", "Build error:".red().bold(), e);
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_tree(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("docsink-build-{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("guide")).unwrap();
        fs::write(dir.join("index.md"), "# Home\n\nWelcome.\n").unwrap();
        fs::write(dir.join("guide/intro.apt"), "Intro\n\n  Some text.\n").unwrap();
        fs::write(dir.join("notes.bin"), "ignored").unwrap();
        dir
    }

    fn opts() -> BuildOpts {
        BuildOpts {
            to: "xhtml".into(),
            run: RunOpts::default(),
            fail_fast: false,
            quiet: true,
        }
    }

    #[test]
    fn test_matches_include_none() {
        assert!(matches_include(Path::new("anything.md"), None));
    }

    #[test]
    fn test_matches_include_filename() {
        let filters = vec!["intro.apt".to_string()];
        assert!(matches_include(Path::new("guide/intro.apt"), Some(&filters)));
        assert!(!matches_include(Path::new("guide/other.apt"), Some(&filters)));
    }

    #[test]
    fn test_matches_exclude_top_dir() {
        let filters = vec!["drafts".to_string()];
        assert!(matches_exclude(Path::new("drafts/wip.md"), Some(&filters)));
        assert!(!matches_exclude(Path::new("guide/wip.md"), Some(&filters)));
        assert!(!matches_exclude(Path::new("drafts.md"), None));
    }

    #[test]
    fn test_output_name() {
        assert_eq!(
            output_name(Path::new("guide/intro.apt"), "html"),
            PathBuf::from("guide/intro.html")
        );
        assert_eq!(
            output_name(Path::new("page.xml"), "itext.xml"),
            PathBuf::from("page.itext.xml")
        );
    }

    #[test]
    fn test_content_hash_matches_file_hash() {
        let dir = std::env::temp_dir().join("docsink-build-hash");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(file_hash(&path).unwrap(), content_hash(b"hello"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_second_build_is_unchanged() {
        let dir = temp_tree("rebuild");
        let out = dir.join("site");
        let config = DocsinkConfig::default();

        let first = build_dir(&dir, &out, &config, &opts()).unwrap();
        assert_eq!(first.new, 2);
        assert_eq!(first.failed, 0);
        assert!(out.join("index.html").exists());
        assert!(out.join("guide/intro.html").exists());

        let second = build_dir(&dir, &out, &config, &opts()).unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.unchanged, 2);

        fs::write(dir.join("index.md"), "# Home\n\nChanged.\n").unwrap();
        let third = build_dir(&dir, &out, &config, &opts()).unwrap();
        assert_eq!(third.updated, 1);
        assert_eq!(third.unchanged, 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failures_do_not_stop_siblings() {
        let dir = temp_tree("failures");
        fs::write(dir.join("broken.xml"), "<document><body>").unwrap();
        let out = dir.join("site");
        let config = DocsinkConfig::default();

        let report = build_dir(&dir, &out, &config, &opts()).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.new, 2);

        let fail_fast = BuildOpts {
            fail_fast: true,
            ..opts()
        };
        assert!(build_dir(&dir, &dir.join("site2"), &config, &fail_fast).is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}
