//! Integration tests that drive the `docsink` binary.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn docsink_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docsink"))
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn temp_out(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("docsink-cli-test").join(name);
    // Clean up from previous runs
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn run(args: &[&str]) -> Output {
    Command::new(docsink_bin())
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run docsink")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn convert_writes_to_stdout() {
    let source = fixture("site/guide/setup.md");
    let output = run(&["convert", source.to_str().unwrap(), "--to", "latex"]);
    assert!(output.status.success());

    let tex = stdout(&output);
    assert!(tex.contains("\\section{Setup}"), "{tex}");
    assert!(tex.contains("\\begin{enumerate}"), "{tex}");
}

#[test]
fn convert_writes_to_out_file() {
    let out = temp_out("convert-out").join("index.html");
    let source = fixture("site/index.apt");
    let output = run(&[
        "convert",
        source.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--quiet",
    ]);
    assert!(output.status.success());

    let html = fs::read_to_string(&out).unwrap();
    assert!(html.contains("<b>docsink</b>"), "{html}");
    assert!(html.contains("href=\"./guide/setup.html\""), "{html}");

    let _ = fs::remove_dir_all(out.parent().unwrap());
}

#[test]
fn convert_rejects_unknown_extension_without_from() {
    let source = fixture("site/docsink.json");
    let output = run(&["convert", source.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--from"));
}

#[test]
fn validate_reports_ok_for_clean_documents() {
    let index = fixture("site/index.apt");
    let setup = fixture("site/guide/setup.md");
    let output = run(&["validate", index.to_str().unwrap(), setup.to_str().unwrap()]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert_eq!(text.matches(": OK").count(), 2, "{text}");
}

#[test]
fn validate_fails_on_broken_markup() {
    let broken = fixture("broken.xml");
    let output = run(&["validate", broken.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));

    let text = stdout(&output);
    assert!(text.contains("broken.xml"), "{text}");
    assert!(text.contains("error: [E001]"), "{text}");
}

#[test]
fn events_are_json_lines() {
    let source = fixture("site/guide/setup.md");
    let output = run(&["events", source.to_str().unwrap()]);
    assert!(output.status.success());

    let text = stdout(&output);
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["event"], "start_head");
    assert!(text.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
}

#[test]
fn formats_lists_parsers_and_sinks() {
    let output = run(&["formats"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for id in ["apt", "doc-book", "markdown", "twiki", "xhtml5"] {
        assert!(text.contains(id), "missing parser {id}");
    }
    for id in ["confluence", "itext", "latex", "rtf", "events"] {
        assert!(text.contains(id), "missing sink {id}");
    }
}

#[test]
fn build_honours_project_config() {
    let out = temp_out("build-site");
    let source = fixture("site");
    let output = run(&[
        "build",
        source.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--quiet",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    assert!(out.join("index.html").exists());
    assert!(out.join("guide/setup.html").exists());
    // Excluded by docsink.json
    assert!(!out.join("drafts").exists());

    // sectionAnchors gives every title an anchor
    let setup = fs::read_to_string(out.join("guide/setup.html")).unwrap();
    assert!(setup.contains("name=\"Setup\""), "{setup}");

    let _ = fs::remove_dir_all(&out);
}

#[test]
fn build_reports_unchanged_outputs() {
    let out = temp_out("build-twice");
    let source = fixture("site");
    let args = ["build", source.to_str().unwrap(), "--out", out.to_str().unwrap()];

    let first = run(&args);
    assert!(first.status.success());
    assert!(stdout(&first).contains("2 new"), "{}", stdout(&first));

    let second = run(&args);
    assert!(second.status.success());
    let text = stdout(&second);
    assert!(text.contains("Build complete!"), "{text}");
    assert!(text.contains("2 unchanged"), "{text}");

    let _ = fs::remove_dir_all(&out);
}
