use anyhow::{Context, Result};
use docsink_core::ParserRegistry;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "docsink.json";

/// Top-level docsink.json schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocsinkConfig {
    /// Reject invalid nesting instead of repairing it.
    #[serde(default)]
    pub strict: bool,

    /// Sink id used when `--to` is not given.
    #[serde(default = "default_target")]
    pub target: String,

    /// File extension (without the dot) to parser id, consulted before the
    /// parsers' own extensions.
    #[serde(default)]
    pub formats: HashMap<String, String>,

    #[serde(default)]
    pub include: Option<Vec<String>>,

    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    #[serde(default = "default_out_dir")]
    pub out_dir: String,

    /// Stop a build at the first failing document.
    #[serde(default)]
    pub fail_fast: bool,

    /// Give every section title a generated anchor.
    #[serde(default)]
    pub section_anchors: bool,
}

fn default_target() -> String {
    "xhtml".to_string()
}

fn default_out_dir() -> String {
    "site".to_string()
}

impl Default for DocsinkConfig {
    fn default() -> Self {
        Self {
            strict: false,
            target: default_target(),
            formats: HashMap::new(),
            include: None,
            exclude: None,
            out_dir: default_out_dir(),
            fail_fast: false,
            section_anchors: false,
        }
    }
}

impl DocsinkConfig {
    /// Parser id for `path`, by configured mapping first, then by the
    /// extensions the registered parsers declare.
    pub fn parser_for(&self, path: &Path, registry: &ParserRegistry) -> Option<String> {
        let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
        if let Some(id) = self.formats.get(&extension) {
            return Some(id.clone());
        }
        registry
            .for_extension(&extension)
            .map(|parser| parser.id().to_string())
    }
}

/// Find the nearest directory at or above `start` holding a docsink.json.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.join(CONFIG_FILE).exists() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}

/// Load config from a docsink.json file, or return defaults if missing.
pub fn load_config(root: &Path) -> Result<DocsinkConfig> {
    let config_path = root.join(CONFIG_FILE);

    if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: DocsinkConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        log::debug!("Loaded {}", config_path.display());
        Ok(config)
    } else {
        Ok(DocsinkConfig::default())
    }
}

/// Load the config governing `start`, or defaults when no ancestor has one.
pub fn load_nearest(start: &Path) -> Result<DocsinkConfig> {
    let start = std::fs::canonicalize(start)
        .with_context(|| format!("Cannot resolve path '{}'", start.display()))?;
    match find_project_root(&start) {
        Some(root) => load_config(&root),
        None => Ok(DocsinkConfig::default()),
    }
}

/// Load the config governing the current directory.
pub fn load_for_cwd() -> Result<DocsinkConfig> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    load_nearest(&cwd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "strict": true,
            "target": "latex",
            "formats": { "txt": "apt", "wiki": "confluence" },
            "include": ["guides"],
            "exclude": ["drafts"],
            "outDir": "build/docs",
            "failFast": true,
            "sectionAnchors": true
        }"#;

        let config: DocsinkConfig = serde_json::from_str(json).unwrap();
        assert!(config.strict);
        assert_eq!(config.target, "latex");
        assert_eq!(config.formats["wiki"], "confluence");
        assert_eq!(config.include.as_deref(), Some(&["guides".to_string()][..]));
        assert_eq!(config.exclude.unwrap()[0], "drafts");
        assert_eq!(config.out_dir, "build/docs");
        assert!(config.fail_fast);
        assert!(config.section_anchors);
    }

    #[test]
    fn test_defaults() {
        let config: DocsinkConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.strict);
        assert_eq!(config.target, "xhtml");
        assert_eq!(config.out_dir, "site");
        assert!(config.formats.is_empty());
        assert!(config.include.is_none());
    }

    #[test]
    fn test_parser_lookup_prefers_configured_formats() {
        let registry = ParserRegistry::with_defaults();
        let mut config = DocsinkConfig::default();
        assert_eq!(
            config.parser_for(Path::new("docs/guide.apt"), &registry).as_deref(),
            Some("apt")
        );
        assert_eq!(config.parser_for(Path::new("notes.txt"), &registry), None);

        config.formats.insert("txt".into(), "twiki".into());
        assert_eq!(
            config.parser_for(Path::new("notes.TXT"), &registry).as_deref(),
            Some("twiki")
        );
        assert_eq!(config.parser_for(Path::new("Makefile"), &registry), None);
    }

    #[test]
    fn test_project_root_walks_up() {
        let dir = std::env::temp_dir().join("docsink-config-test");
        let nested = dir.join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), r#"{ "target": "rtf" }"#).unwrap();

        let root = find_project_root(&nested).unwrap();
        assert_eq!(root, dir);
        assert_eq!(load_config(&root).unwrap().target, "rtf");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
