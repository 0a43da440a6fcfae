#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use quill_core::CheckerConfig;
use thiserror::Error;

pub const MANIFEST_NAME: &str = "quill.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("manifest error: {message}")]
#[diagnostic(code(quill::manifest))]
pub struct ManifestError {
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedManifest {
    pub manifest_path: Option<PathBuf>,
    pub project_root: PathBuf,
    pub name: Option<String>,

    /// Language edition (e.g. "2026").
    pub edition: Option<String>,

    /// Limits from `[expansion]`; defaults when absent.
    pub checker: CheckerConfig,
}

impl ResolvedManifest {
    pub fn empty(project_root: PathBuf) -> Self {
        Self {
            manifest_path: None,
            project_root,
            name: None,
            edition: None,
            checker: CheckerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    project: Option<Project>,

    #[serde(default)]
    expansion: Option<CheckerConfig>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
struct Project {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    edition: Option<String>,
}

/// Nearest `quill.toml` at or above `start`.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(MANIFEST_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => return None,
        }
    }
}

pub fn load_resolved_manifest(start: &Path) -> Result<ResolvedManifest, ManifestError> {
    let project_root = if start.is_file() {
        start.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()
    } else {
        start.to_path_buf()
    };

    let Some(manifest_path) = find_manifest(&project_root) else {
        return Ok(ResolvedManifest::empty(project_root));
    };

    let manifest_dir = manifest_path
        .parent()
        .ok_or_else(|| ManifestError {
            message: "manifest has no parent directory".to_string(),
        })?
        .to_path_buf();

    let raw = fs::read_to_string(&manifest_path).map_err(|e| ManifestError {
        message: format!("failed to read {}: {e}", manifest_path.display()),
    })?;

    let mut out = parse_manifest(&raw).map_err(|e| ManifestError {
        message: format!("failed to parse {}: {}", manifest_path.display(), e.message),
    })?;
    out.manifest_path = Some(manifest_path);
    out.project_root = manifest_dir;
    Ok(out)
}

pub fn parse_manifest(raw: &str) -> Result<ResolvedManifest, ManifestError> {
    let parsed: Manifest = toml::from_str(raw).map_err(|e| ManifestError {
        message: e.to_string(),
    })?;
    let mut out = ResolvedManifest::empty(PathBuf::from("."));
    if let Some(project) = parsed.project {
        out.name = project.name;
        out.edition = project.edition;
    }
    if let Some(checker) = parsed.expansion {
        out.checker = checker;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_project_and_expansion_limits() {
        let raw = "[project]\nname = \"demo\"\nedition = \"2026\"\n\n[expansion]\nmax_expansion_size = 8\n";
        let m = parse_manifest(raw).expect("manifest");
        assert_eq!(m.name.as_deref(), Some("demo"));
        assert_eq!(m.edition.as_deref(), Some("2026"));
        assert_eq!(m.checker.max_expansion_size, 8);
        assert_eq!(
            m.checker.max_instantiation_depth,
            quill_core::DEFAULT_MAX_INSTANTIATION_DEPTH
        );
    }

    #[test]
    fn empty_manifest_uses_defaults() {
        let m = parse_manifest("").expect("manifest");
        assert_eq!(m.checker, CheckerConfig::default());
        assert!(m.edition.is_none());
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let err = parse_manifest("[linker]\npaths = []\n").expect_err("unknown table");
        assert!(err.message.contains("linker"));
    }

    #[test]
    fn manifest_is_found_by_walking_up() {
        let root = std::env::temp_dir().join(format!("quill-manifest-{}", std::process::id()));
        let nested = root.join("src").join("deep");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(root.join(MANIFEST_NAME), "[project]\nname = \"walk\"\n").expect("write");

        let m = load_resolved_manifest(&nested).expect("manifest");
        assert_eq!(m.name.as_deref(), Some("walk"));
        assert_eq!(m.project_root, root);

        let _ = fs::remove_dir_all(&root);
    }
}
