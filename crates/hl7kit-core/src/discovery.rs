//! Message file discovery
//!
//! Walks directories and filters files through the include/exclude glob
//! patterns of the `files` config section, plus any `.hl7kitignore` found in
//! the root.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{FilesConfiguration, Hl7kitConfig};
use crate::{Hl7Error, Result};

/// Ignore file read from the discovery root
pub const IGNORE_FILE: &str = ".hl7kitignore";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Trait for file discovery functionality
pub trait FileDiscovery {
    /// All message files under the root, sorted
    fn discover_files(&self, config: &Hl7kitConfig) -> Result<Vec<PathBuf>>;

    /// Whether `path` passes the include and exclude patterns
    fn should_include(&self, path: &Path, config: &Hl7kitConfig) -> bool;
}

/// Compiled include/exclude patterns
#[derive(Debug, Clone)]
struct PatternSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PatternSet {
    fn compile(files: &FilesConfiguration, ignore: Vec<Pattern>) -> Result<Self> {
        let defaults = FilesConfiguration::default();
        let include = files
            .include
            .as_ref()
            .or(defaults.include.as_ref())
            .map(|p| compile_patterns(p, "include"))
            .transpose()?
            .unwrap_or_default();
        let mut exclude = files
            .exclude
            .as_ref()
            .map(|p| compile_patterns(p, "exclude"))
            .transpose()?
            .unwrap_or_default();
        exclude.extend(ignore);
        Ok(Self { include, exclude })
    }

    fn matches(&self, relative: &Path) -> bool {
        let text = relative.to_string_lossy().replace('\\', "/");
        self.include
            .iter()
            .any(|p| p.matches_with(&text, MATCH_OPTIONS))
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(&text, MATCH_OPTIONS))
    }
}

fn compile_patterns(patterns: &[String], kind: &str) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                Hl7Error::config_error(format!("Invalid {kind} pattern '{p}': {e}"))
            })
        })
        .collect()
}

/// Turn gitignore-style lines into glob patterns
fn ignore_patterns(content: &str) -> Vec<Pattern> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let glob = if let Some(dir) = line.strip_suffix('/') {
                format!("**/{dir}/**")
            } else if !line.contains(['*', '?', '/']) {
                format!("**/{line}")
            } else {
                line.to_string()
            };
            Pattern::new(&glob)
                .inspect_err(|e| warn!("Skipping ignore pattern '{}': {}", line, e))
                .ok()
        })
        .collect()
}

/// Default implementation of file discovery
#[derive(Debug, Clone)]
pub struct DefaultFileDiscovery {
    /// Root directory for file discovery
    pub root_dir: PathBuf,
}

impl DefaultFileDiscovery {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn load_ignore_patterns(&self) -> Vec<Pattern> {
        let path = self.root_dir.join(IGNORE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let patterns = ignore_patterns(&content);
                debug!("Loaded {} patterns from {}", patterns.len(), path.display());
                patterns
            }
            Err(_) => Vec::new(),
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root_dir).unwrap_or(path)
    }
}

impl FileDiscovery for DefaultFileDiscovery {
    fn discover_files(&self, config: &Hl7kitConfig) -> Result<Vec<PathBuf>> {
        info!("Discovering message files in {}", self.root_dir.display());
        let patterns = PatternSet::compile(&config.files_config(), self.load_ignore_patterns())?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root_dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file() && patterns.matches(self.relative(entry.path())) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        info!("Discovered {} message files", files.len());
        debug!("Files: {:?}", files);
        Ok(files)
    }

    fn should_include(&self, path: &Path, config: &Hl7kitConfig) -> bool {
        PatternSet::compile(&config.files_config(), self.load_ignore_patterns())
            .map(|patterns| patterns.matches(self.relative(path)))
            .unwrap_or(false)
    }
}

/// Expand command line paths: files are taken as given, directories are
/// searched with [`DefaultFileDiscovery`]
pub fn expand_paths(paths: &[PathBuf], config: &Hl7kitConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(DefaultFileDiscovery::new(path).discover_files(config)?);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(Hl7Error::io_error(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
            ));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "MSH|^~\\&|\r").unwrap();
    }

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                f.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_default_patterns() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.hl7");
        touch(temp.path(), "inbound/b.er7");
        touch(temp.path(), "inbound/deep/c.txt");
        touch(temp.path(), "notes.md");
        touch(temp.path(), "target/d.hl7");

        let discovery = DefaultFileDiscovery::new(temp.path());
        let files = discovery.discover_files(&Hl7kitConfig::default()).unwrap();
        assert_eq!(
            names(temp.path(), &files),
            vec!["a.hl7", "inbound/b.er7", "inbound/deep/c.txt"]
        );
    }

    #[test]
    fn test_custom_patterns() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "inbound/a.hl7");
        touch(temp.path(), "inbound/archive/b.hl7");
        touch(temp.path(), "outbound/c.hl7");

        let config: Hl7kitConfig = serde_json::from_str(
            r#"{"files": {"include": ["inbound/**/*.hl7"], "exclude": ["**/archive/**"]}}"#,
        )
        .unwrap();
        let discovery = DefaultFileDiscovery::new(temp.path());
        let files = discovery.discover_files(&config).unwrap();
        assert_eq!(names(temp.path(), &files), vec!["inbound/a.hl7"]);
    }

    #[test]
    fn test_ignore_file() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "keep.hl7");
        touch(temp.path(), "scratch/drop.hl7");
        touch(temp.path(), "old.hl7");
        fs::write(temp.path().join(IGNORE_FILE), "# local\nscratch/\nold.hl7\n").unwrap();

        let discovery = DefaultFileDiscovery::new(temp.path());
        let files = discovery.discover_files(&Hl7kitConfig::default()).unwrap();
        assert_eq!(names(temp.path(), &files), vec!["keep.hl7"]);
    }

    #[test]
    fn test_should_include() {
        let discovery = DefaultFileDiscovery::new("/data");
        let config = Hl7kitConfig::default();
        assert!(discovery.should_include(Path::new("/data/in/a.HL7"), &config));
        assert!(!discovery.should_include(Path::new("/data/in/a.json"), &config));
    }

    #[test]
    fn test_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        let config: Hl7kitConfig =
            serde_json::from_str(r#"{"files": {"include": ["[unclosed"]}}"#).unwrap();
        let discovery = DefaultFileDiscovery::new(temp.path());
        assert!(discovery.discover_files(&config).is_err());
    }

    #[test]
    fn test_expand_paths() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "dir/a.hl7");
        touch(temp.path(), "single.dat");

        let files = expand_paths(
            &[temp.path().join("single.dat"), temp.path().join("dir")],
            &Hl7kitConfig::default(),
        )
        .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("single.dat"));

        assert!(expand_paths(&[temp.path().join("missing")], &Hl7kitConfig::default()).is_err());
    }
}
