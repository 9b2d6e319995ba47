//! Module directories, marker files and numbered binaries
//!
//! A directory is a module when it holds the marker file. Each rebuild writes
//! `<stem>.<N>.<dylib-ext>` into the output directory; the loader always picks
//! the highest `N`, so bindings into an older, still-loaded build keep working
//! while new bindings move to the new one.

use crate::config::ModulesConfig;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Contents of the marker file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,

    /// Source globs relative to the module directory; defaults to the
    /// configured `source_globs`
    #[serde(default)]
    pub sources: Option<Vec<String>>,

    /// Dependency libraries loaded into the module's resolution context
    #[serde(default)]
    pub dependencies: Vec<PathBuf>,
}

impl ModuleManifest {
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// A built binary and its rebuild number
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct NumberedBinary {
    pub number: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModuleDir {
    root: PathBuf,
    manifest: ModuleManifest,
    config: ModulesConfig,
}

impl ModuleDir {
    /// Open the module rooted at `root`; fails when the marker is missing or
    /// malformed
    pub fn open(root: impl Into<PathBuf>, config: &ModulesConfig) -> Result<Self> {
        let root = root.into();
        let marker = root.join(&config.marker_file);
        let content = fs::read_to_string(&marker).map_err(|e| BridgeError::Manifest {
            path: marker.clone(),
            reason: e.to_string(),
        })?;
        let manifest = ModuleManifest::parse(&marker, &content)?;
        Ok(Self {
            root,
            manifest,
            config: config.clone(),
        })
    }

    /// Every module directory below `root`, sorted by path
    pub fn discover(root: &Path, config: &ModulesConfig) -> Result<Vec<Self>> {
        let pattern = format!("{}/**/{}", root.display(), config.marker_file);
        let entries = glob::glob(&pattern).map_err(|e| BridgeError::Manifest {
            path: root.to_path_buf(),
            reason: format!("glob pattern error: {e}"),
        })?;

        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            if !entry.is_file() {
                continue;
            }
            if let Some(dir) = entry.parent() {
                dirs.push(Self::open(dir, config)?);
            }
        }
        dirs.sort_by(|a, b| a.root.cmp(&b.root));
        Ok(dirs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.output_dir)
    }

    /// Dependency paths resolved against the module directory
    pub fn dependencies(&self) -> Vec<PathBuf> {
        self.manifest.dependencies.iter().map(|dep| self.root.join(dep)).collect()
    }

    /// Built binaries, lowest number first
    pub fn binaries(&self) -> Result<Vec<NumberedBinary>> {
        let dir = self.output_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(number) = parse_binary_name(file_name, &self.config.binary_stem) {
                found.push(NumberedBinary { number, path });
            }
        }
        found.sort();
        Ok(found)
    }

    /// Highest-numbered binary, which is the one the loader uses
    pub fn latest_binary(&self) -> Result<Option<NumberedBinary>> {
        Ok(self.binaries()?.pop())
    }

    /// Where the next rebuild should write its output
    pub fn next_binary_path(&self) -> Result<PathBuf> {
        let next = self.latest_binary()?.map_or(1, |b| b.number + 1);
        Ok(self.output_dir().join(binary_name(&self.config.binary_stem, next)))
    }

    /// Source files matched by the manifest's globs (or the configured ones)
    pub fn sources(&self) -> Result<Vec<PathBuf>> {
        let globs = self.manifest.sources.as_ref().unwrap_or(&self.config.source_globs);
        let mut files = Vec::new();
        for pattern in globs {
            let full = format!("{}/{}", self.root.display(), pattern);
            let entries = glob::glob(&full).map_err(|e| BridgeError::Manifest {
                path: self.root.clone(),
                reason: format!("bad source glob '{pattern}': {e}"),
            })?;
            files.extend(entries.flatten().filter(|p| p.is_file()));
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// A rebuild is needed when there is no binary yet, or when any source
    /// was modified after the newest binary was written
    pub fn needs_rebuild(&self) -> Result<bool> {
        let Some(latest) = self.latest_binary()? else {
            return Ok(true);
        };
        let built = modified(&latest.path)?;
        for source in self.sources()? {
            if modified(&source)? > built {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}

/// `<stem>.<n>.<dylib-ext>`
pub fn binary_name(stem: &str, number: u64) -> String {
    format!("{stem}.{number}.{}", std::env::consts::DLL_EXTENSION)
}

fn parse_binary_name(file_name: &str, stem: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(stem)?.strip_prefix('.')?;
    let number = rest.strip_suffix(std::env::consts::DLL_EXTENSION)?.strip_suffix('.')?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_module(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("tether.module"), format!("name = \"{name}\"\n")).unwrap();
        fs::write(dir.join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        dir
    }

    fn touch_binary(dir: &Path, number: u64) -> PathBuf {
        let out = dir.join("bin");
        fs::create_dir_all(&out).unwrap();
        let path = out.join(binary_name("module", number));
        fs::write(&path, b"\x7fELF").unwrap();
        path
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn test_parse_binary_name() {
        let ext = std::env::consts::DLL_EXTENSION;
        assert_eq!(parse_binary_name(&format!("module.7.{ext}"), "module"), Some(7));
        assert_eq!(parse_binary_name(&format!("module.12.{ext}"), "module"), Some(12));
        assert_eq!(parse_binary_name(&format!("module..{ext}"), "module"), None);
        assert_eq!(parse_binary_name(&format!("other.1.{ext}"), "module"), None);
        assert_eq!(parse_binary_name("module.1.txt", "module"), None);
        assert_eq!(parse_binary_name(&format!("module.x1.{ext}"), "module"), None);
    }

    #[test]
    fn test_discover_finds_marked_directories() {
        let temp = TempDir::new().unwrap();
        write_module(temp.path(), "game");
        write_module(&temp.path().join("nested"), "ui");
        fs::create_dir_all(temp.path().join("plain")).unwrap();

        let config = ModulesConfig::default();
        let dirs = ModuleDir::discover(temp.path(), &config).unwrap();
        let names: Vec<&str> = dirs.iter().map(ModuleDir::name).collect();
        assert_eq!(names, vec!["game", "ui"]);
    }

    #[test]
    fn test_malformed_marker() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tether.module"), "name = [").unwrap();
        let err = ModuleDir::open(temp.path(), &ModulesConfig::default()).unwrap_err();
        assert!(matches!(err, BridgeError::Manifest { .. }));
    }

    #[test]
    fn test_highest_number_wins() {
        let temp = TempDir::new().unwrap();
        let dir = write_module(temp.path(), "game");
        let module = ModuleDir::open(&dir, &ModulesConfig::default()).unwrap();

        assert!(module.latest_binary().unwrap().is_none());
        assert!(module.next_binary_path().unwrap().ends_with(binary_name("module", 1)));

        touch_binary(&dir, 2);
        touch_binary(&dir, 10);
        touch_binary(&dir, 9);
        fs::write(dir.join("bin/notes.txt"), "").unwrap();

        let numbers: Vec<u64> = module.binaries().unwrap().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![2, 9, 10]);
        assert_eq!(module.latest_binary().unwrap().unwrap().number, 10);
        assert!(module.next_binary_path().unwrap().ends_with(binary_name("module", 11)));
    }

    #[test]
    fn test_needs_rebuild_tracks_source_mtime() {
        let temp = TempDir::new().unwrap();
        let dir = write_module(temp.path(), "game");
        let module = ModuleDir::open(&dir, &ModulesConfig::default()).unwrap();
        assert!(module.needs_rebuild().unwrap());

        let now = SystemTime::now();
        let binary = touch_binary(&dir, 1);
        set_mtime(&dir.join("src/lib.rs"), now - Duration::from_secs(60));
        set_mtime(&binary, now);
        assert!(!module.needs_rebuild().unwrap());

        set_mtime(&dir.join("src/lib.rs"), now + Duration::from_secs(60));
        assert!(module.needs_rebuild().unwrap());
    }

    #[test]
    fn test_manifest_sources_and_dependencies() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("game");
        fs::create_dir_all(dir.join("scripts")).unwrap();
        fs::write(
            dir.join("tether.module"),
            "name = \"game\"\nsources = [\"scripts/*.rs\"]\ndependencies = [\"libs/physics.so\"]\n",
        )
        .unwrap();
        fs::write(dir.join("scripts/a.rs"), "").unwrap();
        fs::write(dir.join("scripts/b.txt"), "").unwrap();

        let module = ModuleDir::open(&dir, &ModulesConfig::default()).unwrap();
        assert_eq!(module.sources().unwrap(), vec![dir.join("scripts/a.rs")]);
        assert_eq!(module.dependencies(), vec![dir.join("libs/physics.so")]);
    }
}
