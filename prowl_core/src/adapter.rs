//! Discovery and execution of test case adapters.
//!
//! An adapter turns some input (a corpus file, a template, nothing at all)
//! into [`TestCase`]s. Adapters are packaged as directories holding an
//! `adapter.toml` manifest:
//!
//! ```toml
//! name = "simple"
//! landing-page = "test.html"
//! setup = ["./setup.sh", "{input}"]
//! generate = ["./generate.sh", "{output}"]
//! timeout-ms = 2000
//! ```
//!
//! Command arguments may reference `{input}` (setup only), `{output}`
//! (generate only) and `{root}`, the adapter's own directory. Commands run
//! with the adapter directory as working directory.

use crate::testcase::{TestCase, relative_name};
use anyhow::{Context, bail, ensure};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the manifest describing an adapter package.
pub const MANIFEST_NAME: &str = "adapter.toml";

const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Produces test cases for the runner.
pub trait Adapter {
    fn name(&self) -> &str;

    /// Prepares the adapter, optionally from an input file or directory.
    fn setup(&mut self, input: Option<&Path>) -> Result<(), anyhow::Error>;

    /// Adds the files of a newly generated test case to `testcase`.
    fn generate(&mut self, testcase: &mut TestCase) -> Result<(), anyhow::Error>;
}

/// A single adapter package that could not be loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load adapter from {path:?}: {reason}")]
pub struct AdapterLoadFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Adapters have already been loaded")]
    AlreadyLoaded,

    #[error("Adapter I/O error: {0}")]
    Io(String),

    #[error("Adapter in {0:?} does not define a name")]
    MissingName(PathBuf),

    #[error("Adapter in {path:?} has invalid name {name:?}")]
    InvalidName { path: PathBuf, name: String },

    #[error("Adapter name {name:?} is used by both {first:?} and {second:?}")]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(transparent)]
    Load(#[from] AdapterLoadFailure),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    name: Option<String>,
    #[serde(default = "default_landing_page")]
    landing_page: String,
    setup: Option<Vec<String>>,
    generate: Option<Vec<String>>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_landing_page() -> String {
    "test.html".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

/// A validated adapter manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterManifest {
    pub name: String,
    pub landing_page: String,
    pub setup: Vec<String>,
    pub generate: Vec<String>,
    pub timeout: Duration,
    /// Directory the manifest was loaded from.
    pub root: PathBuf,
}

/// Adapter names are lower case ASCII letters, digits, `-` and `_`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn read_manifest(dir: &Path) -> Result<ManifestFile, AdapterLoadFailure> {
    let manifest_path = dir.join(MANIFEST_NAME);
    let content = fs::read_to_string(&manifest_path).map_err(|e| AdapterLoadFailure {
        path: dir.to_path_buf(),
        reason: format!("failed to read {MANIFEST_NAME}: {e}"),
    })?;
    toml::from_str(&content).map_err(|e| AdapterLoadFailure {
        path: dir.to_path_buf(),
        reason: format!("failed to parse {MANIFEST_NAME}: {e}"),
    })
}

/// Outcome of [`AdapterRegistry::load`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Names of the adapters that were registered.
    pub loaded: Vec<String>,
    /// Packages that were skipped.
    pub failures: Vec<AdapterLoadFailure>,
}

/// The set of adapters available to the harness.
///
/// A registry is loaded once from an adapters directory. Loading again
/// requires an explicit [`AdapterRegistry::reset`].
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, AdapterManifest>,
    loaded: bool,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Registered adapter names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&AdapterManifest> {
        self.adapters.get(name)
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Adapter>> {
        self.adapters
            .get(name)
            .map(|manifest| Box::new(CommandAdapter::new(manifest.clone())) as Box<dyn Adapter>)
    }

    pub fn reset(&mut self) {
        self.adapters.clear();
        self.loaded = false;
    }

    /// Loads every adapter package found directly below `path`.
    ///
    /// Entries that are not directories or have no manifest are ignored.
    /// Packages whose manifest cannot be read or parsed, or that lack a
    /// `setup` or `generate` command, are skipped and listed in the returned
    /// report; with `strict` set the first such package aborts loading
    /// instead. A missing, invalid or duplicate adapter name always aborts.
    ///
    /// Nothing is registered when loading aborts.
    pub fn load(&mut self, path: &Path, strict: bool) -> Result<LoadReport, AdapterError> {
        if self.loaded {
            return Err(AdapterError::AlreadyLoaded);
        }

        let mut entries = fs::read_dir(path)
            .map_err(|e| AdapterError::Io(format!("Failed to read directory {:?}: {}", path, e)))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AdapterError::Io(format!("Failed to list directory {:?}: {}", path, e)))?;
        entries.sort();

        let mut found: BTreeMap<String, AdapterManifest> = BTreeMap::new();
        let mut report = LoadReport::default();
        for dir in entries {
            if !dir.is_dir() || !dir.join(MANIFEST_NAME).is_file() {
                debug!(path = ?dir, "Skipping entry without adapter manifest");
                continue;
            }

            let skipped = match read_manifest(&dir) {
                Ok(manifest) => {
                    let name = manifest
                        .name
                        .clone()
                        .ok_or_else(|| AdapterError::MissingName(dir.clone()))?;
                    if !is_valid_name(&name) {
                        return Err(AdapterError::InvalidName { path: dir, name });
                    }
                    if let Some(existing) = found.get(&name) {
                        return Err(AdapterError::DuplicateName {
                            name,
                            first: existing.root.clone(),
                            second: dir,
                        });
                    }
                    match validate(manifest, name, &dir) {
                        Ok(manifest) => {
                            debug!(name = %manifest.name, path = ?dir, "Registered adapter");
                            found.insert(manifest.name.clone(), manifest);
                            None
                        }
                        Err(failure) => Some(failure),
                    }
                }
                Err(failure) => Some(failure),
            };

            if let Some(failure) = skipped {
                if strict {
                    return Err(AdapterError::Load(failure));
                }
                warn!("{failure}");
                report.failures.push(failure);
            }
        }

        report.loaded = found.keys().cloned().collect();
        info!(
            count = report.loaded.len(),
            skipped = report.failures.len(),
            "Loaded adapters"
        );
        self.adapters = found;
        self.loaded = true;
        Ok(report)
    }
}

fn validate(
    manifest: ManifestFile,
    name: String,
    dir: &Path,
) -> Result<AdapterManifest, AdapterLoadFailure> {
    let missing = |what: &str| AdapterLoadFailure {
        path: dir.to_path_buf(),
        reason: format!("adapter {name:?} does not provide a {what} command"),
    };
    let setup = manifest
        .setup
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| missing("setup"))?;
    let generate = manifest
        .generate
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| missing("generate"))?;
    Ok(AdapterManifest {
        name,
        landing_page: manifest.landing_page,
        setup,
        generate,
        timeout: Duration::from_millis(manifest.timeout_ms),
        root: dir.to_path_buf(),
    })
}

/// Runs the commands of an [`AdapterManifest`].
pub struct CommandAdapter {
    manifest: AdapterManifest,
}

impl CommandAdapter {
    pub fn new(manifest: AdapterManifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &AdapterManifest {
        &self.manifest
    }

    fn expand(&self, argv: &[String], placeholder: &str, value: &str) -> Vec<String> {
        let root = self.manifest.root.to_string_lossy();
        argv.iter()
            .map(|arg| arg.replace(placeholder, value).replace("{root}", &root))
            .collect()
    }

    fn run(&self, argv: &[String]) -> Result<(), anyhow::Error> {
        let (program, args) = argv.split_first().context("Adapter command is empty")?;
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.manifest.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn adapter command {argv:?}"))?;

        let timeout = self.manifest.timeout;
        let start_time = Instant::now();
        loop {
            match child.try_wait()? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => bail!("Adapter command {argv:?} failed: {status}"),
                None if start_time.elapsed() > timeout => {
                    warn!(command = ?argv, "Adapter command timed out, killing...");
                    child
                        .kill()
                        .with_context(|| format!("Failed to kill adapter command {argv:?}"))?;
                    let _ = child.wait();
                    bail!("Adapter command {argv:?} timed out after {timeout:?}");
                }
                None => std::thread::sleep(COMMAND_POLL_INTERVAL),
            }
        }
    }
}

impl Adapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn setup(&mut self, input: Option<&Path>) -> Result<(), anyhow::Error> {
        let input = input
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let argv = self.expand(&self.manifest.setup, "{input}", &input);
        self.run(&argv)
            .with_context(|| format!("Setup of adapter {:?} failed", self.manifest.name))
    }

    fn generate(&mut self, testcase: &mut TestCase) -> Result<(), anyhow::Error> {
        let output = tempfile::Builder::new()
            .prefix("prowl_gen_")
            .tempdir()
            .context("Failed to create output directory")?;
        let argv = self.expand(
            &self.manifest.generate,
            "{output}",
            &output.path().to_string_lossy(),
        );
        self.run(&argv)
            .with_context(|| format!("Adapter {:?} failed to generate", self.manifest.name))?;

        let mut files = Vec::new();
        collect_files(output.path(), &mut files)?;
        files.sort();
        let mut generated = Vec::with_capacity(files.len());
        for file in files {
            let relative = file.strip_prefix(output.path())?;
            let name = relative_name(relative)
                .with_context(|| format!("Unsupported file name {relative:?}"))?;
            let data = fs::read(&file).with_context(|| format!("Failed to read {file:?}"))?;
            generated.push((name, data));
        }
        ensure!(
            generated
                .iter()
                .any(|(name, _)| name == testcase.landing_page()),
            "Adapter {:?} did not produce landing page {:?}",
            self.manifest.name,
            testcase.landing_page()
        );

        // staged so a rejected file leaves `testcase` untouched
        let mut staged = testcase.clone();
        for (name, data) in generated {
            staged.add_from_data(&name, data, true)?;
        }
        *testcase = staged;
        Ok(())
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), anyhow::Error> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {dir:?}"))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_names_are_lower_case() {
        assert!(is_valid_name("simple"));
        assert!(is_valid_name("dom-fuzz_2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("UppER"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("dotted.name"));
    }

    #[test]
    fn manifest_defaults_apply() {
        let manifest: ManifestFile = toml::from_str(
            r#"
            name = "simple"
            setup = ["true"]
            generate = ["true"]
            "#,
        )
        .unwrap();
        assert_eq!(manifest.landing_page, "test.html");
        assert_eq!(manifest.timeout_ms, 2000);

        let validated = validate(manifest, "simple".to_string(), Path::new("/adapters/simple"));
        let validated = validated.unwrap();
        assert_eq!(validated.timeout, Duration::from_millis(2000));
        assert_eq!(validated.root, Path::new("/adapters/simple"));
    }

    #[test]
    fn manifest_rejects_unknown_fields() {
        let parsed: Result<ManifestFile, _> = toml::from_str("name = \"a\"\nextra = 1\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn validate_requires_both_commands() {
        let manifest: ManifestFile =
            toml::from_str("name = \"half\"\nsetup = [\"true\"]\ngenerate = []\n").unwrap();
        let failure = validate(manifest, "half".to_string(), Path::new("/a/half")).unwrap_err();
        assert_eq!(failure.path, Path::new("/a/half"));
        assert!(failure.reason.contains("generate"), "{}", failure.reason);
    }

    #[test]
    fn expand_substitutes_placeholders() {
        let adapter = CommandAdapter::new(AdapterManifest {
            name: "simple".to_string(),
            landing_page: "test.html".to_string(),
            setup: vec![],
            generate: vec![],
            timeout: Duration::from_secs(1),
            root: PathBuf::from("/adapters/simple"),
        });
        let argv = vec![
            "{root}/gen.sh".to_string(),
            "--out={output}".to_string(),
            "{input}".to_string(),
        ];
        assert_eq!(
            adapter.expand(&argv, "{output}", "/tmp/out"),
            ["/adapters/simple/gen.sh", "--out=/tmp/out", "{input}"]
        );
    }
}
