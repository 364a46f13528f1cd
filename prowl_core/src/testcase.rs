use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum TestCaseError {
    /// The file name is empty, absolute, or escapes the test case root.
    #[error("Invalid test case file name {0:?}")]
    InvalidName(String),

    #[error("File {0:?} already exists in the test case")]
    Duplicate(String),

    #[error("Landing page {0:?} cannot be optional")]
    OptionalLandingPage(String),

    #[error("Test case I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TestCaseError {
    fn from(err: std::io::Error) -> Self {
        TestCaseError::Io(err.to_string())
    }
}

#[derive(Debug, Clone)]
enum FileSource {
    Data(Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
struct TestFile {
    name: String,
    source: FileSource,
    required: bool,
}

/// The files making up one test case.
///
/// Every test case has a landing page, the entry point the target is pointed
/// at. Other files are either required or optional; optional files (such as
/// includes picked up while serving) do not have to be requested for a trial
/// to count as fully delivered.
#[derive(Debug, Clone)]
pub struct TestCase {
    landing_page: String,
    adapter_name: String,
    files: Vec<TestFile>,
    existing_paths: HashSet<String>,
}

impl TestCase {
    pub fn new(landing_page: impl Into<String>, adapter_name: impl Into<String>) -> Self {
        Self {
            landing_page: landing_page.into(),
            adapter_name: adapter_name.into(),
            files: Vec::new(),
            existing_paths: HashSet::new(),
        }
    }

    pub fn landing_page(&self) -> &str {
        &self.landing_page
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.existing_paths.contains(name)
    }

    /// Names of all files, in the order they were added.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }

    pub fn optional(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|f| !f.required)
            .map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn add_from_data(
        &mut self,
        name: &str,
        data: impl Into<Vec<u8>>,
        required: bool,
    ) -> Result<(), TestCaseError> {
        self.add(name, FileSource::Data(data.into()), required)
    }

    /// Adds a file whose content is read from `src` when the test case is dumped.
    pub fn add_from_file(
        &mut self,
        name: &str,
        src: impl Into<PathBuf>,
        required: bool,
    ) -> Result<(), TestCaseError> {
        self.add(name, FileSource::Path(src.into()), required)
    }

    fn add(&mut self, name: &str, source: FileSource, required: bool) -> Result<(), TestCaseError> {
        let name = sanitize_name(name)?;
        if self.existing_paths.contains(&name) {
            return Err(TestCaseError::Duplicate(name));
        }
        if !required && name == self.landing_page {
            return Err(TestCaseError::OptionalLandingPage(name));
        }
        self.existing_paths.insert(name.clone());
        self.files.push(TestFile {
            name,
            source,
            required,
        });
        Ok(())
    }

    /// Records the entries of `files` that live under `dir` as optional files.
    ///
    /// Each file is named by its path relative to `dir`, under `prefix` when
    /// one is given. Entries outside `dir`, entries that are not regular files,
    /// and names already present are skipped. Names that cannot be stored as
    /// optional files (invalid names, the landing page) are skipped with a
    /// warning.
    ///
    /// # Returns
    /// The number of files added.
    pub fn add_batch<S: AsRef<str>>(
        &mut self,
        dir: &Path,
        files: &[S],
        prefix: &str,
    ) -> Result<usize, TestCaseError> {
        let prefix = prefix.trim_matches('/');
        let mut added = 0;
        for item in files {
            let path = Path::new(item.as_ref());
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let Some(relative) = relative_name(relative) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let name = if prefix.is_empty() {
                relative
            } else {
                format!("{prefix}/{relative}")
            };
            if self.contains(&name) {
                continue;
            }
            if let Err(err) = sanitize_name(&name) {
                warn!(path = ?path, "Skipping served include: {err}");
                continue;
            }
            if name == self.landing_page {
                let err = TestCaseError::OptionalLandingPage(name);
                warn!(path = ?path, "Skipping served include: {err}");
                continue;
            }
            self.add_from_file(&name, path, false)?;
            added += 1;
        }
        Ok(added)
    }

    /// Writes every file of the test case below `dst`.
    pub fn dump(&self, dst: &Path) -> Result<(), TestCaseError> {
        for file in &self.files {
            let out_path = dst.join(&file.name);
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    TestCaseError::Io(format!("Failed to create directory {:?}: {}", parent, e))
                })?;
            }
            match &file.source {
                FileSource::Data(data) => fs::write(&out_path, data).map_err(|e| {
                    TestCaseError::Io(format!("Failed to write {:?}: {}", out_path, e))
                })?,
                FileSource::Path(src) => {
                    fs::copy(src, &out_path).map_err(|e| {
                        TestCaseError::Io(format!(
                            "Failed to copy {:?} to {:?}: {}",
                            src, out_path, e
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Joins the normal components of `path` with `/`, rejecting anything else.
pub(crate) fn relative_name(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn sanitize_name(name: &str) -> Result<String, TestCaseError> {
    let valid = !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(name.to_string())
    } else {
        Err(TestCaseError::InvalidName(name.to_string()))
    }
}
