use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Outcome of a [`Server::serve_path`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServeStatus {
    /// Every required and optional item was delivered.
    All,
    /// Nothing was delivered.
    None,
    /// Some items were delivered; delivery may have stopped early.
    Request,
    /// Delivery stopped because the server timed out.
    Timeout,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ServerMapError {
    #[error("Invalid include URL {0:?}")]
    InvalidUrl(String),

    #[error("Include directory {0:?} does not exist")]
    MissingDirectory(PathBuf),
}

/// A local directory made available under a URL prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub target: PathBuf,
}

/// Maps URL prefixes to local directories the server resolves requests against.
#[derive(Debug, Clone, Default)]
pub struct ServerMap {
    includes: BTreeMap<String, Include>,
}

impl ServerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves the contents of `dir` under `url`.
    ///
    /// Leading and trailing `/` are stripped from `url`, so `"/"` maps the
    /// server root. Mapping an existing url again replaces it.
    pub fn set_include(
        &mut self,
        url: &str,
        dir: impl AsRef<Path>,
    ) -> Result<(), ServerMapError> {
        let url = normalize_url(url)?;
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ServerMapError::MissingDirectory(dir.to_path_buf()));
        }
        self.includes.insert(
            url,
            Include {
                target: dir.to_path_buf(),
            },
        );
        Ok(())
    }

    pub fn remove_include(&mut self, url: &str) -> Option<Include> {
        let url = url.trim_matches('/');
        self.includes.remove(url)
    }

    pub fn include(&self, url: &str) -> Option<&Include> {
        self.includes.get(url.trim_matches('/'))
    }

    /// Includes ordered by URL prefix.
    pub fn includes(&self) -> impl Iterator<Item = (&str, &Include)> {
        self.includes.iter().map(|(url, inc)| (url.as_str(), inc))
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
    }
}

fn normalize_url(url: &str) -> Result<String, ServerMapError> {
    let trimmed = url.trim_matches('/');
    let valid = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    let bad_part = !trimmed.is_empty()
        && trimmed
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if !valid || bad_part {
        return Err(ServerMapError::InvalidUrl(url.to_string()));
    }
    Ok(trimmed.to_string())
}

/// The content server delivering test case files to the target.
pub trait Server {
    /// Port the server is listening on.
    fn port(&self) -> u16;

    /// Serves files from `root` until the required items have been requested,
    /// the server times out, or `keep_waiting` returns `false`.
    ///
    /// # Arguments
    /// * `root`: Directory holding the materialized test case.
    /// * `required`: Items that must be requested for delivery to be complete.
    /// * `optional`: Items whose absence does not make delivery incomplete.
    /// * `server_map`: Additional locations requests may resolve to.
    /// * `keep_waiting`: Polled on every iteration of the serving loop; when it
    ///   returns `false` the server stops waiting for further requests.
    ///
    /// # Returns
    /// The delivery status and the served items in delivery order. Items
    /// resolved through an include are reported by their local path.
    fn serve_path(
        &mut self,
        root: &Path,
        required: &[String],
        optional: &[String],
        server_map: &ServerMap,
        keep_waiting: &mut dyn FnMut() -> bool,
    ) -> (ServeStatus, Vec<String>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_include_normalizes_urls() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = ServerMap::new();
        map.set_include("/", dir.path()).unwrap();
        map.set_include("/test/", dir.path()).unwrap();
        map.set_include("a/b", dir.path()).unwrap();

        let urls: Vec<&str> = map.includes().map(|(url, _)| url).collect();
        assert_eq!(urls, ["", "a/b", "test"]);
        assert_eq!(map.include("/test").unwrap().target, dir.path());
    }

    #[test]
    fn set_include_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = ServerMap::new();
        assert_eq!(
            map.set_include("/bad url", dir.path()),
            Err(ServerMapError::InvalidUrl("/bad url".to_string()))
        );
        for bad in ["/a/../b", "a//b", "./a"] {
            assert_eq!(
                map.set_include(bad, dir.path()),
                Err(ServerMapError::InvalidUrl(bad.to_string()))
            );
        }

        let missing = dir.path().join("missing");
        assert_eq!(
            map.set_include("/inc", &missing),
            Err(ServerMapError::MissingDirectory(missing.clone()))
        );
        assert!(map.is_empty());
    }

    #[test]
    fn set_include_replaces_and_remove_include_drops() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let mut map = ServerMap::new();
        map.set_include("/inc", first.path()).unwrap();
        map.set_include("inc", second.path()).unwrap();
        assert_eq!(map.includes().count(), 1);
        assert_eq!(map.include("inc").unwrap().target, second.path());

        let removed = map.remove_include("/inc/").unwrap();
        assert_eq!(removed.target, second.path());
        assert!(map.is_empty());
    }
}
