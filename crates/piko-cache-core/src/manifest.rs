//! The fixed list of resources pre-cached at install time.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Request;

/// Cache version used when nothing else is configured.
/// Bumping it evicts every older bucket on the next activation.
pub const DEFAULT_CACHE_NAME: &str = "piko-cache-v1";

/// App shell assets cached by default.
pub const DEFAULT_MANIFEST: [&str; 3] = ["./", "./index.html", "./manifest.json"];

/// Ordered, duplicate-free list of resource identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<String> = entries.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.trim().is_empty() {
                return Err(Error::InvalidManifest("empty resource identifier".to_string()));
            }
            if !seen.insert(entry.as_str()) {
                return Err(Error::InvalidManifest(format!("duplicate entry {}", entry)));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// GET requests for every entry, in manifest order.
    pub fn requests(&self) -> Vec<Request> {
        self.entries.iter().map(Request::get).collect()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            entries: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for Manifest {
    type Error = Error;

    fn try_from(entries: Vec<String>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<Manifest> for Vec<String> {
    fn from(manifest: Manifest) -> Self {
        manifest.entries
    }
}
