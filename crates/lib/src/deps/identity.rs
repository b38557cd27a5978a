//! Cache identities.
//!
//! An identity is the truncated hash of everything that determines a dependency's
//! build output: remote URL, resolved commit, CMake options and configure flags. Two
//! projects that agree on all four share one cache entry; changing any of them yields a
//! new identity and leaves the old entry untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::project::Dependency;
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// Content-addressed key of one dependency cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheIdentity(pub ObjectHash);

impl CacheIdentity {
  pub fn as_str(&self) -> &str {
    &self.0.0
  }
}

impl fmt::Display for CacheIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The hashed inputs. Field order is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInputs {
  pub url: String,
  pub commit: String,
  pub options: BTreeMap<String, String>,
  /// Profile configure flags followed by the dependency's own.
  pub cmake_flags: Vec<String>,
}

impl Hashable for IdentityInputs {}

impl IdentityInputs {
  pub fn new(dependency: &Dependency, commit: &str, profile_flags: &[String]) -> Self {
    Self {
      url: normalize_url(&dependency.url),
      commit: commit.to_ascii_lowercase(),
      options: dependency.options.clone(),
      cmake_flags: profile_flags
        .iter()
        .chain(&dependency.cmake_flags)
        .cloned()
        .collect(),
    }
  }

  pub fn identity(&self) -> Result<CacheIdentity, HashError> {
    self.compute_hash().map(CacheIdentity)
  }
}

/// Trailing slashes do not change what is cloned.
fn normalize_url(url: &str) -> String {
  url.trim().trim_end_matches('/').to_string()
}
