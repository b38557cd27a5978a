//! External dependency pipeline.
//!
//! Declared dependencies are pinned to a commit ([`lockfile`]), keyed by a content
//! identity ([`identity`]), fetched with git ([`fetch`]), built with CMake ([`foreign`])
//! and stored in a machine-global cache ([`cache`]). [`resolver`] drives the whole flow.

pub mod cache;
pub mod entry_lock;
pub mod fetch;
pub mod foreign;
pub mod identity;
pub mod lockfile;
pub mod resolver;

pub use cache::{ArtifactManifest, DependencyCache};
pub use identity::CacheIdentity;
pub use lockfile::LockFile;
pub use resolver::{DependencyResolver, EntrySource, ResolveError, ResolvedDependency};
