//! Names and sizes shared across the crate.

pub const APP_NAME: &str = "jfb";

/// Default project description file name.
pub const CONFIG_FILENAME: &str = "jfb.toml";

/// Length of the truncated hash used for cache identities and mirror names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Per-target build record, stored inside the target's output directory.
pub const RECORD_FILENAME: &str = ".jfb-record.json";

/// Dependency cache entry descriptor.
pub const ENTRY_DESCRIPTOR: &str = "entry.json";

/// Compilation database written next to the profile outputs.
pub const COMPILE_COMMANDS_FILENAME: &str = "compile_commands.json";

/// Dependency pin file, stored next to the project description.
pub const LOCK_FILENAME: &str = "jfb.lock";
