//! Version information for the transpool binary.
//!
//! Release builds may set `TRANSPOOL_GIT_REV` at compile time to stamp the
//! git revision into `--version`.

use std::sync::LazyLock;

/// The package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git revision from the build environment (empty string if not set).
pub const GIT_REV: &str = match option_env!("TRANSPOOL_GIT_REV") {
    Some(rev) => rev,
    None => "",
};

/// How workers are pinned on this platform.
pub const PINNING: &str = if cfg!(target_os = "linux") {
    "sched_setaffinity"
} else {
    "unsupported"
};

static FULL_VERSION: LazyLock<String> = LazyLock::new(|| {
    if GIT_REV.is_empty() {
        PKG_VERSION.to_string()
    } else {
        format!("{} ({})", PKG_VERSION, GIT_REV)
    }
});

static LONG_VERSION: LazyLock<String> =
    LazyLock::new(|| format!("{}\nCPU pinning: {}", full_version(), PINNING));

/// Returns `"X.Y.Z"`, or `"X.Y.Z (rev)"` when built with a git revision.
///
/// ```
/// use transpool::version::full_version;
///
/// assert!(full_version().starts_with(env!("CARGO_PKG_VERSION")));
/// ```
pub fn full_version() -> String {
    FULL_VERSION.clone()
}

/// Static string for clap's `version` attribute.
pub fn clap_version() -> &'static str {
    PKG_VERSION
}

/// Static string for clap's `long_version` attribute.
pub fn long_version() -> &'static str {
    LONG_VERSION.as_str()
}
