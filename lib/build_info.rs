//! Build identity reported by `--version`, the bootstrap log event and the `build_info` gauge.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("RELEASE_LOADER_GIT_COMMIT_HASH");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("RELEASE_LOADER_GIT_COMMIT_HASH")
);

/// First twelve characters of the build commit, or the whole value when it is shorter
/// (including the `"unknown"` placeholder).
pub fn short_commit_hash() -> &'static str {
    GIT_COMMIT_HASH.get(..12).unwrap_or(GIT_COMMIT_HASH)
}
