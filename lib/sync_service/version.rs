use semver::Version;

/// Semantic-version fields derived from a tag string.
///
/// Non-semver tags carry zeroed numbers and `is_semver = false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionInfo {
    pub is_semver: bool,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub is_prerelease: bool,
}

/// Classifies a tag string. Total: an unparseable tag is a valid `VersionInfo::default()`.
pub fn classify(tag: &str) -> VersionInfo {
    match parse_lenient(tag) {
        Some(version) => VersionInfo {
            is_semver: true,
            major: version.major,
            minor: version.minor,
            patch: version.patch,
            is_prerelease: !version.pre.is_empty(),
        },
        None => VersionInfo::default(),
    }
}

/// Parses `[v]MAJOR[.MINOR[.PATCH]][-PRE][+BUILD]`. Missing components are zero and numeric
/// components may carry leading zeros (`2023.01.15`).
fn parse_lenient(tag: &str) -> Option<Version> {
    let body = tag.strip_prefix('v').unwrap_or(tag);

    let suffix_start = body.find(['-', '+']).unwrap_or(body.len());
    let (core, suffix) = body.split_at(suffix_start);
    let components: Vec<&str> = core.split('.').collect();
    if components.len() > 3 {
        return None;
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&components) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }

    let [major, minor, patch] = numbers;
    Version::parse(&format!("{major}.{minor}.{patch}{suffix}")).ok()
}
