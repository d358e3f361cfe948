//! Canonical comparison keys for distribution filenames.
//!
//! Uploaded files have been named under several conventions over the years
//! (`Flask-Common-0.2.0.tar.gz` vs `flask_common-0.2.tar.gz`), so requested
//! filenames are compared after normalizing the project name and version.
use pep440_rs::Version;
use std::fmt;
use std::str::FromStr;

const WHEEL_EXTENSION: &str = ".whl";
const SDIST_EXTENSIONS: &[&str] = &[".tar.gz", ".zip"];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NormalizedFilename(String);

impl NormalizedFilename {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for NormalizedFilename {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Normalizes a wheel, `.tar.gz` or `.zip` filename. Anything that does not
/// parse as one of those is returned unchanged.
pub fn normalize_filename(filename: &str) -> NormalizedFilename {
    let normalized = if let Some(stem) = filename.strip_suffix(WHEEL_EXTENSION) {
        normalize_wheel(stem)
    } else {
        SDIST_EXTENSIONS.iter().find_map(|ext| {
            let stem = filename.strip_suffix(ext)?;
            normalize_sdist(stem, ext)
        })
    };

    NormalizedFilename(normalized.unwrap_or_else(|| filename.to_string()))
}

/// `{name}-{version}(-{build})?-{python}-{abi}-{platform}`
fn normalize_wheel(stem: &str) -> Option<String> {
    let dashes = stem.matches('-').count();
    if dashes != 4 && dashes != 5 {
        return None;
    }

    let parts: Vec<&str> = stem.splitn(dashes - 1, '-').collect();
    let (name, version) = (parts[0], parts[1]);

    if name.contains("__") || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return None;
    }

    let mut segments = vec![canonicalize_name(name), canonicalize_version(version)?];
    if dashes == 5 {
        segments.push(canonicalize_build_tag(parts[2])?);
    }
    segments.push(parts[parts.len() - 1].to_lowercase());

    Some(format!("{}{WHEEL_EXTENSION}", segments.join("-")))
}

/// `{name}-{version}`, split on the last dash.
fn normalize_sdist(stem: &str, extension: &str) -> Option<String> {
    let (name, version) = stem.rsplit_once('-')?;
    Some(format!(
        "{}-{}{extension}",
        canonicalize_name(name),
        canonicalize_version(version)?
    ))
}

/// Lowercases and collapses runs of `-`, `_` and `.` into a single `-`.
pub fn canonicalize_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                canonical.push('-');
            }
            in_separator = true;
        } else {
            canonical.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    canonical
}

/// PEP 440 normal form with trailing zero release segments removed, so
/// `24.0.0.0` becomes `24` and `1.0RC1` becomes `1rc1`. Returns `None` for
/// strings that are not valid versions.
pub fn canonicalize_version(version: &str) -> Option<String> {
    let parsed = Version::from_str(version).ok()?;
    let normal = parsed.to_string();

    let release = parsed.release();
    let mut trimmed = release;
    while let [rest @ .., 0] = trimmed
        && !rest.is_empty()
    {
        trimmed = rest;
    }

    let epoch = match parsed.epoch() {
        0 => String::new(),
        epoch => format!("{epoch}!"),
    };
    let join = |segments: &[u64]| {
        segments
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".")
    };

    // Everything after the release segment (pre/post/dev/local) is already in
    // normal form, only the release itself needs trimming.
    let full = format!("{epoch}{}", join(release));
    match normal.strip_prefix(&full) {
        Some(suffix) => Some(format!("{epoch}{}{suffix}", join(trimmed))),
        None => Some(normal),
    }
}

/// Build tags are a number optionally followed by a string; the number loses
/// its leading zeros.
fn canonicalize_build_tag(tag: &str) -> Option<String> {
    let digits = tag.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let (number, suffix) = tag.split_at(digits);
    let number = number.trim_start_matches('0');
    let number = if number.is_empty() { "0" } else { number };
    Some(format!("{number}{suffix}"))
}
