//! Media type and content encoding implied by an object key.

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const ENCODINGS: &[(&str, &str)] = &[
    ("gz", "gzip"),
    ("bz2", "bzip2"),
    ("xz", "xz"),
    ("br", "br"),
    ("Z", "compress"),
];

// Shorthand suffixes that stand for a longer one.
const SUFFIX_ALIASES: &[(&str, &str)] = &[
    ("tgz", "tar.gz"),
    ("taz", "tar.gz"),
    ("tz", "tar.gz"),
    ("tbz2", "tar.bz2"),
    ("txz", "tar.xz"),
];

const MEDIA_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("txt", "text/plain"),
    ("rst", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("xml", "text/xml"),
    ("xsl", "application/xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/vnd.microsoft.icon"),
    ("pdf", "application/pdf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("wasm", "application/wasm"),
    ("zip", "application/zip"),
    ("tar", "application/x-tar"),
    ("epub", "application/epub+zip"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

/// Guesses the media type and content encoding of `key` from its suffixes,
/// so `objects.tar.gz` is an `application/x-tar` with `gzip` encoding.
pub fn guess_type(key: &str) -> (Option<&'static str>, Option<&'static str>) {
    let name = key.rsplit('/').next().unwrap_or(key);

    let expanded;
    let name = match split_extension(name) {
        Some((stem, ext)) => match lookup(SUFFIX_ALIASES, ext) {
            Some(alias) => {
                expanded = format!("{stem}.{alias}");
                expanded.as_str()
            }
            None => name,
        },
        None => name,
    };

    let (name, encoding) = match split_extension(name) {
        Some((stem, ext)) => match lookup(ENCODINGS, ext) {
            Some(encoding) => (stem, Some(encoding)),
            None => (name, None),
        },
        None => (name, None),
    };

    let media_type = split_extension(name).and_then(|(_, ext)| lookup(MEDIA_TYPES, ext));
    (media_type, encoding)
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some((stem, ext)),
        _ => None,
    }
}

/// Exact match first, then case-insensitive.
fn lookup(table: &[(&str, &'static str)], ext: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .or_else(|| {
            table
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
        })
        .map(|(_, value)| *value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_type() {
        for (key, expected) in [
            ("index.html", (Some("text/html"), None)),
            ("flask/en/latest/_static/basic.css", (Some("text/css"), None)),
            ("flask/INDEX.HTML", (Some("text/html"), None)),
            ("flask/searchindex.js", (Some("text/javascript"), None)),
            ("flask/objects.tar.gz", (Some("application/x-tar"), Some("gzip"))),
            ("flask/objects.tgz", (Some("application/x-tar"), Some("gzip"))),
            ("flask/page.html.br", (Some("text/html"), Some("br"))),
            ("flask/archive.gz", (None, Some("gzip"))),
            ("flask/objects.inv", (None, None)),
            ("flask/README", (None, None)),
            // a leading dot is not an extension
            ("flask/.html", (None, None)),
            ("flask.d/file", (None, None)),
        ] {
            assert_eq!(guess_type(key), expected, "{key}");
        }
    }
}
