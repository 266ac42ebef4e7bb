use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Title and year recovered from a movie folder or file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieInfo {
    pub title: String,
    pub year: Option<u16>,
}

static IGNORE_NAMES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "@eaDir",
    ".nfo",
    ".txt",
    ".jpg",
    ".jpeg",
    ".png",
    ".srt",
    ".sub",
    ".idx",
    ".ass",
    ".ssa",
    ".vtt",
];

static VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "ts", "m2ts", "mts", "mpg", "mpeg",
    "mpe", "mpv", "3gp", "3g2", "ogv", "vob", "mxf", "f4v", "asf",
];

// "Title (2024)"
static RE_YEAR_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\((\d{4})\)").unwrap());

// "Title.2024.1080p"
static RE_YEAR_DOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)[\.\s](\d{4})(?:[\.\s]|$)").unwrap());

pub fn should_ignore(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    IGNORE_NAMES
        .iter()
        .any(|pat| lower == pat.to_lowercase() || lower.ends_with(&pat.to_lowercase()))
}

pub fn is_video_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

fn clean_title(raw: &str) -> String {
    raw.replace(['.', '_'], " ").trim().to_string()
}

fn plausible_year(year: u16) -> bool {
    (1900..=2100).contains(&year)
}

/// Parse a bare name (no directories) such as `The Matrix (1999)` or
/// `Inception.2010.1080p.mkv`. Names without a year keep the whole stem
/// as the title.
pub fn parse_name(name: &str, strip_extension: bool) -> MovieInfo {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if strip_extension => stem,
        _ => name,
    };

    if let Some(caps) = RE_YEAR_PAREN.captures(stem) {
        if let Ok(year) = caps[2].parse::<u16>() {
            return MovieInfo {
                title: clean_title(&caps[1]),
                year: Some(year),
            };
        }
    }

    if let Some(caps) = RE_YEAR_DOT.captures(stem) {
        if let Ok(year) = caps[2].parse::<u16>() {
            if plausible_year(year) {
                return MovieInfo {
                    title: clean_title(&caps[1]),
                    year: Some(year),
                };
            }
        }
    }

    MovieInfo {
        title: clean_title(stem),
        year: None,
    }
}

/// Parse a movie file path relative to the library root.
///
/// The enclosing folder wins when it carries a year
/// (`Movie (2001)/film.mkv`); otherwise the file name is used.
pub fn parse_movie(rel: &Path) -> MovieInfo {
    if let Some(folder) = rel.parent().and_then(|p| p.file_name()) {
        let parsed = parse_name(&folder.to_string_lossy(), false);
        if parsed.year.is_some() {
            return parsed;
        }
    }
    let name = rel.file_name().unwrap_or_default().to_string_lossy();
    parse_name(&name, true)
}
