//! HLS output layout and playlist helpers.
//!
//! Several movies may share one folder, so every HLS output is named after
//! its source file: `<stem>.m3u8` with segments `<stem>_00000.ts`, ...

/// Content-Type for HLS playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content-Type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE_TS: &str = "video/MP2T";

/// Playlist file name for a source file stem.
pub fn playlist_name(stem: &str) -> String {
    format!("{stem}.m3u8")
}

/// ffmpeg `-hls_segment_filename` pattern for a source file stem. A literal
/// `%` in the stem is escaped so ffmpeg does not read it as a directive.
pub fn segment_pattern(stem: &str) -> String {
    format!("{}_%05d.ts", stem.replace('%', "%%"))
}

/// Whether `name` is the playlist or one of the segments for `stem`.
pub fn belongs_to(stem: &str, name: &str) -> bool {
    if name == playlist_name(stem) {
        return true;
    }
    name.strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(".ts"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Content-Type for a file served out of an HLS directory.
pub fn content_type(filename: &str) -> &'static str {
    if filename.ends_with(".m3u8") {
        PLAYLIST_CONTENT_TYPE
    } else {
        SEGMENT_CONTENT_TYPE_TS
    }
}

/// A bare file name that cannot escape its directory.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && (name.ends_with(".m3u8") || name.ends_with(".ts"))
}

/// Rewrite every URI line of a playlist through `uri`, leaving tags and blank
/// lines alone.
pub fn rewrite_playlist(content: &str, uri: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(content.len() * 2);
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            out.push_str(line);
        } else {
            out.push_str(&uri(trimmed));
        }
        out.push('\n');
    }
    out
}
