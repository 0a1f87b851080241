//! Deterministic title normalization for fuzzy cross-provider equality.
//!
//! Regional and edition variants of the same recording differ only in
//! trailing decorations ("(Remastered)", "- Single", curly quotes). The
//! sanitizers strip those so equality comparison unifies them. Sanitized
//! output is used only for comparison, never for display.

use std::sync::OnceLock;

use regex::Regex;

/// Trailing decorations stripped from both song and album titles:
/// " (Single)", " - EP", " [Remastered 2011]", " - Deluxe Edition" and the
/// other dash/bracket combinations of the same words.
fn decoration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s+(?:[-\u{2013}]\s+(?:single|ep|remastered(?:\s+\d{4})?|deluxe(?:\s+edition)?)|[(\[](?:single|ep|remastered(?:\s+\d{4})?|deluxe(?:\s+edition)?)[)\]])\s*$",
        )
        .expect("decoration regex")
    })
}

/// Radio-edit decorations on song titles: " (Radio Edit)", " - Radio Edit",
/// or the bare " Radio Edit" suffix.
fn radio_edit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s+(?:[-\u{2013}]\s+)?[(\[]?radio edit[)\]]?\s*$").expect("radio edit regex")
    })
}

fn strip_quotes(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' | '\'' | '"'))
        .collect()
}

/// Normalize a song title. Edition decorations are removed; a radio-edit
/// marker is kept as a trailing " Radio Edit" tag so radio edits do not
/// unify with the original mix.
pub fn sanitize_song_title(title: &str) -> String {
    let mut out = strip_quotes(title).trim().to_string();
    let mut radio_edit = false;
    loop {
        if let Some(m) = radio_edit_re().find(&out) {
            out.truncate(m.start());
            radio_edit = true;
            continue;
        }
        if let Some(m) = decoration_re().find(&out) {
            out.truncate(m.start());
            continue;
        }
        break;
    }
    let mut out = out.trim_end().to_string();
    if radio_edit && !out.is_empty() {
        out.push_str(" Radio Edit");
    }
    out
}

/// Normalize an album title. All trailing decorations are removed outright;
/// "Greatest Hits (Deluxe Edition)" and "Greatest Hits" unify.
pub fn sanitize_album_title(title: &str) -> String {
    let mut out = strip_quotes(title).trim().to_string();
    while let Some(m) = decoration_re().find(&out) {
        out.truncate(m.start());
        out.truncate(out.trim_end().len());
    }
    out.trim_end().to_string()
}

/// Trimmed, case-insensitive equality. The aggregator's cross-provider
/// attachment fallback compares raw display titles this way.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Sanitized song-title equality used by the search cascade.
pub fn song_titles_match(a: &str, b: &str) -> bool {
    sanitize_song_title(a).to_lowercase() == sanitize_song_title(b).to_lowercase()
}

/// Sanitized album-title equality used by the search cascade.
pub fn album_titles_match(a: &str, b: &str) -> bool {
    sanitize_album_title(a).to_lowercase() == sanitize_album_title(b).to_lowercase()
}

/// Resolve `{w}`/`{h}` placeholders in provider artwork URL templates to a
/// concrete size so the stored URL is directly fetchable.
pub fn resolve_art_template(url: &str) -> String {
    url.replace("{w}", "640").replace("{h}", "640")
}
