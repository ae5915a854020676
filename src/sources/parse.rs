//! Small pure parsers shared by the adapters.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::db::models::{Team, TBD};

fn duration_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*([a-zA-Z]+)").expect("valid duration regex"))
}

/// Seconds in one unit token; longer words and unknown units contribute nothing.
fn unit_seconds(unit: &str) -> Option<i64> {
    let mut chars = unit.chars();
    let unit = chars.next()?.to_ascii_lowercase();
    if chars.next().is_some() {
        return None;
    }
    match unit {
        'w' => Some(7 * 24 * 3600),
        'd' => Some(24 * 3600),
        'h' => Some(3600),
        'm' => Some(60),
        _ => None,
    }
}

/// Longest span a relative timestamp may cover.
const MAX_RELATIVE_SECS: i64 = 10 * 365 * 24 * 3600;

/// Sum every `\d+[wdhm]` token in `s`.
///
/// "4h 7m ago" -> 4h7m, "2w 0d from now" -> 14d. Input without any known
/// token yields zero. Counts that overflow or exceed ten years yield `None`.
pub fn parse_duration_tokens(s: &str) -> Option<Duration> {
    let mut total: i64 = 0;
    for caps in duration_token_re().captures_iter(s) {
        let Some(unit) = unit_seconds(&caps[2]) else {
            continue;
        };
        let n: i64 = caps[1].parse().ok()?;
        total = n.checked_mul(unit).and_then(|secs| total.checked_add(secs))?;
        if total > MAX_RELATIVE_SECS {
            return None;
        }
    }
    Some(Duration::seconds(total))
}

/// Resolve "4h 7m ago" / "2d 3h from now" against `reference`.
///
/// Returns `None` when the string has no duration tokens at all, or when the
/// span is out of range.
pub fn parse_relative_time(s: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !duration_token_re()
        .captures_iter(s)
        .any(|c| unit_seconds(&c[2]).is_some())
    {
        return None;
    }
    let delta = parse_duration_tokens(s)?;
    if s.to_lowercase().contains("ago") {
        reference.checked_sub_signed(delta)
    } else {
        reference.checked_add_signed(delta)
    }
}

/// Interpret a naive upstream timestamp as local time at a fixed UTC offset.
pub fn local_to_utc(naive: NaiveDateTime, offset_hours: i32) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(offset_hours * 3600)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse "2024-05-01 16:00:00" (or without seconds) at a fixed offset.
pub fn parse_naive_at_offset(s: &str, offset_hours: i32) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()?;
    local_to_utc(naive, offset_hours)
}

/// Hour offset of a few timezone abbreviations seen in tournament pages.
pub fn timezone_abbr_offset(abbr: &str) -> Option<i32> {
    match abbr.trim().to_uppercase().as_str() {
        "UTC" | "GMT" | "WET" => Some(0),
        "CET" | "BST" | "WEST" => Some(1),
        "CEST" | "EET" => Some(2),
        "EEST" | "MSK" => Some(3),
        "EST" | "CDT" => Some(-5),
        "EDT" => Some(-4),
        "CST" => Some(-6),
        "PDT" => Some(-7),
        "PST" => Some(-8),
        "SGT" | "PHT" => Some(8),
        "KST" | "JST" => Some(9),
        "AEST" => Some(10),
        "AEDT" => Some(11),
        _ => None,
    }
}

/// Pull a "Team A vs Team B" pair out of a broadcast title.
///
/// Separators `vs`, `vs.` and `v` are accepted case-insensitively. Text after
/// `|`, ` - ` or a bracket on either side is treated as decoration. Titles
/// with no pair yield `None`.
pub fn teams_from_title(title: &str) -> Option<(String, String)> {
    let re = {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"(?i)\s+(?:vs\.?|v)\s+").expect("valid vs regex"))
    };
    let m = re.find(title)?;
    let left = &title[..m.start()];
    let right = &title[m.end()..];

    let home = left
        .rsplit(['|', ':', '[', ']', '(', ')'])
        .next()
        .unwrap_or(left)
        .rsplit(" - ")
        .next()
        .unwrap_or(left)
        .trim();
    let away = right
        .split(['|', ':', '[', ']', '(', ')'])
        .next()
        .unwrap_or(right)
        .split(" - ")
        .next()
        .unwrap_or(right)
        .trim();

    if home.is_empty() || away.is_empty() {
        return None;
    }
    Some((home.to_string(), away.to_string()))
}

/// Build a team from an optional upstream name, mapping absent names to TBD.
pub fn team_or_tbd(name: Option<&str>) -> Team {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => Team::new(n),
        _ => Team::new(TBD),
    }
}

/// Lowercase ASCII slug for deterministic ids: "Team Liquid" -> "team-liquid".
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Parse a score that may arrive as a number or a numeric string.
pub fn score_from_json(v: Option<&serde_json::Value>) -> Option<u32> {
    let v = v?;
    v.as_u64()
        .map(|n| n as u32)
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}
