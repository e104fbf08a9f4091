use chrono::NaiveDate;
use regex::{NoExpand, Regex};
use tracing::debug;

/// One matched marker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHit {
    /// Exact matched candidate substring, kept verbatim so the rewrite can
    /// substitute it literally.
    pub text: String,
    /// Raw argument fragment with the marker name and braces stripped.
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerParse {
    Found(MarkerHit),
    Malformed,
    Absent,
}

/// Finds every invocation of the named marker in document order.
///
/// Candidates are brace-delimited spans found per line, greedily from the
/// first `{{` to the last `}}` on that line. Malformed candidates (name
/// present but no pipe-delimited argument) and unterminated markers yield
/// no match rather than an error.
pub fn scan_markers(text: &str, name: &str) -> Vec<MarkerHit> {
    let candidate_pattern = Regex::new(r"\{\{.*\}\}").unwrap();
    let mut hits = Vec::new();
    for candidate in candidate_pattern.find_iter(text) {
        match classify_candidate(candidate.as_str(), name) {
            MarkerParse::Found(hit) => hits.push(hit),
            MarkerParse::Malformed => {
                debug!("ignoring malformed {name} marker: {}", candidate.as_str());
            }
            MarkerParse::Absent => {}
        }
    }
    hits
}

/// Classifies one brace-delimited candidate span against the requested
/// marker name. The name match is case-insensitive and tolerates
/// whitespace between the braces, the name, and the argument pipe.
pub fn classify_candidate(candidate: &str, name: &str) -> MarkerParse {
    let mut saw_name_without_pipe = false;
    let mut search_from = 0;

    while let Some(offset) = candidate[search_from..].find("{{") {
        let after_open = search_from + offset + 2;
        search_from = after_open;

        let field = candidate[after_open..].trim_start();
        let matches_name = field
            .get(..name.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(name));
        if !matches_name {
            continue;
        }

        let after_name = &field[name.len()..];
        if let Some(args) = after_name.trim_start().strip_prefix('|') {
            return MarkerParse::Found(MarkerHit {
                text: candidate.to_string(),
                args: args.replace("}}", "").trim().to_string(),
            });
        }
        match after_name.chars().next() {
            // Name runs into further text: a different, longer marker name.
            Some(next) if !next.is_whitespace() && next != '}' => {}
            // Name field ends but no argument pipe ever arrives.
            _ => saw_name_without_pipe = true,
        }
    }

    if saw_name_without_pipe {
        MarkerParse::Malformed
    } else {
        MarkerParse::Absent
    }
}

/// Replaces every matched invocation of `name` with `replacement`, using
/// literal substitution of the exact matched text. Returns the rewritten
/// text and the number of invocations replaced.
pub fn rewrite_markers(text: &str, name: &str, replacement: &str) -> (String, usize) {
    let mut output = text.to_string();
    let mut replaced = 0;

    for hit in scan_markers(text, name) {
        if !output.contains(&hit.text) {
            continue;
        }
        // The matched span can carry pipes and other metacharacters, so it
        // is escaped before being used as a pattern.
        if let Ok(pattern) = Regex::new(&regex::escape(&hit.text)) {
            output = pattern
                .replace_all(&output, NoExpand(replacement))
                .into_owned();
            replaced += 1;
        }
    }

    (output, replaced)
}

/// Renders a marker invocation, e.g. `{{Archived|date=May 01, 2024}}`.
pub fn format_marker(name: &str, date_text: &str) -> String {
    format!("{{{{{name}|date={date_text}}}}}")
}

/// Dates inside markers use the wiki's "Month Day, Year" convention.
pub fn marker_date_text(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}
