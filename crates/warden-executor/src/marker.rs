//! Marker tokens H pulls out of agent output after a turn completes. D never
//! looks at these — `RunResult::output` reaches H verbatim.

const UPDATE: &str = "<!-- UPDATE -->";
const RESTART: &str = "<!-- RESTART -->";
const LIST_RUN_PREFIX: &str = "<!-- LIST_RUN: ";
const LIST_RUN_SUFFIX: &str = " -->";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Update,
    Restart,
    ListRun(String),
}

/// Scan `text` for at most one marker token. Markers are only ever
/// meaningful when issued by an admin turn — callers gate on role
/// themselves rather than this function refusing to look.
pub fn find_marker(text: &str) -> Option<Marker> {
    if text.contains(UPDATE) {
        return Some(Marker::Update);
    }
    if text.contains(RESTART) {
        return Some(Marker::Restart);
    }
    if let Some(start) = text.find(LIST_RUN_PREFIX) {
        let rest = &text[start + LIST_RUN_PREFIX.len()..];
        if let Some(end) = rest.find(LIST_RUN_SUFFIX) {
            let name = rest[..end].trim();
            if !name.is_empty() {
                return Some(Marker::ListRun(name.to_string()));
            }
        }
    }
    None
}

/// Strip any marker tokens from output before it's shown to a user.
pub fn strip_markers(text: &str) -> String {
    let mut out = text.replace(UPDATE, "").replace(RESTART, "");
    while let Some(start) = out.find(LIST_RUN_PREFIX) {
        let Some(end_rel) = out[start..].find(LIST_RUN_SUFFIX) else { break };
        let end = start + end_rel + LIST_RUN_SUFFIX.len();
        out.replace_range(start..end, "");
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_update_marker() {
        assert_eq!(find_marker("done\n<!-- UPDATE -->"), Some(Marker::Update));
    }

    #[test]
    fn finds_list_run_marker_with_name() {
        assert_eq!(find_marker("ok <!-- LIST_RUN: Backlog -->"), Some(Marker::ListRun("Backlog".to_string())));
    }

    #[test]
    fn no_marker_present_yields_none() {
        assert_eq!(find_marker("just a normal reply"), None);
    }

    #[test]
    fn strip_removes_marker_text() {
        let stripped = strip_markers("reply body\n<!-- RESTART -->");
        assert_eq!(stripped, "reply body");
    }
}
