//! Component K — MessageFormatter.

use warden_agent::Usage;

/// Split `SUMMARY:` / `DETAILS:` envelopes out of agent output. Falls back to
/// the first three lines as the summary when no envelope markers are present.
pub fn parse_summary_details(text: &str) -> (String, Option<String>) {
    let summary_marker = text.find("SUMMARY:");
    let details_marker = text.find("DETAILS:");

    match (summary_marker, details_marker) {
        (Some(s), Some(d)) if d > s => {
            let summary = text[s + "SUMMARY:".len()..d].trim().to_string();
            let details = text[d + "DETAILS:".len()..].trim().to_string();
            (summary, Some(details))
        }
        (Some(s), None) => (text[s + "SUMMARY:".len()..].trim().to_string(), None),
        _ => {
            let lines: Vec<&str> = text.lines().take(3).collect();
            let summary = lines.join("\n");
            let details = if text.lines().count() > 3 { Some(text.to_string()) } else { None };
            (summary, details)
        }
    }
}

/// Remove `SUMMARY:`/`DETAILS:` envelope markers, leaving prose only — used
/// when re-presenting text somewhere the envelope distinction doesn't apply.
pub fn strip_summary_details_markers(text: &str) -> String {
    text.replace("SUMMARY:", "").replace("DETAILS:", "").trim().to_string()
}

pub fn build_trello_header(card_name: &str, session_id: Option<&str>) -> String {
    match session_id {
        Some(id) => format!("🗂️ *{card_name}* (session `{id}`)"),
        None => format!("🗂️ *{card_name}*"),
    }
}

pub fn build_context_usage_bar(usage: &Usage) -> String {
    format!("_tokens: {} in / {} out_", usage.tokens_in, usage.tokens_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_summary_and_details_envelope() {
        let text = "SUMMARY: did the thing\nDETAILS: step 1\nstep 2";
        let (summary, details) = parse_summary_details(text);
        assert_eq!(summary, "did the thing");
        assert_eq!(details.unwrap().trim(), "step 1\nstep 2");
    }

    #[test]
    fn falls_back_to_first_three_lines() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let (summary, details) = parse_summary_details(text);
        assert_eq!(summary, "line1\nline2\nline3");
        assert!(details.is_some());
    }
}
