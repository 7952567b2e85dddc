//! Component K — ChatHelpers.

const CHUNK_LIMIT: usize = 3900;

/// Split `text` into chunks no longer than [`CHUNK_LIMIT`] chars, posting
/// each via `say`. `say` stands in for whatever the caller's chat adapter
/// method looks like (`post_message`, a test double, …) — it is generic so
/// this helper stays usable across adapters whose `say` accepts
/// `(text, thread_ts)`.
pub async fn send_long_message<F, Fut>(say: F, text: &str, thread_ts: Option<&str>) -> Vec<String>
where
    F: Fn(String, Option<String>) -> Fut,
    Fut: std::future::Future<Output = Option<String>>,
{
    let mut ts_values = Vec::new();
    for chunk in chunk_text(text, CHUNK_LIMIT) {
        if let Some(ts) = say(chunk, thread_ts.map(str::to_string)).await {
            ts_values.push(ts);
        }
    }
    ts_values
}

fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(limit);
        if split_at < remaining.len() {
            if let Some(nl) = remaining[..split_at].rfind('\n') {
                if nl > limit / 2 {
                    split_at = nl + 1;
                }
            }
        }
        // Never split inside a UTF-8 code point.
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", 3900), vec!["hello".to_string()]);
    }

    #[test]
    fn long_text_splits_on_newline_when_possible() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = chunk_text(&text, 15);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().map(|c| c.len()).sum::<usize>() <= text.len());
    }
}
