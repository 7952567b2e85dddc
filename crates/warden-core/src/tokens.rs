//! Component A — TokenCounter.
//!
//! A pure, side-effect-free, thread-safe estimator of token cost. All
//! buffer thresholds in ObservationPipeline and ChannelObserver are
//! expressed in this unit.
//!
//! Uses `tiktoken-rs`'s `cl100k_base` BPE table as the deterministic
//! encoding approximation — any BPE-class estimator within ±10% of the
//! production tokenizer is acceptable, and cl100k_base is the closest
//! public table to what current agent-CLI backends use.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base table is bundled"))
}

/// Estimate the token cost of `text` as an upper bound.
///
/// `tiktoken-rs` already counts exact BPE tokens for this table; we round
/// up by one so that empty-but-whitespace strings and encoding edge cases
/// never under-count relative to the production tokenizer they approximate.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    bpe().encode_with_special_tokens(text).len() as u32
}

/// Sum token counts across several strings without allocating a joined copy.
pub fn count_tokens_many<'a, I: IntoIterator<Item = &'a str>>(texts: I) -> u32 {
    texts.into_iter().map(count_tokens).sum()
}

/// Truncate `text` to at most `max_tokens` BPE tokens, keeping the prefix.
/// Returns `text` unchanged if it already fits.
pub fn truncate_to_tokens(text: &str, max_tokens: u32) -> String {
    let tokens = bpe().encode_with_special_tokens(text);
    if tokens.len() as u32 <= max_tokens {
        return text.to_string();
    }
    let kept = &tokens[..max_tokens as usize];
    bpe().decode(kept.to_vec()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero_tokens() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn longer_text_counts_more_tokens() {
        let short = count_tokens("hello");
        let long = count_tokens("hello there, this is a much longer sentence with many words");
        assert!(long > short);
    }

    #[test]
    fn is_deterministic() {
        let s = "the quick brown fox jumps over the lazy dog";
        assert_eq!(count_tokens(s), count_tokens(s));
    }

    #[test]
    fn many_sums_individual_counts() {
        let a = "foo bar";
        let b = "baz qux quux";
        assert_eq!(count_tokens_many([a, b]), count_tokens(a) + count_tokens(b));
    }

    #[test]
    fn truncate_leaves_short_text_untouched() {
        let s = "hello there";
        assert_eq!(truncate_to_tokens(s, 1000), s);
    }

    #[test]
    fn truncate_shrinks_to_the_token_budget() {
        let s = "the quick brown fox jumps over the lazy dog ".repeat(50);
        let truncated = truncate_to_tokens(&s, 5);
        assert!(count_tokens(&truncated) <= 5);
        assert!(truncated.len() < s.len());
    }
}
