//! Word-preserving text chunking for speech synthesis.
//!
//! Synthesis engines cap the number of characters a single job accepts. Long
//! documents are therefore split into ordered chunks, each submitted as its
//! own job. Chunks are packed greedily from whitespace-delimited words and
//! re-joined with single spaces, so a chunk boundary never falls inside a
//! word. Length is counted in `char`s, matching how engines count characters.

/// Default per-job character budget, kept safely below the 200 000-character
/// ceiling of common long-form synthesis APIs.
pub const DEFAULT_CHUNK_LIMIT: usize = 190_000;

/// Split `text` into ordered, non-empty chunks of at most `limit` characters.
///
/// A single word longer than `limit` is emitted whole in its own chunk: the
/// limit never truncates a word. Empty or whitespace-only input yields no
/// chunks.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for word in text.split_whitespace() {
        let word_chars = word.chars().count();

        if current.is_empty() {
            current.push_str(word);
            current_chars = word_chars;
            continue;
        }

        if current_chars + 1 + word_chars <= limit {
            current.push(' ');
            current.push_str(word);
            current_chars += 1 + word_chars;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_chars = word_chars;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalise(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_text("", 10).is_empty());
        assert!(split_text("  \n\t ", 10).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text("hello  world\n", 100), vec!["hello world"]);
    }

    #[test]
    fn exact_boundary_fits() {
        // "aaa bbb" is exactly 7 characters.
        assert_eq!(split_text("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
    }

    #[test]
    fn one_over_boundary_starts_new_chunk() {
        assert_eq!(split_text("aaa bbbb", 7), vec!["aaa", "bbbb"]);
    }

    #[test]
    fn overlong_word_is_kept_whole() {
        let chunks = split_text("a supercalifragilistic b", 5);
        assert_eq!(chunks, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn overlong_first_word_does_not_emit_empty_chunk() {
        let chunks = split_text("abcdefghij k", 3);
        assert_eq!(chunks, vec!["abcdefghij", "k"]);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn join_recovers_words_and_respects_limit() {
        let text = "The quick brown fox jumps over the lazy dog.\n\nPack my box with five \
                    dozen liquor jugs. Sphinx of black quartz, judge my vow.";
        for limit in [9, 12, 20, 33, 80, 500] {
            let chunks = split_text(text, limit);
            assert_eq!(chunks.join(" "), normalise(text), "limit {limit}");
            assert!(
                chunks.iter().all(|c| c.chars().count() <= limit),
                "limit {limit}: {chunks:?}"
            );
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Each Arabic word is 5 chars but 10 bytes.
        let text = "مرحبا مرحبا مرحبا";
        assert_eq!(split_text(text, 11), vec!["مرحبا مرحبا", "مرحبا"]);
    }
}
