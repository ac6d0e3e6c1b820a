//! Streaming text chunker for TTS segmentation
//!
//! Accumulates model deltas in a rolling buffer and yields chunks at sentence
//! or paragraph boundaries so synthesis can start long before the stream
//! ends. Sentence splitting is abbreviation-aware; the abbreviation list is a
//! closed set and extending it is a data-only change.

/// Boundary detection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Split on sentence-ending punctuation followed by whitespace
    Sentence,
    /// Split on blank lines, or a newline followed by two or more spaces
    Paragraph,
}

/// Words that end with a period without ending a sentence.
///
/// Entries with internal periods ("e.g", "i.e") match the token as seen just
/// before its final period.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "co",
    "e.g", "i.e", "a.m", "p.m", "u.s",
];

/// Chunker limits and mode
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub mode: ChunkMode,
    /// Yields shorter than this are deferred and coalesced with the next
    pub min_chars: usize,
    /// At this length a split is forced at the best available break
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            mode: ChunkMode::Sentence,
            min_chars: 10,
            max_chars: 500,
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn with_mode(mode: ChunkMode) -> Self {
        Self { mode, ..Self::default() }
    }
}

/// Accumulates streaming text and emits TTS-sized chunks
#[derive(Debug)]
pub struct TextChunker {
    config: ChunkerConfig,
    buf: String,
}

impl TextChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config, buf: String::new() }
    }

    /// Feed a text delta; returns every chunk that became ready
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buf.push_str(delta);

        let mut ready = Vec::new();
        loop {
            if let Some(end) = self.boundary() {
                let chunk = self.take(end);
                if !chunk.is_empty() {
                    ready.push(chunk);
                }
            } else if self.buf.len() >= self.config.max_chars {
                let end = self.forced_split();
                let chunk = self.take(end);
                if !chunk.is_empty() {
                    ready.push(chunk);
                }
            } else {
                break;
            }
        }
        ready
    }

    /// Flush any residual buffer as the final chunk.
    ///
    /// The final flush is exempt from the minimum-length rule so no trailing
    /// text is ever lost.
    pub fn finish(&mut self) -> Option<String> {
        let residual = std::mem::take(&mut self.buf);
        let trimmed = residual.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Find the byte offset just past the next usable boundary, honoring the
    /// minimum chunk length (short candidates are skipped so they coalesce).
    fn boundary(&self) -> Option<usize> {
        match self.config.mode {
            ChunkMode::Sentence => self.sentence_boundary(),
            ChunkMode::Paragraph => self.paragraph_boundary(),
        }
    }

    fn sentence_boundary(&self) -> Option<usize> {
        let bytes = self.buf.as_bytes();
        let mut i = 0;
        while i + 1 < bytes.len() {
            let is_end = matches!(bytes[i], b'.' | b'!' | b'?')
                && bytes[i + 1].is_ascii_whitespace();

            if is_end {
                let skip = bytes[i] == b'.' && self.ends_with_abbreviation(i);
                if !skip && i + 1 >= self.config.min_chars {
                    return Some(i + 1);
                }
            }
            i += 1;
        }
        None
    }

    fn paragraph_boundary(&self) -> Option<usize> {
        let bytes = self.buf.as_bytes();
        let mut i = 0;
        while i + 1 < bytes.len() {
            if bytes[i] == b'\n' {
                let blank_line = bytes[i + 1] == b'\n';
                let indented = i + 2 < bytes.len() && bytes[i + 1] == b' ' && bytes[i + 2] == b' ';
                if (blank_line || indented) && i >= self.config.min_chars {
                    return Some(i);
                }
            }
            i += 1;
        }
        None
    }

    /// Whether the word ending at the period at byte `dot` is a known
    /// abbreviation ("Dr.", "e.g.", ...)
    fn ends_with_abbreviation(&self, dot: usize) -> bool {
        let head = &self.buf[..dot];
        let word_start = head
            .rfind(|c: char| c.is_whitespace())
            .map_or(0, |pos| pos + 1);
        let word = head[word_start..]
            .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase();
        ABBREVIATIONS.contains(&word.as_str())
    }

    /// Pick the best split point within the cap: nearest sentence break,
    /// else comma, else space, else a hard split at the cap.
    fn forced_split(&self) -> usize {
        let mut cap = self.config.max_chars.min(self.buf.len());
        while cap > 0 && !self.buf.is_char_boundary(cap) {
            cap -= 1;
        }
        if cap == 0 {
            // A single char wider than the cap must still make progress
            return self.buf.chars().next().map_or(self.buf.len(), char::len_utf8);
        }
        let window = &self.buf.as_bytes()[..cap];

        for i in (1..window.len()).rev() {
            if matches!(window[i - 1], b'.' | b'!' | b'?') && window[i].is_ascii_whitespace() {
                return i;
            }
        }
        if let Some(i) = window.iter().rposition(|&b| b == b',') {
            if i > 0 {
                return i + 1;
            }
        }
        if let Some(i) = window.iter().rposition(|&b| b == b' ') {
            if i > 0 {
                return i;
            }
        }
        cap
    }

    /// Split off the chunk ending at `end`, trimming the chunk and the
    /// leading whitespace of what remains.
    fn take(&mut self, end: usize) -> String {
        let rest = self.buf.split_off(end);
        let chunk = std::mem::replace(&mut self.buf, rest);

        let skip = self.buf.len() - self.buf.trim_start().len();
        if skip > 0 {
            self.buf.drain(..skip);
        }

        chunk.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_chunker() -> TextChunker {
        TextChunker::new(ChunkerConfig::default())
    }

    fn collect_all(chunker: &mut TextChunker, deltas: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for delta in deltas {
            out.extend(chunker.push(delta));
        }
        out.extend(chunker.finish());
        out
    }

    // ---- Sentence mode ----

    #[test]
    fn splits_on_sentence_punctuation() {
        let mut chunker = sentence_chunker();
        let chunks = collect_all(
            &mut chunker,
            &["The fleet is docked. ", "Refueling finishes in an hour."],
        );
        assert_eq!(chunks, vec!["The fleet is docked.", "Refueling finishes in an hour."]);
    }

    #[test]
    fn abbreviation_does_not_split() {
        let mut chunker = sentence_chunker();
        let chunks = collect_all(
            &mut chunker,
            &["Dr. Smith went to the dock. Then he left."],
        );
        assert_eq!(chunks, vec!["Dr. Smith went to the dock.", "Then he left."]);
    }

    #[test]
    fn latin_abbreviations_do_not_split() {
        let mut chunker = sentence_chunker();
        let chunks = collect_all(
            &mut chunker,
            &["Bring supplies, e.g. fuel and ore. Then undock."],
        );
        assert_eq!(chunks, vec!["Bring supplies, e.g. fuel and ore.", "Then undock."]);
    }

    #[test]
    fn boundary_split_across_deltas() {
        let mut chunker = sentence_chunker();
        // Punctuation arrives in one delta, the following whitespace in the next
        let mut out = chunker.push("Course plotted for Sigma station.");
        assert!(out.is_empty());
        out.extend(chunker.push(" Engines are warm."));
        assert_eq!(out, vec!["Course plotted for Sigma station."]);
        assert_eq!(chunker.finish(), Some("Engines are warm.".to_string()));
    }

    #[test]
    fn short_yield_coalesces_with_next() {
        let mut chunker = sentence_chunker();
        // "Yes. " alone is under the 10-char minimum
        let chunks = collect_all(&mut chunker, &["Yes. The cargo hold is full."]);
        assert_eq!(chunks, vec!["Yes. The cargo hold is full."]);
    }

    #[test]
    fn question_and_exclamation_are_boundaries() {
        let mut chunker = sentence_chunker();
        let chunks = collect_all(
            &mut chunker,
            &["Is the reactor online? It is! Good work everyone."],
        );
        assert_eq!(
            chunks,
            vec!["Is the reactor online?", "It is! Good work everyone."]
        );
    }

    #[test]
    fn final_flush_may_be_short() {
        let mut chunker = sentence_chunker();
        let chunks = collect_all(&mut chunker, &["Understood. Ok."]);
        assert_eq!(chunks, vec!["Understood.", "Ok."]);
    }

    // ---- Forced splits at the cap ----

    #[test]
    fn forced_split_prefers_sentence_break() {
        let mut chunker = TextChunker::new(ChunkerConfig {
            mode: ChunkMode::Sentence,
            min_chars: 10,
            max_chars: 40,
        });
        // The only boundary is under the minimum, so it is skipped until the
        // cap trips; the forced split still prefers the sentence break
        let text = "Yes. alphabetagammadeltaepsilonzetaetathetaiota kappa";
        let chunks = collect_all(&mut chunker, &[text]);
        assert_eq!(chunks[0], "Yes.");
    }

    #[test]
    fn forced_split_falls_back_to_comma_then_space() {
        let mut chunker = TextChunker::new(ChunkerConfig {
            mode: ChunkMode::Sentence,
            min_chars: 10,
            max_chars: 30,
        });
        let chunks = collect_all(
            &mut chunker,
            &["alpha beta gamma, delta epsilon zeta eta theta"],
        );
        assert_eq!(chunks[0], "alpha beta gamma,");

        let mut chunker = TextChunker::new(ChunkerConfig {
            mode: ChunkMode::Sentence,
            min_chars: 10,
            max_chars: 20,
        });
        let chunks = collect_all(&mut chunker, &["alphabetagamma deltaepsilon zeta"]);
        assert_eq!(chunks[0], "alphabetagamma");
    }

    #[test]
    fn forced_split_hard_when_no_break_exists() {
        let mut chunker = TextChunker::new(ChunkerConfig {
            mode: ChunkMode::Sentence,
            min_chars: 2,
            max_chars: 8,
        });
        let chunks = collect_all(&mut chunker, &["abcdefghijklmnop"]);
        assert_eq!(chunks[0], "abcdefgh");
        assert!(chunks.iter().all(|c| c.len() <= 8));
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let mut chunker = TextChunker::new(ChunkerConfig {
            mode: ChunkMode::Sentence,
            min_chars: 1,
            max_chars: 6,
        });
        // 4-byte emoji; a naive split at 6 would land mid-character
        let chunks = collect_all(&mut chunker, &["\u{1F680}\u{1F680}\u{1F680}"]);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.is_char_boundary(0));
        }
    }

    // ---- Paragraph mode ----

    #[test]
    fn paragraph_splits_on_blank_line() {
        let mut chunker = TextChunker::new(ChunkerConfig::with_mode(ChunkMode::Paragraph));
        let chunks = collect_all(
            &mut chunker,
            &["First paragraph here.\n\nSecond paragraph here."],
        );
        assert_eq!(chunks, vec!["First paragraph here.", "Second paragraph here."]);
    }

    #[test]
    fn paragraph_splits_on_indented_continuation() {
        let mut chunker = TextChunker::new(ChunkerConfig::with_mode(ChunkMode::Paragraph));
        let chunks = collect_all(
            &mut chunker,
            &["Heading line text\n  indented block follows here"],
        );
        assert_eq!(chunks, vec!["Heading line text", "indented block follows here"]);
    }

    #[test]
    fn paragraph_keeps_single_newlines() {
        let mut chunker = TextChunker::new(ChunkerConfig::with_mode(ChunkMode::Paragraph));
        let chunks = collect_all(&mut chunker, &["line one\nline two\nline three"]);
        assert_eq!(chunks, vec!["line one\nline two\nline three"]);
    }

    // ---- Conservation ----

    #[test]
    fn concatenation_preserves_content() {
        let text = "Dr. Smith docked at Sigma. The manifest lists 4 ships, 12 crates of ore, \
                    and one passenger. Departure is at dawn! Any questions? None expected.";
        let mut chunker = sentence_chunker();
        // Stream in awkward 7-byte deltas
        let deltas: Vec<&str> = text
            .as_bytes()
            .chunks(7)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        let chunks = collect_all(&mut chunker, &deltas);

        let rejoined: String = chunks.join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rejoined), normalize(text));

        // No chunk under the minimum except possibly the final flush
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.len() >= 10, "undersized chunk: {c:?}");
        }
    }

    #[test]
    fn finish_on_empty_buffer_is_none() {
        let mut chunker = sentence_chunker();
        assert_eq!(chunker.finish(), None);
        chunker.push("   ");
        assert_eq!(chunker.finish(), None);
    }
}
