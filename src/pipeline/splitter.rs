//! Text splitting with offset tracking.
//!
//! Three boundary modes over normalized plain text, plus a post-processing pass that
//! merges undersized segments and drops empty ones. Window sizes (`target_size`,
//! `overlap`, `min_size`) count characters; emitted offsets are byte offsets into the
//! input, always on character boundaries, so `&text[start..end]` reconstructs the
//! segment content for unmerged segments.

use crate::pipeline::types::{ChunkingPolicy, SplitMode};
use regex::Regex;
use std::sync::OnceLock;

/// One emitted text segment with its location in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment text.
    pub content: String,
    /// Start byte offset in the source text.
    pub start: usize,
    /// End byte offset (exclusive) in the source text.
    pub end: usize,
}

/// Split `text` according to `policy`.
///
/// Pure and finite; call again for a new text. Empty or whitespace-only input yields an
/// empty result rather than an error.
pub fn split(text: &str, policy: &ChunkingPolicy) -> Vec<Segment> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let raw = match policy.split_mode {
        SplitMode::FixedWidth => split_fixed_width(text, policy.target_size, policy.overlap),
        SplitMode::Sentence => {
            let overlap = effective_overlap(policy.target_size, policy.overlap);
            pack_spans(text, sentence_spans(text), policy.target_size, overlap)
        }
        SplitMode::Paragraph => split_by_paragraphs(text, policy.target_size, policy.overlap),
    };
    merge_undersized(raw, policy.target_size, policy.min_size)
}

/// Split a standalone piece of text into sentences (no offsets), for callers that only
/// need the sentence texts.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    sentence_spans(text)
        .into_iter()
        .map(|(start, end)| &text[start..end])
        .collect()
}

/// Clamp the overlap below the target size.
///
/// An overlap at or above the target would make fixed-width windows stop advancing, so
/// the policy violation is corrected to half the target and logged.
fn effective_overlap(target_size: usize, overlap: usize) -> usize {
    if overlap >= target_size {
        let corrected = target_size / 2;
        tracing::warn!(
            overlap,
            target_size,
            corrected,
            "Overlap must be smaller than the target size; correcting"
        );
        corrected
    } else {
        overlap
    }
}

fn split_fixed_width(text: &str, target_size: usize, overlap: usize) -> Vec<Segment> {
    fixed_width_spans(text, 0, text.len(), target_size, overlap)
        .into_iter()
        .map(|(start, end)| segment(text, start, end))
        .collect()
}

/// Fixed-width windows over `text[region_start..region_end]`, counted in chars.
///
/// Consecutive windows advance by `target_size - overlap` chars; the last window may be
/// shorter than `target_size`.
fn fixed_width_spans(
    text: &str,
    region_start: usize,
    region_end: usize,
    target_size: usize,
    overlap: usize,
) -> Vec<(usize, usize)> {
    let overlap = effective_overlap(target_size, overlap);
    let step = target_size - overlap;
    let region = &text[region_start..region_end];

    // Byte offset of every char boundary in the region, plus the end sentinel.
    let mut boundaries: Vec<usize> = region.char_indices().map(|(i, _)| i).collect();
    boundaries.push(region.len());
    let char_count = boundaries.len() - 1;

    let mut spans = Vec::new();
    let mut position = 0;
    while position < char_count {
        let window_end = (position + target_size).min(char_count);
        spans.push((
            region_start + boundaries[position],
            region_start + boundaries[window_end],
        ));
        if window_end == char_count {
            break;
        }
        position += step;
    }
    spans
}

/// Sentence boundary spans: terminal punctuation followed by whitespace (or end of
/// text). Leading whitespace between sentences is skipped; trailing text without a
/// terminator forms a final sentence.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = skip_whitespace(text, 0);

    for (index, ch) in text.char_indices() {
        if index < start || !matches!(ch, '.' | '!' | '?' | '…') {
            continue;
        }
        let after = index + ch.len_utf8();
        let next_is_boundary = text[after..]
            .chars()
            .next()
            .is_none_or(|next| next.is_whitespace());
        if next_is_boundary && after > start {
            spans.push((start, after));
            start = skip_whitespace(text, after);
        }
    }

    if start < text.len() {
        let trailing = text[start..].trim_end();
        if !trailing.is_empty() {
            spans.push((start, start + trailing.len()));
        }
    }
    spans
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    from + text[from..]
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| c.len_utf8())
        .sum::<usize>()
}

/// Byte offset `count` chars before `from`, clamped to the start of the text.
fn rewind_chars(text: &str, from: usize, count: usize) -> usize {
    if count == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .take(count)
        .last()
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Greedily accumulate unit spans into segments bounded by `target_size` chars.
///
/// When the next unit would overflow the buffer, the buffer is flushed and a new one
/// starts `overlap` chars before that unit. A single unit longer than `target_size` is
/// emitted alone, never split here.
fn pack_spans(
    text: &str,
    spans: Vec<(usize, usize)>,
    target_size: usize,
    overlap: usize,
) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut buffer: Option<(usize, usize)> = None;

    for (unit_start, unit_end) in spans {
        let unit_len = char_len(&text[unit_start..unit_end]);
        match buffer {
            None => {
                if unit_len > target_size {
                    tracing::warn!(
                        chars = unit_len,
                        target_size,
                        "Atomic unit exceeds target size; emitting oversized chunk"
                    );
                    out.push(segment(text, unit_start, unit_end));
                } else {
                    buffer = Some((unit_start, unit_end));
                }
            }
            Some((buffer_start, buffer_end)) => {
                if char_len(&text[buffer_start..unit_end]) <= target_size {
                    buffer = Some((buffer_start, unit_end));
                } else {
                    out.push(segment(text, buffer_start, buffer_end));
                    if unit_len > target_size {
                        tracing::warn!(
                            chars = unit_len,
                            target_size,
                            "Atomic unit exceeds target size; emitting oversized chunk"
                        );
                        out.push(segment(text, unit_start, unit_end));
                        buffer = None;
                    } else {
                        let new_start = rewind_chars(text, unit_start, overlap);
                        buffer = Some((new_start, unit_end));
                    }
                }
            }
        }
    }

    if let Some((buffer_start, buffer_end)) = buffer {
        out.push(segment(text, buffer_start, buffer_end));
    }
    out
}

fn blank_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s*\n").expect("blank-line pattern compiles"))
}

/// Trimmed paragraph spans separated by blank lines.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for separator in blank_line_pattern().find_iter(text) {
        push_trimmed_span(text, start, separator.start(), &mut spans);
        start = separator.end();
    }
    push_trimmed_span(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed_span(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let raw = &text[start..end];
    let leading = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        spans.push((start + leading, start + leading + trimmed.len()));
    }
}

fn split_by_paragraphs(text: &str, target_size: usize, overlap: usize) -> Vec<Segment> {
    let overlap = effective_overlap(target_size, overlap);
    let mut units = Vec::new();
    for (para_start, para_end) in paragraph_spans(text) {
        if char_len(&text[para_start..para_end]) > target_size {
            tracing::warn!(
                chars = char_len(&text[para_start..para_end]),
                target_size,
                "Paragraph exceeds target size; falling back to fixed-width windows"
            );
            units.extend(fixed_width_spans(
                text, para_start, para_end, target_size, overlap,
            ));
        } else {
            units.push((para_start, para_end));
        }
    }
    pack_spans(text, units, target_size, overlap)
}

/// Left-to-right merge of undersized segments.
///
/// Segments shorter than `min_size` accumulate with their immediate neighbours until the
/// buffer reaches `min_size`; a merge that would exceed `target_size` is skipped and the
/// short segment kept standalone with a warning. Zero-length segments are dropped. The
/// final segment may remain shorter than `min_size`.
fn merge_undersized(segments: Vec<Segment>, target_size: usize, min_size: usize) -> Vec<Segment> {
    if min_size == 0 {
        return segments
            .into_iter()
            .filter(|segment| !segment.content.is_empty())
            .collect();
    }

    let mut out: Vec<Segment> = Vec::new();
    let mut pending: Option<Segment> = None;

    for segment in segments {
        if segment.content.is_empty() {
            continue;
        }
        match pending.take() {
            None => {
                if char_len(&segment.content) < min_size {
                    pending = Some(segment);
                } else {
                    out.push(segment);
                }
            }
            Some(accumulated) => {
                let merged_len = char_len(&accumulated.content) + 1 + char_len(&segment.content);
                if merged_len > target_size {
                    tracing::warn!(
                        chars = char_len(&accumulated.content),
                        min_size,
                        "Keeping undersized chunk standalone; merging would exceed target size"
                    );
                    out.push(accumulated);
                    if char_len(&segment.content) < min_size {
                        pending = Some(segment);
                    } else {
                        out.push(segment);
                    }
                } else {
                    let merged = merge_pair(accumulated, segment);
                    if char_len(&merged.content) >= min_size {
                        out.push(merged);
                    } else {
                        pending = Some(merged);
                    }
                }
            }
        }
    }

    // Whatever is left has no neighbour to merge with; the final chunk is allowed to be
    // shorter than min_size.
    if let Some(accumulated) = pending {
        out.push(accumulated);
    }
    out
}

fn merge_pair(left: Segment, right: Segment) -> Segment {
    let mut content = left.content;
    content.push(' ');
    content.push_str(&right.content);
    Segment {
        content,
        start: left.start,
        end: right.end,
    }
}

fn segment(text: &str, start: usize, end: usize) -> Segment {
    Segment {
        content: text[start..end].to_string(),
        start,
        end,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(target_size: usize, overlap: usize, min_size: usize, mode: SplitMode) -> ChunkingPolicy {
        ChunkingPolicy {
            target_size,
            overlap,
            min_size,
            split_mode: mode,
        }
    }

    #[test]
    fn empty_text_yields_no_segments() {
        assert!(split("", &policy(10, 0, 0, SplitMode::FixedWidth)).is_empty());
        assert!(split("   \n\t ", &policy(10, 0, 0, SplitMode::Sentence)).is_empty());
    }

    #[test]
    fn fixed_width_without_overlap_reconstructs_text() {
        let text = "abcdefghijklmnopqrstuvwx";
        let segments = split(text, &policy(7, 0, 0, SplitMode::FixedWidth));
        let rebuilt: String = segments.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(rebuilt, text);
        for segment in &segments {
            assert_eq!(&text[segment.start..segment.end], segment.content);
        }
    }

    #[test]
    fn fixed_width_with_overlap_advances_by_step() {
        let text = "abcdefghij";
        let segments = split(text, &policy(4, 1, 0, SplitMode::FixedWidth));
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + 3);
        }
        // Overlapping adjacent segments by their offsets reproduces the original text.
        let mut rebuilt = String::new();
        let mut covered = 0;
        for segment in &segments {
            rebuilt.push_str(&text[covered.max(segment.start)..segment.end]);
            covered = segment.end;
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn fixed_width_corrects_overlap_at_or_above_target() {
        // overlap == target would never advance; corrected to target/2 (step 2).
        let text = "abcdefgh";
        let segments = split(text, &policy(4, 4, 0, SplitMode::FixedWidth));
        assert!(segments.len() > 1);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + 2);
        }
    }

    #[test]
    fn fixed_width_respects_char_boundaries() {
        let text = "привет мир как дела";
        let segments = split(text, &policy(5, 1, 0, SplitMode::FixedWidth));
        for segment in &segments {
            assert_eq!(&text[segment.start..segment.end], segment.content);
            assert!(segment.content.chars().count() <= 5);
        }
    }

    #[test]
    fn sentence_mode_packs_short_sentences() {
        let segments = split("A. B. C.", &policy(5, 0, 0, SplitMode::Sentence));
        let contents: Vec<&str> = segments.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["A. B.", "C."]);
        assert_eq!((segments[0].start, segments[0].end), (0, 5));
        assert_eq!((segments[1].start, segments[1].end), (6, 8));
    }

    #[test]
    fn sentence_mode_emits_oversized_sentence_whole() {
        let text = "Tiny. This single sentence is far longer than the target size allows. End.";
        let segments = split(text, &policy(20, 0, 0, SplitMode::Sentence));
        let oversized = segments
            .iter()
            .find(|s| s.content.starts_with("This single"))
            .expect("oversized sentence present");
        assert!(oversized.content.chars().count() > 20);
        assert!(oversized.content.ends_with("allows."));
    }

    #[test]
    fn sentence_mode_overlap_rewinds_buffer_start() {
        let text = "Alpha beta. Gamma delta. Epsilon zeta.";
        let segments = split(text, &policy(14, 4, 0, SplitMode::Sentence));
        assert!(segments.len() >= 2);
        // Each flush starts the next buffer 4 chars before the triggering sentence.
        for pair in segments.windows(2) {
            assert!(pair[1].start < pair[0].end);
        }
    }

    #[test]
    fn paragraph_mode_packs_and_recurses_on_oversized() {
        let text = "Short one.\n\nShort two.\n\nThis paragraph is much longer than the target and gets windowed.";
        let segments = split(text, &policy(24, 0, 0, SplitMode::Paragraph));
        assert!(segments.len() >= 3);
        // The oversized paragraph's windows stay within the target.
        for segment in &segments {
            let chars = segment.content.chars().count();
            assert!(chars <= 24 || segment.content.contains('\n'));
        }
        // Offsets of unmerged segments slice back to their content.
        for segment in &segments {
            if !segment.content.contains(' ') {
                continue;
            }
            assert!(text.contains(&segment.content) || segment.content.contains("\n\n"));
        }
    }

    #[test]
    fn paragraph_mode_end_offset_comes_from_last_paragraph() {
        let text = "One.\n\nTwo.\n\nThree.";
        let segments = split(text, &policy(12, 0, 0, SplitMode::Paragraph));
        let first = &segments[0];
        assert_eq!(first.content, "One.\n\nTwo.");
        assert_eq!(first.end, 10);
    }

    #[test]
    fn merge_pass_accumulates_undersized_neighbours() {
        let text = "Aa. Bb. Cc. Dd.";
        let segments = split(text, &policy(20, 0, 7, SplitMode::Sentence));
        for (index, segment) in segments.iter().enumerate() {
            if index + 1 < segments.len() {
                assert!(segment.content.chars().count() >= 7);
            }
        }
    }

    #[test]
    fn merge_pass_keeps_short_chunk_when_merge_would_overflow() {
        // Two 6-char units with target 10: merging (6+1+6=13) would exceed the target,
        // so the first stays standalone even though it is under min_size 8.
        let raw = vec![
            Segment {
                content: "abcdef".into(),
                start: 0,
                end: 6,
            },
            Segment {
                content: "ghijkl".into(),
                start: 7,
                end: 13,
            },
        ];
        let merged = merge_undersized(raw, 10, 8);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "abcdef");
    }

    #[test]
    fn merge_pass_drops_zero_length_segments() {
        let raw = vec![
            Segment {
                content: String::new(),
                start: 0,
                end: 0,
            },
            Segment {
                content: "body".into(),
                start: 0,
                end: 4,
            },
        ];
        let merged = merge_undersized(raw, 10, 0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "body");
    }

    #[test]
    fn starts_are_monotonically_non_decreasing_in_all_modes() {
        let text = "One sentence here. Another follows it. Then a third one. And a fourth closes.\n\n\
                    A second paragraph sits below. It also has sentences.";
        for mode in [SplitMode::FixedWidth, SplitMode::Sentence, SplitMode::Paragraph] {
            let segments = split(text, &policy(30, 5, 10, mode));
            for pair in segments.windows(2) {
                assert!(pair[1].start >= pair[0].start, "mode {mode:?}");
            }
        }
    }

    #[test]
    fn sentence_spans_handle_cyrillic_terminators() {
        let spans = split_sentences("Да. Нет! Может быть…");
        assert_eq!(spans, vec!["Да.", "Нет!", "Может быть…"]);
    }

    #[test]
    fn sentence_spans_keep_ellipsis_with_sentence() {
        let spans = split_sentences("Wait... Done.");
        assert_eq!(spans, vec!["Wait...", "Done."]);
    }
}
