/// Split a reply into chunks that fit a platform's message-length limit.
///
/// Three passes, each applied only to pieces still over `max_len`:
/// sentence boundaries (`". "`), then newlines, then fixed-width slices.
/// Input at or under the limit is returned unchanged as a single chunk.
pub fn chunk_reply(text: &str, max_len: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    for piece in split_sentences(text, max_len) {
        if piece.len() <= max_len {
            chunks.push(piece);
            continue;
        }
        for line_piece in split_lines(&piece, max_len) {
            if line_piece.len() <= max_len {
                chunks.push(line_piece);
            } else {
                hard_split_into(&line_piece, max_len, &mut chunks);
            }
        }
    }

    if chunks.is_empty() {
        // Whitespace-only input trims away entirely; fall back to raw slices
        // so a non-empty input always yields at least one chunk.
        hard_split_into(text, max_len, &mut chunks);
    }
    chunks
}

/// Greedy sentence accumulation. The `". "` split consumes the terminal
/// period, so it is restored on every sentence but the last to keep sealed
/// chunks properly terminated.
fn split_sentences(text: &str, max_len: usize) -> Vec<String> {
    let parts: Vec<&str> = text.split(". ").collect();
    let last = parts.len() - 1;

    let mut pieces = Vec::new();
    let mut current = String::new();
    for (i, part) in parts.iter().enumerate() {
        let sentence = if i < last {
            format!("{}.", part)
        } else {
            (*part).to_string()
        };

        let candidate_len = if current.is_empty() {
            sentence.len()
        } else {
            current.len() + 1 + sentence.len()
        };
        if !current.is_empty() && candidate_len > max_len {
            seal(&mut pieces, &current);
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    seal(&mut pieces, &current);
    pieces
}

fn split_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        let candidate_len = if current.is_empty() {
            line.len()
        } else {
            current.len() + 1 + line.len()
        };
        if !current.is_empty() && candidate_len > max_len {
            seal(&mut pieces, &current);
            current.clear();
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    seal(&mut pieces, &current);
    pieces
}

fn seal(pieces: &mut Vec<String>, buffer: &str) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        pieces.push(trimmed.to_string());
    }
}

/// Fixed-width slices of at most `max_len` bytes, backed off to the nearest
/// UTF-8 char boundary.
fn hard_split_into(text: &str, max_len: usize, out: &mut Vec<String>) {
    let mut start = 0;
    while start < text.len() {
        let mut end = std::cmp::min(start + max_len, text.len());
        while !text.is_char_boundary(end) && end > start {
            end -= 1;
        }
        if end == start {
            // max_len is smaller than the char at `start`; emit it whole.
            end = (start + 1..=text.len())
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(text.len());
        }
        out.push(text[start..end].to_string());
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_returned_unchanged() {
        assert_eq!(chunk_reply("hello world", 100), vec!["hello world"]);
        // No trimming in the trivial case.
        assert_eq!(chunk_reply("  padded  ", 100), vec!["  padded  "]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_reply("", 100).is_empty());
    }

    #[test]
    fn splits_at_sentence_boundaries() {
        let text = "Hello. This is a test. Another sentence here.";
        let chunks = chunk_reply(text, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 20, "chunk too long: {:?}", chunk);
        }
        assert_eq!(chunks[0], "Hello.");
        assert_eq!(chunks[1], "This is a test.");
    }

    #[test]
    fn greedy_accumulation_packs_sentences() {
        let text = "One. Two. Three. Four. Five. Six. Seven and more words.";
        let chunks = chunk_reply(text, 22);
        for chunk in &chunks {
            assert!(chunk.len() <= 22);
        }
        // First buffer holds as many short sentences as fit (22 bytes exactly).
        assert_eq!(chunks[0], "One. Two. Three. Four.");
    }

    #[test]
    fn falls_back_to_newlines_for_long_sentences() {
        let text = format!("{}\n{}\n{}", "a".repeat(18), "b".repeat(18), "c".repeat(18));
        let chunks = chunk_reply(&text, 20);
        assert_eq!(chunks, vec!["a".repeat(18), "b".repeat(18), "c".repeat(18)]);
    }

    #[test]
    fn hard_splits_an_unbroken_run() {
        let text = "x".repeat(45);
        let chunks = chunk_reply(&text, 20);
        assert_eq!(chunks, vec!["x".repeat(20), "x".repeat(20), "x".repeat(5)]);
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let text = "ありがとうございました、またよろしくお願いします".repeat(4);
        let chunks = chunk_reply(&text, 20);
        for chunk in &chunks {
            assert!(chunk.len() <= 20);
            // Slicing on a non-boundary would have panicked already; also
            // confirm we emitted whole characters.
            assert!(chunk.chars().count() > 0);
        }
    }

    #[test]
    fn chunks_cover_the_original_text() {
        let text = "First sentence here. Second sentence follows on.\nA new line block. And a tail without period ending";
        let chunks = chunk_reply(text, 30);
        for chunk in &chunks {
            assert!(chunk.len() <= 30);
        }
        // Content survives modulo the separators/whitespace at seal points.
        let rejoined: String = chunks.join(" ");
        let normalize = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(normalize(&rejoined), normalize(text));
    }

    #[test]
    fn output_order_matches_input_order() {
        let text = "alpha. bravo. charlie. delta. echo. foxtrot. golf. hotel.";
        let chunks = chunk_reply(text, 15);
        let flattened = chunks.join(" ");
        let mut last = 0;
        for word in ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"] {
            let pos = flattened[last..].find(word).map(|p| p + last);
            assert!(pos.is_some(), "{} out of order", word);
            last = pos.unwrap_or(last);
        }
    }
}
