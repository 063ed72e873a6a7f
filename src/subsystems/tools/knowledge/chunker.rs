//! Splits long text into overlapping chunks before it enters the
//! knowledge base.

/// Tried in order; the first one found in the back half of a window ends
/// the chunk there.
const SEPARATORS: &[&str] = &["\n\n", "\n", "。", "！", "？", ".", "!", "?", " "];

pub const CHUNK_CHARS: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;

/// Chunks of at most `size` characters.  Consecutive chunks share up to
/// `overlap` characters.  Blank input yields no chunks.
pub fn split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    let size = size.max(1);
    let overlap = overlap.min(size / 2);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            break_point(&chars[start..hard_end]).map_or(hard_end, |i| start + i)
        };
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Offset just past the last separator in the back half of `window`.
fn break_point(window: &[char]) -> Option<usize> {
    let floor = window.len() / 2;
    SEPARATORS.iter().find_map(|sep| {
        let sep: Vec<char> = sep.chars().collect();
        window
            .windows(sep.len())
            .rposition(|w| w == sep.as_slice())
            .filter(|&i| i >= floor)
            .map(|i| i + sep.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split("  hello world  ", 1000, 200), vec!["hello world"]);
        assert!(split(" \n ", 1000, 200).is_empty());
    }

    #[test]
    fn long_text_breaks_on_paragraphs_with_overlap() {
        let para = "word ".repeat(50);
        let text = format!("{}\n\n{}\n\n{}", para.trim(), para.trim(), para.trim());
        let chunks = split(&text, 300, 50);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 300));
        let tail: String = chunks[0].chars().rev().take(10).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(chunks[1].contains(tail.trim()));
    }

    #[test]
    fn unbroken_text_is_cut_hard() {
        let text = "x".repeat(2500);
        let chunks = split(&text, 1000, 200);
        assert_eq!(chunks[0].len(), 1000);
        assert!(chunks.iter().all(|c| c.len() <= 1000));
        assert_eq!(chunks.last().map(String::len), Some(900));
    }

    #[test]
    fn cjk_sentences_end_chunks() {
        let text = "数据库需要定期备份。".repeat(30);
        let chunks = split(&text, 100, 20);
        assert!(chunks.iter().take(chunks.len() - 1).all(|c| c.ends_with('。')));
    }
}
