use super::document::{Document, TextSegment};

pub const DEFAULT_MAX_SEGMENT_CHARS: usize = 1200;
pub const DEFAULT_MAX_OVERLAP_CHARS: usize = 120;

const SEGMENT_INDEX: &str = "index";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

const BOUNDARIES: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Word,
];

/// Splits documents into segments of at most `max_segment_chars` characters,
/// preferring paragraph breaks, then line breaks, then sentence ends, then
/// spaces. Text with no usable boundary is cut at the character limit.
/// Consecutive segments share up to `max_overlap_chars` of trailing words.
#[derive(Debug, Clone)]
pub struct RecursiveDocumentSplitter {
    max_segment_chars: usize,
    max_overlap_chars: usize,
}

impl Default for RecursiveDocumentSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEGMENT_CHARS, DEFAULT_MAX_OVERLAP_CHARS)
    }
}

impl RecursiveDocumentSplitter {
    pub fn new(max_segment_chars: usize, max_overlap_chars: usize) -> Self {
        let max_segment_chars = max_segment_chars.max(1);
        Self {
            max_segment_chars,
            max_overlap_chars: max_overlap_chars.min(max_segment_chars - 1),
        }
    }

    /// Segments carry the document metadata plus their position as `index`
    pub fn split(&self, document: &Document) -> Vec<TextSegment> {
        self.split_text(&document.text)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut metadata = document.metadata.clone();
                metadata.put(SEGMENT_INDEX, i.to_string());
                TextSegment::new(text, metadata)
            })
            .collect()
    }

    pub fn split_all(&self, documents: &[Document]) -> Vec<TextSegment> {
        documents.iter().flat_map(|d| self.split(d)).collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        self.collect_pieces(text, 0, &mut pieces);
        self.merge(pieces)
    }

    fn collect_pieces<'a>(&self, text: &'a str, level: usize, out: &mut Vec<&'a str>) {
        if char_len(text) <= self.max_segment_chars {
            out.push(text);
            return;
        }
        let Some(boundary) = BOUNDARIES.get(level) else {
            out.extend(hard_split(text, self.max_segment_chars));
            return;
        };
        let parts = split_at_boundary(text, *boundary);
        if parts.len() == 1 {
            self.collect_pieces(text, level + 1, out);
            return;
        }
        for part in parts {
            self.collect_pieces(part, level + 1, out);
        }
    }

    fn merge(&self, pieces: Vec<&str>) -> Vec<String> {
        let mut segments: Vec<String> = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            if char_len(&current) + char_len(piece) <= self.max_segment_chars {
                current.push_str(piece);
                continue;
            }

            let finished = current.trim().to_string();
            current.clear();
            if !finished.is_empty() {
                let overlap = overlap_tail(&finished, self.max_overlap_chars);
                if char_len(overlap) + 1 + char_len(piece) <= self.max_segment_chars
                    && !overlap.is_empty()
                {
                    current.push_str(overlap);
                    current.push(' ');
                }
                segments.push(finished);
            }
            current.push_str(piece);
        }

        let last = current.trim();
        if !last.is_empty() {
            segments.push(last.to_string());
        }
        segments
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split keeping each separator attached to the end of the preceding part
fn split_at_boundary(text: &str, boundary: Boundary) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        let end = match boundary {
            Boundary::Paragraph if c == '\n' && next == Some('\n') => {
                // Swallow the whole run of blank lines
                let mut end = i + 1;
                while let Some((j, '\n')) = chars.peek().copied() {
                    end = j + 1;
                    chars.next();
                }
                Some(end)
            }
            Boundary::Line if c == '\n' => Some(i + 1),
            Boundary::Sentence
                if matches!(c, '.' | '!' | '?') && next.map_or(false, char::is_whitespace) =>
            {
                Some(i + c.len_utf8())
            }
            Boundary::Word if c == ' ' => Some(i + 1),
            _ => None,
        };
        if let Some(end) = end {
            if end > start {
                parts.push(&text[start..end]);
            }
            start = end;
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == max_chars {
            parts.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

/// The longest run of whole trailing words within `max_chars` characters
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    let total = char_len(text);
    if total <= max_chars {
        return text;
    }
    let Some((cut, _)) = text.char_indices().nth(total - max_chars) else {
        return "";
    };
    let tail = &text[cut..];
    // Only start on a word boundary
    if text[..cut].ends_with(char::is_whitespace) {
        return tail.trim_start();
    }
    match tail.find(char::is_whitespace) {
        Some(space) => tail[space..].trim_start(),
        None => "",
    }
}
