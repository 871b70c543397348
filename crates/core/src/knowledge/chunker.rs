//! Splits policy documents into bounded, overlapping chunks.
//!
//! Paragraphs are the preferred unit. A paragraph longer than the bound is
//! split at sentence ends, and a sentence longer than the bound is hard-cut at
//! the last whitespace that fits. Markdown headings start a new section and
//! never share a chunk with the previous section.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkingSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_chars: 400, overlap_chars: 50 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
    pub section_title: Option<String>,
    pub text: String,
}

/// Collapses runs of spaces and tabs, unifies line endings, drops control
/// characters and the BOM, and keeps at most one blank line between
/// paragraphs.
pub fn normalize_document_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = Vec::new();
    let mut blank_run = 0usize;

    for line in unified.lines() {
        let cleaned: String = line
            .chars()
            .filter(|ch| *ch != '\u{feff}' && (!ch.is_control() || *ch == '\t'))
            .collect();
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !lines.is_empty() {
                lines.push(String::new());
            }
        } else {
            blank_run = 0;
            lines.push(collapsed);
        }
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn split_into_chunks(normalized: &str, settings: ChunkingSettings) -> Vec<TextChunk> {
    let max = settings.max_chars.max(1);
    let overlap = settings.overlap_chars.min(max / 2);
    let mut chunks = Vec::new();

    for section in sections(normalized) {
        let mut units = Vec::new();
        for paragraph in &section.paragraphs {
            split_unit(paragraph, max, &mut units);
        }
        pack_section(section.title, units, max, overlap, &mut chunks);
    }
    chunks
}

struct Section {
    title: Option<String>,
    paragraphs: Vec<String>,
}

fn sections(normalized: &str) -> Vec<Section> {
    let mut sections = vec![Section { title: None, paragraphs: Vec::new() }];
    let mut paragraph: Vec<&str> = Vec::new();

    for line in normalized.lines() {
        if let Some(title) = heading(line) {
            flush(&mut paragraph, &mut sections);
            sections.push(Section { title: Some(title), paragraphs: Vec::new() });
        } else if line.is_empty() {
            flush(&mut paragraph, &mut sections);
        } else {
            paragraph.push(line);
        }
    }
    flush(&mut paragraph, &mut sections);

    sections.retain(|section| !section.paragraphs.is_empty());
    sections
}

fn flush(paragraph: &mut Vec<&str>, sections: &mut [Section]) {
    if paragraph.is_empty() {
        return;
    }
    if let Some(section) = sections.last_mut() {
        section.paragraphs.push(paragraph.join(" "));
    }
    paragraph.clear();
}

fn heading(line: &str) -> Option<String> {
    let stripped = line.trim_start_matches('#');
    let level = line.len() - stripped.len();
    if level == 0 || level > 6 || !stripped.starts_with(' ') {
        return None;
    }
    let title = stripped.trim();
    (!title.is_empty()).then(|| title.to_owned())
}

fn split_unit(paragraph: &str, max: usize, units: &mut Vec<String>) {
    if char_len(paragraph) <= max {
        units.push(paragraph.to_owned());
        return;
    }
    for sentence in sentences(paragraph) {
        if char_len(&sentence) <= max {
            units.push(sentence);
        } else {
            hard_cut(&sentence, max, units);
        }
    }
}

fn sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let terminal = matches!(ch, '.' | '!' | '?' | '؟' | '。');
        if terminal && chars.peek().map_or(true, |next| next.is_whitespace()) {
            let sentence = current.trim().to_owned();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }
    sentences
}

fn hard_cut(text: &str, max: usize, units: &mut Vec<String>) {
    let mut rest = text.trim();
    while char_len(rest) > max {
        let limit = byte_offset(rest, max);
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|position| *position > 0)
            .unwrap_or(limit);
        units.push(rest[..cut].trim_end().to_owned());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        units.push(rest.to_owned());
    }
}

fn pack_section(
    title: Option<String>,
    units: Vec<String>,
    max: usize,
    overlap: usize,
    chunks: &mut Vec<TextChunk>,
) {
    let mut current = String::new();

    for unit in units {
        if !current.is_empty() && char_len(&current) + 1 + char_len(&unit) > max {
            chunks.push(TextChunk { section_title: title.clone(), text: current.clone() });
            current = overlap_tail(&current, overlap);
            if !current.is_empty() && char_len(&current) + 1 + char_len(&unit) > max {
                current.clear();
            }
        }

        if current.is_empty() {
            current = unit;
        } else {
            current.push(' ');
            current.push_str(&unit);
        }
    }

    if !current.is_empty() {
        chunks.push(TextChunk { section_title: title, text: current });
    }
}

/// Last `overlap` characters of a chunk, widened to start on a word boundary.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = char_len(text);
    if total <= overlap {
        return String::new();
    }
    let start = byte_offset(text, total - overlap);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(space) if start > 0 && !text[..start].ends_with(char::is_whitespace) => {
            tail[space..].trim().to_owned()
        }
        _ => tail.trim().to_owned(),
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(offset, _)| offset)
}

#[cfg(test)]
mod tests {
    use super::{normalize_document_text, split_into_chunks, ChunkingSettings};

    fn settings(max_chars: usize, overlap_chars: usize) -> ChunkingSettings {
        ChunkingSettings { max_chars, overlap_chars }
    }

    #[test]
    fn normalization_collapses_whitespace_and_blank_runs() {
        let raw = "\u{feff}Refunds\r\n\r\n\r\n  are   accepted\twithin 14 days.\u{7}\n\n";
        assert_eq!(normalize_document_text(raw), "Refunds\n\nare accepted within 14 days.");
    }

    #[test]
    fn short_paragraphs_share_a_chunk_and_headings_split_sections() {
        let text = normalize_document_text(
            "# Refunds\nRefunds take 14 days.\n\nCash refunds are not offered.\n\n# Delivery\nDelivery takes 2 days.",
        );
        let chunks = split_into_chunks(&text, settings(200, 20));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_title.as_deref(), Some("Refunds"));
        assert_eq!(chunks[0].text, "Refunds take 14 days. Cash refunds are not offered.");
        assert_eq!(chunks[1].section_title.as_deref(), Some("Delivery"));
        assert_eq!(chunks[1].text, "Delivery takes 2 days.");
    }

    #[test]
    fn long_paragraphs_split_on_sentences_with_overlap() {
        let paragraph = "Items can be returned within fourteen days. \
                         The item must be unused and in its box. \
                         Refunds are issued to the original payment method.";
        let chunks = split_into_chunks(paragraph, settings(60, 20));
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 60, "{:?}", chunk.text);
        }
        assert!(chunks[0].text.starts_with("Items can be returned"));
        assert!(chunks[1].text.contains("The item must be unused"));
        assert!(chunks[1].text.starts_with("fourteen days."), "overlap carried: {:?}", chunks[1].text);
    }

    #[test]
    fn oversized_sentences_are_hard_cut_at_whitespace() {
        let sentence = "word ".repeat(40);
        let chunks = split_into_chunks(sentence.trim(), settings(32, 0));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 32);
            assert!(!chunk.text.starts_with(' ') && !chunk.text.ends_with(' '));
            assert!(chunk.text.split(' ').all(|word| word == "word"));
        }
    }

    #[test]
    fn unbroken_text_is_cut_at_the_bound() {
        let blob = "x".repeat(95);
        let chunks = split_into_chunks(&blob, settings(40, 0));
        let lengths: Vec<_> = chunks.iter().map(|chunk| chunk.text.len()).collect();
        assert_eq!(lengths, vec![40, 40, 15]);
    }

    #[test]
    fn arabic_text_is_measured_in_characters() {
        let text = "يمكن إرجاع المنتج خلال أربعة عشر يوما. يجب أن يكون المنتج غير مستخدم.";
        let chunks = split_into_chunks(text, settings(45, 10));
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 45);
        }
    }

    #[test]
    fn empty_documents_produce_no_chunks() {
        assert!(split_into_chunks(&normalize_document_text(" \n\n\t"), settings(100, 10)).is_empty());
    }
}
