use index::RetrievedPassage;

pub const PASSAGE_SEPARATOR: &str = "\n\n";

/// Join passages in retrieval order and cut to at most `max_chars` characters.
///
/// The cut is a hard one: it can fall mid-word or mid-citation.
pub fn build_context(passages: &[RetrievedPassage], max_chars: usize) -> String {
    let joined = passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR);

    truncate_chars(&joined, max_chars)
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
