/// Parse comma-separated tag input.
///
/// Pieces are trimmed, empty pieces are dropped and duplicates are removed
/// keeping the first occurrence. Input made only of commas and whitespace
/// yields no tags.
pub fn parse_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for piece in text.split(',') {
        let piece = piece.trim();
        if piece.is_empty() || tags.iter().any(|t| t == piece) {
            continue;
        }
        tags.push(piece.to_string());
    }
    tags
}

/// Render tags back into the comma-separated editor form.
pub fn format_tags(tags: &[String]) -> String {
    tags.join(", ")
}
