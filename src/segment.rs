//! Splits raw ingested content into the block/statement leaves the
//! hierarchy expects (§3: messages contain blocks contain statements).
//! No teacher analog — the teacher's primitives ingest opaque values,
//! not free text requiring structural decomposition — so this is built
//! fresh in the terse, single-purpose-scanner style the rest of this
//! crate's text-handling modules (`mem-search::tokenizer`,
//! `mem-session::keyword_extractor`) use.

/// Split `content` into paragraph-like blocks on runs of two or more
/// newlines. Falls back to the whole text as a single block when no
/// blank-line separator is present.
pub fn split_blocks(content: &str) -> Vec<String> {
    let blocks: Vec<String> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();
    if blocks.is_empty() {
        vec![content.trim().to_string()]
    } else {
        blocks
    }
}

/// Split a block into sentence-like statements on `.`/`!`/`?` followed by
/// whitespace or end of input. Falls back to the whole block as a single
/// statement when no sentence boundary is found.
pub fn split_statements(block: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = block.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let next_is_boundary = chars.get(i + 1).map_or(true, |n| n.is_whitespace());
            if next_is_boundary {
                let trimmed = current.trim().to_string();
                if !trimmed.is_empty() {
                    statements.push(trimmed);
                }
                current.clear();
            }
        }
        i += 1;
    }
    let trailing = current.trim().to_string();
    if !trailing.is_empty() {
        statements.push(trailing);
    }
    if statements.is_empty() {
        vec![block.trim().to_string()]
    } else {
        statements
    }
}
