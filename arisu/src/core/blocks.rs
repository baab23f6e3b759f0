//! Blank-line block segmentation used by `READ` listings and `PATCH` edits.
//!
//! A block is a run of consecutive non-blank lines. Ids are assigned purely by
//! position every time a text is segmented, so they are only meaningful for
//! the bytes they were computed from.

/// A run of non-blank lines addressed by its position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: usize,
    pub lines: Vec<String>,
}

/// Split `text` into blocks separated by one or more blank lines.
///
/// A line is blank when it is empty after trimming whitespace. Blank runs are
/// dropped; ids are `0..n` in file order.
pub fn segment(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                push_block(&mut blocks, std::mem::take(&mut current));
            }
        } else {
            current.push(line.to_string());
        }
    }
    if !current.is_empty() {
        push_block(&mut blocks, current);
    }
    blocks
}

fn push_block(blocks: &mut Vec<Block>, lines: Vec<String>) {
    let id = blocks.len();
    blocks.push(Block { id, lines });
}

/// Render blocks back to file text.
///
/// Each line is newline-terminated and consecutive blocks are separated by a
/// single blank line. Lines are written verbatim, so a block that holds an
/// empty line (from a patch) splits in two on the next [`segment`].
pub fn serialize(blocks: &[Block]) -> String {
    let mut buf = String::new();
    for (idx, block) in blocks.iter().enumerate() {
        if idx > 0 {
            buf.push('\n');
        }
        for line in &block.lines {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    buf
}

/// Labeled listing returned to the model so later patches can address blocks.
pub fn format_listing(filename: &str, blocks: &[Block]) -> String {
    let mut buf = format!("Content of {filename} (split into blocks):\n");
    for block in blocks {
        buf.push_str(&format!("--- BLOCK {} ---\n", block.id));
        for line in &block.lines {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    buf
}
