//! Pattern buffer with incremental terminal cleanup and tail search.
//!
//! Raw device output is cleaned as it arrives: escape sequences are
//! dropped, backspaces erase the previous character, a bare carriage return
//! restarts the current line and CRLF collapses to LF. Only the last
//! `search_depth` bytes are searched for prompts, so long outputs stay cheap
//! to scan.

use regex::{Captures, Regex};
use vte::{Parser, Perform};

/// Line editor fed by the vte parser.
#[derive(Debug, Default)]
struct LineEditor {
    /// Cleaned text.
    text: String,

    /// Byte offset where the current (unterminated) line starts.
    line_start: usize,

    /// A carriage return was seen and the line will be rewritten.
    pending_cr: bool,
}

impl LineEditor {
    fn rewrite_if_pending(&mut self) {
        if self.pending_cr {
            self.text.truncate(self.line_start);
            self.pending_cr = false;
        }
    }
}

impl Perform for LineEditor {
    fn print(&mut self, c: char) {
        self.rewrite_if_pending();
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.pending_cr = false;
                self.text.push('\n');
                self.line_start = self.text.len();
            }
            b'\r' => self.pending_cr = true,
            b'\t' => {
                self.rewrite_if_pending();
                self.text.push('\t');
            }
            0x08 => {
                if self.text.len() > self.line_start {
                    self.text.pop();
                }
            }
            _ => {}
        }
    }
}

/// Buffer for accumulating cleaned output and searching its tail.
pub struct PatternBuffer {
    parser: Parser,
    editor: LineEditor,

    /// How many bytes from the end to search for patterns.
    search_depth: usize,
}

impl std::fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("text", &self.editor.text)
            .field("search_depth", &self.search_depth)
            .finish()
    }
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            parser: Parser::new(),
            editor: LineEditor::default(),
            search_depth,
        }
    }

    /// Feed raw device bytes into the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.parser.advance(&mut self.editor, data);
    }

    /// Byte offset where the searched tail begins.
    pub fn tail_offset(&self) -> usize {
        let text = &self.editor.text;
        let mut start = text.len().saturating_sub(self.search_depth);
        while !text.is_char_boundary(start) {
            start += 1;
        }
        start
    }

    /// The searched tail of the buffer.
    pub fn tail(&self) -> &str {
        &self.editor.text[self.tail_offset()..]
    }

    /// Search the tail for a pattern.
    ///
    /// Returned match offsets are absolute positions in the buffer.
    pub fn search_tail(&self, pattern: &Regex) -> Option<(usize, usize)> {
        let offset = self.tail_offset();
        pattern
            .find(self.tail())
            .map(|m| (offset + m.start(), offset + m.end()))
    }

    /// Capture groups of the first match in the tail, with the tail offset.
    pub fn captures_tail<'a>(&'a self, pattern: &Regex) -> Option<(usize, Captures<'a>)> {
        let offset = self.tail_offset();
        pattern.captures(self.tail()).map(|c| (offset, c))
    }

    /// Search the entire buffer for a pattern.
    pub fn search_full(&self, pattern: &Regex) -> Option<(usize, usize)> {
        pattern.find(&self.editor.text).map(|m| (m.start(), m.end()))
    }

    /// Check if the tail contains a pattern match.
    pub fn tail_contains(&self, pattern: &Regex) -> bool {
        pattern.is_match(self.tail())
    }

    /// Remove and return everything before `pos`.
    pub fn take_before(&mut self, pos: usize) -> String {
        let editor = &mut self.editor;
        let pos = pos.min(editor.text.len());
        let head: String = editor.text.drain(..pos).collect();
        editor.line_start = editor.line_start.saturating_sub(pos);
        head
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> String {
        self.editor.line_start = 0;
        self.editor.pending_cr = false;
        std::mem::take(&mut self.editor.text)
    }

    /// The cleaned buffer contents.
    pub fn as_str(&self) -> &str {
        &self.editor.text
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.editor.text.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.editor.text.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.take();
    }

    /// Get the search depth setting.
    pub fn search_depth(&self) -> usize {
        self.search_depth
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}
