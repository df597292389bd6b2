//! Code fence extraction from model replies
//!
//! Model replies are loosely structured markdown. This module scans them
//! line by line with a three-state machine (outside a fence, reading the
//! fence header, reading the fence body) and reports both the well-formed
//! blocks and the fences it had to give up on.
//!
//! Rules:
//! - An opening fence is a run of three or more backticks at the start of a
//!   line (leading whitespace allowed). The rest of that line is the header;
//!   its first word is the language tag.
//! - A header containing a backtick is an inline code span, not a fence.
//! - A body line made only of a backtick run at least as long as the opener
//!   closes the block. A body line ending in the opener's backticks also
//!   closes it, keeping the text before them.
//! - A backtick run followed by a tag inside a body opens a new fence. The
//!   interrupted block is reported as malformed and never executed.
//! - A fence still open at the end of the text is reported as malformed.
//!
//! Every fence, well-formed or not, gets an index in document order so tool
//! messages can point back at the exact fence they describe.

use tera_sdk::types::CodeBlock;

/// Why a fence could not be turned into a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceDefect {
    /// Opened but never closed
    Unterminated,
    /// Another opening fence appeared before the closer
    Interrupted,
}

impl std::fmt::Display for FenceDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FenceDefect::Unterminated => write!(f, "unterminated code fence"),
            FenceDefect::Interrupted => write!(f, "code fence interrupted by another fence"),
        }
    }
}

/// A fence that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFence {
    pub index: usize,
    pub line: usize,
    pub language: Option<String>,
    pub defect: FenceDefect,
}

/// Everything the parser found in one reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    /// Well-formed blocks in document order
    pub blocks: Vec<CodeBlock>,
    pub malformed: Vec<MalformedFence>,
}

impl ParsedReply {
    /// Number of fences seen, well-formed or not
    pub fn fence_count(&self) -> usize {
        self.blocks.len() + self.malformed.len()
    }

    /// Whether the reply asks for anything to be run
    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Opener {
    index: usize,
    line: usize,
    fence_len: usize,
}

#[derive(Debug)]
enum State {
    OutsideFence,
    InFenceHeader {
        open: Opener,
        header: String,
    },
    InFenceBody {
        open: Opener,
        language: Option<String>,
        body: Vec<String>,
    },
}

struct FenceParser {
    state: State,
    next_index: usize,
    out: ParsedReply,
}

/// Extract all well-formed code blocks from `text`, in document order
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    parse_reply(text).blocks
}

/// Scan `text` for fences, keeping malformed ones as diagnostics
pub fn parse_reply(text: &str) -> ParsedReply {
    let mut parser = FenceParser {
        state: State::OutsideFence,
        next_index: 0,
        out: ParsedReply::default(),
    };
    for (i, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        parser.feed_line(i + 1, line);
    }
    parser.finish()
}

/// Length of the backtick run at the start of `s`
fn backtick_run(s: &str) -> usize {
    s.bytes().take_while(|b| *b == b'`').count()
}

fn language_tag(header: &str) -> Option<String> {
    header
        .split_whitespace()
        .next()
        .map(|tag| tag.to_ascii_lowercase())
}

impl FenceParser {
    fn feed_line(&mut self, line_no: usize, line: &str) {
        match std::mem::replace(&mut self.state, State::OutsideFence) {
            State::OutsideFence => self.outside(line_no, line),
            // A newline after the header moves the fence into its body.
            State::InFenceHeader { open, header } => {
                let language = language_tag(&header);
                self.body_line(line_no, line, open, language, Vec::new());
            }
            State::InFenceBody {
                open,
                language,
                body,
            } => self.body_line(line_no, line, open, language, body),
        }
    }

    fn body_line(
        &mut self,
        line_no: usize,
        line: &str,
        open: Opener,
        language: Option<String>,
        mut body: Vec<String>,
    ) {
        let trimmed = line.trim_start();
        let run = backtick_run(trimmed);

        if run >= open.fence_len {
            let rest = trimmed[run..].trim();
            if rest.is_empty() {
                self.emit(open, language, body);
                return;
            }
            if !rest.contains('`') {
                self.reject(open, language, FenceDefect::Interrupted);
                self.open_fence(line_no, run, rest);
                return;
            }
        }

        let closer = "`".repeat(open.fence_len);
        let end_trimmed = line.trim_end();
        if run == 0 && end_trimmed.ends_with(&closer) {
            let kept = &end_trimmed[..end_trimmed.len() - closer.len()];
            if !kept.ends_with('`') {
                body.push(kept.to_string());
                self.emit(open, language, body);
                return;
            }
        }

        body.push(line.to_string());
        self.state = State::InFenceBody {
            open,
            language,
            body,
        };
    }

    fn outside(&mut self, line_no: usize, line: &str) {
        let trimmed = line.trim_start();
        let run = backtick_run(trimmed);
        if run < 3 {
            return;
        }
        let header = &trimmed[run..];
        if header.contains('`') {
            // inline span such as ```x``` on one line
            return;
        }
        self.open_fence(line_no, run, header);
    }

    fn open_fence(&mut self, line_no: usize, fence_len: usize, header: &str) {
        let open = Opener {
            index: self.next_index,
            line: line_no,
            fence_len,
        };
        self.next_index += 1;
        self.state = State::InFenceHeader {
            open,
            header: header.trim().to_string(),
        };
    }

    fn emit(&mut self, open: Opener, language: Option<String>, body: Vec<String>) {
        self.out.blocks.push(CodeBlock {
            language,
            source: body.join("\n"),
            index: open.index,
            line: open.line,
        });
    }

    fn reject(&mut self, open: Opener, language: Option<String>, defect: FenceDefect) {
        self.out.malformed.push(MalformedFence {
            index: open.index,
            line: open.line,
            language,
            defect,
        });
    }

    fn finish(mut self) -> ParsedReply {
        match std::mem::replace(&mut self.state, State::OutsideFence) {
            State::OutsideFence => {}
            State::InFenceHeader { open, header } => {
                let language = language_tag(&header);
                self.reject(open, language, FenceDefect::Unterminated);
            }
            State::InFenceBody { open, language, .. } => {
                self.reject(open, language, FenceDefect::Unterminated);
            }
        }
        self.out.malformed.sort_by_key(|m| m.index);
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_python_block() {
        let text = "Sure:\n```python\nprint(2+2)\n```\nDone.";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
        assert_eq!(blocks[0].source, "print(2+2)");
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[0].line, 2);
    }

    #[test]
    fn test_blocks_in_document_order() {
        let text = "```bash\necho one\n```\ntext\n```py\nprint('two')\n```\n";
        let blocks = extract_code_blocks(text);
        let langs: Vec<_> = blocks.iter().map(|b| b.language.clone()).collect();
        assert_eq!(langs, vec![Some("bash".into()), Some("py".into())]);
        assert_eq!(blocks[1].index, 1);
    }

    #[test]
    fn test_untagged_block_is_kept_without_language() {
        let parsed = parse_reply("```\nplain text\n```");
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.blocks[0].language, None);
        assert!(parsed.has_blocks());
    }

    #[test]
    fn test_tag_is_lowercased_and_first_word_only() {
        let blocks = extract_code_blocks("```Python title=demo.py\nx = 1\n```");
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
    }

    #[test]
    fn test_unterminated_fence_not_emitted() {
        let parsed = parse_reply("here:\n```bash\nrm -rf build\n");
        assert!(parsed.blocks.is_empty());
        assert_eq!(parsed.malformed.len(), 1);
        assert_eq!(parsed.malformed[0].defect, FenceDefect::Unterminated);
        assert_eq!(parsed.malformed[0].language.as_deref(), Some("bash"));
    }

    #[test]
    fn test_fence_at_end_of_text_is_unterminated() {
        let parsed = parse_reply("text\n```python");
        assert!(parsed.blocks.is_empty());
        assert_eq!(parsed.malformed[0].defect, FenceDefect::Unterminated);
    }

    #[test]
    fn test_interrupted_fence_reported_and_next_block_kept() {
        let text = "```python\nprint(1)\n```bash\necho ok\n```";
        let parsed = parse_reply(text);
        assert_eq!(parsed.malformed.len(), 1);
        assert_eq!(parsed.malformed[0].index, 0);
        assert_eq!(parsed.malformed[0].defect, FenceDefect::Interrupted);
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.blocks[0].index, 1);
        assert_eq!(parsed.blocks[0].source, "echo ok");
        assert_eq!(parsed.fence_count(), 2);
    }

    #[test]
    fn test_inline_closer_keeps_text() {
        let blocks = extract_code_blocks("```python\nprint(2+2)```\nafter");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source, "print(2+2)");
    }

    #[test]
    fn test_inline_span_is_not_a_fence() {
        let parsed = parse_reply("use ```ls``` to list");
        assert_eq!(parsed.fence_count(), 0);
    }

    #[test]
    fn test_longer_fence_allows_inner_backticks() {
        let text = "````markdown\n```python\nx\n```\n````";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("markdown"));
        assert_eq!(blocks[0].source, "```python\nx\n```");
    }

    #[test]
    fn test_crlf_and_indentation() {
        let blocks = extract_code_blocks("1. run:\r\n   ```sh\r\n   ls\r\n   ```\r\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("sh"));
        assert_eq!(blocks[0].source, "   ls");
    }

    #[test]
    fn test_empty_body() {
        let blocks = extract_code_blocks("```bash\n```");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source, "");
    }

    #[test]
    fn test_no_fences() {
        assert_eq!(parse_reply("just words"), ParsedReply::default());
    }
}
