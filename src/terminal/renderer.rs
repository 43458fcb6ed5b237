use once_cell::sync::Lazy;
use regex::Regex;

use super::line::DisplayLine;
use super::scrollback::Scrollback;

static ESCAPE_SEQUENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new("\x1b\\[[0-9;]*[a-zA-Z]|\x1b\\][0-9;]*[a-zA-Z]*").expect("static pattern"));

static BRACKETED_PASTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?2004[hl]").expect("static pattern"));

/// Decodes the raw shared-shell output stream into scrollback rows.
///
/// Each chunk goes through the same pipeline: escape sequences and control
/// bytes are stripped, CRLF collapses to LF, and the rest is split on the
/// remaining carriage returns. The first segment appends; every later
/// segment redraws the current last row in place, which is how progress bars
/// and spinners repaint without cursor addressing. Within a segment, line
/// feeds close the current row and start the next one.
///
/// Whether the last row can still be extended is tracked with an explicit
/// flag on the row, never recovered from its content.
pub struct StreamRenderer {
    scrollback: Scrollback,
}

impl StreamRenderer {
    pub fn new() -> Self {
        Self {
            scrollback: Scrollback::new(),
        }
    }

    pub fn with_scrollback(scrollback: Scrollback) -> Self {
        Self { scrollback }
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    pub fn lines(&self) -> &[DisplayLine] {
        self.scrollback.lines()
    }

    pub fn feed(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let stripped = strip_controls(chunk);
        if stripped.is_empty() {
            return;
        }
        let normalized = stripped.replace("\r\n", "\n");

        let segments: Vec<&str> = normalized.split('\r').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if i == 0 {
                if !segment.is_empty() {
                    self.append(segment);
                }
            } else if !segment.is_empty() || i == last {
                // A redraw with nothing in the middle of a chunk is not
                // materialized; a trailing bare CR still clears the row.
                self.overwrite(segment);
            }
        }
    }

    fn append(&mut self, segment: &str) {
        for (i, part) in segment.split('\n').enumerate() {
            let text = escape_markup(part);
            if i == 0 {
                match self.scrollback.last_mut() {
                    Some(line) if line.is_open() => line.push_text(&text),
                    _ => self.scrollback.push(DisplayLine::new(text)),
                }
            } else {
                self.start_row(text);
            }
        }
    }

    fn overwrite(&mut self, segment: &str) {
        for (i, part) in segment.split('\n').enumerate() {
            let text = escape_markup(part);
            if i == 0 {
                match self.scrollback.last_mut() {
                    Some(line) => line.replace_text(text),
                    None => self.scrollback.push(DisplayLine::new(text)),
                }
            } else {
                self.start_row(text);
            }
        }
    }

    fn start_row(&mut self, text: String) {
        if let Some(line) = self.scrollback.last_mut() {
            line.close();
        }
        self.scrollback.push(DisplayLine::new(text));
    }
}

impl Default for StreamRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove CSI/OSC escape sequences and every C0 control byte except LF, CR
/// and TAB, then the bracketed-paste toggles whose ESC the first pass already
/// consumed. Runs before any escaping so control bytes are seen raw.
fn strip_controls(raw: &str) -> String {
    let without_sequences = ESCAPE_SEQUENCES.replace_all(raw, "");
    let mut kept = String::with_capacity(without_sequences.len());
    for ch in without_sequences.chars() {
        match ch {
            '\n' | '\r' | '\t' => kept.push(ch),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {}
            c => kept.push(c),
        }
    }
    BRACKETED_PASTE.replace_all(&kept, "").into_owned()
}

fn escape_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
