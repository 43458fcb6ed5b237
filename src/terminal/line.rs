/// Rendered content of an empty row; keeps the row visible at full height.
pub const EMPTY_ROW: &str = "\u{a0}";

/// One scrollback row. `open` means the row has not been terminated by a
/// line feed yet and may still be extended by later output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayLine {
    text: String,
    open: bool,
}

impl DisplayLine {
    pub(crate) fn new(text: String) -> Self {
        Self { text, open: true }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Content as a view should paint it.
    pub fn display(&self) -> &str {
        if self.text.is_empty() {
            EMPTY_ROW
        } else {
            &self.text
        }
    }

    pub(crate) fn close(&mut self) {
        self.open = false;
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub(crate) fn replace_text(&mut self, text: String) {
        self.text = text;
        self.open = true;
    }
}
