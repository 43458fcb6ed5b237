mod line;
mod renderer;
mod scrollback;

pub use line::{DisplayLine, EMPTY_ROW};
pub use renderer::StreamRenderer;
pub use scrollback::{MAX_LINES, Scrollback, TRIM_BLOCK};
