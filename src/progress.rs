use indicatif::{ProgressBar, ProgressStyle};

// A bar over `len` items labelled with `message`. Bars draw to stderr and stay
// silent when it is not a terminal.
pub fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len as u64)
        .with_style(style)
        .with_message(message)
}
