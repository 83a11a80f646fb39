#[macro_export]
macro_rules! trace(
    ( $($thing:expr),* ) => { if cfg!(test) { println! { $($thing),* } } };
);


use crate::parser::Span;


// Pull a single line back out of the source text for diagnostics.
pub fn source_line(text: &str, line: usize) -> &str {
    text.lines().nth(line).unwrap_or("")
}


// The three-line pointer diagnostic shared by parse and graph errors:
// a one-line summary, the offending source line, and a caret under the
// first column of the offending span. Line numbers print 1-based,
// columns are 0-based.
pub fn pointer_message(text: &str, span: Span, message: &str) -> String {
    let mut out = format!("Line {}: Error: {}\n", span.first_line + 1, message);
    out.push_str(source_line(text, span.first_line));
    out.push('\n');
    for _ in 0..span.first_column {
        out.push(' ');
    }
    out.push_str("^\n");
    out
}
