//! User-facing rendering of compiler errors.
//!
//! ```text
//! AnalyzeError: cannot convert Bool to Int
//!   at line 1, column 18:
//!
//!     def main() Int { true }
//!                      ^^^^
//! ```

use crate::utils::Error;

/// Render `error` against the source text it was raised for.
pub fn render(error: &Error, source: &str) -> String {
    let mut out = format!("{}: {}", error.kind(), error);
    let Some(span) = error.span() else {
        return out;
    };

    let (line, col) = span.line_col(source);
    let text = span.line_text(source);
    let width = text.chars().count();
    let avail = width.saturating_sub(col - 1).max(1);
    let carets = source
        .get(span.start..span.end.min(source.len()))
        .map(|s| s.lines().next().unwrap_or("").chars().count())
        .unwrap_or(0)
        .clamp(1, avail);

    out.push_str(&format!("\n  at line {}, column {}:\n\n", line, col));
    out.push_str(&format!("    {}\n", text));
    out.push_str(&format!("    {}{}", " ".repeat(col - 1), "^".repeat(carets)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_caret_range() {
        let src = "def main() Int { true }";
        let err = Error::TypeMismatch {
            expected: "Int".to_string(),
            got: "Bool".to_string(),
            span: Span::new(17, 21),
        };
        assert_eq!(
            render(&err, src),
            "AnalyzeError: cannot convert Bool to Int\n  at line 1, column 18:\n\n    def main() Int { true }\n                     ^^^^"
        );
    }

    #[test]
    fn test_render_without_span() {
        let err = Error::CodeGen("stack underflow".to_string());
        assert_eq!(render(&err, ""), "InternalError: code generation error: stack underflow");
    }

    #[test]
    fn test_render_second_line() {
        let src = "def f()\n  $";
        let err = Error::InvalidCharacter { ch: '$', span: Span::new(10, 11) };
        let text = render(&err, src);
        assert!(text.starts_with("LexError: invalid character '$'"));
        assert!(text.contains("at line 2, column 3"));
        assert!(text.ends_with("      ^"));
    }
}
