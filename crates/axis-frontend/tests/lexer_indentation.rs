use axis_frontend::diag::DiagKind;
use axis_frontend::lexer::{Lexer, TokenKind};

fn kinds(src: &str) -> Vec<TokenKind> {
    Lexer::tokenize(src).expect("lex ok").into_iter().map(|t| t.kind).collect()
}

#[test]
fn indent_and_dedent_around_block() {
    let toks = kinds("func main() -> i32:\n    give 0\n");
    let indent = toks.iter().filter(|k| **k == TokenKind::Indent).count();
    let dedent = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
    assert_eq!(indent, 1);
    assert_eq!(dedent, 1);
    assert_eq!(*toks.last().unwrap(), TokenKind::Eof);
}

#[test]
fn nested_blocks_emit_matching_dedents() {
    let src = "func main() -> i32:\n    when True:\n        give 1\n    give 0\n";
    let toks = kinds(src);
    let indent = toks.iter().filter(|k| **k == TokenKind::Indent).count();
    let dedent = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
    assert_eq!(indent, 2);
    assert_eq!(dedent, 2);
}

#[test]
fn dedents_are_closed_at_eof() {
    // No trailing newline: both open blocks still close.
    let toks = kinds("func main() -> i32:\n    when True:\n        give 1");
    let dedent = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
    assert_eq!(dedent, 2);
}

#[test]
fn blank_and_comment_lines_do_not_affect_indentation() {
    let src = "func main() -> i32:\n\n    // comment line\n    # another\n    give 0\n";
    let toks = kinds(src);
    let indent = toks.iter().filter(|k| **k == TokenKind::Indent).count();
    let dedent = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
    assert_eq!(indent, 1);
    assert_eq!(dedent, 1);
}

#[test]
fn tab_counts_as_eight_columns() {
    // A tab-indented line followed by an eight-space line stays at one level.
    let src = "func main() -> i32:\n\tx: i32 = 1\n        give x\n";
    let toks = kinds(src);
    let indent = toks.iter().filter(|k| **k == TokenKind::Indent).count();
    assert_eq!(indent, 1);
}

#[test]
fn mismatched_dedent_is_an_indentation_error() {
    let src = "func main() -> i32:\n    when True:\n        give 1\n  give 0\n";
    let err = Lexer::tokenize(src).unwrap_err();
    assert_eq!(err.kind, DiagKind::Indentation);
}

#[test]
fn newline_suppressed_inside_parentheses() {
    let src = "func main() -> i32:\n    give add(1,\n 2)\n";
    let toks = kinds(src);
    // The newline inside the call must not produce NEWLINE/INDENT noise
    // between '(' and ')'.
    let lparen = toks.iter().position(|k| *k == TokenKind::LParen).unwrap();
    let rparen = toks.iter().position(|k| *k == TokenKind::RParen).unwrap();
    assert!(toks[lparen..rparen]
        .iter()
        .all(|k| !matches!(k, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)));
}

#[test]
fn crlf_line_endings_are_accepted() {
    let toks = kinds("func main() -> i32:\r\n    give 0\r\n");
    assert!(toks.iter().any(|k| *k == TokenKind::Indent));
    assert!(toks.iter().any(|k| *k == TokenKind::Give));
}

#[test]
fn tokens_carry_line_and_column() {
    let toks = Lexer::tokenize("func main() -> i32:\n    give 0\n").expect("lex ok");
    let give = toks.iter().find(|t| t.kind == TokenKind::Give).unwrap();
    assert_eq!(give.line, 2);
    assert_eq!(give.col, 5);
}
