use axis_frontend::diag::DiagKind;
use axis_frontend::lexer::{Lexer, TokenKind};

fn first_int(src: &str) -> (u64, u8) {
    let toks = Lexer::tokenize(src).expect("lex ok");
    toks.iter()
        .find_map(|t| match t.kind {
            TokenKind::Int { value, radix } => Some((value, radix)),
            _ => None,
        })
        .expect("no int token")
}

#[test]
fn decimal_hex_and_binary_literals() {
    assert_eq!(first_int("42"), (42, 10));
    assert_eq!(first_int("0xFF"), (255, 16));
    assert_eq!(first_int("0Xff"), (255, 16));
    assert_eq!(first_int("0b1010"), (10, 2));
    assert_eq!(first_int("0"), (0, 10));
}

#[test]
fn minus_is_not_part_of_the_literal() {
    let toks = Lexer::tokenize("-5").expect("lex ok");
    assert_eq!(toks[0].kind, TokenKind::Minus);
    assert!(matches!(toks[1].kind, TokenKind::Int { value: 5, .. }));
}

#[test]
fn underscore_separators_are_rejected() {
    let err = Lexer::tokenize("1_000").unwrap_err();
    assert_eq!(err.kind, DiagKind::Lex);
}

#[test]
fn trailing_letters_in_literals_are_rejected() {
    assert_eq!(Lexer::tokenize("123abc").unwrap_err().kind, DiagKind::Lex);
    assert_eq!(Lexer::tokenize("0x12G").unwrap_err().kind, DiagKind::Lex);
    assert_eq!(Lexer::tokenize("0b102").unwrap_err().kind, DiagKind::Lex);
}

#[test]
fn empty_radix_prefix_is_rejected() {
    assert_eq!(Lexer::tokenize("0x").unwrap_err().kind, DiagKind::Lex);
    assert_eq!(Lexer::tokenize("0b ").unwrap_err().kind, DiagKind::Lex);
}

#[test]
fn string_escapes() {
    let toks = Lexer::tokenize(r#""a\n\t\r\0\\\"b""#).expect("lex ok");
    match &toks[0].kind {
        TokenKind::Str(bytes) => assert_eq!(bytes, b"a\n\t\r\0\\\"b"),
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn unknown_escape_is_a_lex_error() {
    let err = Lexer::tokenize(r#""\q""#).unwrap_err();
    assert_eq!(err.kind, DiagKind::Lex);
    assert!(err.message.contains("escape"));
}

#[test]
fn unterminated_string_is_a_lex_error() {
    assert_eq!(Lexer::tokenize("\"abc").unwrap_err().kind, DiagKind::Lex);
    assert_eq!(Lexer::tokenize("\"abc\ndef\"").unwrap_err().kind, DiagKind::Lex);
}

#[test]
fn unknown_character_is_a_lex_error() {
    let err = Lexer::tokenize("func $").unwrap_err();
    assert_eq!(err.kind, DiagKind::Lex);
}

#[test]
fn stop_and_skip_alias_break_and_continue() {
    let toks = Lexer::tokenize("stop skip break continue").expect("lex ok");
    assert_eq!(toks[0].kind, TokenKind::Break);
    assert_eq!(toks[1].kind, TokenKind::Continue);
    assert_eq!(toks[2].kind, TokenKind::Break);
    assert_eq!(toks[3].kind, TokenKind::Continue);
}

#[test]
fn type_and_builtin_names_stay_identifiers() {
    let toks = Lexer::tokenize("i32 str write readln").expect("lex ok");
    for t in &toks[..4] {
        assert!(matches!(t.kind, TokenKind::Ident(_)), "expected identifier, got {:?}", t.kind);
    }
}

#[test]
fn two_character_operators() {
    let toks = Lexer::tokenize("== != <= >= << >> ->").expect("lex ok");
    let kinds: Vec<_> = toks.into_iter().map(|t| t.kind).collect();
    assert_eq!(
        &kinds[..7],
        &[
            TokenKind::Eq,
            TokenKind::Ne,
            TokenKind::Le,
            TokenKind::Ge,
            TokenKind::Shl,
            TokenKind::Shr,
            TokenKind::Arrow,
        ]
    );
}

#[test]
fn comments_run_to_end_of_line() {
    let toks = Lexer::tokenize("1 // two three\n2 # four\n").expect("lex ok");
    let ints: Vec<u64> = toks
        .iter()
        .filter_map(|t| match t.kind {
            TokenKind::Int { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(ints, vec![1, 2]);
}
