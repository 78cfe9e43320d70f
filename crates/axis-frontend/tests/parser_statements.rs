use axis_frontend::ast::*;
use axis_frontend::diag::DiagKind;
use axis_frontend::parse_source;

fn body(src: &str) -> Vec<Stmt> {
    let mut funcs = parse_source(src).expect("parse ok").funcs;
    funcs.remove(0).body.stmts
}

#[test]
fn when_with_else_attaches_to_nearest() {
    let src = "func main() -> i32:\n    when x == 1:\n        give 1\n    else:\n        give 2\n";
    let stmts = body(src);
    match &stmts[0].kind {
        StmtKind::If { else_block, .. } => assert!(else_block.is_some()),
        other => panic!("expected when, got {other:?}"),
    }
}

#[test]
fn else_when_chains_as_nested_if() {
    let src = "func main() -> i32:\n    when a:\n        give 1\n    else when b:\n        give 2\n    give 3\n";
    let stmts = body(src);
    match &stmts[0].kind {
        StmtKind::If { else_block: Some(b), .. } => {
            assert!(matches!(b.stmts[0].kind, StmtKind::If { .. }))
        }
        other => panic!("expected chained when, got {other:?}"),
    }
}

#[test]
fn loop_and_repeat_are_the_same_statement() {
    for kw in ["loop", "repeat"] {
        let src = format!("func main() -> i32:\n    {kw}:\n        break\n    give 0\n");
        let stmts = body(&src);
        match &stmts[0].kind {
            StmtKind::Loop { body } => assert!(matches!(body.stmts[0].kind, StmtKind::Break)),
            other => panic!("expected loop, got {other:?}"),
        }
    }
}

#[test]
fn stop_and_skip_parse_as_break_and_continue() {
    let src = "func main() -> i32:\n    while True:\n        stop\n    loop:\n        skip\n    give 0\n";
    let stmts = body(src);
    match &stmts[0].kind {
        StmtKind::While { body, .. } => assert!(matches!(body.stmts[0].kind, StmtKind::Break)),
        other => panic!("expected while, got {other:?}"),
    }
    match &stmts[1].kind {
        StmtKind::Loop { body } => assert!(matches!(body.stmts[0].kind, StmtKind::Continue)),
        other => panic!("expected loop, got {other:?}"),
    }
}

#[test]
fn break_outside_loop_is_a_parse_error() {
    let err = parse_source("func main() -> i32:\n    break\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert!(err.message.contains("break"));
}

#[test]
fn var_decl_requires_initializer() {
    let err = parse_source("func main() -> i32:\n    x: i32\n    give 0\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
}

#[test]
fn write_and_writeln_statements() {
    let src = "func main() -> i32:\n    write(1)\n    writeln(\"hi\")\n    give 0\n";
    let stmts = body(src);
    assert!(matches!(stmts[0].kind, StmtKind::Write { newline: false, .. }));
    assert!(matches!(stmts[1].kind, StmtKind::Write { newline: true, .. }));
}

#[test]
fn read_assignment_becomes_read_to() {
    let src = "func main() -> i32:\n    x: i32 = 0\n    x = readln()\n    give x\n";
    let stmts = body(src);
    match &stmts[1].kind {
        StmtKind::ReadTo { name, kind } => {
            assert_eq!(name, "x");
            assert_eq!(*kind, BuiltinKind::Readln);
        }
        other => panic!("expected ReadTo, got {other:?}"),
    }
}

#[test]
fn read_failed_assignment_stays_a_plain_assignment() {
    let src = "func main() -> i32:\n    ok: bool = True\n    ok = read_failed()\n    give 0\n";
    let stmts = body(src);
    assert!(matches!(stmts[1].kind, StmtKind::Assign { .. }));
}

#[test]
fn assignment_to_non_identifier_is_a_parse_error() {
    let err = parse_source("func main() -> i32:\n    1 = 2\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert!(err.message.contains("identifier"));
}

#[test]
fn bare_give_and_give_value() {
    let src = "func main() -> i32:\n    give 1 + 2\n";
    let stmts = body(src);
    assert!(matches!(stmts[0].kind, StmtKind::Return(Some(_))));
}
