use axis_frontend::ast::*;
use axis_frontend::diag::DiagKind;
use axis_frontend::parse_source;

/// Parse `give <expr>` and hand back the expression.
fn expr(text: &str) -> Expr {
    let src = format!("func main() -> i32:\n    give {text}\n");
    let mut funcs = parse_source(&src).expect("parse ok").funcs;
    match funcs.remove(0).body.stmts.remove(0).kind {
        StmtKind::Return(Some(e)) => e,
        other => panic!("expected give, got {other:?}"),
    }
}

fn as_binary(e: &Expr) -> (BinOp, &Expr, &Expr) {
    match &e.kind {
        ExprKind::Binary { op, lhs, rhs } => (*op, lhs, rhs),
        other => panic!("expected binary, got {other:?}"),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let e = expr("1 + 2 * 3");
    let (op, _, rhs) = as_binary(&e);
    assert_eq!(op, BinOp::Add);
    assert_eq!(as_binary(rhs).0, BinOp::Mul);
}

#[test]
fn additive_is_left_associative() {
    let e = expr("1 - 2 - 3");
    let (op, lhs, _) = as_binary(&e);
    assert_eq!(op, BinOp::Sub);
    assert_eq!(as_binary(lhs).0, BinOp::Sub);
}

#[test]
fn shift_binds_looser_than_addition() {
    let e = expr("1 << 2 + 3");
    let (op, _, rhs) = as_binary(&e);
    assert_eq!(op, BinOp::Shl);
    assert_eq!(as_binary(rhs).0, BinOp::Add);
}

#[test]
fn bitwise_precedence_or_xor_and() {
    // a | b ^ c & d parses as a | (b ^ (c & d))
    let e = expr("a | b ^ c & d");
    let (op, _, rhs) = as_binary(&e);
    assert_eq!(op, BinOp::BitOr);
    let (op2, _, rhs2) = as_binary(rhs);
    assert_eq!(op2, BinOp::BitXor);
    assert_eq!(as_binary(rhs2).0, BinOp::BitAnd);
}

#[test]
fn comparison_is_the_loosest_operator() {
    let e = expr("a & 1 == b & 1");
    let (op, lhs, rhs) = as_binary(&e);
    assert_eq!(op, BinOp::Eq);
    assert_eq!(as_binary(lhs).0, BinOp::BitAnd);
    assert_eq!(as_binary(rhs).0, BinOp::BitAnd);
}

#[test]
fn chained_comparison_is_a_parse_error() {
    let src = "func main() -> i32:\n    give 1 < 2 < 3\n";
    let err = parse_source(src).unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert!(err.message.contains("chain"));
}

#[test]
fn unary_binds_tighter_than_shift() {
    let e = expr("-5 >> 1");
    let (op, lhs, _) = as_binary(&e);
    assert_eq!(op, BinOp::Shr);
    assert!(matches!(lhs.kind, ExprKind::Unary { op: UnOp::Neg, .. }));
}

#[test]
fn unary_not_and_double_negation() {
    let e = expr("!!ok");
    match &e.kind {
        ExprKind::Unary { op: UnOp::Not, operand } => {
            assert!(matches!(operand.kind, ExprKind::Unary { op: UnOp::Not, .. }))
        }
        other => panic!("expected not, got {other:?}"),
    }
}

#[test]
fn parentheses_override_precedence() {
    let e = expr("(1 + 2) * 3");
    let (op, lhs, _) = as_binary(&e);
    assert_eq!(op, BinOp::Mul);
    assert_eq!(as_binary(lhs).0, BinOp::Add);
}

#[test]
fn calls_and_builtins_in_primary_position() {
    let e = expr("add(1, readchar())");
    match &e.kind {
        ExprKind::Call { name, args } => {
            assert_eq!(name, "add");
            assert_eq!(args.len(), 2);
            assert!(matches!(args[1].kind, ExprKind::Builtin(BuiltinKind::Readchar)));
        }
        other => panic!("expected call, got {other:?}"),
    }
}

#[test]
fn true_false_literals() {
    assert!(matches!(expr("True").kind, ExprKind::Bool(true)));
    assert!(matches!(expr("False").kind, ExprKind::Bool(false)));
}
