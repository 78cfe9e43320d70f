use axis_frontend::ast::*;
use axis_frontend::diag::DiagKind;
use axis_frontend::parse_source;

#[test]
fn parses_function_with_params_and_return_type() {
    let src = "func add(a: i32, b: i32) -> i32:\n    give a + b\n";
    let program = parse_source(src).expect("parse ok");
    assert_eq!(program.mode, Mode::Compile);
    assert_eq!(program.funcs.len(), 1);
    let f = &program.funcs[0];
    assert_eq!(f.name, "add");
    assert_eq!(f.params, vec![("a".to_string(), Ty::I32), ("b".to_string(), Ty::I32)]);
    assert_eq!(f.ret, Ty::I32);
    assert!(matches!(f.body.stmts[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn missing_arrow_means_void() {
    let src = "func tick():\n    give\n";
    let program = parse_source(src).expect("parse ok");
    assert_eq!(program.funcs[0].ret, Ty::Void);
    assert!(matches!(program.funcs[0].body.stmts[0].kind, StmtKind::Return(None)));
}

#[test]
fn missing_colon_is_a_parse_error() {
    let err = parse_source("func main() -> i32\n    give 0\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert!(err.message.contains("':'"), "unexpected message: {}", err.message);
}

#[test]
fn missing_type_after_arrow_is_a_parse_error() {
    let err = parse_source("func main() -> :\n    give 0\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert!(err.message.contains("type"));
}

#[test]
fn unknown_type_name_is_a_parse_error() {
    let err = parse_source("func main() -> f32:\n    give 0\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
}

#[test]
fn top_level_statement_is_rejected_in_compile_mode() {
    let err = parse_source("x: i32 = 1\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert!(err.message.contains("func"));
}

#[test]
fn mode_compile_directive_is_accepted() {
    let src = "mode compile\n\nfunc main() -> i32:\n    give 0\n";
    let program = parse_source(src).expect("parse ok");
    assert_eq!(program.mode, Mode::Compile);
    assert_eq!(program.funcs.len(), 1);
}

#[test]
fn mode_script_is_recorded_and_body_left_to_the_interpreter() {
    let program = parse_source("mode script\nwriteln(\"hi\")\n").expect("parse ok");
    assert_eq!(program.mode, Mode::Script);
    assert!(program.funcs.is_empty());
}

#[test]
fn bad_mode_operand_is_a_parse_error() {
    let err = parse_source("mode turbo\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
}

#[test]
fn errors_carry_positions() {
    let err = parse_source("func main() -> i32:\n    give 0\nfunc f(:\n    give 1\n").unwrap_err();
    assert_eq!(err.kind, DiagKind::Parse);
    assert_eq!(err.line, 3);
}
