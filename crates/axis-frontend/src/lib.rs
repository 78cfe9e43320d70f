pub mod ast;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod sema;

use diag::Diagnostic;

/// Lex and parse one source file.
pub fn parse_source(src: &str) -> Result<ast::Program, Diagnostic> {
    let tokens = lexer::Lexer::tokenize(src)?;
    log::debug!("lexed {} tokens", tokens.len());
    parser::Parser::parse(&tokens)
}

/// Run the whole front half of the pipeline: tokens, AST, types and frame
/// layout. This is everything `--check` needs.
pub fn check_source(src: &str) -> Result<sema::CheckedProgram, Diagnostic> {
    let program = parse_source(src)?;
    log::debug!("parsed {} functions", program.funcs.len());
    sema::analyze(&program)
}
