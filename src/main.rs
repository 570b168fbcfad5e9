mod cli;

use std::fs;
use std::process::ExitCode;

use log::{error, info};
use serde::Serialize;

use cli::Cli;
use fjp::error::{CompileError, RuntimeError};
use fjp::instruction::Instruction;
use fjp::lexer::token::{Token, TokenKind};
use fjp::lexer::tokenize;
use fjp::parser::Parser;
use fjp::vm::Vm;

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Info).unwrap();
    let args = Cli::init();

    let source = match fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(err) => {
            let err = CompileError::io(format!("failed to read '{}': {}", args.input.display(), err));
            return report_compile_error(&err);
        }
    };

    let tokens = match tokenize(&source) {
        Ok(tokens) => tokens,
        Err(err) => return report_compile_error(&err),
    };
    info!("tokenized {} tokens", tokens.len());

    if args.debug {
        if let Err(err) = write_tokens_json(&tokens) {
            error!("failed to write tokens.json: {}", err);
        }
    }

    let program = match Parser::new(&tokens).parse() {
        Ok(program) => program,
        Err(err) => return report_compile_error(&err),
    };
    info!("compiled {} instructions", program.code.len());

    if args.debug {
        if let Err(err) = write_code_listing(&program.code) {
            error!("failed to write code.pl0-asm: {}", err);
        }
    }

    if !args.run {
        return ExitCode::SUCCESS;
    }

    let mut vm = Vm::new(&program.code);
    if args.debug {
        match fs::File::create("stacktrace.txt") {
            Ok(file) => vm = vm.with_trace(Box::new(file)),
            Err(err) => error!("failed to open stacktrace.txt: {}", err),
        }
    }

    if let Err(err) = vm.execute() {
        error!("{}", err);
        return ExitCode::from(RuntimeError::EXIT_CODE as u8);
    }

    ExitCode::SUCCESS
}

fn report_compile_error(err: &CompileError) -> ExitCode {
    eprintln!("{}", err);
    ExitCode::from(err.exit_code() as u8)
}

#[derive(Serialize)]
struct TokenJson {
    #[serde(rename = "typeId")]
    type_id: u32,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "lineNumber")]
    line_number: usize,
    value: String,
}

fn write_tokens_json(tokens: &[Token]) -> std::io::Result<()> {
    let entries: Vec<TokenJson> = tokens
        .iter()
        .map(|token| TokenJson {
            type_id: token_type_id(&token.kind),
            kind: token.kind.describe().to_string(),
            line_number: token.line,
            value: token.lexeme.clone(),
        })
        .collect();
    let json = serde_json::to_string_pretty(&entries).expect("token list always serializes");
    fs::write("tokens.json", json)
}

/// Stable numeric id for a token kind, in the same order `TokenKind` declares
/// its variants.
fn token_type_id(kind: &TokenKind) -> u32 {
    use TokenKind::*;
    match kind {
        Identifier(_) => 0,
        Number(_) => 1,
        Start => 2,
        End => 3,
        If => 4,
        Else => 5,
        For => 6,
        Foreach => 7,
        While => 8,
        Do => 9,
        Repeat => 10,
        Until => 11,
        Switch => 12,
        Case => 13,
        Break => 14,
        Const => 15,
        Int => 16,
        Bool => 17,
        IntArray => 18,
        BoolArray => 19,
        True => 20,
        False => 21,
        Function => 22,
        Call => 23,
        Read => 24,
        Write => 25,
        Goto => 26,
        Instanceof => 27,
        Plus => 28,
        Minus => 29,
        Star => 30,
        Slash => 31,
        EqEq => 32,
        NotEq => 33,
        Less => 34,
        LessEq => 35,
        Greater => 36,
        GreaterEq => 37,
        AndAnd => 38,
        OrOr => 39,
        Eq => 40,
        Assign => 41,
        Bang => 42,
        Question => 43,
        LParen => 44,
        RParen => 45,
        LBrace => 46,
        RBrace => 47,
        LBracket => 48,
        RBracket => 49,
        Comma => 50,
        Colon => 51,
        Semicolon => 52,
        Period => 53,
        Hash => 54,
    }
}

fn write_code_listing(code: &[Instruction]) -> std::io::Result<()> {
    let mut listing = String::new();
    for (addr, instr) in code.iter().enumerate() {
        listing.push_str(&format!("[#{:03}] {} {} {}\n", addr, instr.op.mnemonic(), instr.l, instr.m));
    }
    fs::write("code.pl0-asm", listing)
}
