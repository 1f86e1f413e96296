pub mod ast;
pub mod builtins;
pub mod cli;
#[cfg(feature = "llvm")]
pub mod codegen;
pub mod config;
pub mod driver;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod module;
pub mod repl;
pub mod session;
pub mod types;
