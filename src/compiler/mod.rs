mod codegen;
pub mod scanner;

pub use codegen::compile;
pub use scanner::{Scanner, Token, TokenKind};
