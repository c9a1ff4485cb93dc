//! Sift search terms - tokenizer and term types

pub mod ast;
mod parser;

pub use ast::*;
pub use parser::{parse, parse_plain_value, ParseError};
