//! The query language: a small expression grammar compiled into an iterator
//! tree.
//!
//! Supported forms: bare words (all fields, implicit and), trailing-`*`
//! prefixes, quoted strings (their words, grouped), `sender:` /
//! `signature:` / `instance:` / `body:` scoping, `hasreaction("...")`,
//! `after:`/`before:` timestamp bounds, and `and`/`or`/`not` with
//! parentheses. The empty query matches everything.

mod parser;

pub use parser::parse;
