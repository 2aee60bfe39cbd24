//! AST-aware code chunking with line-based fallback.
//!
//! Given `(path, content)` this crate produces the ordered chunk sequence
//! the rest of the engine indexes and searches:
//!
//! 1. With the `treesitter` feature, supported languages are parsed and one
//!    chunk is emitted per boundary definition (functions, classes, impls…),
//!    with sub-10-line chunks merged into their predecessor.
//! 2. Everything else (unsupported language, oversized file, parse failure,
//!    feature disabled) falls back to 100-line windows with 5-line overlap.
//!
//! Chunk ids are stable across runs; binary and empty files produce no
//! chunks at all.

#[cfg(feature = "treesitter")]
pub mod ast;
pub mod binary;
pub mod chunker;
pub mod symbols;

pub use binary::is_binary;
pub use chunker::{doc_id, Chunker};
pub use symbols::extract_symbols;
