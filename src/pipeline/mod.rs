//! Pipeline stages for document summarisation.
//!
//! Each submodule implements exactly one step and depends only on the
//! collaborator traits in [`crate::services`], so every stage can be tested
//! against in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//! ocr ──▶ window ──▶ summarize ──▶ persist
//! (Vision)  (heuristic)  (Vertex / LLM)  (BigQuery)
//! ```
//!
//! 1. [`ocr`]: submit, poll within a bounded wait, concatenate shards
//! 2. [`window`]: pick the abstract and conclusion excerpts; pure, no I/O
//! 3. [`summarize`]: one prompt, fixed decoding parameters, no stage retry
//! 4. [`persist`]: validate and write one row; row errors come back as data

pub mod ocr;
pub mod persist;
pub mod summarize;
pub mod window;
