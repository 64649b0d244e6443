//! Corpus ingestion and persistence.
//!
//! - `record`: the verse record data type
//! - `parser`: MorphGNT token files -> verse records
//! - `store`: JSON corpus checkpoint on disk

mod parser;
mod record;
mod store;

pub use parser::{parse_morphgnt, parse_morphgnt_dir};
pub use record::VerseRecord;
pub use store::{CorpusError, CorpusStore};
