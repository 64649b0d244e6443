use serde::{Deserialize, Serialize};

/// One verse of corpus content.
///
/// Records are immutable once added to a corpus; a duplicate
/// `(book, chapter, verse)` triple is tolerated, not rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerseRecord {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    /// Whitespace-joined surface tokens. Non-empty for any persisted record.
    pub text: String,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "greek".to_string()
}

impl VerseRecord {
    /// Human-readable reference, e.g. "John 3:16".
    pub fn reference(&self) -> String {
        format!("{} {}:{}", self.book, self.chapter, self.verse)
    }
}

impl std::fmt::Display for VerseRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.reference(), self.text)
    }
}
