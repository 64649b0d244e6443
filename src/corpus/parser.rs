//! MorphGNT token file parsing.
//!
//! Line format: `BBCCVV pos parsing text word norm lemma`, one token per
//! line. Column 0 is the reference (two digits each for book, chapter,
//! verse), column 3 the surface Greek word with accents and punctuation.

use std::path::Path;

use super::record::VerseRecord;
use super::store::CorpusError;

/// Map a two-digit MorphGNT book code to its NT book name.
fn book_name(code: &str) -> String {
    let name = match code {
        "61" => "Matthew",
        "62" => "Mark",
        "63" => "Luke",
        "64" => "John",
        "65" => "Acts",
        "66" => "Romans",
        "67" => "1Corinthians",
        "68" => "2Corinthians",
        "69" => "Galatians",
        "70" => "Ephesians",
        "71" => "Philippians",
        "72" => "Colossians",
        "73" => "1Thessalonians",
        "74" => "2Thessalonians",
        "75" => "1Timothy",
        "76" => "2Timothy",
        "77" => "Titus",
        "78" => "Philemon",
        "79" => "Hebrews",
        "80" => "James",
        "81" => "1Peter",
        "82" => "2Peter",
        "83" => "1John",
        "84" => "2John",
        "85" => "3John",
        "86" => "Jude",
        "87" => "Revelation",
        _ => return format!("Book{code}"),
    };
    name.to_string()
}

/// Accumulates tokens for the verse currently being read.
struct OpenRecord {
    book: String,
    chapter: u32,
    verse: u32,
    words: Vec<String>,
}

impl OpenRecord {
    fn finalize(self) -> Option<VerseRecord> {
        // A record that accumulated no text is dropped, not finalized.
        if self.words.is_empty() {
            return None;
        }
        Some(VerseRecord {
            text: self.words.join(" "),
            book: self.book,
            chapter: self.chapter,
            verse: self.verse,
            words: self.words,
            language: "greek".to_string(),
        })
    }
}

/// Parse MorphGNT token lines into verse records.
///
/// Tokens are consumed in input order; a new record begins whenever the
/// `(chapter, verse)` composite changes from the previous token's. The last
/// accumulated record is finalized at end-of-input.
pub fn parse_morphgnt(input: &str) -> Vec<VerseRecord> {
    let mut records = Vec::new();
    let mut current: Option<OpenRecord> = None;

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }

        // Checked slicing: a reference with multi-byte characters is a
        // malformed line to skip, not a slice panic.
        let reference = parts[0];
        let (book_code, chapter_digits, verse_digits) = match (
            reference.get(0..2),
            reference.get(2..4),
            reference.get(4..6),
        ) {
            (Some(b), Some(c), Some(v)) => (b, c, v),
            _ => continue,
        };
        let (chapter, verse) = match (chapter_digits.parse::<u32>(), verse_digits.parse::<u32>()) {
            (Ok(c), Ok(v)) => (c, v),
            _ => continue,
        };
        let word = parts[3];

        let boundary = match &current {
            Some(open) => open.chapter != chapter || open.verse != verse,
            None => true,
        };
        if boundary {
            if let Some(open) = current.take() {
                records.extend(open.finalize());
            }
            current = Some(OpenRecord {
                book: book_name(book_code),
                chapter,
                verse,
                words: Vec::new(),
            });
        }

        if let Some(open) = current.as_mut() {
            open.words.push(word.to_string());
        }
    }

    if let Some(open) = current.take() {
        records.extend(open.finalize());
    }

    records
}

/// Parse every `*-morphgnt.txt` file in `dir`, in sorted file order.
pub fn parse_morphgnt_dir(dir: &Path) -> Result<Vec<VerseRecord>, CorpusError> {
    if !dir.exists() {
        return Err(CorpusError::NotFound(dir.to_path_buf()));
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with("-morphgnt.txt"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut all = Vec::new();
    for path in &files {
        let content = std::fs::read_to_string(path)?;
        let records = parse_morphgnt(&content);
        log::info!("parsed {} verses from {}", records.len(), path.display());
        all.extend(records);
    }

    Ok(all)
}
