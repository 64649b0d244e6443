//! Integration tests for the intertextuality engine.
//!
//! These run against the hashed provider, which needs no model download,
//! so the whole pipeline is exercised hermetically. The transformer path
//! has its own #[ignore]d test at the bottom.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{EngineConfig, ProviderKind};
use crate::corpus::VerseRecord;
use crate::semantic::{DevicePreference, EngineError, IntertextEngine};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "intertext-engine-{}-{}",
        std::process::id(),
        counter
    ));
    std::fs::create_dir_all(&path).unwrap();
    path
}

fn hashed_config() -> EngineConfig {
    EngineConfig {
        provider: ProviderKind::Hashed,
        hashed_dimension: 64,
        device: DevicePreference::Cpu,
        cache_capacity: 10,
        ..Default::default()
    }
}

fn verse(book: &str, chapter: u32, verse: u32, text: &str) -> VerseRecord {
    VerseRecord {
        book: book.to_string(),
        chapter,
        verse,
        text: text.to_string(),
        words: text.split_whitespace().map(str::to_string).collect(),
        language: "greek".to_string(),
    }
}

fn sample_corpus() -> Vec<VerseRecord> {
    vec![
        verse("John", 3, 16, "οὕτως γὰρ ἠγάπησεν ὁ θεὸς τὸν κόσμον"),
        verse("1John", 4, 8, "ὁ θεὸς ἀγάπη ἐστίν"),
        verse("1Corinthians", 13, 4, "ἡ ἀγάπη μακροθυμεῖ χρηστεύεται ἡ ἀγάπη"),
        verse("Matthew", 1, 1, "Βίβλος γενέσεως Ἰησοῦ Χριστοῦ"),
        verse("Revelation", 22, 21, "ἡ χάρις τοῦ κυρίου Ἰησοῦ μετὰ πάντων"),
    ]
}

fn indexed_engine() -> IntertextEngine {
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    engine.ingest_and_index(sample_corpus()).unwrap();
    engine
}

#[test]
fn test_query_before_indexing_is_not_ready() {
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    assert!(matches!(
        engine.find_similar("ἀγάπη", 3),
        Err(EngineError::NotReady)
    ));
    assert!(matches!(
        engine.find_links_for(0, 3, false),
        Err(EngineError::NotReady)
    ));
}

#[test]
fn test_results_align_with_ingested_verses() {
    let engine = indexed_engine();
    let corpus = sample_corpus();

    let results = engine.find_similar("ἀγάπη", 5).unwrap();
    assert_eq!(results.len(), 5);
    for hit in &results {
        let original = &corpus[hit.position];
        assert_eq!(hit.book, original.book);
        assert_eq!(hit.text, original.text);
        assert_eq!(
            hit.reference,
            format!("{} {}:{}", original.book, original.chapter, original.verse)
        );
    }
}

#[test]
fn test_each_verse_is_its_own_nearest_neighbor() {
    let engine = indexed_engine();
    for (i, original) in sample_corpus().iter().enumerate() {
        let results = engine.find_similar(&original.text, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].position, i);
        assert_eq!(results[0].text, original.text);
        assert!(results[0].score > 0.999, "score {}", results[0].score);
    }
}

#[test]
fn test_amor_query_surfaces_amor_verses() {
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    engine
        .ingest_and_index(vec![
            verse("A", 1, 1, "amor de Deus"),
            verse("B", 1, 1, "fé e esperança"),
            verse("C", 1, 1, "amor ao próximo"),
        ])
        .unwrap();

    let results = engine.find_similar("amor", 2).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].text.contains("amor"), "got {:?}", results[0].text);
}

#[test]
fn test_love_query_ranks_love_verses_first() {
    let engine = indexed_engine();
    let results = engine.find_similar("ἀγάπη", 2).unwrap();
    // Positions 1 and 2 contain the query word; position 3 does not.
    let top: Vec<usize> = results.iter().map(|r| r.position).collect();
    assert!(top.contains(&1) || top.contains(&2), "got {top:?}");
    assert!(!top.contains(&3), "genealogy verse outranked love verses");
}

#[test]
fn test_repeated_query_is_deterministic() {
    let config = EngineConfig {
        cache_capacity: 0,
        ..hashed_config()
    };
    let engine = IntertextEngine::new(&config).unwrap();
    engine.ingest_and_index(sample_corpus()).unwrap();

    let first = engine.find_similar("θεὸς", 3).unwrap();
    let second = engine.find_similar("θεὸς", 3).unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.position, b.position);
        assert_eq!(a.score, b.score);
    }
}

#[test]
fn test_cache_is_transparent() {
    let cached = indexed_engine();
    let uncached = IntertextEngine::new(&EngineConfig {
        cache_capacity: 0,
        ..hashed_config()
    })
    .unwrap();
    uncached.ingest_and_index(sample_corpus()).unwrap();

    for query in ["ἀγάπη", "κόσμον", "χάρις"] {
        let a = cached.find_similar(query, 3).unwrap();
        let b = cached.find_similar(query, 3).unwrap();
        let c = uncached.find_similar(query, 3).unwrap();
        assert_eq!(a.len(), c.len());
        for ((x, y), z) in a.iter().zip(&b).zip(&c) {
            assert_eq!(x.position, y.position);
            assert_eq!(x.position, z.position);
            assert_eq!(x.score, z.score);
        }
    }
}

#[test]
fn test_top_k_larger_than_corpus_is_clamped() {
    let engine = indexed_engine();
    let results = engine.find_similar("ἀγάπη", 100).unwrap();
    assert_eq!(results.len(), 5);

    let empty = engine.find_similar("ἀγάπη", 0).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_empty_ingest_keeps_existing_index() {
    let engine = indexed_engine();
    assert_eq!(engine.ingest_and_index(Vec::new()).unwrap(), 0);
    // The earlier corpus is still queryable.
    assert_eq!(engine.find_similar("ἀγάπη", 5).unwrap().len(), 5);
}

#[test]
fn test_reingest_replaces_corpus() {
    let engine = indexed_engine();
    engine
        .ingest_and_index(vec![verse("Jude", 1, 2, "ἔλεος ὑμῖν καὶ εἰρήνη")])
        .unwrap();

    let results = engine.find_similar("εἰρήνη", 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].book, "Jude");
}

#[test]
fn test_links_exclude_the_source_verse() {
    let engine = indexed_engine();
    let links = engine.find_links_for(1, 3, false).unwrap();
    assert!(!links.is_empty());
    assert!(links.iter().all(|link| link.position != 1));
    assert!(links.len() <= 3);
}

#[test]
fn test_links_can_exclude_same_book() {
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    engine
        .ingest_and_index(vec![
            verse("John", 1, 1, "ἐν ἀρχῇ ἦν ὁ λόγος"),
            verse("John", 1, 2, "οὗτος ἦν ἐν ἀρχῇ πρὸς τὸν θεόν"),
            verse("Mark", 1, 1, "ἀρχὴ τοῦ εὐαγγελίου"),
        ])
        .unwrap();

    let links = engine.find_links_for(0, 5, true).unwrap();
    assert!(!links.is_empty());
    assert!(links.iter().all(|link| link.book != "John"));
}

#[test]
fn test_links_for_out_of_range_position_are_empty() {
    let engine = indexed_engine();
    assert!(engine.find_links_for(999, 3, false).unwrap().is_empty());
}

#[test]
fn test_persist_and_load_round_trip() {
    let dir = test_dir();
    let index_path = dir.join("index.bin");
    let corpus_path = dir.join("corpus.json");

    let engine = indexed_engine();
    let expected = engine.find_similar("ἀγάπη", 3).unwrap();
    engine.persist(&index_path, &corpus_path).unwrap();

    let restored = IntertextEngine::new(&hashed_config()).unwrap();
    assert!(restored.load(&index_path, &corpus_path).unwrap());

    let results = restored.find_similar("ἀγάπη", 3).unwrap();
    assert_eq!(results.len(), expected.len());
    for (a, b) in results.iter().zip(&expected) {
        assert_eq!(a.position, b.position);
        assert_eq!(a.reference, b.reference);
    }
}

#[test]
fn test_load_with_missing_files_starts_empty() {
    let dir = test_dir();
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    let loaded = engine
        .load(&dir.join("index.bin"), &dir.join("corpus.json"))
        .unwrap();
    assert!(!loaded);
    assert!(matches!(
        engine.find_similar("ἀγάπη", 3),
        Err(EngineError::NotReady)
    ));
}

#[test]
fn test_load_rejects_foreign_model() {
    let dir = test_dir();
    let index_path = dir.join("index.bin");
    let corpus_path = dir.join("corpus.json");

    let engine = indexed_engine();
    engine.persist(&index_path, &corpus_path).unwrap();

    // A provider with a different dimension has a different identity hash.
    let other = IntertextEngine::new(&EngineConfig {
        hashed_dimension: 32,
        ..hashed_config()
    })
    .unwrap();
    assert!(other.load(&index_path, &corpus_path).is_err());
}

#[test]
fn test_persist_before_indexing_is_not_ready() {
    let dir = test_dir();
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    let result = engine.persist(&dir.join("index.bin"), &dir.join("corpus.json"));
    assert!(matches!(result, Err(EngineError::NotReady)));
}

#[test]
fn test_unknown_device_is_reported_not_raised() {
    let engine = indexed_engine();
    let report = engine.set_device("tpu");
    assert_eq!(report.status, "error");
    assert_eq!(report.old_device, report.new_device);

    // The engine keeps serving queries after a failed switch.
    assert_eq!(engine.find_similar("ἀγάπη", 3).unwrap().len(), 3);
}

#[test]
fn test_setting_the_current_device_succeeds() {
    let engine = indexed_engine();
    let report = engine.set_device("cpu");
    assert_eq!(report.status, "success");
    assert_eq!(report.new_device, "cpu");
}

#[test]
fn test_cuda_switch_without_accelerator_is_reported() {
    if crate::semantic::cuda_available() {
        return;
    }
    let engine = indexed_engine();
    let report = engine.set_device("cuda");
    assert_eq!(report.status, "error");
    assert_eq!(engine.device_info().device, "cpu");
    assert_eq!(engine.find_similar("ἀγάπη", 2).unwrap().len(), 2);
}

#[test]
fn test_device_info_reflects_index_state() {
    let engine = IntertextEngine::new(&hashed_config()).unwrap();
    assert_eq!(engine.device_info().indexed, 0);

    engine.ingest_and_index(sample_corpus()).unwrap();
    let info = engine.device_info();
    assert_eq!(info.indexed, 5);
    assert_eq!(info.dimension, 64);
    assert_eq!(info.device, "cpu");
}

/// End-to-end flow on the real transformer provider.
#[test]
#[ignore = "requires model download"]
fn test_transformer_end_to_end() {
    let dir = test_dir();
    let config = EngineConfig {
        provider: ProviderKind::Transformer,
        cache_dir: dir.to_string_lossy().to_string(),
        device: DevicePreference::Cpu,
        ..Default::default()
    };

    let engine = IntertextEngine::new(&config).unwrap();
    engine.ingest_and_index(sample_corpus()).unwrap();

    // "amor" is Latin/Portuguese for love; the multilingual model should
    // surface the love verses ahead of the genealogy.
    let results = engine.find_similar("amor", 2).unwrap();
    let top: Vec<usize> = results.iter().map(|r| r.position).collect();
    assert!(top.contains(&1) || top.contains(&2), "got {top:?}");
}
