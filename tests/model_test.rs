//! End-to-end run against the real ONNX encoder.
//!
//! Needs `geist model download`; run with `cargo test -- --ignored`.

mod helpers;

use geist::config::GeistConfig;
use geist::context::VaultContext;
use geist::embedding::create_provider;
use geist::filter::{FilterPipeline, Suggestion};
use geist::semantic::EmbeddingStore;
use geist::vault::{InMemoryVault, NoteGraph, Session};
use helpers::*;

#[test]
#[ignore = "requires the downloaded embedding model"]
fn related_notes_rank_above_unrelated_ones() {
    let config = GeistConfig::default();
    let encoder = create_provider(&config.embedding).unwrap();
    let conn = test_db();
    let vault = InMemoryVault::new(vec![
        note("sourdough.md", "Sourdough", "Feeding the starter twice a day keeps the bread rising."),
        note("baguette.md", "Baguette", "Long fermentation gives the bread crust its flavour."),
        note("kernel.md", "Kernel", "The scheduler preempts threads when their time slice expires."),
    ]);

    let session = Session::open(&conn, date(2026, 9, 1)).unwrap();
    let store = EmbeddingStore::new(&conn, encoder.as_ref(), session, &config.embedding);
    let report = store.ensure_embeddings(&vault.notes()).unwrap();
    assert_eq!(report.encoded, 3);

    let ctx = VaultContext::open(&store, &vault, &config).unwrap();
    let near = ctx.neighbours("sourdough.md", 1).unwrap();
    assert_eq!(*near, vec!["baguette.md".to_string()]);
    assert!(ctx.similarity("sourdough.md", "baguette.md") > ctx.similarity("sourdough.md", "kernel.md"));
}

#[test]
#[ignore = "requires the downloaded embedding model"]
fn paraphrased_suggestion_is_not_novel() {
    let config = GeistConfig::default();
    let encoder = create_provider(&config.embedding).unwrap();
    let conn = test_db();
    let vault = InMemoryVault::new(vec![note("a.md", "A", "")]);

    let mut first = FilterPipeline::new(&conn, &vault, encoder.as_ref(), date(2026, 9, 1), &config.filter).unwrap();
    let accepted = first
        .filter_all([Suggestion::new("bridge", "How does your sourdough starter relate to fermentation?")])
        .unwrap();
    assert_eq!(accepted.len(), 1);

    let mut later = FilterPipeline::new(&conn, &vault, encoder.as_ref(), date(2026, 9, 5), &config.filter).unwrap();
    let report = later
        .filter_all_with_report([Suggestion::new("bridge", "How does your sourdough starter relate to fermentation?")])
        .unwrap();
    assert!(report.accepted.is_empty());
}

#[test]
#[ignore = "requires the downloaded embedding model"]
fn topical_similarity_orders_notes() {
    let config = GeistConfig::default();
    let encoder = create_provider(&config.embedding).unwrap();
    let conn = test_db();
    let vault = InMemoryVault::new(vec![
        note("a.md", "machine learning", ""),
        note("b.md", "neural networks", ""),
        note("c.md", "cooking recipes", ""),
    ]);

    let session = Session::open(&conn, date(2026, 9, 1)).unwrap();
    let store = EmbeddingStore::new(&conn, encoder.as_ref(), session, &config.embedding);
    store.ensure_embeddings(&vault.notes()).unwrap();
    let ctx = VaultContext::open(&store, &vault, &config).unwrap();

    let ab = ctx.similarity("a.md", "b.md").unwrap();
    let ac = ctx.similarity("a.md", "c.md").unwrap();
    assert!(ab > ac, "ml~nn {ab} should beat ml~cooking {ac}");
}
