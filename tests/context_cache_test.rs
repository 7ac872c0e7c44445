mod helpers;

use std::rc::Rc;

use approx::assert_abs_diff_eq;

use geist::context::VaultContext;
use geist::semantic::{EmbeddingStore, SimilarityBand};
use geist::vault::{InMemoryVault, Note, Session};
use helpers::*;

fn vault() -> InMemoryVault {
    let mut notes: Vec<Note> = vec![
        note("hub.md", "Hub", "index of everything").with_links(["Alpha", "Beta", "Gamma"]),
        note("alpha.md", "Alpha", "first topic"),
        note("beta.md", "Beta", "second topic").with_links(["Alpha"]),
        note("gamma.md", "Gamma", "third topic"),
    ];
    notes.extend((0..20).map(|i| note(&format!("misc/{i}.md"), &format!("Misc {i}"), "filler")));
    InMemoryVault::new(notes)
}

fn encoder() -> FakeEncoder {
    let encoder = FakeEncoder::new()
        .with("Hub", spike(3))
        .with("Alpha", spike(0))
        .with("Beta", at_cosine(0, 0.7))
        .with("Gamma", at_cosine(0, 0.2));
    (0..20).fold(encoder, |e, i| e.with(&format!("Misc {i}"), spike(8 + i % 8)))
}

#[test]
fn identical_queries_return_the_same_allocation() {
    let conn = test_db();
    let encoder = encoder();
    let vault = vault();
    let config = test_config();
    let session = Session::open(&conn, date(2026, 6, 1)).unwrap();
    let store = EmbeddingStore::new(&conn, &encoder, session, &config.embedding);
    store.ensure_embeddings(&geist::vault::NoteGraph::notes(&vault)).unwrap();
    let ctx = VaultContext::open(&store, &vault, &config).unwrap();

    assert!(Rc::ptr_eq(&ctx.backlinks("alpha.md"), &ctx.backlinks("alpha.md")));
    assert!(Rc::ptr_eq(
        &ctx.graph_neighbours("beta.md"),
        &ctx.graph_neighbours("beta.md")
    ));
    assert!(Rc::ptr_eq(
        &ctx.metadata("hub.md").unwrap(),
        &ctx.metadata("hub.md").unwrap()
    ));
    assert!(Rc::ptr_eq(
        &ctx.neighbours("alpha.md", 2).unwrap(),
        &ctx.neighbours("alpha.md", 2).unwrap()
    ));

    let backlinks: Vec<String> = ctx.backlinks("alpha.md").iter().map(|n| n.path.clone()).collect();
    assert_eq!(backlinks, vec!["beta.md", "hub.md"]);
}

#[test]
fn neighbours_and_bands_follow_snapshot_geometry() {
    let conn = test_db();
    let encoder = encoder();
    let vault = vault();
    let config = test_config();
    let session = Session::open(&conn, date(2026, 6, 1)).unwrap();
    let store = EmbeddingStore::new(&conn, &encoder, session, &config.embedding);
    store.ensure_embeddings(&geist::vault::NoteGraph::notes(&vault)).unwrap();
    let ctx = VaultContext::open(&store, &vault, &config).unwrap();

    let near = ctx.neighbours_with_scores("alpha.md", 2).unwrap();
    assert_eq!(near[0].0, "beta.md");
    assert!(near.iter().all(|(p, _)| p != "alpha.md"));

    let beta = ctx.similarity("alpha.md", "beta.md").unwrap();
    assert_abs_diff_eq!(beta, 0.7, epsilon = 1e-5);
    assert_eq!(ctx.band(beta), SimilarityBand::High);
    let gamma = ctx.similarity("alpha.md", "gamma.md").unwrap();
    assert_eq!(ctx.band(gamma), SimilarityBand::Negligible);
    assert_eq!(ctx.similarity("alpha.md", "nowhere.md"), None);
}

#[test]
fn same_date_sessions_sample_the_same_notes() {
    let conn = test_db();
    let encoder = encoder();
    let vault = vault();
    let config = test_config();

    let draw = || {
        let session = Session::open(&conn, date(2026, 6, 1)).unwrap();
        let store = EmbeddingStore::new(&conn, &encoder, session, &config.embedding);
        let ctx = VaultContext::open(&store, &vault, &config).unwrap();
        let first: Vec<String> = ctx.random_notes(5).into_iter().map(|n| n.path).collect();
        let second: Vec<String> = ctx.random_notes(5).into_iter().map(|n| n.path).collect();
        (first, second)
    };

    let run_a = draw();
    let run_b = draw();
    assert_eq!(run_a, run_b);
    assert_eq!(run_a.0.len(), 5);
}

#[test]
fn sqlite_vec_backend_serves_the_same_context() {
    let conn = test_db();
    let encoder = encoder();
    let vault = vault();
    let mut config = test_config();
    config.vector.backend = "sqlite-vec".into();
    let session = Session::open(&conn, date(2026, 6, 1)).unwrap();
    let store = EmbeddingStore::new(&conn, &encoder, session, &config.embedding);
    store.ensure_embeddings(&geist::vault::NoteGraph::notes(&vault)).unwrap();
    let ctx = VaultContext::open(&store, &vault, &config).unwrap();

    assert_eq!(*ctx.neighbours("alpha.md", 1).unwrap(), vec!["beta.md".to_string()]);
    assert_eq!(ctx.backend().len(), 24);
}

#[test]
fn registry_resolves_titles_and_reports_unknown_functions() {
    let conn = test_db();
    let encoder = encoder();
    let vault = vault();
    let config = test_config();
    let session = Session::open(&conn, date(2026, 6, 1)).unwrap();
    let store = EmbeddingStore::new(&conn, &encoder, session, &config.embedding);
    store.ensure_embeddings(&geist::vault::NoteGraph::notes(&vault)).unwrap();
    let mut ctx = VaultContext::open(&store, &vault, &config).unwrap();

    let near = ctx.call("neighbours", &["Alpha".into(), "1".into()]).unwrap();
    assert_eq!(near, vec!["Beta"]);

    ctx.registry_mut().register("shout", |_ctx, args| {
        Ok(args.iter().map(|a| a.to_uppercase()).collect())
    });
    assert_eq!(ctx.call("shout", &["hi".into()]).unwrap(), vec!["HI"]);
    assert!(ctx.call("missing", &[]).is_err());
    assert!(ctx.call("neighbours", &["Nobody".into()]).is_err());
}
