use std::path::PathBuf;

use scholia_core::document::{EntityId, EntityKind};
use scholia_io::{DocumentLoader, DocumentSaver, IoError, JsonSnapshot};

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

#[test]
fn load_equation_paper_builds_graph() {
    let loader = JsonSnapshot::new();
    let doc = loader
        .load(&fixture("equation_paper.json"))
        .expect("读取实体快照失败");

    assert_eq!(doc.paper_id, "arxiv-1706.03762");
    assert_eq!(doc.papers.len(), 1);
    assert_eq!(doc.papers[0].year, Some(2015));
    assert_eq!(doc.graph.len(), 7);
    assert_eq!(doc.graph.pages(), vec![1, 2, 3]);

    let qk = EntityId::from("sym-qk");
    assert_eq!(doc.graph.children_of(&qk).len(), 2);
    assert!(doc.graph.is_top_level(&qk));
    assert_eq!(doc.graph.top_level_symbols_in_equation(&EntityId::from("eq-attn")), 2);
    assert_eq!(
        doc.graph
            .equation_of(&EntityId::from("sym-k"))
            .map(|equation| equation.id.as_str()),
        Some("eq-attn")
    );

    let term = doc
        .graph
        .by_id(&EntityId::from("term-attention"))
        .expect("术语应存在");
    assert_eq!(term.kind(), EntityKind::Term);
    assert_eq!(term.pages(), vec![1, 2]);
}

#[test]
fn duplicate_ids_are_rejected() {
    let err = JsonSnapshot::new()
        .load(&fixture("duplicate_ids.json"))
        .expect_err("重复 id 应当被拒绝");
    match err {
        IoError::InvalidDocument(message) => assert!(message.contains("duplicate")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn inconsistent_symbol_forest_is_rejected() {
    let err = JsonSnapshot::new()
        .load(&fixture("broken_forest.json"))
        .expect_err("父子不一致应当被拒绝");
    assert!(err.to_string().contains("symbol forest"));
}

#[test]
fn missing_file_reports_path() {
    let path = fixture("does_not_exist.json");
    let err = JsonSnapshot::new()
        .load(&path)
        .expect_err("不存在的文件应当报错");
    assert!(matches!(err, IoError::ReadError { path: ref p, .. } if *p == path));
}

#[test]
fn saved_snapshot_loads_back_with_same_entities() {
    let loader = JsonSnapshot::new();
    let doc = loader
        .load(&fixture("equation_paper.json"))
        .expect("读取实体快照失败");

    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let out = dir.path().join("copy.json");
    JsonSnapshot::compact()
        .save(&doc, &out)
        .expect("写出实体快照失败");

    let reloaded = loader.load(&out).expect("重新读取失败");
    assert_eq!(reloaded.paper_id, doc.paper_id);
    assert_eq!(reloaded.papers, doc.papers);
    let original: Vec<_> = doc.graph.entities().collect();
    let copied: Vec<_> = reloaded.graph.entities().collect();
    assert_eq!(original, copied);
}
