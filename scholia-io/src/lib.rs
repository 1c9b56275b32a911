use std::fs;
use std::path::{Path, PathBuf};

use scholia_core::document::{Entity, Paper};
use scholia_core::graph::{EntityGraph, GraphError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse snapshot {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

/// 加载完成、已通过校验的文档。
#[derive(Debug)]
pub struct LoadedDocument {
    pub paper_id: String,
    /// 快照里附带的论文元数据，供引文浮层使用。
    pub papers: Vec<Paper>,
    pub graph: EntityGraph,
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<LoadedDocument, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &LoadedDocument, path: &Path) -> Result<(), IoError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    paper_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    papers: Vec<Paper>,
    #[serde(default)]
    entities: Vec<Entity>,
}

/// `{ "paper_id": ..., "papers": [...], "entities": [...] }` 形式的实体快照读写。
///
/// 加载时校验 id 唯一、框坐标归一化以及符号父子森林一致。
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSnapshot {
    pretty: bool,
}

impl JsonSnapshot {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// 写出紧凑格式。
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    /// 解析快照文本；`origin` 仅用于错误信息。
    pub fn parse(&self, data: &str, origin: &Path) -> Result<LoadedDocument, IoError> {
        let file: SnapshotFile = serde_json::from_str(data).map_err(|source| IoError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        build_document(file)
    }
}

fn build_document(file: SnapshotFile) -> Result<LoadedDocument, IoError> {
    if file.paper_id.trim().is_empty() {
        return Err(IoError::InvalidDocument("paper_id must not be empty".to_string()));
    }
    for entity in &file.entities {
        if let Some(bbox) = entity.bounding_boxes.iter().find(|bbox| !bbox.is_normalized()) {
            return Err(IoError::InvalidDocument(format!(
                "entity {} has a box outside the page: {bbox:?}",
                entity.id
            )));
        }
    }

    let graph = EntityGraph::with_entities(file.entities).map_err(|err| match err {
        GraphError::DuplicateEntity(id) => {
            IoError::InvalidDocument(format!("duplicate entity id {id}"))
        }
    })?;
    let violations = graph.forest_violations();
    if let Some(first) = violations.first() {
        return Err(IoError::InvalidDocument(format!(
            "symbol forest is inconsistent ({} problems, first: {first:?})",
            violations.len()
        )));
    }

    debug!(
        paper = %file.paper_id,
        entities = graph.len(),
        papers = file.papers.len(),
        "实体快照已加载"
    );
    Ok(LoadedDocument {
        paper_id: file.paper_id,
        papers: file.papers,
        graph,
    })
}

impl DocumentLoader for JsonSnapshot {
    fn load(&self, path: &Path) -> Result<LoadedDocument, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(&data, path)
    }
}

impl DocumentSaver for JsonSnapshot {
    fn save(&self, document: &LoadedDocument, path: &Path) -> Result<(), IoError> {
        let file = SnapshotFile {
            paper_id: document.paper_id.clone(),
            papers: document.papers.clone(),
            entities: document.graph.entities().cloned().collect(),
        };
        let encoded = if self.pretty {
            serde_json::to_string_pretty(&file)
        } else {
            serde_json::to_string(&file)
        }
        .map_err(|err| IoError::InvalidDocument(err.to_string()))?;
        fs::write(path, encoded).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_paper_id_is_rejected() {
        let err = JsonSnapshot::new()
            .parse(r#"{ "paper_id": " ", "entities": [] }"#, Path::new("inline"))
            .expect_err("空 paper_id 应当被拒绝");
        assert!(matches!(err, IoError::InvalidDocument(_)));
    }

    #[test]
    fn boxes_outside_the_page_are_rejected() {
        let data = r#"{
            "paper_id": "p",
            "entities": [{
                "id": "s1",
                "type": "sentence",
                "attributes": {},
                "bounding_boxes": [{ "page": 0, "left": 0.9, "top": 0.1, "width": 0.5, "height": 0.1 }]
            }]
        }"#;
        let err = JsonSnapshot::new()
            .parse(data, Path::new("inline"))
            .expect_err("越界的框应当被拒绝");
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn malformed_json_reports_origin() {
        let err = JsonSnapshot::new()
            .parse("{ not json", Path::new("broken.json"))
            .expect_err("非法 JSON 应当报错");
        assert!(matches!(err, IoError::Parse { ref path, .. } if path == Path::new("broken.json")));
    }
}
