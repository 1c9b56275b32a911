use std::collections::HashMap;

use scholia_core::document::{Entity, EntityDraft, EntityId, EntityPatch, Paper};
use scholia_core::geometry::PageViewport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{operation} request failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
    #[error("collaborator is unavailable")]
    Unavailable,
}

/// 查看器中的一个位置：页码加页内像素偏移（以页面左上角为原点）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerLocation {
    pub page: u32,
    pub offset_x: f64,
    pub offset_y: f64,
}

/// 第三方文档查看器暴露给本层的能力。
pub trait ViewerSurface {
    /// 已渲染页的像素视口，未渲染时返回 `None`。
    fn page_viewport(&self, page: u32) -> Option<PageViewport>;

    fn current_location(&self) -> Option<ViewerLocation>;

    /// 跳转到指定位置，同时由查看器压入浏览历史。
    fn navigate_to(&mut self, page: u32, offset_x: f64, offset_y: f64);
}

/// 实体的增删改接口。所有调用都可能失败，本层不做自动重试。
pub trait EntityPersistence {
    fn create(
        &mut self,
        paper_id: &str,
        draft: &EntityDraft,
    ) -> Result<Option<Entity>, CollaboratorError>;

    fn patch(
        &mut self,
        paper_id: &str,
        id: &EntityId,
        patch: &EntityPatch,
    ) -> Result<bool, CollaboratorError>;

    fn delete(&mut self, paper_id: &str, id: &EntityId) -> Result<bool, CollaboratorError>;
}

pub trait PaperDirectory {
    fn get(&self, paper_id: &str) -> Option<Paper>;
}

/// 以内存表实现的论文目录，供演示与测试使用。
#[derive(Debug, Default, Clone)]
pub struct PaperCatalog {
    papers: HashMap<String, Paper>,
}

impl PaperCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, paper: Paper) {
        self.papers.insert(paper.id.clone(), paper);
    }
}

impl PaperDirectory for PaperCatalog {
    fn get(&self, paper_id: &str) -> Option<Paper> {
        self.papers.get(paper_id).cloned()
    }
}

/// 内存中的持久化实现：按自增序号分配 id，可指定拒绝的实体。
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    next_id: u64,
    rejected: Vec<EntityId>,
    pub patched: Vec<EntityId>,
    pub deleted: Vec<EntityId>,
    offline: bool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后针对该实体的 patch/delete 都会返回 `false`。
    pub fn reject(&mut self, id: impl Into<EntityId>) {
        self.rejected.push(id.into());
    }

    /// 模拟网络中断：所有调用返回错误。
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    fn check_online(&self, operation: &'static str) -> Result<(), CollaboratorError> {
        if self.offline {
            Err(CollaboratorError::Request {
                operation,
                message: "offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl EntityPersistence for MemoryPersistence {
    fn create(
        &mut self,
        _paper_id: &str,
        draft: &EntityDraft,
    ) -> Result<Option<Entity>, CollaboratorError> {
        self.check_online("create")?;
        self.next_id += 1;
        let id = format!("{}-{}", draft.data.kind(), self.next_id);
        Ok(Some(draft.clone().into_entity(id)))
    }

    fn patch(
        &mut self,
        _paper_id: &str,
        id: &EntityId,
        _patch: &EntityPatch,
    ) -> Result<bool, CollaboratorError> {
        self.check_online("patch")?;
        if self.rejected.contains(id) {
            return Ok(false);
        }
        self.patched.push(id.clone());
        Ok(true)
    }

    fn delete(&mut self, _paper_id: &str, id: &EntityId) -> Result<bool, CollaboratorError> {
        self.check_online("delete")?;
        if self.rejected.contains(id) {
            return Ok(false);
        }
        self.deleted.push(id.clone());
        Ok(true)
    }
}
