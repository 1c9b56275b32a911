use std::time::Instant;

use scholia_core::document::{EntityId, EntityKind};
use scholia_core::graph::EntityGraph;
use tracing::debug;

use crate::errors::EngineError;
use crate::find::{FindEngine, MatchKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindMode {
    #[default]
    Inactive,
    Term,
    Symbol,
    /// 查看器自带的全文搜索，本层只记录查询串。
    Text,
}

impl FindMode {
    /// 由实体选择驱动的查找（术语/符号）。
    #[inline]
    pub fn is_entity_search(self) -> bool {
        matches!(self, FindMode::Term | FindMode::Symbol)
    }

    fn match_kind(self) -> Option<MatchKind> {
        match self {
            FindMode::Term => Some(MatchKind::Term),
            FindMode::Symbol => Some(MatchKind::Symbol),
            FindMode::Inactive | FindMode::Text => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    Idle,
    EntitySelected,
    Searching(FindMode),
}

/// 某实体在某页上的注释块。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationRef {
    pub entity_id: EntityId,
    pub page: u32,
}

/// 注释块中的单个框。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanRef {
    pub entity_id: EntityId,
    pub page: u32,
    pub index: usize,
}

/// 一次点击所选中的对象。
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTarget {
    pub entity_id: EntityId,
    pub annotation: Option<AnnotationRef>,
    pub span: Option<SpanRef>,
}

impl SelectionTarget {
    pub fn entity(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            annotation: None,
            span: None,
        }
    }

    pub fn span(entity_id: impl Into<EntityId>, page: u32, index: usize) -> Self {
        let entity_id = entity_id.into();
        Self {
            annotation: Some(AnnotationRef {
                entity_id: entity_id.clone(),
                page,
            }),
            span: Some(SpanRef {
                entity_id: entity_id.clone(),
                page,
                index,
            }),
            entity_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindState {
    mode: FindMode,
    activated_at: Option<Instant>,
    query: Option<String>,
    matches: Option<Vec<EntityId>>,
    match_index: Option<usize>,
    computed_at_epoch: Option<u64>,
}

impl FindState {
    #[inline]
    pub fn mode(&self) -> FindMode {
        self.mode
    }

    #[inline]
    pub fn activated_at(&self) -> Option<Instant> {
        self.activated_at
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn matches(&self) -> Option<&[EntityId]> {
        self.matches.as_deref()
    }

    #[inline]
    pub fn match_index(&self) -> Option<usize> {
        self.match_index
    }

    /// 仅当匹配列表与当前图版本一致时返回；过期列表视同不存在。
    pub fn current_matches(&self, graph: &EntityGraph) -> Option<&[EntityId]> {
        if self.computed_at_epoch == Some(graph.epoch()) {
            self.matches()
        } else {
            None
        }
    }

    pub fn selected_match(&self) -> Option<&EntityId> {
        let index = self.match_index?;
        self.matches.as_ref()?.get(index)
    }
}

/// 选择状态机：`Idle`、`EntitySelected`、`Searching(term | symbol | text)`。
///
/// 三个选择列表都按追加顺序且无重复；单选模式下每次新选择前先清空。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    selected_entity_ids: Vec<EntityId>,
    selected_annotation_ids: Vec<AnnotationRef>,
    selected_span_ids: Vec<SpanRef>,
    multiselect: bool,
    interaction_disabled: bool,
    jump_target: Option<EntityId>,
    active_question_id: Option<String>,
    find: FindState,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SelectionPhase {
        if self.find.mode != FindMode::Inactive {
            SelectionPhase::Searching(self.find.mode)
        } else if self.selected_entity_ids.is_empty() {
            SelectionPhase::Idle
        } else {
            SelectionPhase::EntitySelected
        }
    }

    #[inline]
    pub fn selected_entity_ids(&self) -> &[EntityId] {
        &self.selected_entity_ids
    }

    #[inline]
    pub fn selected_annotation_ids(&self) -> &[AnnotationRef] {
        &self.selected_annotation_ids
    }

    #[inline]
    pub fn selected_span_ids(&self) -> &[SpanRef] {
        &self.selected_span_ids
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.selected_entity_ids.contains(id)
    }

    #[inline]
    pub fn multiselect(&self) -> bool {
        self.multiselect
    }

    /// 仅影响之后的 `select_entity` 是否清空旧选择，本身不改变状态。
    pub fn set_multiselect(&mut self, enabled: bool) {
        self.multiselect = enabled;
    }

    #[inline]
    pub fn interaction_disabled(&self) -> bool {
        self.interaction_disabled
    }

    pub fn set_interaction_disabled(&mut self, disabled: bool) {
        self.interaction_disabled = disabled;
    }

    pub fn jump_target(&self) -> Option<&EntityId> {
        self.jump_target.as_ref()
    }

    pub(crate) fn set_jump_target(&mut self, target: Option<EntityId>) {
        self.jump_target = target;
    }

    pub fn active_question_id(&self) -> Option<&str> {
        self.active_question_id.as_deref()
    }

    pub fn set_active_question(&mut self, question_id: Option<String>) {
        self.active_question_id = question_id;
    }

    #[inline]
    pub fn find(&self) -> &FindState {
        &self.find
    }

    fn clear_lists(&mut self) {
        self.selected_entity_ids.clear();
        self.selected_annotation_ids.clear();
        self.selected_span_ids.clear();
    }

    /// 选中实体并按类型进入相应状态，返回进入后的阶段。
    ///
    /// 术语与符号会以当前全部同类选中实体为种子计算匹配列表，游标指向本次选中的实体。
    pub fn select_entity(
        &mut self,
        target: SelectionTarget,
        graph: &EntityGraph,
        finder: &mut FindEngine,
    ) -> Result<SelectionPhase, EngineError> {
        let entity = graph
            .by_id(&target.entity_id)
            .ok_or_else(|| EngineError::EntityNotFound(target.entity_id.clone()))?;
        let kind = entity.kind();

        if !self.multiselect {
            self.clear_lists();
        }
        self.jump_target = None;
        push_unique(&mut self.selected_entity_ids, target.entity_id.clone());
        if let Some(annotation) = target.annotation {
            push_unique(&mut self.selected_annotation_ids, annotation);
        }
        if let Some(span) = target.span {
            push_unique(&mut self.selected_span_ids, span);
        }

        let mode = match kind {
            EntityKind::Term => FindMode::Term,
            EntityKind::Symbol => FindMode::Symbol,
            _ => {
                if self.find.mode.is_entity_search() {
                    self.close_find();
                }
                return Ok(self.phase());
            }
        };

        self.begin_entity_search(mode, graph, finder);
        self.find.match_index = self
            .find
            .matches
            .as_ref()
            .and_then(|matches| matches.iter().position(|id| *id == target.entity_id));
        debug!(
            entity = %target.entity_id,
            kind = %kind,
            matches = self.find.matches.as_ref().map_or(0, Vec::len),
            "进入实体查找模式"
        );
        Ok(self.phase())
    }

    fn seeds(&self, kind: EntityKind, graph: &EntityGraph) -> Vec<EntityId> {
        self.selected_entity_ids
            .iter()
            .filter(|id| graph.by_id(id).is_some_and(|entity| entity.kind() == kind))
            .cloned()
            .collect()
    }

    fn begin_entity_search(&mut self, mode: FindMode, graph: &EntityGraph, finder: &mut FindEngine) {
        let Some(match_kind) = mode.match_kind() else {
            return;
        };
        let seed_kind = match match_kind {
            MatchKind::Term => EntityKind::Term,
            MatchKind::Symbol => EntityKind::Symbol,
        };
        let seeds = self.seeds(seed_kind, graph);
        let matches = finder.matches(match_kind, &seeds, graph);
        if self.find.mode != mode {
            self.find.activated_at = Some(Instant::now());
        }
        self.find.mode = mode;
        self.find.query = None;
        self.find.matches = Some(matches);
        self.find.computed_at_epoch = Some(graph.epoch());
    }

    /// 清空选择。交互被禁用时为空操作并返回 `false`。
    pub fn clear_selection(&mut self) -> bool {
        if self.interaction_disabled {
            return false;
        }
        if self.find.mode.is_entity_search() {
            self.close_find();
        }
        self.clear_lists();
        self.jump_target = None;
        true
    }

    /// 退出查找模式，不影响选择列表。
    pub fn close_find(&mut self) {
        self.find = FindState::default();
    }

    /// 进入查看器内置搜索。
    pub fn open_text_search(&mut self, query: impl Into<String>) {
        self.find = FindState {
            mode: FindMode::Text,
            activated_at: Some(Instant::now()),
            query: Some(query.into()),
            ..FindState::default()
        };
    }

    /// 更新游标。实体查找模式下返回需要跳转的实体。
    pub fn set_find_match_index(&mut self, index: usize) -> Result<Option<EntityId>, EngineError> {
        if !self.find.mode.is_entity_search() {
            self.find.match_index = Some(index);
            return Ok(None);
        }
        let len = self.find.matches.as_ref().map_or(0, Vec::len);
        if index >= len {
            return Err(EngineError::MatchIndexOutOfRange { index, len });
        }
        self.find.match_index = Some(index);
        Ok(self.find.selected_match().cloned())
    }

    /// 游标循环移动 `step` 步后的下标。
    pub fn cycled_match_index(&self, step: isize) -> Option<usize> {
        let len = self.find.matches.as_ref()?.len();
        if len == 0 {
            return None;
        }
        let current = self.find.match_index.unwrap_or(0) as isize;
        Some((current + step).rem_euclid(len as isize) as usize)
    }

    /// 将实体从三个选择列表与跳转目标中移除。
    pub(crate) fn forget_entity(&mut self, id: &EntityId) -> bool {
        let before = (
            self.selected_entity_ids.len(),
            self.selected_annotation_ids.len(),
            self.selected_span_ids.len(),
        );
        self.selected_entity_ids.retain(|selected| selected != id);
        self.selected_annotation_ids
            .retain(|annotation| annotation.entity_id != *id);
        self.selected_span_ids.retain(|span| span.entity_id != *id);
        if self.jump_target.as_ref() == Some(id) {
            self.jump_target = None;
        }
        before
            != (
                self.selected_entity_ids.len(),
                self.selected_annotation_ids.len(),
                self.selected_span_ids.len(),
            )
    }

    /// 图变更后重算实体查找的匹配列表。种子全部消失时退出查找。
    pub(crate) fn refresh_find(&mut self, graph: &EntityGraph, finder: &mut FindEngine) {
        let mode = self.find.mode;
        if !mode.is_entity_search() || self.find.computed_at_epoch == Some(graph.epoch()) {
            return;
        }
        let seed_kind = if mode == FindMode::Term {
            EntityKind::Term
        } else {
            EntityKind::Symbol
        };
        if self.seeds(seed_kind, graph).is_empty() {
            debug!("查找种子已全部删除，退出查找模式");
            self.close_find();
            return;
        }
        let previous = self.find.selected_match().cloned();
        self.begin_entity_search(mode, graph, finder);
        let matches = self.find.matches.as_deref().unwrap_or_default();
        self.find.match_index = previous
            .and_then(|id| matches.iter().position(|candidate| *candidate == id))
            .or(if matches.is_empty() { None } else { Some(0) });
    }
}
