use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use scholia_core::document::{
    CitationAttributes, Entity, EntityData, EntityId, EntityKind, EntityPatch, EquationAttributes,
    Paper, Relationships, SectionHeaderAttributes, SentenceAttributes, SymbolAttributes, TermAttributes,
};
use scholia_core::geometry::BoundingBox;
use scholia_core::graph::EntityGraph;
use tracing::{debug, info};

use crate::collaborators::{PaperCatalog, PaperDirectory, ViewerLocation, ViewerSurface};
use crate::errors::EngineError;
use crate::find::{FindEngine, MatchRanks};
use crate::mount::{ContainerHandle, DetachOutcome, HostDocument, MountError, MountRegistry, RootHandle};
use crate::navigation::{NavigationSettings, Navigator};
use crate::notification::NotificationCenter;
use crate::resolver::{
    project_page, AnnotationRecord, AnnotationResolver, CitationGlossCache, PageRender,
    ResolverFlags,
};
use crate::selection::{SelectionPhase, SelectionState, SelectionTarget};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub flags: ResolverFlags,
    pub navigation: NavigationSettings,
    pub max_symbol_match_rank: Option<u32>,
    pub notification_duration: Duration,
    /// 渲染画布与查看器视口之间的缩放修正。
    pub scale_correction: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            flags: ResolverFlags::default(),
            navigation: NavigationSettings::default(),
            max_symbol_match_rank: None,
            notification_duration: Duration::from_secs(5),
            scale_correction: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemoEntities {
    pub equation: EntityId,
    pub p: EntityId,
    pub q: EntityId,
    pub c1: EntityId,
    pub c2: EntityId,
    pub term_first: EntityId,
    pub term_second: EntityId,
    pub sentence: EntityId,
    pub citation: EntityId,
    pub header: EntityId,
}

/// 一份打开的文档及其运行时状态（实体图、选择、查找、挂载、通知）。
///
/// 所有用户交互都经过会话，会话记录受影响的页码，`flush` 时只重新渲染这些页。
#[derive(Debug)]
pub struct Session {
    paper_id: String,
    pub(crate) graph: EntityGraph,
    pub(crate) selection: SelectionState,
    pub(crate) finder: FindEngine,
    navigator: Navigator,
    flags: ResolverFlags,
    citations: CitationGlossCache,
    mounts: MountRegistry,
    pub(crate) notifications: NotificationCenter,
    dirty_pages: BTreeSet<u32>,
    scale_correction: f64,
}

impl Session {
    pub fn new(paper_id: impl Into<String>, graph: EntityGraph, settings: SessionSettings) -> Self {
        Self {
            paper_id: paper_id.into(),
            graph,
            selection: SelectionState::new(),
            finder: FindEngine::with_max_rank(settings.max_symbol_match_rank),
            navigator: Navigator::new(settings.navigation),
            flags: settings.flags,
            citations: CitationGlossCache::new(),
            mounts: MountRegistry::new(),
            notifications: NotificationCenter::with_default_duration(settings.notification_duration),
            dirty_pages: BTreeSet::new(),
            scale_correction: settings.scale_correction,
        }
    }

    #[inline]
    pub fn paper_id(&self) -> &str {
        &self.paper_id
    }

    #[inline]
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    #[inline]
    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    #[inline]
    pub fn flags(&self) -> &ResolverFlags {
        &self.flags
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }

    pub fn citations(&self) -> &CitationGlossCache {
        &self.citations
    }

    pub fn mounted_pages(&self) -> Vec<u32> {
        self.mounts.mounted_pages()
    }

    /// 等待重新渲染的页码。
    pub fn affected_pages(&self) -> Vec<u32> {
        self.dirty_pages.iter().copied().collect()
    }

    /// 更换特性开关后所有页面都需要重新解析。
    pub fn set_flags(&mut self, flags: ResolverFlags) {
        self.flags = flags;
        self.dirty_pages.extend(self.graph.pages());
    }

    pub fn set_match_ranks(&mut self, ranks: Option<MatchRanks>) {
        self.finder.set_match_ranks(ranks);
    }

    // ---- 选择 ----

    pub fn select(&mut self, target: SelectionTarget) -> Result<SelectionPhase, EngineError> {
        let before = self.footprint();
        let phase = self
            .selection
            .select_entity(target, &self.graph, &mut self.finder)?;
        self.mark_footprint_change(before);
        Ok(phase)
    }

    pub fn select_entity(&mut self, id: impl Into<EntityId>) -> Result<SelectionPhase, EngineError> {
        self.select(SelectionTarget::entity(id))
    }

    pub fn clear_selection(&mut self) -> bool {
        let before = self.footprint();
        let cleared = self.selection.clear_selection();
        if cleared {
            self.mark_footprint_change(before);
        }
        cleared
    }

    pub fn close_find(&mut self) {
        let before = self.footprint();
        self.selection.close_find();
        self.mark_footprint_change(before);
    }

    pub fn open_text_search(&mut self, query: impl Into<String>) {
        let before = self.footprint();
        self.selection.open_text_search(query);
        self.mark_footprint_change(before);
    }

    pub fn set_multiselect(&mut self, enabled: bool) {
        self.selection.set_multiselect(enabled);
    }

    pub fn toggle_multiselect(&mut self) -> bool {
        let enabled = !self.selection.multiselect();
        self.selection.set_multiselect(enabled);
        enabled
    }

    pub fn set_interaction_disabled(&mut self, disabled: bool) {
        self.selection.set_interaction_disabled(disabled);
    }

    /// 记录当前悬停/选中的问题，含答案句的页面随之重绘。
    pub fn set_active_question(&mut self, question_id: Option<String>) {
        self.selection.set_active_question(question_id);
        let pages: BTreeSet<u32> = self
            .graph
            .entities_of_kind(EntityKind::AnswerSentence)
            .flat_map(|entity| entity.pages())
            .collect();
        self.dirty_pages.extend(pages);
    }

    /// 设置查找游标；实体查找模式下同时跳转到对应实体。
    pub fn set_find_match_index(
        &mut self,
        index: usize,
        viewer: &mut dyn ViewerSurface,
    ) -> Result<Option<ViewerLocation>, EngineError> {
        let before = self.footprint();
        let target = self.selection.set_find_match_index(index)?;
        let location = match target {
            Some(id) => Some(self.navigator.jump_to_entity(
                &self.graph,
                &mut self.selection,
                viewer,
                &id,
            )?),
            None => None,
        };
        self.mark_footprint_change(before);
        Ok(location)
    }

    pub fn next_match(
        &mut self,
        viewer: &mut dyn ViewerSurface,
    ) -> Result<Option<ViewerLocation>, EngineError> {
        self.step_match(1, viewer)
    }

    pub fn previous_match(
        &mut self,
        viewer: &mut dyn ViewerSurface,
    ) -> Result<Option<ViewerLocation>, EngineError> {
        self.step_match(-1, viewer)
    }

    fn step_match(
        &mut self,
        step: isize,
        viewer: &mut dyn ViewerSurface,
    ) -> Result<Option<ViewerLocation>, EngineError> {
        match self.selection.cycled_match_index(step) {
            Some(index) => self.set_find_match_index(index, viewer),
            None => Ok(None),
        }
    }

    pub fn jump_to_entity(
        &mut self,
        id: &EntityId,
        viewer: &mut dyn ViewerSurface,
    ) -> Result<ViewerLocation, EngineError> {
        let before = self.footprint();
        let location = self
            .navigator
            .jump_to_entity(&self.graph, &mut self.selection, viewer, id)?;
        self.mark_footprint_change(before);
        Ok(location)
    }

    pub fn jump_back(&mut self, viewer: &mut dyn ViewerSurface) -> Option<ViewerLocation> {
        self.navigator.jump_back(viewer)
    }

    // ---- 解析与挂载 ----

    pub fn resolve_page(&mut self, page: u32, papers: &dyn PaperDirectory) -> Vec<AnnotationRecord> {
        AnnotationResolver::new(&self.graph, &self.selection, &self.flags).resolve_page(
            page,
            &mut self.citations,
            papers,
        )
    }

    pub fn render_page(
        &mut self,
        page: u32,
        viewer: &dyn ViewerSurface,
        papers: &dyn PaperDirectory,
    ) -> Result<PageRender, EngineError> {
        let viewport = viewer
            .page_viewport(page)
            .ok_or(EngineError::PageNotRendered(page))?;
        let records = self.resolve_page(page, papers);
        Ok(project_page(
            page,
            viewport,
            records,
            &self.graph,
            self.scale_correction,
        ))
    }

    /// 查看器渲染完一页：挂载渲染根并提交该页的描述。
    pub fn on_page_rendered(
        &mut self,
        page: u32,
        container: ContainerHandle,
        viewer: &dyn ViewerSurface,
        host: &mut dyn HostDocument,
        papers: &dyn PaperDirectory,
    ) -> Result<RootHandle, EngineError> {
        let root = self.mounts.mount_page(host, page, container)?;
        let render = self.render_page(page, viewer, papers)?;
        self.mounts.render_page(host, &render)?;
        self.dirty_pages.remove(&page);
        debug!(
            page,
            root = root.raw(),
            annotations = render.annotations.len(),
            "页面注释已挂载"
        );
        Ok(root)
    }

    pub fn on_page_destroyed(&mut self, page: u32, host: &mut dyn HostDocument) -> DetachOutcome {
        self.mounts.unmount_page(host, page)
    }

    /// 重新渲染所有已挂载的受影响页面，返回实际提交了新描述的页码。
    pub fn flush(
        &mut self,
        viewer: &dyn ViewerSurface,
        host: &mut dyn HostDocument,
        papers: &dyn PaperDirectory,
    ) -> Vec<u32> {
        self.notifications.prune_expired();
        self.mounts.prune(host);
        let pending = std::mem::take(&mut self.dirty_pages);
        let mut rendered = Vec::new();
        for page in pending {
            if !self.mounts.is_mounted(page) {
                continue;
            }
            let result = self.render_page(page, viewer, papers).and_then(|render| {
                self.mounts
                    .render_page(host, &render)
                    .map_err(EngineError::from)
            });
            match result {
                Ok(true) => rendered.push(page),
                Ok(false) => {}
                Err(EngineError::Mount(MountError::ContainerGone(container))) => {
                    debug!(page, container = container.raw(), "页面容器已消失，跳过重绘");
                }
                Err(err) => debug!(page, error = %err, "页面重绘失败"),
            }
        }
        rendered
    }

    pub fn teardown(&mut self, host: &mut dyn HostDocument) {
        self.mounts.teardown(host);
        self.dirty_pages.clear();
    }

    // ---- 本地图变更（由变更流程在持久化成功后调用）----

    pub(crate) fn add_local(&mut self, entity: Entity) -> Result<(), EngineError> {
        let pages = entity.pages();
        let related = self.expand(&entity.id, &entity.relationships);
        self.graph.add(entity)?;
        self.dirty_pages.extend(pages);
        self.dirty_pages.extend(self.pages_of(related.iter()));
        self.after_graph_change();
        Ok(())
    }

    pub(crate) fn patch_local(
        &mut self,
        id: &EntityId,
        patch: &EntityPatch,
    ) -> bool {
        let Some(before) = self.graph.by_id(id).map(|entity| self.expand(id, &entity.relationships))
        else {
            return false;
        };
        let before_pages = self.pages_of(before.iter());
        if !self.graph.update(id, patch) {
            return false;
        }
        self.dirty_pages.extend(before_pages);
        if let Some(entity) = self.graph.by_id(id) {
            let after = self.expand(id, &entity.relationships);
            self.dirty_pages.extend(self.pages_of(after.iter()));
        }
        self.after_graph_change();
        true
    }

    pub(crate) fn remove_local(&mut self, id: &EntityId) -> Option<Entity> {
        let before = self.footprint();
        let related = self
            .graph
            .by_id(id)
            .map(|entity| self.expand(id, &entity.relationships))
            .unwrap_or_default();
        let related_pages = self.pages_of(related.iter());
        let removed = self.graph.remove(id)?;
        self.selection.forget_entity(id);
        self.dirty_pages.extend(related_pages);
        self.dirty_pages.extend(removed.pages());
        self.after_graph_change();
        self.mark_footprint_change(before);
        Some(removed)
    }

    fn after_graph_change(&mut self) {
        self.selection.refresh_find(&self.graph, &mut self.finder);
    }

    // ---- 受影响页面 ----

    /// 当前选择在图上的影响范围。
    fn footprint(&self) -> HashSet<EntityId> {
        let selection = &self.selection;
        let mut seeds: Vec<&EntityId> = selection.selected_entity_ids().iter().collect();
        if let Some(matches) = selection.find().matches() {
            seeds.extend(matches);
        }
        seeds.extend(selection.jump_target());

        let mut footprint = HashSet::new();
        for id in seeds {
            match self.graph.by_id(id) {
                Some(entity) => footprint.extend(self.expand(id, &entity.relationships)),
                None => {
                    footprint.insert(id.clone());
                }
            }
        }
        footprint
    }

    /// 一个实体的变化可能波及的实体：自身、祖先、后代、所属公式及其符号。
    fn expand(&self, id: &EntityId, relationships: &Relationships) -> Vec<EntityId> {
        let mut related = vec![id.clone()];
        related.extend(self.graph.ancestors(id));
        related.extend(self.graph.descendants(id));
        related.extend(relationships.children.iter().cloned());
        let equation = match self.graph.by_id(id) {
            Some(entity) if entity.kind() == EntityKind::Equation => Some(id.clone()),
            _ => relationships.equation.clone(),
        };
        if let Some(equation) = equation {
            related.extend(
                self.graph
                    .symbols_in_equation(&equation)
                    .into_iter()
                    .map(|symbol| symbol.id.clone()),
            );
            related.push(equation);
        }
        related
    }

    fn pages_of<'a>(&self, ids: impl Iterator<Item = &'a EntityId>) -> BTreeSet<u32> {
        ids.filter_map(|id| self.graph.by_id(id))
            .flat_map(|entity| entity.pages())
            .collect()
    }

    fn mark_footprint_change(&mut self, before: HashSet<EntityId>) {
        let after = self.footprint();
        let pages = self.pages_of(before.iter().chain(after.iter()));
        self.dirty_pages.extend(pages);
    }

    // ---- 演示数据 ----

    /// 为 CLI / 快速验证填充一组示例实体，返回关键实体 ID。
    pub fn populate_demo(&mut self) -> Result<DemoEntities, EngineError> {
        self.clear_selection();

        let symbol = |id: &str, tex: &str, left: f64, relationships: Relationships| {
            Entity::new(
                id,
                EntityData::Symbol(SymbolAttributes {
                    tex: Some(tex.to_string()),
                    definitions: if relationships.parent.is_none() {
                        vec![format!("{tex} 的定义")]
                    } else {
                        Vec::new()
                    },
                    ..SymbolAttributes::default()
                }),
            )
            .with_box(BoundingBox::new(0, left, 0.42, 0.04, 0.025))
            .with_relationships(relationships)
        };
        let in_equation = |parent: Option<&str>, children: &[&str]| Relationships {
            parent: parent.map(EntityId::from),
            children: children.iter().map(|child| EntityId::from(*child)).collect(),
            equation: Some(EntityId::from("eq-loss")),
            ..Relationships::default()
        };
        let term = |id: &str, page: u32, top: f64| {
            Entity::new(
                id,
                EntityData::Term(TermAttributes {
                    name: "accuracy".to_string(),
                    term_type: Some("metric".to_string()),
                    definitions: vec!["正确预测所占的比例".to_string()],
                }),
            )
            .with_box(BoundingBox::new(page, 0.12, top, 0.08, 0.018))
            .with_relationships(Relationships {
                sentence: Some(EntityId::from("sent-intro")),
                ..Relationships::default()
            })
        };

        let entities = [
            Entity::new(
                "sec-intro",
                EntityData::SectionHeader(SectionHeaderAttributes {
                    section_name: Some("Introduction".to_string()),
                    section_number: Some("1".to_string()),
                }),
            )
            .with_box(BoundingBox::new(0, 0.1, 0.08, 0.3, 0.03)),
            Entity::new(
                "sent-intro",
                EntityData::Sentence(SentenceAttributes {
                    text: Some("We report accuracy on the held-out split.".to_string()),
                    tex: None,
                }),
            )
            .with_box(BoundingBox::new(0, 0.1, 0.15, 0.8, 0.02)),
            term("term-accuracy-1", 0, 0.15),
            term("term-accuracy-3", 2, 0.6),
            Entity::new(
                "cite-vaswani",
                EntityData::Citation(CitationAttributes {
                    paper_id: Some("vaswani2017".to_string()),
                }),
            )
            .with_box(BoundingBox::new(0, 0.7, 0.2, 0.06, 0.018)),
            Entity::new(
                "eq-loss",
                EntityData::Equation(EquationAttributes {
                    tex: Some("L = x_i + y".to_string()),
                    is_inline: false,
                }),
            )
            .with_box(BoundingBox::new(0, 0.1, 0.4, 0.8, 0.06)),
            symbol("sym-p", "x_i", 0.3, in_equation(None, &["sym-c1", "sym-c2"])),
            symbol("sym-q", "y", 0.5, in_equation(None, &[])),
            symbol("sym-c1", "x", 0.3, in_equation(Some("sym-p"), &[])),
            symbol("sym-c2", "i", 0.32, in_equation(Some("sym-p"), &[])),
        ];
        for entity in entities {
            self.add_local(entity)?;
        }

        let ids = DemoEntities {
            equation: EntityId::from("eq-loss"),
            p: EntityId::from("sym-p"),
            q: EntityId::from("sym-q"),
            c1: EntityId::from("sym-c1"),
            c2: EntityId::from("sym-c2"),
            term_first: EntityId::from("term-accuracy-1"),
            term_second: EntityId::from("term-accuracy-3"),
            sentence: EntityId::from("sent-intro"),
            citation: EntityId::from("cite-vaswani"),
            header: EntityId::from("sec-intro"),
        };
        info!(
            paper = %self.paper_id,
            entities = self.graph.len(),
            pages = ?self.graph.pages(),
            "已创建演示实体"
        );
        Ok(ids)
    }
}

/// 演示用的论文目录，包含演示引文指向的论文。
pub fn demo_papers() -> PaperCatalog {
    let mut catalog = PaperCatalog::new();
    catalog.insert(Paper {
        id: "vaswani2017".to_string(),
        title: "Attention Is All You Need".to_string(),
        authors: vec!["Ashish Vaswani".to_string(), "Noam Shazeer".to_string()],
        year: Some(2017),
        venue: Some("NeurIPS".to_string()),
        ..Paper::default()
    });
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::FindMode;
    use crate::testing::{RecordingHost, RecordingViewer};

    fn demo_session() -> (Session, DemoEntities) {
        let mut session = Session::new(
            "demo",
            EntityGraph::new(),
            SessionSettings {
                flags: ResolverFlags {
                    equation_diagrams: true,
                    ..ResolverFlags::default()
                },
                ..SessionSettings::default()
            },
        );
        let ids = session.populate_demo().expect("演示数据应能构造");
        (session, ids)
    }

    #[test]
    fn demo_population_builds_a_valid_forest() {
        let (session, ids) = demo_session();
        assert_eq!(session.graph().len(), 10);
        assert!(session.graph().forest_violations().is_empty());
        assert_eq!(session.graph().children_of(&ids.p).len(), 2);
        assert_eq!(session.graph().pages(), vec![0, 2]);
    }

    #[test]
    fn term_search_navigates_to_second_match() {
        let (mut session, ids) = demo_session();
        let mut viewer = RecordingViewer::with_pages(3);

        let phase = session.select_entity(ids.term_first.clone()).unwrap();
        assert_eq!(phase, SelectionPhase::Searching(FindMode::Term));
        assert_eq!(
            session.selection().find().matches().unwrap(),
            &[ids.term_first.clone(), ids.term_second.clone()]
        );
        assert_eq!(session.selection().find().match_index(), Some(0));

        let location = session
            .set_find_match_index(1, &mut viewer)
            .unwrap()
            .expect("实体查找应触发跳转");
        assert_eq!(location.page, 2);
        assert_eq!(viewer.navigations.len(), 1);
        assert_eq!(session.selection().find().match_index(), Some(1));
        assert_eq!(session.selection().jump_target(), Some(&ids.term_second));

        // 循环回到第一个匹配。
        let wrapped = session.next_match(&mut viewer).unwrap().unwrap();
        assert_eq!(wrapped.page, 0);
        assert_eq!(session.jump_back(&mut viewer).map(|l| l.page), Some(2));
    }

    #[test]
    fn flush_drops_expired_notifications() {
        let settings = SessionSettings {
            notification_duration: Duration::ZERO,
            ..SessionSettings::default()
        };
        let mut session = Session::new("demo", EntityGraph::new(), settings);
        session.notifications_mut().error("更新实体失败");
        assert_eq!(session.notifications().len(), 1);

        let viewer = RecordingViewer::with_pages(1);
        let mut host = RecordingHost::default();
        assert!(session.flush(&viewer, &mut host, &demo_papers()).is_empty());
        assert!(session.notifications().is_empty());
    }

    #[test]
    fn selection_marks_only_related_pages() {
        let (mut session, ids) = demo_session();
        session.dirty_pages.clear();
        session.select_entity(ids.c1.clone()).unwrap();
        assert_eq!(session.affected_pages(), vec![0]);

        session.dirty_pages.clear();
        session.select_entity(ids.term_first.clone()).unwrap();
        assert_eq!(session.affected_pages(), vec![0, 2]);
    }

    #[test]
    fn mounted_pages_rerender_after_selection() {
        let (mut session, ids) = demo_session();
        let viewer = RecordingViewer::with_pages(3);
        let mut host = RecordingHost::default();
        let papers = demo_papers();
        let first = host.add_container(100);
        let third = host.add_container(102);
        session
            .on_page_rendered(0, first, &viewer, &mut host, &papers)
            .unwrap();
        session
            .on_page_rendered(2, third, &viewer, &mut host, &papers)
            .unwrap();
        assert_eq!(host.renders.len(), 2);

        session.select_entity(ids.equation.clone()).unwrap();
        assert_eq!(session.flush(&viewer, &mut host, &papers), vec![0]);
        let (_, latest) = host.renders.last().unwrap();
        let p = latest.annotation(&ids.p).unwrap();
        assert!(p.record.interactive && p.record.selection_hint);

        // 查看器销毁了第 1 页容器，flush 不会出错。
        session.select_entity(ids.term_first.clone()).unwrap();
        host.destroy_container(first);
        assert_eq!(session.flush(&viewer, &mut host, &papers), vec![2]);
        assert_eq!(session.mounted_pages(), vec![2]);
        assert_eq!(session.on_page_destroyed(2, &mut host), DetachOutcome::Detached);
    }

    #[test]
    fn rendering_unknown_page_is_an_error() {
        let (mut session, _) = demo_session();
        let viewer = RecordingViewer::with_pages(1);
        assert!(matches!(
            session.render_page(5, &viewer, &demo_papers()),
            Err(EngineError::PageNotRendered(5))
        ));
    }

    #[test]
    fn citation_gloss_uses_paper_directory() {
        let (mut session, ids) = demo_session();
        let records = session.resolve_page(0, &demo_papers());
        let citation = records
            .iter()
            .find(|record| record.entity_id == ids.citation)
            .unwrap();
        assert!(citation.interactive);
        assert!(session.citations().contains("vaswani2017"));
    }
}
