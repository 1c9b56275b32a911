use scholia_core::document::{EntityDraft, EntityId, EntityPatch};
use tracing::{info, warn};

use crate::collaborators::EntityPersistence;
use crate::errors::EngineError;
use crate::session::Session;

/// 一次更新波及的范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropagationScope {
    #[default]
    Single,
    /// 同时更新所有与目标符号匹配（`tex` 相同）的符号。
    MatchingSymbols,
}

/// 已发出请求、尚未应用到本地图的更新。
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub patch: EntityPatch,
    pub succeeded: Vec<EntityId>,
    pub failed: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub applied: Vec<EntityId>,
    pub failed: Vec<EntityId>,
    /// 请求成功但实体已在本地被删除。
    pub vanished: Vec<EntityId>,
}

impl Session {
    /// 创建实体。协作方失败或拒绝时返回 `Ok(None)` 并推送通知。
    pub fn create_entity(
        &mut self,
        persistence: &mut dyn EntityPersistence,
        draft: &EntityDraft,
        auto_select: bool,
    ) -> Result<Option<EntityId>, EngineError> {
        let kind = draft.data.kind();
        let created = match persistence.create(self.paper_id(), draft) {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                self.report_failure(format!("未能创建{kind}实体"), None);
                return Ok(None);
            }
            Err(err) => {
                self.report_failure(format!("未能创建{kind}实体"), Some(&err.to_string()));
                return Ok(None);
            }
        };
        let id = created.id.clone();
        self.add_local(created)?;
        info!(entity = %id, kind = %kind, "实体已创建");
        if auto_select {
            self.select_entity(id.clone())?;
        }
        Ok(Some(id))
    }

    /// 发出更新请求，返回各目标的成败。本地图此时不变。
    ///
    /// `complete_update` 只把成功的目标应用到仍然存在的实体上；失败时推送通知
    /// 并记录警告，不会自动重试。
    pub fn begin_update(
        &mut self,
        persistence: &mut dyn EntityPersistence,
        id: &EntityId,
        patch: EntityPatch,
        scope: PropagationScope,
    ) -> Result<PendingUpdate, EngineError> {
        if !self.graph.contains(id) {
            return Err(EngineError::EntityNotFound(id.clone()));
        }
        let targets = match scope {
            PropagationScope::Single => vec![id.clone()],
            PropagationScope::MatchingSymbols => self
                .finder
                .matching_symbols(std::slice::from_ref(id), &self.graph),
        };

        let mut pending = PendingUpdate {
            patch,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for target in targets {
            match persistence.patch(self.paper_id(), &target, &pending.patch) {
                Ok(true) => pending.succeeded.push(target),
                Ok(false) => pending.failed.push(target),
                Err(err) => {
                    warn!(entity = %target, error = %err, "实体更新请求失败");
                    pending.failed.push(target);
                }
            }
        }
        Ok(pending)
    }

    /// 把成功的部分应用到本地图。期间被删除的实体直接跳过。
    pub fn complete_update(&mut self, pending: PendingUpdate) -> UpdateReport {
        let mut report = UpdateReport {
            failed: pending.failed,
            ..UpdateReport::default()
        };
        for id in pending.succeeded {
            if self.patch_local(&id, &pending.patch) {
                report.applied.push(id);
            } else {
                report.vanished.push(id);
            }
        }
        if !report.failed.is_empty() {
            let message = format!("{} 个实体更新失败", report.failed.len());
            self.report_failure(message, None);
        }
        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            vanished = report.vanished.len(),
            "实体更新完成"
        );
        report
    }

    pub fn update_entity(
        &mut self,
        persistence: &mut dyn EntityPersistence,
        id: &EntityId,
        patch: EntityPatch,
        scope: PropagationScope,
    ) -> Result<UpdateReport, EngineError> {
        let pending = self.begin_update(persistence, id, patch, scope)?;
        Ok(self.complete_update(pending))
    }

    /// 删除实体，返回本地是否删除。子符号的 `parent` 保持悬空。
    pub fn delete_entity(
        &mut self,
        persistence: &mut dyn EntityPersistence,
        id: &EntityId,
    ) -> Result<bool, EngineError> {
        if !self.graph.contains(id) {
            return Err(EngineError::EntityNotFound(id.clone()));
        }
        match persistence.delete(self.paper_id(), id) {
            Ok(true) => {
                let removed = self.remove_local(id).is_some();
                info!(entity = %id, "实体已删除");
                Ok(removed)
            }
            Ok(false) => {
                self.report_failure(format!("未能删除实体 {id}"), None);
                Ok(false)
            }
            Err(err) => {
                self.report_failure(format!("未能删除实体 {id}"), Some(&err.to_string()));
                Ok(false)
            }
        }
    }

    fn report_failure(&mut self, message: String, cause: Option<&str>) {
        warn!(paper = %self.paper_id(), cause = cause.unwrap_or("rejected"), "{message}");
        self.notifications.error(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryPersistence;
    use crate::selection::{FindMode, SelectionPhase};
    use crate::session::{DemoEntities, SessionSettings};
    use crate::testing::symbol;
    use scholia_core::document::{AttributesPatch, EntityData, SymbolAttributes};
    use scholia_core::geometry::BoundingBox;
    use scholia_core::graph::EntityGraph;

    fn demo() -> (Session, DemoEntities) {
        let mut session = Session::new("demo", EntityGraph::new(), SessionSettings::default());
        let ids = session.populate_demo().expect("演示数据应能构造");
        (session, ids)
    }

    fn nickname(value: &str) -> EntityPatch {
        EntityPatch::attributes(AttributesPatch {
            nicknames: Some(vec![value.to_string()]),
            ..AttributesPatch::default()
        })
    }

    #[test]
    fn create_assigns_id_and_auto_selects() {
        let (mut session, _) = demo();
        let mut persistence = MemoryPersistence::new();
        let draft = EntityDraft {
            bounding_boxes: vec![BoundingBox::new(2, 0.2, 0.2, 0.05, 0.02)],
            ..EntityDraft::new(EntityData::Symbol(SymbolAttributes {
                tex: Some("z".to_string()),
                ..SymbolAttributes::default()
            }))
        };
        let id = session
            .create_entity(&mut persistence, &draft, true)
            .unwrap()
            .expect("内存持久化应创建成功");
        assert!(session.graph().contains(&id));
        assert_eq!(session.selection().selected_entity_ids(), &[id]);
        assert_eq!(
            session.selection().phase(),
            SelectionPhase::Searching(FindMode::Symbol)
        );
    }

    #[test]
    fn failed_create_notifies_without_touching_graph() {
        let (mut session, _) = demo();
        let mut persistence = MemoryPersistence::new();
        persistence.set_offline(true);
        let before = session.graph().len();
        let created = session
            .create_entity(
                &mut persistence,
                &EntityDraft::new(EntityData::Symbol(SymbolAttributes::default())),
                false,
            )
            .unwrap();
        assert!(created.is_none());
        assert_eq!(session.graph().len(), before);
        assert_eq!(session.notifications().active().count(), 1);
    }

    #[test]
    fn propagated_update_skips_rejected_targets() {
        let mut session = Session::new(
            "p",
            EntityGraph::with_entities([
                symbol("a", "x", 0, 0.1, 0.1),
                symbol("b", "x", 0, 0.1, 0.3),
                symbol("c", "x", 1, 0.1, 0.1),
            ])
            .unwrap(),
            SessionSettings::default(),
        );
        let mut persistence = MemoryPersistence::new();
        persistence.reject("b");

        let report = session
            .update_entity(
                &mut persistence,
                &EntityId::from("a"),
                nickname("loss"),
                PropagationScope::MatchingSymbols,
            )
            .unwrap();
        assert_eq!(report.applied, vec![EntityId::from("a"), EntityId::from("c")]);
        assert_eq!(report.failed, vec![EntityId::from("b")]);
        let b = session.graph().by_id(&EntityId::from("b")).unwrap();
        assert!(b.as_symbol().unwrap().nicknames.is_empty());
        let c = session.graph().by_id(&EntityId::from("c")).unwrap();
        assert_eq!(c.as_symbol().unwrap().nicknames, vec!["loss".to_string()]);
        assert_eq!(session.notifications().active().count(), 1);
    }

    #[test]
    fn late_completion_for_deleted_entity_is_a_noop() {
        let (mut session, ids) = demo();
        let mut persistence = MemoryPersistence::new();
        let pending = session
            .begin_update(
                &mut persistence,
                &ids.q,
                nickname("y"),
                PropagationScope::Single,
            )
            .unwrap();
        assert!(session.delete_entity(&mut persistence, &ids.q).unwrap());

        let report = session.complete_update(pending);
        assert!(report.applied.is_empty());
        assert_eq!(report.vanished, vec![ids.q.clone()]);
    }

    #[test]
    fn deleting_selected_entity_clears_it_and_closes_search() {
        let (mut session, ids) = demo();
        let mut persistence = MemoryPersistence::new();
        session.select_entity(ids.c1.clone()).unwrap();
        assert!(session.delete_entity(&mut persistence, &ids.c1).unwrap());
        assert!(session.selection().selected_entity_ids().is_empty());
        assert_eq!(session.selection().phase(), SelectionPhase::Idle);
        assert_eq!(persistence.deleted, vec![ids.c1.clone()]);
    }

    #[test]
    fn deleting_parent_leaves_children_dangling() {
        let (mut session, ids) = demo();
        let mut persistence = MemoryPersistence::new();
        assert!(session.delete_entity(&mut persistence, &ids.p).unwrap());
        assert!(session.graph().is_top_level(&ids.c1));
        let c1 = session.graph().by_id(&ids.c1).unwrap();
        assert_eq!(c1.relationships.parent.as_ref(), Some(&ids.p));
        let records = session.resolve_page(0, &crate::session::demo_papers());
        assert!(records.iter().any(|record| record.entity_id == ids.c2));
    }

    #[test]
    fn rejected_delete_keeps_entity() {
        let (mut session, ids) = demo();
        let mut persistence = MemoryPersistence::new();
        persistence.reject(ids.sentence.clone());
        assert!(!session.delete_entity(&mut persistence, &ids.sentence).unwrap());
        assert!(session.graph().contains(&ids.sentence));
        assert!(matches!(
            session.delete_entity(&mut persistence, &EntityId::from("missing")),
            Err(EngineError::EntityNotFound(_))
        ));
    }
}
