use std::collections::VecDeque;

use scholia_core::document::EntityId;
use scholia_core::geometry::to_pixel_rect;
use scholia_core::graph::EntityGraph;
use tracing::{debug, info};

use crate::collaborators::{ViewerLocation, ViewerSurface};
use crate::errors::EngineError;
use crate::selection::SelectionState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationSettings {
    /// 目标左侧留白（像素）。
    pub margin_x: f64,
    /// 目标上方留白（像素）。
    pub margin_y: f64,
    pub history_size: usize,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            margin_x: 32.0,
            margin_y: 96.0,
            history_size: 64,
        }
    }
}

/// 有界的跳转历史，最新的在末尾。
#[derive(Debug, Clone)]
pub struct JumpHistory {
    entries: VecDeque<ViewerLocation>,
    max_size: usize,
}

impl JumpHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size: max_size.max(1),
        }
    }

    /// 与最后一条相同则忽略；超出容量时丢弃最旧的。
    pub fn push(&mut self, location: ViewerLocation) {
        if self.entries.back() == Some(&location) {
            return;
        }
        self.entries.push_back(location);
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
    }

    pub fn back(&mut self) -> Option<ViewerLocation> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 跳转到实体，并维护供“返回”使用的跳转历史。
#[derive(Debug, Clone)]
pub struct Navigator {
    settings: NavigationSettings,
    history: JumpHistory,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(NavigationSettings::default())
    }
}

impl Navigator {
    pub fn new(settings: NavigationSettings) -> Self {
        Self {
            history: JumpHistory::new(settings.history_size),
            settings,
        }
    }

    pub fn settings(&self) -> &NavigationSettings {
        &self.settings
    }

    pub fn history(&self) -> &JumpHistory {
        &self.history
    }

    /// 计算跳转目标：实体第一个框的像素位置减去留白，下限为 0。
    pub fn target_for(
        &self,
        graph: &EntityGraph,
        viewer: &dyn ViewerSurface,
        id: &EntityId,
    ) -> Result<ViewerLocation, EngineError> {
        let entity = graph
            .by_id(id)
            .ok_or_else(|| EngineError::EntityNotFound(id.clone()))?;
        let bbox = entity
            .first_box()
            .ok_or_else(|| EngineError::EntityHasNoBoxes(id.clone()))?;
        let viewport = viewer
            .page_viewport(bbox.page)
            .ok_or(EngineError::PageNotRendered(bbox.page))?;
        let rect = to_pixel_rect(&viewport, bbox);
        Ok(ViewerLocation {
            page: bbox.page,
            offset_x: (rect.left - self.settings.margin_x).max(0.0),
            offset_y: (rect.top - self.settings.margin_y).max(0.0),
        })
    }

    /// 跳转到实体，并把它记为当前跳转目标。跳转前的位置进入历史。
    pub fn jump_to_entity(
        &mut self,
        graph: &EntityGraph,
        selection: &mut SelectionState,
        viewer: &mut dyn ViewerSurface,
        id: &EntityId,
    ) -> Result<ViewerLocation, EngineError> {
        let target = self.target_for(graph, viewer, id)?;
        if let Some(current) = viewer.current_location() {
            self.history.push(current);
        }
        viewer.navigate_to(target.page, target.offset_x, target.offset_y);
        selection.set_jump_target(Some(id.clone()));
        info!(
            entity = %id,
            page = target.page,
            x = target.offset_x,
            y = target.offset_y,
            "跳转到实体"
        );
        Ok(target)
    }

    /// 回到上一次跳转前的位置。
    pub fn jump_back(&mut self, viewer: &mut dyn ViewerSurface) -> Option<ViewerLocation> {
        let location = self.history.back()?;
        viewer.navigate_to(location.page, location.offset_x, location.offset_y);
        debug!(page = location.page, remaining = self.history.len(), "返回上一位置");
        Some(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{symbol, RecordingViewer};
    use scholia_core::document::{Entity, EntityData, EquationAttributes};

    fn location(page: u32, y: f64) -> ViewerLocation {
        ViewerLocation {
            page,
            offset_x: 0.0,
            offset_y: y,
        }
    }

    #[test]
    fn history_is_bounded_and_skips_repeats() {
        let mut history = JumpHistory::new(2);
        history.push(location(0, 1.0));
        history.push(location(0, 1.0));
        assert_eq!(history.len(), 1);
        history.push(location(1, 0.0));
        history.push(location(2, 0.0));
        assert_eq!(history.len(), 2);
        assert_eq!(history.back(), Some(location(2, 0.0)));
        assert_eq!(history.back(), Some(location(1, 0.0)));
        assert_eq!(history.back(), None);
    }

    #[test]
    fn jump_applies_margins_and_records_history() {
        let graph = EntityGraph::with_entities([symbol("x", "x", 1, 0.5, 0.5)]).unwrap();
        let mut viewer = RecordingViewer::with_pages(2);
        let mut selection = SelectionState::new();
        let mut navigator = Navigator::new(NavigationSettings {
            margin_x: 10.0,
            margin_y: 20.0,
            history_size: 8,
        });

        let target = navigator
            .jump_to_entity(&graph, &mut selection, &mut viewer, &EntityId::from("x"))
            .expect("跳转失败");
        assert_eq!(target.page, 1);
        assert!((target.offset_x - 290.0).abs() < 1e-9);
        assert!((target.offset_y - 380.0).abs() < 1e-9);
        assert_eq!(viewer.navigations, vec![target]);
        assert_eq!(selection.jump_target(), Some(&EntityId::from("x")));
        assert_eq!(navigator.history().len(), 1);

        let back = navigator.jump_back(&mut viewer).expect("应有历史");
        assert_eq!(back, location(0, 0.0));
        assert!(navigator.jump_back(&mut viewer).is_none());
    }

    #[test]
    fn offsets_are_clamped_at_page_origin() {
        let graph = EntityGraph::with_entities([symbol("x", "x", 0, 0.0, 0.01)]).unwrap();
        let viewer = RecordingViewer::with_pages(1);
        let target = Navigator::default()
            .target_for(&graph, &viewer, &EntityId::from("x"))
            .unwrap();
        assert_eq!(target.offset_x, 0.0);
        assert_eq!(target.offset_y, 0.0);
    }

    #[test]
    fn unplaceable_targets_are_errors() {
        let graph = EntityGraph::with_entities([
            Entity::new("boxless", EntityData::Equation(EquationAttributes::default())),
            symbol("far", "x", 9, 0.1, 0.1),
        ])
        .unwrap();
        let viewer = RecordingViewer::with_pages(1);
        let navigator = Navigator::default();
        assert!(matches!(
            navigator.target_for(&graph, &viewer, &EntityId::from("missing")),
            Err(EngineError::EntityNotFound(_))
        ));
        assert!(matches!(
            navigator.target_for(&graph, &viewer, &EntityId::from("boxless")),
            Err(EngineError::EntityHasNoBoxes(_))
        ));
        assert!(matches!(
            navigator.target_for(&graph, &viewer, &EntityId::from("far")),
            Err(EngineError::PageNotRendered(9))
        ));
    }
}
