use std::collections::{HashMap, HashSet};

use scholia_core::document::{
    Entity, EntityData, EntityId, EquationAttributes, Relationships, SymbolAttributes,
    TermAttributes,
};
use scholia_core::geometry::{BoundingBox, PageViewport};

use crate::collaborators::{ViewerLocation, ViewerSurface};
use crate::mount::{ContainerHandle, HostDocument, MountError, RootHandle};
use crate::resolver::PageRender;

pub fn symbol(id: &str, tex: &str, page: u32, left: f64, top: f64) -> Entity {
    Entity::new(
        id,
        EntityData::Symbol(SymbolAttributes {
            tex: Some(tex.to_string()),
            ..SymbolAttributes::default()
        }),
    )
    .with_box(BoundingBox::new(page, left, top, 0.05, 0.02))
}

pub fn term(id: &str, name: &str, page: u32, top: f64) -> Entity {
    Entity::new(
        id,
        EntityData::Term(TermAttributes {
            name: name.to_string(),
            ..TermAttributes::default()
        }),
    )
    .with_box(BoundingBox::new(page, 0.1, top, 0.1, 0.02))
}

pub fn equation(id: &str, page: u32) -> Entity {
    Entity::new(
        id,
        EntityData::Equation(EquationAttributes {
            tex: Some(format!("tex-{id}")),
            is_inline: false,
        }),
    )
    .with_box(BoundingBox::new(page, 0.1, 0.5, 0.8, 0.06))
}

/// 公式内的符号，带父子关系。
pub fn nested_symbol(
    id: &str,
    equation: Option<&str>,
    parent: Option<&str>,
    children: &[&str],
) -> Entity {
    symbol(id, id, 0, 0.2, 0.52).with_relationships(Relationships {
        parent: parent.map(EntityId::from),
        children: children.iter().map(|child| EntityId::from(*child)).collect(),
        equation: equation.map(EntityId::from),
        ..Relationships::default()
    })
}

/// 内存版查看器，记录每次跳转。
#[derive(Debug, Default)]
pub struct RecordingViewer {
    pub viewports: HashMap<u32, PageViewport>,
    pub location: Option<ViewerLocation>,
    pub navigations: Vec<ViewerLocation>,
}

impl RecordingViewer {
    pub fn with_pages(pages: u32) -> Self {
        let mut viewer = Self::default();
        for page in 0..pages {
            viewer
                .viewports
                .insert(page, PageViewport::new(600.0, 800.0, 1.0));
        }
        viewer.location = Some(ViewerLocation {
            page: 0,
            offset_x: 0.0,
            offset_y: 0.0,
        });
        viewer
    }
}

impl ViewerSurface for RecordingViewer {
    fn page_viewport(&self, page: u32) -> Option<PageViewport> {
        self.viewports.get(&page).copied()
    }

    fn current_location(&self) -> Option<ViewerLocation> {
        self.location
    }

    fn navigate_to(&mut self, page: u32, offset_x: f64, offset_y: f64) {
        let location = ViewerLocation {
            page,
            offset_x,
            offset_y,
        };
        self.navigations.push(location);
        self.location = Some(location);
    }
}

#[derive(Debug, Default)]
pub struct RecordingHost {
    pub containers: HashSet<ContainerHandle>,
    pub roots: HashMap<RootHandle, ContainerHandle>,
    pub renders: Vec<(RootHandle, PageRender)>,
    pub removed: Vec<RootHandle>,
    next_root: u64,
}

impl RecordingHost {
    pub fn add_container(&mut self, raw: u64) -> ContainerHandle {
        let handle = ContainerHandle::new(raw);
        self.containers.insert(handle);
        handle
    }

    /// 模拟查看器自行销毁页面容器。
    pub fn destroy_container(&mut self, handle: ContainerHandle) {
        self.containers.remove(&handle);
        self.roots.retain(|_, container| *container != handle);
    }
}

impl HostDocument for RecordingHost {
    fn container_exists(&self, container: ContainerHandle) -> bool {
        self.containers.contains(&container)
    }

    fn create_root(&mut self, container: ContainerHandle) -> Result<RootHandle, MountError> {
        if !self.containers.contains(&container) {
            return Err(MountError::ContainerGone(container));
        }
        self.next_root += 1;
        let root = RootHandle::new(self.next_root);
        self.roots.insert(root, container);
        Ok(root)
    }

    fn render_root(&mut self, root: RootHandle, description: &PageRender) {
        self.renders.push((root, description.clone()));
    }

    fn remove_root(&mut self, _container: ContainerHandle, root: RootHandle) {
        self.roots.remove(&root);
        self.removed.push(root);
    }
}
