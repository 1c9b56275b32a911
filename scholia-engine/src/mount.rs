use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::resolver::PageRender;

/// 查看器页面容器的不透明句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerHandle(u64);

impl ContainerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// 本层在容器内创建的渲染根。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootHandle(u64);

impl RootHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("page container {0:?} no longer exists")]
    ContainerGone(ContainerHandle),
    #[error("mount is not attached to a container")]
    NotAttached,
    #[error("host document error: {0}")]
    Host(String),
}

/// 宿主文档（查看器）提供的容器操作。
pub trait HostDocument {
    fn container_exists(&self, container: ContainerHandle) -> bool;

    fn create_root(&mut self, container: ContainerHandle) -> Result<RootHandle, MountError>;

    fn render_root(&mut self, root: RootHandle, description: &PageRender);

    /// 调用前必须确认容器仍存在。
    fn remove_root(&mut self, container: ContainerHandle, root: RootHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    Detached,
    /// 容器已被查看器销毁，无需移除。
    ContainerGone,
    NotAttached,
}

/// 把渲染描述挂到查看器拥有的页面容器上。
///
/// 容器由查看器随时创建、销毁，这里只持有不透明句柄。`detach` 在移除渲染根之前
/// 总是先确认容器仍然存在，挂载与卸载都可以重复调用。
#[derive(Debug, Default)]
pub struct ExternalMount {
    container: Option<ContainerHandle>,
    root: Option<RootHandle>,
    last_render: Option<PageRender>,
}

impl ExternalMount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&self) -> Option<ContainerHandle> {
        self.container
    }

    pub fn root(&self) -> Option<RootHandle> {
        self.root
    }

    pub fn is_attached(&self) -> bool {
        self.root.is_some()
    }

    /// 挂到容器上。已挂在同一个存活容器上时直接返回现有渲染根。
    pub fn attach(
        &mut self,
        host: &mut dyn HostDocument,
        container: ContainerHandle,
    ) -> Result<RootHandle, MountError> {
        if let (Some(current), Some(root)) = (self.container, self.root) {
            if current == container && host.container_exists(container) {
                return Ok(root);
            }
            self.detach(host);
        }
        let root = host.create_root(container)?;
        self.container = Some(container);
        self.root = Some(root);
        self.last_render = None;
        trace!(container = container.raw(), root = root.raw(), "渲染根已挂载");
        Ok(root)
    }

    /// 提交渲染描述；与上次相同则跳过并返回 `false`。
    pub fn render(
        &mut self,
        host: &mut dyn HostDocument,
        description: &PageRender,
    ) -> Result<bool, MountError> {
        let (Some(container), Some(root)) = (self.container, self.root) else {
            return Err(MountError::NotAttached);
        };
        if !host.container_exists(container) {
            return Err(MountError::ContainerGone(container));
        }
        if self.last_render.as_ref() == Some(description) {
            return Ok(false);
        }
        host.render_root(root, description);
        self.last_render = Some(description.clone());
        Ok(true)
    }

    pub fn detach(&mut self, host: &mut dyn HostDocument) -> DetachOutcome {
        self.last_render = None;
        let (Some(container), Some(root)) = (self.container.take(), self.root.take()) else {
            return DetachOutcome::NotAttached;
        };
        if !host.container_exists(container) {
            debug!(container = container.raw(), "容器已被查看器移除，跳过卸载");
            return DetachOutcome::ContainerGone;
        }
        host.remove_root(container, root);
        DetachOutcome::Detached
    }
}

/// 按页码管理所有挂载。
#[derive(Debug, Default)]
pub struct MountRegistry {
    mounts: BTreeMap<u32, ExternalMount>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_page(
        &mut self,
        host: &mut dyn HostDocument,
        page: u32,
        container: ContainerHandle,
    ) -> Result<RootHandle, MountError> {
        self.mounts.entry(page).or_default().attach(host, container)
    }

    /// 页面未挂载时返回 `NotAttached`。
    pub fn render_page(
        &mut self,
        host: &mut dyn HostDocument,
        description: &PageRender,
    ) -> Result<bool, MountError> {
        match self.mounts.get_mut(&description.page) {
            Some(mount) => mount.render(host, description),
            None => Err(MountError::NotAttached),
        }
    }

    pub fn unmount_page(&mut self, host: &mut dyn HostDocument, page: u32) -> DetachOutcome {
        match self.mounts.remove(&page) {
            Some(mut mount) => mount.detach(host),
            None => DetachOutcome::NotAttached,
        }
    }

    /// 丢弃容器已不存在的挂载，返回被丢弃的页码。
    pub fn prune(&mut self, host: &dyn HostDocument) -> Vec<u32> {
        let gone: Vec<u32> = self
            .mounts
            .iter()
            .filter(|(_, mount)| {
                mount
                    .container()
                    .is_none_or(|container| !host.container_exists(container))
            })
            .map(|(page, _)| *page)
            .collect();
        for page in &gone {
            self.mounts.remove(page);
        }
        if !gone.is_empty() {
            debug!(pages = ?gone, "清理失效的页面挂载");
        }
        gone
    }

    pub fn teardown(&mut self, host: &mut dyn HostDocument) {
        let mounts = std::mem::take(&mut self.mounts);
        for (_, mut mount) in mounts {
            mount.detach(host);
        }
    }

    pub fn is_mounted(&self, page: u32) -> bool {
        self.mounts.get(&page).is_some_and(ExternalMount::is_attached)
    }

    pub fn mounted_pages(&self) -> Vec<u32> {
        self.mounts.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHost;
    use scholia_core::geometry::PageViewport;

    fn empty_render(page: u32) -> PageRender {
        PageRender {
            page,
            viewport: PageViewport::new(600.0, 800.0, 1.0),
            annotations: Vec::new(),
        }
    }

    #[test]
    fn attach_is_idempotent_for_same_container() {
        let mut host = RecordingHost::default();
        let container = host.add_container(1);
        let mut mount = ExternalMount::new();
        let first = mount.attach(&mut host, container).unwrap();
        let second = mount.attach(&mut host, container).unwrap();
        assert_eq!(first, second);
        assert_eq!(host.roots.len(), 1);
    }

    #[test]
    fn attaching_elsewhere_detaches_first() {
        let mut host = RecordingHost::default();
        let a = host.add_container(1);
        let b = host.add_container(2);
        let mut mount = ExternalMount::new();
        let first = mount.attach(&mut host, a).unwrap();
        mount.attach(&mut host, b).unwrap();
        assert_eq!(host.removed, vec![first]);
        assert_eq!(mount.container(), Some(b));
    }

    #[test]
    fn detach_after_viewer_destroyed_container_is_silent() {
        let mut host = RecordingHost::default();
        let container = host.add_container(7);
        let mut mount = ExternalMount::new();
        mount.attach(&mut host, container).unwrap();
        host.destroy_container(container);

        assert_eq!(mount.detach(&mut host), DetachOutcome::ContainerGone);
        assert!(host.removed.is_empty());
        assert_eq!(mount.detach(&mut host), DetachOutcome::NotAttached);
    }

    #[test]
    fn identical_render_is_skipped() {
        let mut host = RecordingHost::default();
        let container = host.add_container(1);
        let mut mount = ExternalMount::new();
        mount.attach(&mut host, container).unwrap();
        assert!(mount.render(&mut host, &empty_render(0)).unwrap());
        assert!(!mount.render(&mut host, &empty_render(0)).unwrap());
        assert_eq!(host.renders.len(), 1);
    }

    #[test]
    fn render_into_gone_container_errors() {
        let mut host = RecordingHost::default();
        let container = host.add_container(1);
        let mut mount = ExternalMount::new();
        assert!(matches!(
            mount.render(&mut host, &empty_render(0)),
            Err(MountError::NotAttached)
        ));
        mount.attach(&mut host, container).unwrap();
        host.destroy_container(container);
        assert!(matches!(
            mount.render(&mut host, &empty_render(0)),
            Err(MountError::ContainerGone(_))
        ));
    }

    #[test]
    fn registry_prunes_and_tears_down() {
        let mut host = RecordingHost::default();
        let first = host.add_container(10);
        let second = host.add_container(11);
        let mut registry = MountRegistry::new();
        registry.mount_page(&mut host, 0, first).unwrap();
        registry.mount_page(&mut host, 1, second).unwrap();
        assert_eq!(registry.mounted_pages(), vec![0, 1]);

        host.destroy_container(first);
        assert_eq!(registry.prune(&host), vec![0]);
        assert!(!registry.is_mounted(0));

        registry.teardown(&mut host);
        assert!(registry.mounted_pages().is_empty());
        assert_eq!(host.removed.len(), 1);
        assert_eq!(
            registry.unmount_page(&mut host, 1),
            DetachOutcome::NotAttached
        );
    }
}
