use std::collections::{BTreeMap, HashMap, HashSet};

use scholia_core::document::EntityKind;
use scholia_core::geometry::PageViewport;
use scholia_engine::collaborators::{PaperDirectory, ViewerLocation, ViewerSurface};
use scholia_engine::command::{CommandBus, CommandContext, CommandRequest};
use scholia_engine::mount::{ContainerHandle, DetachOutcome, HostDocument, MountError, RootHandle};
use scholia_engine::resolver::{AnnotationRecord, PageRender};
use scholia_engine::session::Session;
use tracing::{debug, info};

use crate::errors::FrontendError;
use crate::loader::{DocumentSource, LoadedSession};

const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;

/// 内存中的查看器：每页固定尺寸，记录跳转。
#[derive(Debug, Default)]
pub struct SimulatedViewer {
    viewports: BTreeMap<u32, PageViewport>,
    location: Option<ViewerLocation>,
    pub navigations: Vec<ViewerLocation>,
}

impl SimulatedViewer {
    pub fn for_pages(pages: impl IntoIterator<Item = u32>) -> Self {
        let viewports = pages
            .into_iter()
            .map(|page| (page, PageViewport::new(PAGE_WIDTH, PAGE_HEIGHT, 1.0)))
            .collect();
        Self {
            viewports,
            location: Some(ViewerLocation {
                page: 0,
                offset_x: 0.0,
                offset_y: 0.0,
            }),
            navigations: Vec::new(),
        }
    }
}

impl ViewerSurface for SimulatedViewer {
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
        debug!(page, offset_x, offset_y, "查看器跳转");
        self.navigations.push(location);
        self.location = Some(location);
    }
}

/// 内存中的宿主文档：按页创建容器，可模拟查看器回收容器。
#[derive(Debug, Default)]
pub struct SimulatedHost {
    containers: HashSet<ContainerHandle>,
    roots: HashMap<RootHandle, ContainerHandle>,
    next_handle: u64,
    pub render_count: usize,
}

impl SimulatedHost {
    pub fn open_page(&mut self) -> ContainerHandle {
        self.next_handle += 1;
        let handle = ContainerHandle::new(self.next_handle);
        self.containers.insert(handle);
        handle
    }

    /// 模拟查看器在滚动时自行销毁容器。
    pub fn recycle(&mut self, container: ContainerHandle) {
        self.containers.remove(&container);
        self.roots.retain(|_, owner| *owner != container);
    }

    pub fn live_roots(&self) -> usize {
        self.roots.len()
    }
}

impl HostDocument for SimulatedHost {
    fn container_exists(&self, container: ContainerHandle) -> bool {
        self.containers.contains(&container)
    }

    fn create_root(&mut self, container: ContainerHandle) -> Result<RootHandle, MountError> {
        if !self.containers.contains(&container) {
            return Err(MountError::ContainerGone(container));
        }
        self.next_handle += 1;
        let root = RootHandle::new(self.next_handle);
        self.roots.insert(root, container);
        Ok(root)
    }

    fn render_root(&mut self, _root: RootHandle, _description: &PageRender) {
        self.render_count += 1;
    }

    fn remove_root(&mut self, _container: ContainerHandle, root: RootHandle) {
        self.roots.remove(&root);
    }
}

/// 一次 CLI 演示的输出。
#[derive(Debug, Default)]
pub struct DemoReport {
    pub lines: Vec<String>,
    pub rerendered: Vec<u32>,
    pub mounted_pages: Vec<u32>,
}

impl DemoReport {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

/// 简易 CLI 演示：挂载所有页面，执行一组选择/查找命令，并打印每一步后的注释状态。
pub fn run_demo(loaded: LoadedSession) -> Result<DemoReport, FrontendError> {
    let LoadedSession {
        mut session,
        papers,
        source,
        demo_entities,
    } = loaded;
    let pages = session.graph().pages();
    let mut viewer = SimulatedViewer::for_pages(pages.iter().copied());
    let mut host = SimulatedHost::default();
    let mut containers = BTreeMap::new();
    let mut report = DemoReport::default();

    report.push("Scholia 注释层 CLI 演示");
    match &source {
        DocumentSource::Snapshot(path) => {
            report.push(format!("已从实体快照加载文档：{}", path.display()))
        }
        DocumentSource::Demo => report.push("已构建内置示例文档"),
    }
    report.push(format!(
        "论文 {}，共 {} 个实体，分布在 {} 页",
        session.paper_id(),
        session.graph().len(),
        pages.len()
    ));

    for &page in &pages {
        let container = host.open_page();
        session.on_page_rendered(page, container, &viewer, &mut host, &papers)?;
        containers.insert(page, container);
    }
    info!(pages = pages.len(), "页面注释已全部挂载");

    let command_bus = CommandBus::new();
    let mut commands: Vec<&str> = command_bus.available_commands().copied().collect();
    commands.sort_unstable();
    report.push(format!("支持的命令: {}", commands.join(", ")));

    if let Some(first) = pages.first() {
        describe_page(&mut session, *first, &papers, &mut report);
    }

    if let Some(ids) = demo_entities {
        let steps = [
            CommandRequest::new("select").with_arg(ids.equation.as_str()),
            CommandRequest::new("select").with_arg(ids.p.as_str()),
            CommandRequest::new("select").with_arg(ids.c1.as_str()),
            CommandRequest::new("select").with_arg(ids.term_first.as_str()),
            CommandRequest::new("next_match"),
            CommandRequest::new("jump_back"),
        ];
        for request in steps {
            let message = {
                let mut context = CommandContext {
                    session: &mut session,
                    viewer: &mut viewer,
                };
                dispatch_cli_command(&command_bus, &request, &mut context)?
            };
            report.push(format!("[命令] {} {} -> {message}", request.name, request.args.join(" ")));
            let rerendered = session.flush(&viewer, &mut host, &papers);
            report.push(format!("  重绘页面: {rerendered:?}"));
            report.rerendered.extend(rerendered);
            describe_find(&session, &mut report);
        }
        describe_page(&mut session, 0, &papers, &mut report);

        // 查看器回收了最后一页的容器，之后卸载应安全跳过。
        if let Some((&page, &container)) = containers.iter().next_back() {
            host.recycle(container);
            let outcome = session.on_page_destroyed(page, &mut host);
            report.push(format!(
                "第 {} 页容器被查看器回收，卸载结果: {}",
                page + 1,
                describe_detach(outcome)
            ));
        }
    }

    report.mounted_pages = session.mounted_pages();
    report.push(format!(
        "仍挂载的页面: {:?}，存活渲染根 {} 个，累计提交渲染 {} 次",
        report.mounted_pages,
        host.live_roots(),
        host.render_count
    ));
    for notification in session.notifications().active() {
        report.push(format!("[通知] {}", notification.message));
    }
    session.teardown(&mut host);
    Ok(report)
}

fn dispatch_cli_command(
    bus: &CommandBus,
    request: &CommandRequest,
    context: &mut CommandContext<'_>,
) -> Result<String, FrontendError> {
    let response = bus.dispatch(request, context);
    if response.success {
        Ok(response.message.unwrap_or_default())
    } else {
        Err(FrontendError::Command {
            name: request.name.clone(),
            message: response.message.unwrap_or_else(|| "未知错误".to_string()),
        })
    }
}

fn describe_page(
    session: &mut Session,
    page: u32,
    papers: &dyn PaperDirectory,
    report: &mut DemoReport,
) {
    let records = session.resolve_page(page, papers);
    report.push(format!("第 {} 页注释（{} 个）：", page + 1, records.len()));
    for record in &records {
        report.push(format!("  - {}", describe_record(record)));
    }
}

fn describe_record(record: &AnnotationRecord) -> String {
    let mut flags = Vec::new();
    if record.interactive {
        flags.push("可交互");
    }
    if record.underlined {
        flags.push("下划线");
    }
    if record.selection_hint {
        flags.push("可下钻");
    }
    if record.is_selected {
        flags.push("已选中");
    }
    if record.is_find_selection {
        flags.push("当前匹配");
    } else if record.is_find_match {
        flags.push("匹配");
    }
    if record.is_jump_target {
        flags.push("跳转目标");
    }
    if record.emphasized {
        flags.push("强调");
    }
    let kind = match record.kind {
        EntityKind::Symbol => "符号",
        EntityKind::Term => "术语",
        EntityKind::Equation => "公式",
        EntityKind::Citation => "引文",
        EntityKind::Sentence => "句子",
        EntityKind::SectionHeader => "章节标题",
        EntityKind::AnswerSentence => "答案句",
        EntityKind::Experience => "体验",
    };
    if flags.is_empty() {
        format!("{kind} {}", record.entity_id)
    } else {
        format!("{kind} {} [{}]", record.entity_id, flags.join(", "))
    }
}

fn describe_find(session: &Session, report: &mut DemoReport) {
    let find = session.selection().find();
    let selected: Vec<&str> = session
        .selection()
        .selected_entity_ids()
        .iter()
        .map(|id| id.as_str())
        .collect();
    match find.matches() {
        Some(matches) => report.push(format!(
            "  选中 {:?}，查找模式 {:?}，匹配 {} 个，游标 {:?}",
            selected,
            find.mode(),
            matches.len(),
            find.match_index()
        )),
        None => report.push(format!("  选中 {selected:?}，未在查找")),
    }
}

fn describe_detach(outcome: DetachOutcome) -> &'static str {
    match outcome {
        DetachOutcome::Detached => "已卸载",
        DetachOutcome::ContainerGone => "容器已不存在，跳过",
        DetachOutcome::NotAttached => "未挂载",
    }
}
