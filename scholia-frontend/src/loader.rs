use std::env;
use std::path::PathBuf;
use std::time::Duration;

use scholia_config::{AppConfig, UnderlineMode};
use scholia_core::graph::EntityGraph;
use scholia_engine::collaborators::PaperCatalog;
use scholia_engine::navigation::NavigationSettings;
use scholia_engine::resolver::{ResolverFlags, UnderlinePolicy};
use scholia_engine::session::{demo_papers, DemoEntities, Session, SessionSettings};
use scholia_io::{DocumentLoader, JsonSnapshot};
use tracing::{info, warn};

use crate::errors::FrontendError;

/// 指定启动文档的环境变量，优先级高于配置文件。
pub const DOCUMENT_ENV: &str = "SCHOLIA_DOCUMENT";

/// 文档来源，便于前端呈现加载信息。
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Snapshot(PathBuf),
    Demo,
}

/// 统一封装加载后的会话与元信息。
#[derive(Debug)]
pub struct LoadedSession {
    pub session: Session,
    pub papers: PaperCatalog,
    pub source: DocumentSource,
    pub demo_entities: Option<DemoEntities>,
}

/// 把配置映射为会话设置。
pub fn session_settings(config: &AppConfig) -> SessionSettings {
    let overlay = &config.overlay;
    let underline_policy = match overlay.underline_policy {
        UnderlineMode::TopLevel => UnderlinePolicy::TopLevel,
        UnderlineMode::Defined => UnderlinePolicy::Defined,
    };
    SessionSettings {
        flags: ResolverFlags {
            equation_diagrams: overlay.equation_diagrams,
            underline_policy,
            ignored_term_types: overlay.ignored_term_types.clone(),
        },
        navigation: NavigationSettings {
            margin_x: config.navigation.margin_x,
            margin_y: config.navigation.margin_y,
            history_size: config.navigation.history_size,
        },
        max_symbol_match_rank: overlay.max_symbol_match_rank,
        notification_duration: Duration::from_millis(config.notifications.duration_ms),
        ..SessionSettings::default()
    }
}

/// 依次尝试显式路径、环境变量 `SCHOLIA_DOCUMENT`、配置中的 `frontend.document`；
/// 加载失败时回退到内置示例。
pub fn load_session(config: &AppConfig, document: Option<PathBuf>) -> LoadedSession {
    let settings = session_settings(config);
    let path = document
        .or_else(|| env::var_os(DOCUMENT_ENV).map(PathBuf::from))
        .or_else(|| config.frontend.document.clone());

    if let Some(path) = path {
        match load_snapshot(path.clone(), settings.clone()) {
            Ok(loaded) => return loaded,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "加载实体快照失败，回退到内置示例");
            }
        }
    }

    demo_session(settings)
}

/// 严格加载实体快照，失败时返回错误而不回退。
pub fn load_snapshot(path: PathBuf, settings: SessionSettings) -> Result<LoadedSession, FrontendError> {
    let loaded = JsonSnapshot::new().load(&path)?;
    info!(
        path = %path.display(),
        paper = %loaded.paper_id,
        entities = loaded.graph.len(),
        "从实体快照加载文档成功"
    );
    let mut papers = PaperCatalog::new();
    for paper in loaded.papers {
        papers.insert(paper);
    }
    Ok(LoadedSession {
        session: Session::new(loaded.paper_id, loaded.graph, settings),
        papers,
        source: DocumentSource::Snapshot(path),
        demo_entities: None,
    })
}

pub fn demo_session(settings: SessionSettings) -> LoadedSession {
    let mut session = Session::new("demo", EntityGraph::new(), settings);
    let demo_entities = match session.populate_demo() {
        Ok(ids) => Some(ids),
        Err(err) => {
            warn!(error = %err, "构建内置示例失败");
            None
        }
    };
    LoadedSession {
        session,
        papers: demo_papers(),
        source: DocumentSource::Demo,
        demo_entities,
    }
}
