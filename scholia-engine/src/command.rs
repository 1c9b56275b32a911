use std::collections::HashMap;

use scholia_core::document::EntityId;

use crate::collaborators::{ViewerLocation, ViewerSurface};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub session: &'a mut Session,
    pub viewer: &'a mut dyn ViewerSurface,
}

/// 键盘快捷键等入口共用的命令分发。
pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(SelectCommand);
        bus.register(ClearSelectionCommand);
        bus.register(CloseFindCommand);
        bus.register(StepMatchCommand::NEXT);
        bus.register(StepMatchCommand::PREVIOUS);
        bus.register(JumpCommand);
        bus.register(JumpBackCommand);
        bus.register(ToggleMultiselectCommand);
        bus.register(TextSearchCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

fn entity_arg(request: &CommandRequest) -> Result<EntityId, CommandResponse> {
    request
        .args
        .first()
        .map(|raw| EntityId::from(raw.as_str()))
        .ok_or_else(|| CommandResponse::err(format!("{} 需要实体 id 参数", request.name)))
}

fn describe_location(location: Option<ViewerLocation>) -> CommandResponse {
    match location {
        Some(location) => CommandResponse::ok(format!("已跳转到第 {} 页", location.page + 1)),
        None => CommandResponse::ok("没有可跳转的匹配"),
    }
}

struct SelectCommand;

impl CommandHandler for SelectCommand {
    fn name(&self) -> &'static str {
        "select"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let id = match entity_arg(request) {
            Ok(id) => id,
            Err(response) => return response,
        };
        match context.session.select_entity(id) {
            Ok(phase) => CommandResponse::ok(format!("已选中，当前状态: {phase:?}")),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct ClearSelectionCommand;

impl CommandHandler for ClearSelectionCommand {
    fn name(&self) -> &'static str {
        "clear_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if context.session.clear_selection() {
            CommandResponse::ok("选中集已清空")
        } else {
            CommandResponse::err("交互已被禁用")
        }
    }
}

struct CloseFindCommand;

impl CommandHandler for CloseFindCommand {
    fn name(&self) -> &'static str {
        "close_find"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        context.session.close_find();
        CommandResponse::ok("已退出查找")
    }
}

struct StepMatchCommand {
    name: &'static str,
    step: isize,
}

impl StepMatchCommand {
    const NEXT: Self = Self {
        name: "next_match",
        step: 1,
    };
    const PREVIOUS: Self = Self {
        name: "previous_match",
        step: -1,
    };
}

impl CommandHandler for StepMatchCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let result = if self.step > 0 {
            context.session.next_match(&mut *context.viewer)
        } else {
            context.session.previous_match(&mut *context.viewer)
        };
        match result {
            Ok(location) => describe_location(location),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct JumpCommand;

impl CommandHandler for JumpCommand {
    fn name(&self) -> &'static str {
        "jump"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let id = match entity_arg(request) {
            Ok(id) => id,
            Err(response) => return response,
        };
        match context.session.jump_to_entity(&id, &mut *context.viewer) {
            Ok(location) => describe_location(Some(location)),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct JumpBackCommand;

impl CommandHandler for JumpBackCommand {
    fn name(&self) -> &'static str {
        "jump_back"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        match context.session.jump_back(&mut *context.viewer) {
            Some(location) => describe_location(Some(location)),
            None => CommandResponse::err("跳转历史为空"),
        }
    }
}

struct ToggleMultiselectCommand;

impl CommandHandler for ToggleMultiselectCommand {
    fn name(&self) -> &'static str {
        "toggle_multiselect"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if context.session.toggle_multiselect() {
            CommandResponse::ok("多选已开启")
        } else {
            CommandResponse::ok("多选已关闭")
        }
    }
}

struct TextSearchCommand;

impl CommandHandler for TextSearchCommand {
    fn name(&self) -> &'static str {
        "search"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if request.args.is_empty() {
            return CommandResponse::err("search 需要查询文本");
        }
        let query = request.args.join(" ");
        context.session.open_text_search(query.clone());
        CommandResponse::ok(format!("查看器内搜索: {query}"))
    }
}
