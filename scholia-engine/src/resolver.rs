use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use scholia_core::document::{Entity, EntityData, EntityId, EntityKind, Paper};
use scholia_core::geometry::{to_pixel_rect_scaled, PageViewport, PixelRect};
use scholia_core::graph::EntityGraph;
use tracing::{debug, trace};

use crate::collaborators::PaperDirectory;
use crate::selection::SelectionState;

/// 符号下划线策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnderlinePolicy {
    /// 给每个结构上可选的顶层符号加下划线。
    #[default]
    TopLevel,
    /// 仅给有已解析定义的可选符号加下划线。
    Defined,
}

impl UnderlinePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnderlinePolicy::TopLevel => "top-level",
            UnderlinePolicy::Defined => "defined",
        }
    }
}

impl fmt::Display for UnderlinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnderlinePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "top-level" => Ok(UnderlinePolicy::TopLevel),
            "defined" => Ok(UnderlinePolicy::Defined),
            other => Err(format!("unknown underline policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverFlags {
    pub equation_diagrams: bool,
    pub underline_policy: UnderlinePolicy,
    /// 这些 `term_type` 的术语不可交互。
    pub ignored_term_types: Vec<String>,
}

/// 选中实体时展示的补充内容。
#[derive(Debug, Clone, PartialEq)]
pub enum Gloss {
    None,
    Paper(Paper),
    Term {
        name: String,
        definitions: Vec<String>,
    },
    Symbol {
        tex: Option<String>,
        nicknames: Vec<String>,
        definitions: Vec<String>,
    },
    Equation {
        tex: Option<String>,
    },
    Section {
        name: Option<String>,
        number: Option<String>,
    },
    Answer {
        text: Option<String>,
    },
    Link {
        url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickBehavior {
    /// 点击即选中。
    Select,
    /// 按住修饰键点击时复制文本，并阻止默认的选中行为。
    CopyOnModifier { text: String },
    Inert,
}

/// 符号与当前选择之间的结构关系，按判定顺序排列。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRelation {
    ChildOfSelected,
    TopLevelInSelectedEquation,
    TopLevel,
    LeafOfSelected,
    /// 选中且仍有子节点的符号，或其祖先。
    AncestorOfSelection,
    Unreachable,
}

impl SymbolRelation {
    #[inline]
    pub fn is_interactive(self) -> bool {
        matches!(
            self,
            SymbolRelation::ChildOfSelected
                | SymbolRelation::TopLevelInSelectedEquation
                | SymbolRelation::TopLevel
                | SymbolRelation::LeafOfSelected
        )
    }

    #[inline]
    pub fn is_selection_hint(self) -> bool {
        matches!(
            self,
            SymbolRelation::ChildOfSelected | SymbolRelation::TopLevelInSelectedEquation
        )
    }
}

/// 单个实体在某页上的解析结果。
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub page: u32,
    pub interactive: bool,
    pub underlined: bool,
    pub selection_hint: bool,
    pub is_find_match: bool,
    pub is_find_selection: bool,
    pub is_selected: bool,
    pub is_jump_target: bool,
    pub emphasized: bool,
    pub gloss: Gloss,
    pub click: ClickBehavior,
    pub relation: Option<SymbolRelation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickEffect {
    CopyToClipboard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Select(EntityId),
    /// 点击已被处理，调用方不应再执行选中。
    Handled(ClickEffect),
    Ignored,
}

/// 根据解析结果决定一次点击的效果。
pub fn click_outcome(record: &AnnotationRecord, modifier_held: bool) -> ClickOutcome {
    match &record.click {
        ClickBehavior::CopyOnModifier { text } if modifier_held => {
            ClickOutcome::Handled(ClickEffect::CopyToClipboard(text.clone()))
        }
        ClickBehavior::Select if record.interactive => ClickOutcome::Select(record.entity_id.clone()),
        _ => ClickOutcome::Ignored,
    }
}

/// 引文论文元数据缓存。命中与未命中都缓存到会话结束，不会重复请求。
#[derive(Debug, Clone, Default)]
pub struct CitationGlossCache {
    entries: HashMap<String, Option<Paper>>,
}

impl CitationGlossCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, paper_id: &str) -> bool {
        self.entries.contains_key(paper_id)
    }

    pub fn get_or_fetch(&mut self, paper_id: &str, papers: &dyn PaperDirectory) -> Option<&Paper> {
        self.entries
            .entry(paper_id.to_string())
            .or_insert_with(|| {
                let paper = papers.get(paper_id);
                debug!(paper_id, found = paper.is_some(), "加载引文元数据");
                paper
            })
            .as_ref()
    }
}

/// 一次解析过程中的上下文：预先计算选择相关集合，并记忆公式的可拆解判定。
///
/// 选择状态显式传入，每次解析都读取调用时刻的状态。悬空引用一律当作不存在，
/// 解析本身不会失败。
pub struct AnnotationResolver<'a> {
    graph: &'a EntityGraph,
    selection: &'a SelectionState,
    flags: &'a ResolverFlags,
    selected: HashSet<&'a EntityId>,
    blocked: HashSet<EntityId>,
    drilled_equations: HashSet<EntityId>,
    find_matches: HashSet<&'a EntityId>,
    find_selection: Option<&'a EntityId>,
    eligible_equations: HashMap<EntityId, bool>,
}

impl<'a> AnnotationResolver<'a> {
    pub fn new(graph: &'a EntityGraph, selection: &'a SelectionState, flags: &'a ResolverFlags) -> Self {
        let selected: HashSet<&EntityId> = selection.selected_entity_ids().iter().collect();

        let mut blocked = HashSet::new();
        let mut drilled_equations = HashSet::new();
        for id in selection.selected_entity_ids() {
            let Some(entity) = graph.by_id(id) else {
                continue;
            };
            if entity.kind() == EntityKind::Symbol {
                // 下钻到叶子后祖先恢复默认可交互性，只在仍有子节点时屏蔽。
                if graph.has_children(id) {
                    blocked.insert(id.clone());
                    blocked.extend(graph.ancestors(id));
                }
                if let Some(equation) = graph.equation_of(id) {
                    drilled_equations.insert(equation.id.clone());
                }
            }
        }

        // 过期的匹配列表视同不存在。
        let current = selection.find().current_matches(graph);
        let find_matches = current.into_iter().flatten().collect();
        let find_selection = current.and_then(|_| selection.find().selected_match());

        Self {
            graph,
            selection,
            flags,
            selected,
            blocked,
            drilled_equations,
            find_matches,
            find_selection,
            eligible_equations: HashMap::new(),
        }
    }

    /// 解析该页上所有至少有一个框的实体，按实体插入顺序返回。
    pub fn resolve_page(
        &mut self,
        page: u32,
        citations: &mut CitationGlossCache,
        papers: &dyn PaperDirectory,
    ) -> Vec<AnnotationRecord> {
        let graph = self.graph;
        let records: Vec<AnnotationRecord> = graph
            .entities_on_page(page)
            .map(|entity| self.resolve_entity(entity, page, citations, papers))
            .collect();
        trace!(
            page,
            annotations = records.len(),
            interactive = records.iter().filter(|record| record.interactive).count(),
            "页面注释解析完成"
        );
        records
    }

    pub fn resolve_entity(
        &mut self,
        entity: &Entity,
        page: u32,
        citations: &mut CitationGlossCache,
        papers: &dyn PaperDirectory,
    ) -> AnnotationRecord {
        let mut record = AnnotationRecord {
            entity_id: entity.id.clone(),
            kind: entity.kind(),
            page,
            interactive: false,
            underlined: false,
            selection_hint: false,
            is_find_match: self.find_matches.contains(&entity.id),
            is_find_selection: self.find_selection == Some(&entity.id),
            is_selected: self.selected.contains(&entity.id),
            is_jump_target: self.selection.jump_target() == Some(&entity.id),
            emphasized: false,
            gloss: Gloss::None,
            click: ClickBehavior::Inert,
            relation: None,
        };

        match &entity.data {
            EntityData::Term(term) => {
                record.interactive = !term
                    .term_type
                    .as_ref()
                    .is_some_and(|term_type| self.flags.ignored_term_types.contains(term_type));
                record.underlined = self.term_is_underlined(entity);
                record.gloss = Gloss::Term {
                    name: term.name.clone(),
                    definitions: term.definitions.clone(),
                };
            }
            EntityData::Citation(citation) => {
                let paper = citation
                    .paper_id
                    .as_deref()
                    .and_then(|paper_id| citations.get_or_fetch(paper_id, papers));
                if let Some(paper) = paper {
                    record.interactive = true;
                    record.gloss = Gloss::Paper(paper.clone());
                }
            }
            EntityData::Equation(equation) => {
                record.interactive = self.is_diagram_eligible(entity)
                    && !self.drilled_equations.contains(&entity.id);
                record.gloss = Gloss::Equation {
                    tex: equation.tex.clone(),
                };
            }
            EntityData::Symbol(symbol) => {
                let relation = self.symbol_relation(entity);
                record.relation = Some(relation);
                record.interactive = relation.is_interactive();
                record.selection_hint = relation.is_selection_hint();
                record.underlined = record.interactive
                    && match self.flags.underline_policy {
                        UnderlinePolicy::TopLevel => self.graph.is_top_level(&entity.id),
                        UnderlinePolicy::Defined => {
                            !symbol.definitions.is_empty()
                                || self.any_resolves(&entity.relationships.definition_sentences)
                        }
                    };
                record.gloss = Gloss::Symbol {
                    tex: symbol.tex.clone(),
                    nicknames: symbol.nicknames.clone(),
                    definitions: symbol.definitions.clone(),
                };
            }
            EntityData::Sentence(sentence) => {
                let text = sentence
                    .text
                    .clone()
                    .or_else(|| sentence.tex.clone())
                    .unwrap_or_default();
                record.click = ClickBehavior::CopyOnModifier { text };
            }
            EntityData::SectionHeader(header) => {
                record.interactive = true;
                record.gloss = Gloss::Section {
                    name: header.section_name.clone(),
                    number: header.section_number.clone(),
                };
            }
            EntityData::AnswerSentence(answer) => {
                record.interactive = true;
                record.emphasized = answer.question_id.is_some()
                    && answer.question_id.as_deref() == self.selection.active_question_id();
                record.gloss = Gloss::Answer {
                    text: answer.text.clone(),
                };
            }
            EntityData::Experience(experience) => {
                record.interactive = true;
                record.gloss = Gloss::Link {
                    url: experience.url.clone(),
                };
            }
        }

        if record.interactive && record.click == ClickBehavior::Inert {
            record.click = ClickBehavior::Select;
        }
        record
    }

    /// 公式可拆解：开启公式图模式、非行内、且含多于一个顶层符号。
    pub fn is_diagram_eligible(&mut self, equation: &Entity) -> bool {
        if !self.flags.equation_diagrams {
            return false;
        }
        if let Some(eligible) = self.eligible_equations.get(&equation.id) {
            return *eligible;
        }
        let eligible = equation.as_equation().is_some_and(|attributes| !attributes.is_inline)
            && self.graph.top_level_symbols_in_equation(&equation.id) > 1;
        self.eligible_equations.insert(equation.id.clone(), eligible);
        eligible
    }

    pub fn symbol_relation(&mut self, symbol: &Entity) -> SymbolRelation {
        let graph = self.graph;
        let id = &symbol.id;
        if self.blocked.contains(id) {
            return SymbolRelation::AncestorOfSelection;
        }
        if let Some(parent) = graph.parent_of(id) {
            if self.selected.contains(&parent.id) {
                return SymbolRelation::ChildOfSelected;
            }
        } else {
            let eligible_equation = graph
                .equation_of(id)
                .filter(|equation| self.is_diagram_eligible(equation));
            match eligible_equation {
                Some(equation) if self.selected.contains(&equation.id) => {
                    return SymbolRelation::TopLevelInSelectedEquation;
                }
                Some(_) => {}
                None => return SymbolRelation::TopLevel,
            }
        }
        if !graph.has_children(id)
            && graph
                .ancestors(id)
                .iter()
                .any(|ancestor| self.selected.contains(ancestor))
        {
            return SymbolRelation::LeafOfSelected;
        }
        SymbolRelation::Unreachable
    }

    fn term_is_underlined(&self, term: &Entity) -> bool {
        let relationships = &term.relationships;
        let has_definition = term
            .as_term()
            .is_some_and(|attributes| !attributes.definitions.is_empty())
            || self.any_resolves(&relationships.definition_sentences);
        let inside_definition = relationships
            .sentence
            .as_ref()
            .is_some_and(|sentence| relationships.definition_sentences.contains(sentence));
        has_definition && !inside_definition
    }

    fn any_resolves(&self, ids: &[EntityId]) -> bool {
        ids.iter().any(|id| self.graph.contains(id))
    }
}

/// 便捷入口：为单页构造解析器并解析。
pub fn resolve_page(
    page: u32,
    graph: &EntityGraph,
    selection: &SelectionState,
    flags: &ResolverFlags,
    citations: &mut CitationGlossCache,
    papers: &dyn PaperDirectory,
) -> Vec<AnnotationRecord> {
    AnnotationResolver::new(graph, selection, flags).resolve_page(page, citations, papers)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedAnnotation {
    pub record: AnnotationRecord,
    pub rects: Vec<PixelRect>,
}

/// 挂载到页面容器上的完整渲染描述。
#[derive(Debug, Clone, PartialEq)]
pub struct PageRender {
    pub page: u32,
    pub viewport: PageViewport,
    pub annotations: Vec<ProjectedAnnotation>,
}

impl PageRender {
    pub fn annotation(&self, id: &EntityId) -> Option<&ProjectedAnnotation> {
        self.annotations
            .iter()
            .find(|annotation| annotation.record.entity_id == *id)
    }

    /// 包含该像素点的注释，面积小的（视觉上在上层的）在前。
    pub fn hit_test(&self, x: f64, y: f64) -> Vec<&ProjectedAnnotation> {
        let mut hits: Vec<(f64, &ProjectedAnnotation)> = self
            .annotations
            .iter()
            .filter_map(|annotation| {
                annotation
                    .rects
                    .iter()
                    .filter(|rect| rect.contains(x, y))
                    .map(|rect| rect.width * rect.height)
                    .min_by(f64::total_cmp)
                    .map(|area| (area, annotation))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, annotation)| annotation).collect()
    }
}

/// 把解析结果中的归一化框投影为像素矩形。
pub fn project_page(
    page: u32,
    viewport: PageViewport,
    records: Vec<AnnotationRecord>,
    graph: &EntityGraph,
    scale_correction: f64,
) -> PageRender {
    let annotations = records
        .into_iter()
        .map(|record| {
            let rects = graph
                .by_id(&record.entity_id)
                .map(|entity| {
                    entity
                        .boxes_on_page(page)
                        .map(|bbox| to_pixel_rect_scaled(&viewport, bbox, scale_correction))
                        .collect()
                })
                .unwrap_or_default();
            ProjectedAnnotation { record, rects }
        })
        .collect();
    PageRender {
        page,
        viewport,
        annotations,
    }
}
