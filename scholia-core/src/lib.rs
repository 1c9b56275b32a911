pub mod geometry {
    use std::cmp::Ordering;

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    const RATIO_EPSILON: f64 = 1e-9;

    /// 归一化矩形框，四个量都是相对页面宽高的比例 (0..1)。
    ///
    /// `top` 以页面顶部为 0，整个坐标层都不做纵向翻转；若某个渲染器需要
    /// 以底部为原点，应在其边界处自行转换。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct BoundingBox {
        pub page: u32,
        pub left: f64,
        pub top: f64,
        pub width: f64,
        pub height: f64,
    }

    impl BoundingBox {
        #[inline]
        pub fn new(page: u32, left: f64, top: f64, width: f64, height: f64) -> Self {
            Self {
                page,
                left,
                top,
                width,
                height,
            }
        }

        #[inline]
        pub fn right(&self) -> f64 {
            self.left + self.width
        }

        #[inline]
        pub fn bottom(&self) -> f64 {
            self.top + self.height
        }

        #[inline]
        pub fn area(&self) -> f64 {
            self.width * self.height
        }

        #[inline]
        fn origin(&self) -> DVec2 {
            DVec2::new(self.left, self.top)
        }

        #[inline]
        fn extent(&self) -> DVec2 {
            DVec2::new(self.width, self.height)
        }

        /// 所有比例都落在 [0, 1] 内且框不越出页面。
        pub fn is_normalized(&self) -> bool {
            let in_unit = |value: f64| (0.0..=1.0).contains(&value);
            in_unit(self.left)
                && in_unit(self.top)
                && in_unit(self.width)
                && in_unit(self.height)
                && self.right() <= 1.0 + RATIO_EPSILON
                && self.bottom() <= 1.0 + RATIO_EPSILON
        }

        /// 同页且纵向范围相交，即视为“同一行”。
        pub fn overlaps_vertically(&self, other: &BoundingBox) -> bool {
            self.page == other.page && self.top < other.bottom() && other.top < self.bottom()
        }

        /// 判定归一化坐标点是否落在框内（含边界）。
        pub fn contains(&self, x: f64, y: f64) -> bool {
            x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
        }
    }

    /// 查看器为单页提供的像素视口。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct PageViewport {
        pub width: f64,
        pub height: f64,
        pub scale: f64,
    }

    impl PageViewport {
        #[inline]
        pub fn new(width: f64, height: f64, scale: f64) -> Self {
            Self {
                width,
                height,
                scale,
            }
        }

        #[inline]
        fn size(&self) -> DVec2 {
            DVec2::new(self.width, self.height)
        }

        pub fn is_valid(&self) -> bool {
            self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
        }
    }

    /// 页面内的像素矩形，原点为页面左上角。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct PixelRect {
        pub left: f64,
        pub top: f64,
        pub width: f64,
        pub height: f64,
    }

    impl PixelRect {
        #[inline]
        pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
            Self {
                left,
                top,
                width,
                height,
            }
        }

        #[inline]
        pub fn right(&self) -> f64 {
            self.left + self.width
        }

        #[inline]
        pub fn bottom(&self) -> f64 {
            self.top + self.height
        }

        pub fn contains(&self, x: f64, y: f64) -> bool {
            x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
        }
    }

    /// 将归一化框投影为页面像素矩形。
    #[inline]
    pub fn to_pixel_rect(viewport: &PageViewport, bbox: &BoundingBox) -> PixelRect {
        to_pixel_rect_scaled(viewport, bbox, 1.0)
    }

    /// 带缩放修正的投影：部分渲染器的实际画布尺寸与视口不一致。
    pub fn to_pixel_rect_scaled(
        viewport: &PageViewport,
        bbox: &BoundingBox,
        scale_correction: f64,
    ) -> PixelRect {
        let size = viewport.size() * scale_correction;
        let origin = bbox.origin() * size;
        let extent = bbox.extent() * size;
        PixelRect::new(origin.x, origin.y, extent.x, extent.y)
    }

    /// `to_pixel_rect` 的逆运算，用于把用户拖出的矩形转成可提交的归一化框。
    /// 视口宽高必须为正。
    pub fn to_normalized_box(viewport: &PageViewport, page: u32, rect: &PixelRect) -> BoundingBox {
        let size = viewport.size();
        let origin = DVec2::new(rect.left, rect.top) / size;
        let extent = DVec2::new(rect.width, rect.height) / size;
        BoundingBox::new(page, origin.x, origin.y, extent.x, extent.y)
    }

    /// 页码、上边、左边依次比较的全序。
    pub fn compare_position(a: &BoundingBox, b: &BoundingBox) -> Ordering {
        a.page
            .cmp(&b.page)
            .then_with(|| a.top.total_cmp(&b.top))
            .then_with(|| a.left.total_cmp(&b.left))
    }

    /// 按阅读顺序原地排序。
    ///
    /// 先按页码与上边排序，再把与行首框纵向重叠的相邻框归入同一行，行内
    /// 从左到右排列。双栏排版中高度略有错位的左右两栏因此不会颠倒。
    pub fn sort_by_reading_order<T>(items: &mut [T], bbox: impl Fn(&T) -> BoundingBox) {
        items.sort_by(|a, b| compare_position(&bbox(a), &bbox(b)));

        let mut line_start = 0;
        while line_start < items.len() {
            let anchor = bbox(&items[line_start]);
            let mut line_end = line_start + 1;
            while line_end < items.len() && anchor.overlaps_vertically(&bbox(&items[line_end])) {
                line_end += 1;
            }
            items[line_start..line_end].sort_by(|a, b| bbox(a).left.total_cmp(&bbox(b).left));
            line_start = line_end;
        }
    }

}

pub mod document {
    use std::fmt;

    use serde::{Deserialize, Serialize};

    use crate::geometry::BoundingBox;

    /// 实体的全局唯一标识，由持久化协作方分配，对本层不透明。
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EntityId(String);

    impl EntityId {
        #[inline]
        pub fn new(raw: impl Into<String>) -> Self {
            Self(raw.into())
        }

        #[inline]
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for EntityId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<&str> for EntityId {
        fn from(value: &str) -> Self {
            Self::new(value)
        }
    }

    impl From<String> for EntityId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum EntityKind {
        Citation,
        Term,
        Symbol,
        Sentence,
        Equation,
        SectionHeader,
        AnswerSentence,
        Experience,
    }

    impl EntityKind {
        pub fn as_str(self) -> &'static str {
            match self {
                EntityKind::Citation => "citation",
                EntityKind::Term => "term",
                EntityKind::Symbol => "symbol",
                EntityKind::Sentence => "sentence",
                EntityKind::Equation => "equation",
                EntityKind::SectionHeader => "section-header",
                EntityKind::AnswerSentence => "answer-sentence",
                EntityKind::Experience => "experience",
            }
        }
    }

    impl fmt::Display for EntityKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CitationAttributes {
        pub paper_id: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct TermAttributes {
        pub name: String,
        pub term_type: Option<String>,
        pub definitions: Vec<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct SymbolAttributes {
        pub tex: Option<String>,
        pub mathml: Option<String>,
        pub nicknames: Vec<String>,
        pub definitions: Vec<String>,
        pub defining_formulas: Vec<String>,
        pub diagram_label: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct SentenceAttributes {
        pub text: Option<String>,
        pub tex: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct EquationAttributes {
        pub tex: Option<String>,
        /// 行内公式（`$...$`）不会作为可拆解的公式图出现。
        pub is_inline: bool,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct SectionHeaderAttributes {
        pub section_name: Option<String>,
        pub section_number: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AnswerSentenceAttributes {
        pub text: Option<String>,
        pub question_id: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ExperienceAttributes {
        pub url: Option<String>,
    }

    /// 按实体类型区分的属性负载；类型标签与属性绑定，不会出现错配。
    ///
    /// 读取时 `attributes` 可以缺省或为 `null`，此时各字段取默认值。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(
        tag = "type",
        content = "attributes",
        rename_all = "kebab-case",
        from = "TaggedAttributes"
    )]
    pub enum EntityData {
        Citation(CitationAttributes),
        Term(TermAttributes),
        Symbol(SymbolAttributes),
        Sentence(SentenceAttributes),
        Equation(EquationAttributes),
        SectionHeader(SectionHeaderAttributes),
        AnswerSentence(AnswerSentenceAttributes),
        Experience(ExperienceAttributes),
    }

    impl EntityData {
        #[inline]
        pub fn kind(&self) -> EntityKind {
            match self {
                EntityData::Citation(_) => EntityKind::Citation,
                EntityData::Term(_) => EntityKind::Term,
                EntityData::Symbol(_) => EntityKind::Symbol,
                EntityData::Sentence(_) => EntityKind::Sentence,
                EntityData::Equation(_) => EntityKind::Equation,
                EntityData::SectionHeader(_) => EntityKind::SectionHeader,
                EntityData::AnswerSentence(_) => EntityKind::AnswerSentence,
                EntityData::Experience(_) => EntityKind::Experience,
            }
        }
    }

    #[derive(Deserialize)]
    struct TaggedAttributes {
        #[serde(rename = "type")]
        kind: EntityKind,
        #[serde(default)]
        attributes: Option<AttributeFields>,
    }

    /// 所有类型属性字段的并集，按类型标签再拆回具体结构。
    #[derive(Default, Deserialize)]
    #[serde(default)]
    struct AttributeFields {
        paper_id: Option<String>,
        name: String,
        term_type: Option<String>,
        definitions: Vec<String>,
        tex: Option<String>,
        mathml: Option<String>,
        nicknames: Vec<String>,
        defining_formulas: Vec<String>,
        diagram_label: Option<String>,
        text: Option<String>,
        is_inline: bool,
        section_name: Option<String>,
        section_number: Option<String>,
        question_id: Option<String>,
        url: Option<String>,
    }

    impl From<TaggedAttributes> for EntityData {
        fn from(tagged: TaggedAttributes) -> Self {
            let fields = tagged.attributes.unwrap_or_default();
            match tagged.kind {
                EntityKind::Citation => EntityData::Citation(CitationAttributes {
                    paper_id: fields.paper_id,
                }),
                EntityKind::Term => EntityData::Term(TermAttributes {
                    name: fields.name,
                    term_type: fields.term_type,
                    definitions: fields.definitions,
                }),
                EntityKind::Symbol => EntityData::Symbol(SymbolAttributes {
                    tex: fields.tex,
                    mathml: fields.mathml,
                    nicknames: fields.nicknames,
                    definitions: fields.definitions,
                    defining_formulas: fields.defining_formulas,
                    diagram_label: fields.diagram_label,
                }),
                EntityKind::Sentence => EntityData::Sentence(SentenceAttributes {
                    text: fields.text,
                    tex: fields.tex,
                }),
                EntityKind::Equation => EntityData::Equation(EquationAttributes {
                    tex: fields.tex,
                    is_inline: fields.is_inline,
                }),
                EntityKind::SectionHeader => EntityData::SectionHeader(SectionHeaderAttributes {
                    section_name: fields.section_name,
                    section_number: fields.section_number,
                }),
                EntityKind::AnswerSentence => {
                    EntityData::AnswerSentence(AnswerSentenceAttributes {
                        text: fields.text,
                        question_id: fields.question_id,
                    })
                }
                EntityKind::Experience => {
                    EntityData::Experience(ExperienceAttributes { url: fields.url })
                }
            }
        }
    }

    /// 实体之间的类型化引用。单值引用为空表示“无”，悬空引用由使用方当作空处理。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Relationships {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub parent: Option<EntityId>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub children: Vec<EntityId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub equation: Option<EntityId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub sentence: Option<EntityId>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub definition_sentences: Vec<EntityId>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub nickname_sentences: Vec<EntityId>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub defining_formula_equations: Vec<EntityId>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Entity {
        pub id: EntityId,
        #[serde(flatten)]
        pub data: EntityData,
        #[serde(default)]
        pub bounding_boxes: Vec<BoundingBox>,
        #[serde(default)]
        pub relationships: Relationships,
    }

    impl Entity {
        pub fn new(id: impl Into<EntityId>, data: EntityData) -> Self {
            Self {
                id: id.into(),
                data,
                bounding_boxes: Vec::new(),
                relationships: Relationships::default(),
            }
        }

        pub fn with_box(mut self, bbox: BoundingBox) -> Self {
            self.bounding_boxes.push(bbox);
            self
        }

        pub fn with_relationships(mut self, relationships: Relationships) -> Self {
            self.relationships = relationships;
            self
        }

        #[inline]
        pub fn kind(&self) -> EntityKind {
            self.data.kind()
        }

        /// 仅返回位于指定页的框。
        pub fn boxes_on_page(&self, page: u32) -> impl Iterator<Item = &BoundingBox> + '_ {
            self.bounding_boxes.iter().filter(move |bbox| bbox.page == page)
        }

        #[inline]
        pub fn first_box(&self) -> Option<&BoundingBox> {
            self.bounding_boxes.first()
        }

        /// 去重后的页码列表，保持首次出现的顺序。
        pub fn pages(&self) -> Vec<u32> {
            let mut pages = Vec::new();
            for bbox in &self.bounding_boxes {
                if !pages.contains(&bbox.page) {
                    pages.push(bbox.page);
                }
            }
            pages
        }

        pub fn as_symbol(&self) -> Option<&SymbolAttributes> {
            match &self.data {
                EntityData::Symbol(symbol) => Some(symbol),
                _ => None,
            }
        }

        pub fn as_term(&self) -> Option<&TermAttributes> {
            match &self.data {
                EntityData::Term(term) => Some(term),
                _ => None,
            }
        }

        pub fn as_equation(&self) -> Option<&EquationAttributes> {
            match &self.data {
                EntityData::Equation(equation) => Some(equation),
                _ => None,
            }
        }
    }

    /// 创建实体时提交给持久化协作方的草稿，`id` 由协作方分配。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct EntityDraft {
        #[serde(flatten)]
        pub data: EntityData,
        #[serde(default)]
        pub bounding_boxes: Vec<BoundingBox>,
        #[serde(default)]
        pub relationships: Relationships,
    }

    impl EntityDraft {
        pub fn new(data: EntityData) -> Self {
            Self {
                data,
                bounding_boxes: Vec::new(),
                relationships: Relationships::default(),
            }
        }

        pub fn into_entity(self, id: impl Into<EntityId>) -> Entity {
            Entity {
                id: id.into(),
                data: self.data,
                bounding_boxes: self.bounding_boxes,
                relationships: self.relationships,
            }
        }
    }

    /// 引文浮层使用的论文元数据。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Paper {
        pub id: String,
        pub title: String,
        pub authors: Vec<String>,
        pub year: Option<u32>,
        pub venue: Option<String>,
        pub abstract_text: Option<String>,
        pub url: Option<String>,
    }

    /// 属性的浅合并补丁：`Some` 覆盖对应字段，`None` 保留原值。
    /// 与实体类型不符的字段会被忽略。
    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct AttributesPatch {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub paper_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub term_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tex: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub mathml: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub nicknames: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub definitions: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub defining_formulas: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub diagram_label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub is_inline: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub section_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub section_number: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub question_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub url: Option<String>,
    }

    fn merge<T: Clone>(slot: &mut T, value: &Option<T>) {
        if let Some(value) = value {
            *slot = value.clone();
        }
    }

    fn merge_some<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if let Some(value) = value {
            *slot = Some(value.clone());
        }
    }

    impl AttributesPatch {
        pub fn is_empty(&self) -> bool {
            *self == Self::default()
        }

        pub fn apply_to(&self, data: &mut EntityData) {
            match data {
                EntityData::Citation(citation) => merge_some(&mut citation.paper_id, &self.paper_id),
                EntityData::Term(term) => {
                    merge(&mut term.name, &self.name);
                    merge_some(&mut term.term_type, &self.term_type);
                    merge(&mut term.definitions, &self.definitions);
                }
                EntityData::Symbol(symbol) => {
                    merge_some(&mut symbol.tex, &self.tex);
                    merge_some(&mut symbol.mathml, &self.mathml);
                    merge(&mut symbol.nicknames, &self.nicknames);
                    merge(&mut symbol.definitions, &self.definitions);
                    merge(&mut symbol.defining_formulas, &self.defining_formulas);
                    merge_some(&mut symbol.diagram_label, &self.diagram_label);
                }
                EntityData::Sentence(sentence) => {
                    merge_some(&mut sentence.text, &self.text);
                    merge_some(&mut sentence.tex, &self.tex);
                }
                EntityData::Equation(equation) => {
                    merge_some(&mut equation.tex, &self.tex);
                    merge(&mut equation.is_inline, &self.is_inline);
                }
                EntityData::SectionHeader(header) => {
                    merge_some(&mut header.section_name, &self.section_name);
                    merge_some(&mut header.section_number, &self.section_number);
                }
                EntityData::AnswerSentence(answer) => {
                    merge_some(&mut answer.text, &self.text);
                    merge_some(&mut answer.question_id, &self.question_id);
                }
                EntityData::Experience(experience) => merge_some(&mut experience.url, &self.url),
            }
        }
    }

    /// 关系的浅合并补丁。单值引用使用 `Option<Option<_>>`，外层 `None` 表示不修改，
    /// `Some(None)` 表示清空。
    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct RelationshipsPatch {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub parent: Option<Option<EntityId>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub children: Option<Vec<EntityId>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub equation: Option<Option<EntityId>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub sentence: Option<Option<EntityId>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub definition_sentences: Option<Vec<EntityId>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub nickname_sentences: Option<Vec<EntityId>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub defining_formula_equations: Option<Vec<EntityId>>,
    }

    impl RelationshipsPatch {
        pub fn is_empty(&self) -> bool {
            *self == Self::default()
        }

        pub fn apply_to(&self, relationships: &mut Relationships) {
            merge(&mut relationships.parent, &self.parent);
            merge(&mut relationships.children, &self.children);
            merge(&mut relationships.equation, &self.equation);
            merge(&mut relationships.sentence, &self.sentence);
            merge(&mut relationships.definition_sentences, &self.definition_sentences);
            merge(&mut relationships.nickname_sentences, &self.nickname_sentences);
            merge(
                &mut relationships.defining_formula_equations,
                &self.defining_formula_equations,
            );
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct EntityPatch {
        pub attributes: AttributesPatch,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub bounding_boxes: Option<Vec<BoundingBox>>,
        pub relationships: RelationshipsPatch,
    }

    impl EntityPatch {
        pub fn attributes(attributes: AttributesPatch) -> Self {
            Self {
                attributes,
                ..Self::default()
            }
        }

        pub fn relationships(relationships: RelationshipsPatch) -> Self {
            Self {
                relationships,
                ..Self::default()
            }
        }

        pub fn is_empty(&self) -> bool {
            self.attributes.is_empty()
                && self.bounding_boxes.is_none()
                && self.relationships.is_empty()
        }

        pub fn apply_to(&self, entity: &mut Entity) {
            self.attributes.apply_to(&mut entity.data);
            merge(&mut entity.bounding_boxes, &self.bounding_boxes);
            self.relationships.apply_to(&mut entity.relationships);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn entity_json_uses_type_tag_and_flat_attributes() {
            let json = r#"{
                "id": "sym-1",
                "type": "symbol",
                "attributes": { "tex": "x_i", "nicknames": ["input"] },
                "bounding_boxes": [
                    { "page": 2, "left": 0.1, "top": 0.2, "width": 0.05, "height": 0.01 }
                ],
                "relationships": { "parent": "sym-0", "equation": "eq-1" }
            }"#;
            let entity: Entity = serde_json::from_str(json).expect("解析实体 JSON 失败");
            assert_eq!(entity.id.as_str(), "sym-1");
            assert_eq!(entity.kind(), EntityKind::Symbol);
            let symbol = entity.as_symbol().expect("应为符号实体");
            assert_eq!(symbol.tex.as_deref(), Some("x_i"));
            assert_eq!(symbol.nicknames, vec!["input".to_string()]);
            assert!(symbol.definitions.is_empty());
            assert_eq!(entity.relationships.parent, Some(EntityId::from("sym-0")));
            assert_eq!(entity.pages(), vec![2]);
        }

        #[test]
        fn entity_without_attributes_uses_defaults() {
            let sentence: Entity = serde_json::from_str(r#"{ "id": "s", "type": "sentence" }"#)
                .expect("缺省 attributes 的实体应可解析");
            assert_eq!(sentence.kind(), EntityKind::Sentence);
            assert_eq!(
                sentence.data,
                EntityData::Sentence(SentenceAttributes::default())
            );
            assert!(sentence.bounding_boxes.is_empty());

            let equation: Entity = serde_json::from_str(
                r#"{ "id": "e", "type": "equation", "attributes": null }"#,
            )
            .expect("attributes 为 null 的实体应可解析");
            assert_eq!(equation.as_equation().map(|eq| eq.is_inline), Some(false));
        }

        #[test]
        fn attributes_of_other_kinds_are_ignored() {
            let json = r#"{
                "id": "t",
                "type": "term",
                "attributes": { "name": "loss", "url": "https://example.org", "is_inline": true }
            }"#;
            let term: Entity = serde_json::from_str(json).expect("解析术语失败");
            assert_eq!(
                term.data,
                EntityData::Term(TermAttributes {
                    name: "loss".to_string(),
                    ..TermAttributes::default()
                })
            );

            let encoded = serde_json::to_value(&term).expect("序列化失败");
            assert_eq!(encoded["type"], "term");
            assert_eq!(encoded["attributes"]["name"], "loss");
        }

        #[test]
        fn attribute_patch_is_shallow_and_kind_aware() {
            let mut term = Entity::new(
                "term-1",
                EntityData::Term(TermAttributes {
                    name: "accuracy".to_string(),
                    term_type: None,
                    definitions: vec!["old".to_string()],
                }),
            );
            let patch = EntityPatch::attributes(AttributesPatch {
                definitions: Some(vec!["new".to_string()]),
                tex: Some("ignored for terms".to_string()),
                ..AttributesPatch::default()
            });
            patch.apply_to(&mut term);
            let attributes = term.as_term().expect("应为术语实体");
            assert_eq!(attributes.name, "accuracy");
            assert_eq!(attributes.definitions, vec!["new".to_string()]);
        }

        #[test]
        fn relationship_patch_can_clear_single_reference() {
            let mut relationships = Relationships {
                parent: Some(EntityId::from("p")),
                children: vec![EntityId::from("c")],
                ..Relationships::default()
            };
            let patch = RelationshipsPatch {
                parent: Some(None),
                ..RelationshipsPatch::default()
            };
            patch.apply_to(&mut relationships);
            assert!(relationships.parent.is_none());
            assert_eq!(relationships.children, vec![EntityId::from("c")]);
        }
    }
}

pub mod graph {
    use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

    use thiserror::Error;

    use crate::document::{Entity, EntityId, EntityKind, EntityPatch};

    #[derive(Debug, Error, PartialEq)]
    pub enum GraphError {
        #[error("entity {0} already exists")]
        DuplicateEntity(EntityId),
    }

    /// 父子森林中检测到的不一致。
    #[derive(Debug, Clone, PartialEq)]
    pub enum ForestViolation {
        /// 子符号指向的父符号没有在 `children` 中列出它。
        ParentMissingChild { child: EntityId, parent: EntityId },
        /// 父符号列出的子符号并未把它当作父节点。
        ChildDisowned { parent: EntityId, child: EntityId },
        /// 沿 `parent` 链回到了自身。
        Cycle { at: EntityId },
    }

    #[derive(Debug, Clone)]
    struct Slot {
        seq: u64,
        entity: Entity,
    }

    /// 单个文档的实体仓库：按 id 存放实体，保留插入顺序并维护按页索引。
    ///
    /// 每次成功的增删改都会递增 `epoch`，派生缓存以此判断是否过期。
    #[derive(Debug, Clone, Default)]
    pub struct EntityGraph {
        slots: HashMap<EntityId, Slot>,
        order: BTreeMap<u64, EntityId>,
        pages: HashMap<u32, BTreeSet<u64>>,
        next_seq: u64,
        epoch: u64,
    }

    impl EntityGraph {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self, GraphError> {
            let mut graph = Self::new();
            for entity in entities {
                graph.add(entity)?;
            }
            Ok(graph)
        }

        #[inline]
        pub fn epoch(&self) -> u64 {
            self.epoch
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.slots.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.slots.is_empty()
        }

        /// 按插入顺序返回全部 id。
        pub fn all(&self) -> impl Iterator<Item = &EntityId> + '_ {
            self.order.values()
        }

        /// 按插入顺序返回全部实体。
        pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
            self.order.values().filter_map(|id| self.by_id(id))
        }

        #[inline]
        pub fn by_id(&self, id: &EntityId) -> Option<&Entity> {
            self.slots.get(id).map(|slot| &slot.entity)
        }

        #[inline]
        pub fn contains(&self, id: &EntityId) -> bool {
            self.slots.contains_key(id)
        }

        pub fn add(&mut self, entity: Entity) -> Result<(), GraphError> {
            if self.slots.contains_key(&entity.id) {
                return Err(GraphError::DuplicateEntity(entity.id));
            }
            let seq = self.next_seq;
            self.next_seq += 1;
            self.index_pages(seq, &entity);
            self.order.insert(seq, entity.id.clone());
            self.slots.insert(entity.id.clone(), Slot { seq, entity });
            self.epoch += 1;
            Ok(())
        }

        /// 就地浅合并补丁。实体不存在时返回 `false`（过期响应按空操作处理）。
        pub fn update(&mut self, id: &EntityId, patch: &EntityPatch) -> bool {
            let Some(slot) = self.slots.get_mut(id) else {
                return false;
            };
            let seq = slot.seq;
            let old_pages = slot.entity.pages();
            patch.apply_to(&mut slot.entity);
            let new_pages = slot.entity.pages();
            if old_pages != new_pages {
                for page in old_pages {
                    self.unindex_page(page, seq);
                }
                for page in new_pages {
                    self.pages.entry(page).or_default().insert(seq);
                }
            }
            self.epoch += 1;
            true
        }

        /// 删除实体。其子节点的 `parent` 引用保持悬空，不做修复。
        pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
            let slot = self.slots.remove(id)?;
            self.order.remove(&slot.seq);
            for page in slot.entity.pages() {
                self.unindex_page(page, slot.seq);
            }
            self.epoch += 1;
            Some(slot.entity)
        }

        fn index_pages(&mut self, seq: u64, entity: &Entity) {
            for page in entity.pages() {
                self.pages.entry(page).or_default().insert(seq);
            }
        }

        fn unindex_page(&mut self, page: u32, seq: u64) {
            if let Some(set) = self.pages.get_mut(&page) {
                set.remove(&seq);
                if set.is_empty() {
                    self.pages.remove(&page);
                }
            }
        }

        /// 至少有一个框位于该页的实体，按插入顺序。
        pub fn entities_on_page(&self, page: u32) -> impl Iterator<Item = &Entity> + '_ {
            self.pages
                .get(&page)
                .into_iter()
                .flat_map(|set| set.iter())
                .filter_map(|seq| self.order.get(seq))
                .filter_map(|id| self.by_id(id))
        }

        pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> + '_ {
            self.entities().filter(move |entity| entity.kind() == kind)
        }

        /// 已知含有实体的页码，升序。
        pub fn pages(&self) -> Vec<u32> {
            let mut pages: Vec<u32> = self.pages.keys().copied().collect();
            pages.sort_unstable();
            pages
        }

        #[inline]
        fn resolve(&self, id: Option<&EntityId>) -> Option<&Entity> {
            id.and_then(|id| self.by_id(id))
        }

        /// 解析父节点；悬空引用视为无父节点。
        pub fn parent_of(&self, id: &EntityId) -> Option<&Entity> {
            let entity = self.by_id(id)?;
            self.resolve(entity.relationships.parent.as_ref())
        }

        pub fn children_of(&self, id: &EntityId) -> Vec<&Entity> {
            self.by_id(id)
                .map(|entity| {
                    entity
                        .relationships
                        .children
                        .iter()
                        .filter_map(|child| self.by_id(child))
                        .collect()
                })
                .unwrap_or_default()
        }

        pub fn equation_of(&self, id: &EntityId) -> Option<&Entity> {
            let entity = self.by_id(id)?;
            self.resolve(entity.relationships.equation.as_ref())
                .filter(|equation| equation.kind() == EntityKind::Equation)
        }

        pub fn sentence_of(&self, id: &EntityId) -> Option<&Entity> {
            let entity = self.by_id(id)?;
            self.resolve(entity.relationships.sentence.as_ref())
        }

        /// 顶层：没有父节点或父节点无法解析。
        pub fn is_top_level(&self, id: &EntityId) -> bool {
            self.parent_of(id).is_none()
        }

        /// 沿 `parent` 链向上收集祖先，最近的在前。带访问集保护，遇环即停。
        pub fn ancestors(&self, id: &EntityId) -> Vec<EntityId> {
            let mut visited: HashSet<&EntityId> = HashSet::new();
            visited.insert(id);
            let mut ancestors = Vec::new();
            let mut current = self.parent_of(id);
            while let Some(parent) = current {
                if !visited.insert(&parent.id) {
                    break;
                }
                ancestors.push(parent.id.clone());
                current = self.parent_of(&parent.id);
            }
            ancestors
        }

        /// 广度优先收集全部后代（不含自身）。
        pub fn descendants(&self, id: &EntityId) -> Vec<EntityId> {
            let mut visited: HashSet<&EntityId> = HashSet::new();
            visited.insert(id);
            let mut queue: VecDeque<&EntityId> = VecDeque::from([id]);
            let mut descendants = Vec::new();
            while let Some(current) = queue.pop_front() {
                for child in self.children_of(current) {
                    if visited.insert(&child.id) {
                        descendants.push(child.id.clone());
                        queue.push_back(&child.id);
                    }
                }
            }
            descendants
        }

        pub fn is_ancestor_of(&self, ancestor: &EntityId, descendant: &EntityId) -> bool {
            self.ancestors(descendant).iter().any(|id| id == ancestor)
        }

        /// 是否有可解析的子节点。
        pub fn has_children(&self, id: &EntityId) -> bool {
            !self.children_of(id).is_empty()
        }

        /// 属于该公式的全部符号，按插入顺序。
        pub fn symbols_in_equation(&self, equation: &EntityId) -> Vec<&Entity> {
            self.entities_of_kind(EntityKind::Symbol)
                .filter(|symbol| symbol.relationships.equation.as_ref() == Some(equation))
                .collect()
        }

        pub fn top_level_symbols_in_equation(&self, equation: &EntityId) -> usize {
            self.symbols_in_equation(equation)
                .into_iter()
                .filter(|symbol| self.is_top_level(&symbol.id))
                .count()
        }

        /// 检查符号父子森林的双向一致性与环。悬空引用不算违规。
        pub fn forest_violations(&self) -> Vec<ForestViolation> {
            let mut violations = Vec::new();
            for symbol in self.entities_of_kind(EntityKind::Symbol) {
                if let Some(parent) = self.parent_of(&symbol.id) {
                    if !parent.relationships.children.contains(&symbol.id) {
                        violations.push(ForestViolation::ParentMissingChild {
                            child: symbol.id.clone(),
                            parent: parent.id.clone(),
                        });
                    }
                }
                for child in self.children_of(&symbol.id) {
                    if child.relationships.parent.as_ref() != Some(&symbol.id) {
                        violations.push(ForestViolation::ChildDisowned {
                            parent: symbol.id.clone(),
                            child: child.id.clone(),
                        });
                    }
                }
                if self.ancestors(&symbol.id).len() < self.parent_chain_len(&symbol.id) {
                    violations.push(ForestViolation::Cycle {
                        at: symbol.id.clone(),
                    });
                }
            }
            violations
        }

        /// 不带访问集地沿父链走，最多走 `len + 1` 步；用于与 `ancestors` 对比发现环。
        fn parent_chain_len(&self, id: &EntityId) -> usize {
            let limit = self.len() + 1;
            let mut steps = 0;
            let mut current = self.parent_of(id);
            while let Some(parent) = current {
                steps += 1;
                if steps >= limit {
                    break;
                }
                current = self.parent_of(&parent.id);
            }
            steps
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::document::{
            AttributesPatch, EntityData, Relationships, RelationshipsPatch, SymbolAttributes,
        };
        use crate::geometry::BoundingBox;

        fn symbol(id: &str, page: u32, parent: Option<&str>, children: &[&str]) -> Entity {
            Entity::new(
                id,
                EntityData::Symbol(SymbolAttributes {
                    tex: Some(id.to_string()),
                    ..SymbolAttributes::default()
                }),
            )
            .with_box(BoundingBox::new(page, 0.1, 0.1, 0.1, 0.02))
            .with_relationships(Relationships {
                parent: parent.map(EntityId::from),
                children: children.iter().map(|c| EntityId::from(*c)).collect(),
                ..Relationships::default()
            })
        }

        fn tree() -> EntityGraph {
            EntityGraph::with_entities([
                symbol("p", 0, None, &["c1", "c2"]),
                symbol("c1", 0, Some("p"), &["g"]),
                symbol("c2", 1, Some("p"), &[]),
                symbol("g", 1, Some("c1"), &[]),
            ])
            .expect("构建测试图失败")
        }

        #[test]
        fn graph_keeps_insertion_order_and_bumps_epoch() {
            let mut graph = tree();
            let ids: Vec<_> = graph.all().map(|id| id.as_str().to_string()).collect();
            assert_eq!(ids, ["p", "c1", "c2", "g"]);
            assert_eq!(graph.epoch(), 4);

            let err = graph.add(symbol("p", 0, None, &[])).unwrap_err();
            assert_eq!(err, GraphError::DuplicateEntity(EntityId::from("p")));
            assert_eq!(graph.epoch(), 4);

            assert!(graph.remove(&EntityId::from("c2")).is_some());
            assert!(graph.remove(&EntityId::from("c2")).is_none());
            assert_eq!(graph.epoch(), 5);
            assert!(!graph.update(&EntityId::from("c2"), &EntityPatch::default()));
            assert_eq!(graph.epoch(), 5);
        }

        #[test]
        fn fixture_forest_is_consistent() {
            let graph = tree();
            assert!(graph.forest_violations().is_empty());
            for symbol in graph.entities_of_kind(EntityKind::Symbol) {
                if let Some(parent) = graph.parent_of(&symbol.id) {
                    assert!(parent.relationships.children.contains(&symbol.id));
                }
            }
        }

        #[test]
        fn traversal_reports_ancestors_and_descendants() {
            let graph = tree();
            let g = EntityId::from("g");
            let p = EntityId::from("p");
            assert_eq!(
                graph.ancestors(&g),
                vec![EntityId::from("c1"), EntityId::from("p")]
            );
            assert_eq!(graph.descendants(&p).len(), 3);
            assert!(graph.is_ancestor_of(&p, &g));
            assert!(!graph.is_ancestor_of(&g, &p));
            assert!(graph.is_top_level(&p));
            assert!(!graph.is_top_level(&g));
        }

        #[test]
        fn removing_parent_leaves_children_top_level() {
            let mut graph = tree();
            let p = EntityId::from("p");
            graph.remove(&p);
            let c1 = EntityId::from("c1");
            assert!(graph.is_top_level(&c1));
            assert!(graph.ancestors(&c1).is_empty());
            assert_eq!(graph.by_id(&c1).unwrap().relationships.parent, Some(p));
            assert!(graph.forest_violations().is_empty());
        }

        #[test]
        fn traversal_terminates_on_cycles() {
            let mut graph = EntityGraph::with_entities([
                symbol("a", 0, Some("b"), &["b"]),
                symbol("b", 0, Some("a"), &["a"]),
            ])
            .unwrap();
            let a = EntityId::from("a");
            assert_eq!(graph.ancestors(&a), vec![EntityId::from("b")]);
            assert_eq!(graph.descendants(&a), vec![EntityId::from("b")]);
            assert!(
                graph
                    .forest_violations()
                    .iter()
                    .any(|v| matches!(v, ForestViolation::Cycle { .. }))
            );

            let patch = EntityPatch::relationships(RelationshipsPatch {
                parent: Some(None),
                ..RelationshipsPatch::default()
            });
            assert!(graph.update(&a, &patch));
            assert!(graph.ancestors(&EntityId::from("b")).len() == 1);
        }

        #[test]
        fn page_index_follows_box_updates() {
            let mut graph = tree();
            let on_page = |graph: &EntityGraph, page| {
                graph
                    .entities_on_page(page)
                    .map(|e| e.id.as_str().to_string())
                    .collect::<Vec<_>>()
            };
            assert_eq!(on_page(&graph, 0), ["p", "c1"]);
            assert_eq!(on_page(&graph, 1), ["c2", "g"]);

            let patch = EntityPatch {
                bounding_boxes: Some(vec![BoundingBox::new(3, 0.2, 0.2, 0.1, 0.1)]),
                attributes: AttributesPatch {
                    tex: Some("p'".to_string()),
                    ..AttributesPatch::default()
                },
                ..EntityPatch::default()
            };
            assert!(graph.update(&EntityId::from("p"), &patch));
            assert_eq!(on_page(&graph, 0), ["c1"]);
            assert_eq!(on_page(&graph, 3), ["p"]);
            assert_eq!(graph.pages(), vec![0, 1, 3]);
        }
    }
}
