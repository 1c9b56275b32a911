use std::collections::{HashMap, HashSet};

use scholia_core::document::{Entity, EntityId, EntityKind};
use scholia_core::geometry::sort_by_reading_order;
use scholia_core::graph::EntityGraph;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Term,
    Symbol,
}

/// 预先计算的符号匹配等级：种子符号 -> (候选符号 -> 等级)，等级越小越相近。
#[derive(Debug, Clone, Default)]
pub struct MatchRanks {
    ranks: HashMap<EntityId, HashMap<EntityId, u32>>,
}

impl MatchRanks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seed: impl Into<EntityId>, candidate: impl Into<EntityId>, rank: u32) {
        self.ranks
            .entry(seed.into())
            .or_default()
            .insert(candidate.into(), rank);
    }

    pub fn rank(&self, seed: &EntityId, candidate: &EntityId) -> Option<u32> {
        self.ranks.get(seed).and_then(|ranks| ranks.get(candidate)).copied()
    }

    pub fn has_seed(&self, seed: &EntityId) -> bool {
        self.ranks.contains_key(seed)
    }
}

/// 等级过滤条件：仅保留等级不超过 `max_rank` 的候选。
#[derive(Debug, Clone, Copy)]
pub struct RankFilter<'a> {
    pub ranks: &'a MatchRanks,
    pub max_rank: Option<u32>,
}

impl RankFilter<'_> {
    fn admits(&self, seed: &EntityId, candidate: &EntityId) -> bool {
        if seed == candidate || !self.ranks.has_seed(seed) {
            return true;
        }
        match (self.ranks.rank(seed, candidate), self.max_rank) {
            (Some(rank), Some(max_rank)) => rank <= max_rank,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// `tex` 完全相同的符号视为同一符号。种子本身总在结果中。
pub fn symbol_matches(
    seeds: &[EntityId],
    graph: &EntityGraph,
    filter: Option<RankFilter<'_>>,
) -> Vec<EntityId> {
    let seeds: Vec<&Entity> = seeds
        .iter()
        .filter_map(|id| graph.by_id(id))
        .filter(|entity| entity.kind() == EntityKind::Symbol)
        .collect();

    let mut matched: HashSet<&EntityId> = HashSet::new();
    for seed in &seeds {
        matched.insert(&seed.id);
        let Some(tex) = seed.as_symbol().and_then(|symbol| symbol.tex.as_deref()) else {
            continue;
        };
        for candidate in graph.entities_of_kind(EntityKind::Symbol) {
            let same_tex = candidate
                .as_symbol()
                .and_then(|symbol| symbol.tex.as_deref())
                == Some(tex);
            let admitted = filter.is_none_or(|filter| filter.admits(&seed.id, &candidate.id));
            if same_tex && admitted {
                matched.insert(&candidate.id);
            }
        }
    }
    order_by_position(graph, matched)
}

/// `name` 完全相同的术语。
pub fn term_matches(seeds: &[EntityId], graph: &EntityGraph) -> Vec<EntityId> {
    let names: HashSet<&str> = seeds
        .iter()
        .filter_map(|id| graph.by_id(id))
        .filter_map(|entity| entity.as_term())
        .map(|term| term.name.as_str())
        .collect();

    let matched: HashSet<&EntityId> = graph
        .entities_of_kind(EntityKind::Term)
        .filter(|entity| {
            entity
                .as_term()
                .is_some_and(|term| names.contains(term.name.as_str()))
        })
        .map(|entity| &entity.id)
        .collect();
    order_by_position(graph, matched)
}

/// 以首个框的阅读顺序排列；没有框的实体排在最后，保持插入顺序。
fn order_by_position(graph: &EntityGraph, ids: HashSet<&EntityId>) -> Vec<EntityId> {
    let mut positioned = Vec::new();
    let mut unplaced = Vec::new();
    for entity in graph.entities().filter(|entity| ids.contains(&entity.id)) {
        match entity.first_box() {
            Some(bbox) => positioned.push((*bbox, entity.id.clone())),
            None => unplaced.push(entity.id.clone()),
        }
    }
    sort_by_reading_order(&mut positioned, |(bbox, _)| *bbox);
    positioned
        .into_iter()
        .map(|(_, id)| id)
        .chain(unplaced)
        .collect()
}

/// 带缓存的查找引擎：按共享身份收集匹配实体并按阅读顺序排列。
///
/// 缓存键为 (类型, 种子列表)，图的 epoch 变化即整体失效。
#[derive(Debug, Default)]
pub struct FindEngine {
    ranks: Option<MatchRanks>,
    max_rank: Option<u32>,
    cache: HashMap<(MatchKind, Vec<EntityId>), Vec<EntityId>>,
    cache_epoch: u64,
}

impl FindEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rank(max_rank: Option<u32>) -> Self {
        Self {
            max_rank,
            ..Self::default()
        }
    }

    pub fn set_match_ranks(&mut self, ranks: Option<MatchRanks>) {
        self.ranks = ranks;
        self.cache.clear();
    }

    pub fn set_max_rank(&mut self, max_rank: Option<u32>) {
        self.max_rank = max_rank;
        self.cache.clear();
    }

    #[inline]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn matches(
        &mut self,
        kind: MatchKind,
        seeds: &[EntityId],
        graph: &EntityGraph,
    ) -> Vec<EntityId> {
        match kind {
            MatchKind::Term => self.matching_terms(seeds, graph),
            MatchKind::Symbol => self.matching_symbols(seeds, graph),
        }
    }

    pub fn matching_symbols(&mut self, seeds: &[EntityId], graph: &EntityGraph) -> Vec<EntityId> {
        self.invalidate_if_stale(graph);
        let key = (MatchKind::Symbol, seeds.to_vec());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let filter = self.ranks.as_ref().map(|ranks| RankFilter {
            ranks,
            max_rank: self.max_rank,
        });
        let result = symbol_matches(seeds, graph, filter);
        self.cache.insert(key, result.clone());
        result
    }

    pub fn matching_terms(&mut self, seeds: &[EntityId], graph: &EntityGraph) -> Vec<EntityId> {
        self.invalidate_if_stale(graph);
        let key = (MatchKind::Term, seeds.to_vec());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let result = term_matches(seeds, graph);
        self.cache.insert(key, result.clone());
        result
    }

    fn invalidate_if_stale(&mut self, graph: &EntityGraph) {
        if self.cache_epoch != graph.epoch() {
            trace!(
                old_epoch = self.cache_epoch,
                new_epoch = graph.epoch(),
                dropped = self.cache.len(),
                "查找缓存随图版本失效"
            );
            self.cache.clear();
            self.cache_epoch = graph.epoch();
        }
    }
}
