//! Four-tier context composition under a fixed token budget.
//!
//! Tiers are assembled in strict priority order — Pinned, PriorSolutions,
//! Active, Archived — and an entry is always included whole or skipped
//! entirely. Unlike the chunk compressor this module replaces, nothing here
//! ever truncates content to make it fit.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{GodagentError, GodagentResult};
use crate::types::{ComposedContext, ComposedEntry, Episode, Pin, Tier, WindowEntry};

/// Directed "A depends on B" edges between agent ids, used only to order the
/// Active tier -- never to gate what's included.
#[derive(Default)]
pub struct DependencyDag {
    /// agent id -> the agent ids it directly depends on.
    edges: HashMap<String, Vec<String>>,
}

impl DependencyDag {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `agent` depends on `depends_on`.
    pub fn add_dependency(&mut self, agent: &str, depends_on: &str) {
        self.edges.entry(agent.to_string()).or_default().push(depends_on.to_string());
    }

    /// The transitive dependencies of `agent`, topologically ordered
    /// (deepest dependency first, `agent` itself excluded). Visits each
    /// agent at most once, so a cycle in the edges can't loop forever.
    pub fn transitive_order(&self, agent: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.visit(agent, &mut visited, &mut order);
        order.pop();
        order
    }

    fn visit(&self, agent: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(agent.to_string()) {
            return;
        }
        if let Some(deps) = self.edges.get(agent) {
            for dep in deps {
                self.visit(dep, visited, order);
            }
        }
        order.push(agent.to_string());
    }
}

/// Holds pins for one agent, evicting the lowest-priority pin once the total
/// pinned token count would exceed `max_pinned_tokens`.
pub struct PinManager {
    max_pinned_tokens: u32,
    pins: Vec<Pin>,
}

impl PinManager {
    /// Create a pin manager with the given token cap.
    pub fn new(max_pinned_tokens: u32) -> Self {
        Self { max_pinned_tokens, pins: Vec::new() }
    }

    /// Add a pin, evicting the lowest-priority existing pin(s) as needed to
    /// stay within `max_pinned_tokens`. Returns the pins evicted as a result.
    pub fn add_pin(&mut self, pin: Pin) -> Vec<Pin> {
        self.pins.push(pin);
        let mut evicted = Vec::new();
        while self.total_tokens() > self.max_pinned_tokens && self.pins.len() > 1 {
            let lowest_idx = self
                .pins
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| (p.priority, std::cmp::Reverse(p.pinned_at)))
                .map(|(i, _)| i);
            if let Some(idx) = lowest_idx {
                evicted.push(self.pins.remove(idx));
            } else {
                break;
            }
        }
        evicted
    }

    /// Total tokens currently pinned.
    pub fn total_tokens(&self) -> u32 {
        self.pins.iter().map(|p| p.token_count).sum()
    }

    /// Current pins, highest priority first, ties broken by earliest pin time.
    pub fn pins(&self) -> Vec<Pin> {
        let mut out = self.pins.clone();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.pinned_at.cmp(&b.pinned_at)));
        out
    }

    /// Remove all pins for a given agent id.
    pub fn clear_agent(&mut self, agent_id: &str) {
        self.pins.retain(|p| p.agent_id != agent_id);
    }
}

/// A fixed-capacity rolling window of active entries. Pushing past capacity
/// evicts the oldest entry into the archived set (content dropped, id kept).
pub struct RollingWindow {
    capacity: usize,
    entries: std::collections::VecDeque<WindowEntry>,
    archived_ids: Vec<String>,
}

impl RollingWindow {
    /// Create a window with room for `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: std::collections::VecDeque::new(), archived_ids: Vec::new() }
    }

    /// Push a new entry, archiving the oldest if the window is full.
    pub fn push(&mut self, entry: WindowEntry) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.archived_ids.push(format!("{}:{}", evicted.agent_id, evicted.timestamp));
            }
        }
        self.entries.push_back(entry);
    }

    /// Active entries, oldest first.
    pub fn entries(&self) -> Vec<WindowEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Ids of entries evicted from the window so far.
    pub fn archived_ids(&self) -> &[String] {
        &self.archived_ids
    }
}

/// Assembles [`ComposedContext`] from per-tier candidate pools.
pub struct ContextComposer {
    default_budget: u32,
}

impl ContextComposer {
    /// Create a composer with the given default token budget.
    pub fn new(default_budget: u32) -> Self {
        Self { default_budget }
    }

    /// Compose a context from the given tier candidates under `budget`
    /// (falling back to the composer's default when `None`).
    ///
    /// `prior_solutions` is expected pre-sorted by relevance; only the
    /// leading two that fit are used, per the PriorSolutions tier cap.
    ///
    /// When `target_agent` is given, Tier 3 places the target's transitive
    /// dependencies first (topological order), then everyone else; ties
    /// within each group keep window insertion order. With no target agent,
    /// Tier 3 is pure insertion order.
    pub fn compose(
        &self,
        pins: &[Pin],
        prior_solutions: &[Episode],
        window: &[WindowEntry],
        archived_ids: &[String],
        budget: Option<u32>,
        target_agent: Option<&str>,
        dependencies: &DependencyDag,
    ) -> GodagentResult<ComposedContext> {
        let budget = budget.unwrap_or(self.default_budget);
        let mut entries = Vec::new();
        let mut tier_totals: BTreeMap<String, u32> = BTreeMap::new();
        let mut total: u32 = 0;

        // Tier 1: Pinned -- all pins are mandatory.
        let pinned_tokens: u32 = pins.iter().map(|p| p.token_count).sum();
        if pinned_tokens > budget {
            return Err(GodagentError::BudgetExceeded { budget, pinned: pinned_tokens });
        }
        for pin in pins {
            entries.push(ComposedEntry {
                tier: Tier::Pinned,
                agent_id: Some(pin.agent_id.clone()),
                content: Some(pin.content.clone()),
                reference_id: format!("pin:{}:{}", pin.agent_id, pin.pinned_at),
                token_count: pin.token_count,
            });
        }
        total += pinned_tokens;
        tier_totals.insert("pinned".into(), pinned_tokens);

        // Tier 2: up to two PriorSolutions entries, included whole or skipped.
        let mut prior_tokens = 0u32;
        let mut prior_included = 0usize;
        for episode in prior_solutions {
            if prior_included >= 2 {
                break;
            }
            let tokens = estimate_tokens(&episode.content);
            if total + tokens > budget {
                continue;
            }
            entries.push(ComposedEntry {
                tier: Tier::PriorSolutions,
                agent_id: episode.session_id.clone(),
                content: Some(episode.content.clone()),
                reference_id: episode.id.clone(),
                token_count: tokens,
            });
            total += tokens;
            prior_tokens += tokens;
            prior_included += 1;
        }
        tier_totals.insert("prior_solutions".into(), prior_tokens);

        // Tier 3: Active rolling-window entries, whole-or-skip.
        let mut active_tokens = 0u32;
        let ordered = order_active(window, target_agent, dependencies);
        for entry in &ordered {
            if total + entry.token_count > budget {
                continue;
            }
            entries.push(ComposedEntry {
                tier: Tier::Active,
                agent_id: Some(entry.agent_id.clone()),
                content: Some(entry.content.clone()),
                reference_id: format!("{}:{}", entry.agent_id, entry.timestamp),
                token_count: entry.token_count,
            });
            total += entry.token_count;
            active_tokens += entry.token_count;
        }
        tier_totals.insert("active".into(), active_tokens);

        // Tier 4: Archived -- reference only, zero tokens, never budget-limited.
        for id in archived_ids {
            entries.push(ComposedEntry {
                tier: Tier::Archived,
                agent_id: None,
                content: None,
                reference_id: id.clone(),
                token_count: 0,
            });
        }
        tier_totals.insert("archived".into(), 0);

        let utilization = if budget == 0 { 0.0 } else { f64::from(total) / f64::from(budget) };
        Ok(ComposedContext {
            entries,
            tier_totals,
            total_tokens: total,
            utilization,
            remaining_budget: budget.saturating_sub(total),
        })
    }
}

/// Rough whitespace-token estimate, consistent with the teacher's `len()/4`
/// heuristic used elsewhere for pre-embedding sizing.
fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4).max(1) as u32
}

/// Order Tier 3 window entries. With no target agent (or one with no
/// recorded dependencies), this is the identity ordering -- pure window
/// insertion order. Otherwise, entries whose agent id is a transitive
/// dependency of `target_agent` come first, sorted by topological depth,
/// ties broken by insertion order; every other entry follows, in insertion
/// order.
fn order_active(window: &[WindowEntry], target_agent: Option<&str>, dependencies: &DependencyDag) -> Vec<WindowEntry> {
    let Some(target) = target_agent else { return window.to_vec() };
    let chain = dependencies.transitive_order(target);
    if chain.is_empty() {
        return window.to_vec();
    }
    let rank: HashMap<&str, usize> = chain.iter().enumerate().map(|(i, agent)| (agent.as_str(), i)).collect();
    let mut indexed: Vec<(usize, &WindowEntry)> = window.iter().enumerate().collect();
    indexed.sort_by_key(|(insertion_idx, entry)| match rank.get(entry.agent_id.as_str()) {
        Some(&depth) => (0usize, depth, *insertion_idx),
        None => (1usize, 0, *insertion_idx),
    });
    indexed.into_iter().map(|(_, entry)| entry.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(agent: &str, tokens: u32, priority: i32, at: i64) -> Pin {
        Pin {
            agent_id: agent.into(),
            content: "pinned content".into(),
            token_count: tokens,
            reason: "test".into(),
            priority,
            pinned_at: at,
        }
    }

    fn window_entry(agent: &str, tokens: u32, ts: i64) -> WindowEntry {
        WindowEntry {
            agent_id: agent.into(),
            content: "window content".into(),
            token_count: tokens,
            phase: "impl".into(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_pin_manager_evicts_lowest_priority() {
        let mut mgr = PinManager::new(100);
        mgr.add_pin(pin("a", 60, 5, 1));
        let evicted = mgr.add_pin(pin("b", 60, 1, 2));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].agent_id, "b");
        assert_eq!(mgr.pins().len(), 1);
    }

    #[test]
    fn test_rolling_window_archives_oldest() {
        let mut window = RollingWindow::new(2);
        window.push(window_entry("a", 10, 1));
        window.push(window_entry("a", 10, 2));
        window.push(window_entry("a", 10, 3));
        assert_eq!(window.entries().len(), 2);
        assert_eq!(window.archived_ids().len(), 1);
    }

    #[test]
    fn test_compose_respects_budget_without_truncation() {
        let composer = ContextComposer::new(1000);
        let pins = vec![pin("a", 100, 5, 1)];
        let window = vec![window_entry("a", 80, 2), window_entry("a", 5000, 3)];
        let result = composer.compose(&pins, &[], &window, &[], None, None, &DependencyDag::new()).unwrap();
        assert!(result.entries.iter().all(|e| e.token_count != 0 || e.tier == Tier::Archived));
        // the oversized window entry must be skipped whole, never shrunk
        assert_eq!(result.entries.iter().filter(|e| e.tier == Tier::Active).count(), 1);
    }

    #[test]
    fn test_compose_pinned_over_budget_errors() {
        let composer = ContextComposer::new(50);
        let pins = vec![pin("a", 100, 5, 1)];
        let err = composer.compose(&pins, &[], &[], &[], None, None, &DependencyDag::new()).unwrap_err();
        assert!(matches!(err, GodagentError::BudgetExceeded { .. }));
    }

    #[test]
    fn test_compose_archived_always_included() {
        let composer = ContextComposer::new(10);
        let archived = vec!["a:1".to_string(), "a:2".to_string()];
        let result = composer.compose(&[], &[], &[], &archived, None, None, &DependencyDag::new()).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert!(result.entries.iter().all(|e| e.content.is_none()));
    }

    #[test]
    fn test_compose_prior_solutions_capped_at_two() {
        let composer = ContextComposer::new(10_000);
        let priors: Vec<Episode> = (0..5)
            .map(|i| Episode {
                id: format!("ep{i}"),
                content: "solution".into(),
                vector_id: None,
                tags: vec![],
                session_id: None,
                quality: 0.9,
                created_at: i,
            })
            .collect();
        let result = composer.compose(&[], &priors, &[], &[], None, None, &DependencyDag::new()).unwrap();
        assert_eq!(result.entries.iter().filter(|e| e.tier == Tier::PriorSolutions).count(), 2);
    }

    #[test]
    fn test_compose_active_defaults_to_insertion_order() {
        let composer = ContextComposer::new(10_000);
        let window = vec![window_entry("a", 10, 1), window_entry("b", 10, 2), window_entry("c", 10, 3)];
        let result = composer.compose(&[], &[], &window, &[], None, None, &DependencyDag::new()).unwrap();
        let agents: Vec<&str> =
            result.entries.iter().filter(|e| e.tier == Tier::Active).map(|e| e.agent_id.as_deref().unwrap()).collect();
        assert_eq!(agents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_compose_active_orders_dependencies_before_target() {
        let composer = ContextComposer::new(10_000);
        // insertion order is target, dep-of-target, unrelated -- dependency
        // ordering should pull "base" ahead of "app" despite arriving later.
        let window = vec![window_entry("app", 10, 1), window_entry("base", 10, 2), window_entry("other", 10, 3)];
        let mut deps = DependencyDag::new();
        deps.add_dependency("app", "base");
        let result = composer.compose(&[], &[], &window, &[], None, Some("app"), &deps).unwrap();
        let agents: Vec<&str> =
            result.entries.iter().filter(|e| e.tier == Tier::Active).map(|e| e.agent_id.as_deref().unwrap()).collect();
        assert_eq!(agents, vec!["base", "app", "other"]);
    }

    #[test]
    fn test_dependency_dag_transitive_order_is_deepest_first() {
        let mut deps = DependencyDag::new();
        deps.add_dependency("app", "service");
        deps.add_dependency("service", "db");
        assert_eq!(deps.transitive_order("app"), vec!["db".to_string(), "service".to_string()]);
    }
}
