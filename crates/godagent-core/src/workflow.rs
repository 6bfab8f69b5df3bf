//! Workflow adapter registry.
//!
//! An adapter is a pure scoring object: given a task description, it
//! returns how well-suited it is to handle it. Selection is highest-score
//! wins, with the earliest-registered adapter winning ties -- registration
//! order doubles as priority among equally confident adapters.

/// Minimal task description an adapter scores against.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTask {
    /// Free-text description of the task.
    pub description: String,
    /// Freeform tags the caller has already attached.
    pub tags: Vec<String>,
}

/// Scores a [`WorkflowTask`] for suitability. Implementations must be pure:
/// same input, same score, no side effects.
pub trait WorkflowAdapter: Send + Sync {
    /// Stable adapter name, returned by [`WorkflowRegistry::select`].
    fn name(&self) -> &str;
    /// Suitability score in `[0, 1]`; 0 means "cannot handle this".
    fn score(&self, task: &WorkflowTask) -> f64;
}

/// Ordered collection of adapters, selected by highest score.
pub struct WorkflowRegistry {
    adapters: Vec<Box<dyn WorkflowAdapter>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { adapters: Vec::new() }
    }

    /// Register an adapter. Later registrations lose ties to earlier ones.
    pub fn register(&mut self, adapter: Box<dyn WorkflowAdapter>) {
        self.adapters.push(adapter);
    }

    /// Select the highest-scoring adapter for `task`. Returns `None` if the
    /// registry is empty or every adapter scores exactly 0.
    pub fn select(&self, task: &WorkflowTask) -> Option<&str> {
        let mut best: Option<(f64, &str)> = None;
        for adapter in &self.adapters {
            let score = adapter.score(task);
            if score <= 0.0 {
                continue;
            }
            match best {
                Some((best_score, _)) if score <= best_score => {}
                _ => best = Some((score, adapter.name())),
            }
        }
        best.map(|(_, name)| name)
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether any adapters are registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScore {
        name: &'static str,
        score: f64,
    }
    impl WorkflowAdapter for FixedScore {
        fn name(&self) -> &str {
            self.name
        }
        fn score(&self, _task: &WorkflowTask) -> f64 {
            self.score
        }
    }

    #[test]
    fn test_select_highest_score_wins() {
        let mut registry = WorkflowRegistry::new();
        registry.register(Box::new(FixedScore { name: "low", score: 0.2 }));
        registry.register(Box::new(FixedScore { name: "high", score: 0.9 }));
        let task = WorkflowTask::default();
        assert_eq!(registry.select(&task), Some("high"));
    }

    #[test]
    fn test_select_tie_breaks_to_first_registered() {
        let mut registry = WorkflowRegistry::new();
        registry.register(Box::new(FixedScore { name: "first", score: 0.5 }));
        registry.register(Box::new(FixedScore { name: "second", score: 0.5 }));
        let task = WorkflowTask::default();
        assert_eq!(registry.select(&task), Some("first"));
    }

    #[test]
    fn test_select_none_when_all_zero() {
        let mut registry = WorkflowRegistry::new();
        registry.register(Box::new(FixedScore { name: "a", score: 0.0 }));
        let task = WorkflowTask::default();
        assert_eq!(registry.select(&task), None);
    }

    #[test]
    fn test_select_empty_registry() {
        let registry = WorkflowRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.select(&WorkflowTask::default()), None);
    }
}
