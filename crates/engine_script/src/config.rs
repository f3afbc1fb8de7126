//! Script system configuration.

/// Configuration for a [`ScriptSystem`](crate::ScriptSystem).
#[derive(Debug, Clone)]
pub struct ScriptSystemConfig {
    /// Turn panics inside lifecycle hooks into reported errors instead of
    /// unwinding through the frame. Only turn this off while debugging: a
    /// panicking hook then escapes [`Scheduler::frame`](crate::Scheduler::frame)
    /// and leaves the system mid-phase.
    pub catch_panics: bool,
    /// Upper bound on load completions applied per activation flush
    /// (0 = no limit). Completions beyond the bound wait for the next frame.
    pub max_completions_per_flush: usize,
}

impl ScriptSystemConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override panic catching.
    #[must_use]
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// Bound the completions applied per flush.
    #[must_use]
    pub fn with_max_completions_per_flush(mut self, max: usize) -> Self {
        self.max_completions_per_flush = max;
        self
    }
}

impl Default for ScriptSystemConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            max_completions_per_flush: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScriptSystemConfig::default();
        assert!(config.catch_panics);
        assert_eq!(config.max_completions_per_flush, 0);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ScriptSystemConfig::new()
            .with_catch_panics(false)
            .with_max_completions_per_flush(4);
        assert!(!config.catch_panics);
        assert_eq!(config.max_completions_per_flush, 4);
    }
}
