use crate::backend::PullPolicy;
use std::time::Duration;

/// Per-build switches, usually derived from `BuilderConfig` and CLI flags
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pull_policy: PullPolicy,
    /// Skip both the layer cache index and the engine's own cache
    pub no_cache: bool,
    pub verify: bool,
    /// Upper bound for a single step; `None` waits forever
    pub step_timeout: Option<Duration>,
    /// Overrides the recipe's tag
    pub tag: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pull_policy: PullPolicy::Missing,
            no_cache: false,
            verify: true,
            step_timeout: None,
            tag: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull_policy(mut self, pull_policy: PullPolicy) -> Self {
        self.pull_policy = pull_policy;
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Option<Duration>) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.pull_policy, PullPolicy::Missing);
        assert!(!config.no_cache);
        assert!(config.verify);
        assert!(config.step_timeout.is_none());
        assert!(config.tag.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PipelineConfig::new()
            .with_pull_policy(PullPolicy::Never)
            .with_no_cache(true)
            .with_verify(false)
            .with_step_timeout(Some(Duration::from_secs(600)))
            .with_tag(Some("demo:1".to_string()));

        assert_eq!(config.pull_policy, PullPolicy::Never);
        assert!(config.no_cache);
        assert!(!config.verify);
        assert_eq!(config.step_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.tag.as_deref(), Some("demo:1"));
    }
}
