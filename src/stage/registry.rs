use super::{Stage, StageHandle};
use crate::error::PipelineError;

/// Fixed set of pre-loaded stages, addressed by [`StageHandle`].
///
/// Built once before the pipeline starts and owned by the capture worker
/// afterwards. Nothing is added, removed or reloaded while frames flow.
pub struct StageRegistry {
    stages: Vec<Box<dyn Stage>>,
}

impl StageRegistry {
    /// Wraps already-loaded stages. At least one is required.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::EmptyRegistry);
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn name(&self, handle: StageHandle) -> Option<&str> {
        self.stages.get(handle.index()).map(|s| s.name())
    }

    pub fn get_mut(&mut self, handle: StageHandle) -> Option<&mut dyn Stage> {
        match self.stages.get_mut(handle.index()) {
            Some(stage) => Some(stage.as_mut()),
            None => None,
        }
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FixedLabel, Passthrough};

    fn registry() -> StageRegistry {
        StageRegistry::new(vec![
            Box::new(Passthrough::new()),
            Box::new(FixedLabel::new("b", "B")),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(
            StageRegistry::new(Vec::new()),
            Err(PipelineError::EmptyRegistry)
        ));
    }

    #[test]
    fn test_names_in_order() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["passthrough", "b"]);
        assert_eq!(registry.name(StageHandle::new(1)), Some("b"));
        assert_eq!(registry.name(StageHandle::new(2)), None);
    }

    #[test]
    fn test_get_mut_out_of_range() {
        let mut registry = registry();
        assert!(registry.get_mut(StageHandle::new(1)).is_some());
        assert!(registry.get_mut(StageHandle::new(9)).is_none());
    }
}
