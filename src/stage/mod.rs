mod builtin;
mod classifier;
mod preprocess;
mod registry;
mod selector;

pub use builtin::{FixedLabel, Passthrough};
pub use classifier::{load_labels, OnnxClassifier};
pub use preprocess::Preprocessor;
pub use registry::StageRegistry;
pub use selector::StageSelector;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::frame::{Frame, ProcessedFrame};

/// Index of a stage in the [`StageRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StageHandle(usize);

impl StageHandle {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for StageHandle {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Trait for per-frame processing stages
/// Allows swapping between different processors (classifiers, passthrough, etc.)
///
/// Stages are loaded before the pipeline is built and run on the capture
/// thread only, so they need `Send` but not `Sync`.
pub trait Stage: Send {
    /// Short name for logs and stage listings
    fn name(&self) -> &str;

    /// Process a frame and return the result to publish
    ///
    /// # Arguments
    /// * `frame` - Captured frame; stages must not modify it
    ///
    /// # Returns
    /// * A new `ProcessedFrame` sharing the input pixels, plus any annotation
    fn apply(&mut self, frame: &Frame) -> Result<ProcessedFrame>;
}

/// Load one ONNX classifier per model path, all sharing an optional labels file.
///
/// Every model is loaded up front so later stage switches never touch disk.
pub fn load_classifiers(
    model_paths: &[PathBuf],
    labels_path: Option<&Path>,
) -> Result<Vec<Box<dyn Stage>>> {
    let labels = labels_path
        .map(load_labels)
        .transpose()
        .context("Failed to load class labels")?;

    let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(model_paths.len());
    for path in model_paths {
        let mut classifier = OnnxClassifier::new(path)
            .with_context(|| format!("Failed to load classifier {}", path.display()))?;
        if let Some(labels) = &labels {
            classifier = classifier.with_labels(labels.clone());
        }
        stages.push(Box::new(classifier));
    }
    Ok(stages)
}
