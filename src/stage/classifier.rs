use super::preprocess::Preprocessor;
use super::Stage;
use crate::frame::{Annotation, Frame, ProcessedFrame};
use anyhow::{anyhow, bail, Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::fs;
use std::path::Path;

/// Image classifier backed by an ONNX model
///
/// Expects a single `[1, 3, H, W]` float input and a `[1, classes]` logits
/// output, the layout torchvision-style classifiers export with.
pub struct OnnxClassifier {
    name: String,
    session: Session,
    preprocessor: Preprocessor,
    labels: Option<Vec<String>>,
}

impl OnnxClassifier {
    /// Create a classifier from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    ///
    /// # Default Configuration
    /// - Input size: 224x224
    /// - ImageNet mean/std normalization
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        if !path.is_file() {
            bail!("Model file not found: {}", path.display());
        }

        tracing::info!("Loading classifier from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3).map_err(ort::Error::<()>::from)?
            .with_intra_threads(4).map_err(ort::Error::<()>::from)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("Classifier loaded successfully");

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "classifier".to_string());

        Ok(Self {
            name,
            session,
            preprocessor: Preprocessor::new(224, 224),
            labels: None,
        })
    }

    /// Attach class labels, indexed by class
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    fn annotate(&self, class_index: usize, confidence: f32) -> Annotation {
        let annotation = Annotation::new(class_index, confidence);
        match self.labels.as_ref().and_then(|l| l.get(class_index)) {
            Some(label) => annotation.with_label(label.clone()),
            None => annotation,
        }
    }
}

impl Stage for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, frame: &Frame) -> Result<ProcessedFrame> {
        let _span = tracing::debug_span!("classify", stage = %self.name).entered();

        let input_tensor = self.preprocessor.preprocess(frame)?;
        let input = Tensor::from_array(input_tensor)?;

        // Run inference; outputs borrow the session, so finish with them here
        let (class_index, confidence) = {
            let _infer_span = tracing::debug_span!("inference").entered();
            let outputs = self
                .session
                .run(ort::inputs![input])
                .context("Failed to run inference")?;
            let (_, logits) = outputs[0].try_extract_tensor::<f32>()?;
            top_class(logits).ok_or_else(|| anyhow!("model returned no scores"))?
        };

        tracing::debug!(
            "frame {}: class {} ({:.3})",
            frame.sequence(),
            class_index,
            confidence
        );

        let annotation = self.annotate(class_index, confidence);
        Ok(ProcessedFrame::annotated(frame.clone(), annotation))
    }
}

/// Pick the highest-scoring class and its softmax probability
fn top_class(logits: &[f32]) -> Option<(usize, f32)> {
    let (index, &max) = logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))?;

    let sum: f32 = logits
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - max).exp())
        .sum();
    Some((index, 1.0 / sum))
}

/// Load class labels, one per line
///
/// Blank lines are kept so line numbers stay aligned with class indices.
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels from {}", path.display()))?;
    Ok(text.lines().map(|line| line.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_top_class_picks_max() {
        let (index, confidence) = top_class(&[0.1, 3.0, -1.0]).unwrap();
        assert_eq!(index, 1);
        assert!(confidence > 0.5 && confidence <= 1.0);
    }

    #[test]
    fn test_top_class_uniform_scores() {
        let (_, confidence) = top_class(&[2.0, 2.0, 2.0, 2.0]).unwrap();
        assert!((confidence - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_top_class_empty_or_nan() {
        assert!(top_class(&[]).is_none());
        assert!(top_class(&[f32::NAN]).is_none());
        assert_eq!(top_class(&[f32::NAN, 1.0]).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_load_labels_keeps_line_positions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tench").unwrap();
        writeln!(file).unwrap();
        writeln!(file, " goldfish ").unwrap();

        let labels = load_labels(file.path()).unwrap();
        assert_eq!(labels, vec!["tench", "", "goldfish"]);
    }

    #[test]
    fn test_load_labels_missing_file() {
        let err = load_labels("/nonexistent/labels.txt").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/labels.txt"));
    }

    #[test]
    fn test_missing_model_reports_path() {
        let err = match OnnxClassifier::new("/nonexistent/model.onnx") {
            Ok(_) => panic!("expected missing model error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("Model file not found"));
    }
}
