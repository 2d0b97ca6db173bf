use std::borrow::Cow;
use std::path::{Path, PathBuf};

use posepipe_core::{PoseError, Result};

use crate::graph::{BuiltinCompiler, GraphCompiler, LUMINANCE_MODEL};

/// Supplies the opaque model blob and the compiler that understands it.
pub trait ModelAssetProvider {
    fn model_blob(&self) -> Result<Cow<'_, [u8]>>;

    fn graph_compiler(&self) -> Box<dyn GraphCompiler>;

    fn describe(&self) -> String;
}

/// The luminance-centroid graph that ships with the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinModel;

impl ModelAssetProvider for BuiltinModel {
    fn model_blob(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(LUMINANCE_MODEL))
    }

    fn graph_compiler(&self) -> Box<dyn GraphCompiler> {
        Box::new(BuiltinCompiler)
    }

    fn describe(&self) -> String {
        "builtin luminance-centroid graph".into()
    }
}

/// A model file on disk. `.onnx` files are compiled with tract when the
/// `onnx` feature is enabled.
#[derive(Debug, Clone)]
pub struct FileModel {
    path: PathBuf,
}

impl FileModel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_onnx(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
    }

    #[cfg(feature = "onnx")]
    fn onnx_compiler(&self) -> Option<Box<dyn GraphCompiler>> {
        Some(Box::new(crate::onnx::OnnxCompiler))
    }

    #[cfg(not(feature = "onnx"))]
    fn onnx_compiler(&self) -> Option<Box<dyn GraphCompiler>> {
        tracing::warn!(
            path = %self.path.display(),
            "ONNX model given but the onnx feature is disabled"
        );
        None
    }
}

impl ModelAssetProvider for FileModel {
    fn model_blob(&self) -> Result<Cow<'_, [u8]>> {
        if !self.path.exists() {
            return Err(PoseError::ModelLoad(format!(
                "model file not found: {}",
                self.path.display()
            )));
        }
        tracing::info!(path = %self.path.display(), "loading model");
        Ok(Cow::Owned(std::fs::read(&self.path)?))
    }

    fn graph_compiler(&self) -> Box<dyn GraphCompiler> {
        if self.is_onnx() {
            if let Some(compiler) = self.onnx_compiler() {
                return compiler;
            }
        }
        Box::new(BuiltinCompiler)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_model_compiles() {
        let model = BuiltinModel;
        let blob = model.model_blob().unwrap();
        assert!(model.graph_compiler().compile(&blob).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let model = FileModel::new("/nonexistent/pose.onnx");
        assert!(matches!(model.model_blob(), Err(PoseError::ModelLoad(_))));
    }

    #[test]
    fn test_file_model_round_trips_builtin_blob() {
        let path = std::env::temp_dir().join(format!("posepipe-model-{}.bin", std::process::id()));
        std::fs::write(&path, LUMINANCE_MODEL).unwrap();
        let model = FileModel::new(&path);
        let blob = model.model_blob().unwrap();
        assert!(model.graph_compiler().compile(&blob).is_ok());
        std::fs::remove_file(&path).unwrap();
    }
}
