//! Model parameters are stored with Burn's `CompactRecorder`. The checkpoint path is the only
//! compatibility key: a checkpoint is assumed to match the architecture it is loaded into, and
//! a mismatch is reported as [`Error::Checkpoint`](crate::Error::Checkpoint).

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    record::{CompactRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::{Error, Result};

/// Persist the parameters of `model` at `path`
pub fn save<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::Checkpoint(format!("unable to create {}: {}", parent.display(), e))
        })?;
    }

    CompactRecorder::new()
        .record(model.clone().into_record(), recorder_path(path))
        .map_err(|e| {
            Error::Checkpoint(format!("unable to save model to {}: {}", path.display(), e))
        })?;

    info!("Saved checkpoint to {}", path.display());

    Ok(())
}

/// Restore parameters saved at `path` into `model`.
///
/// Every parameter must keep its shape. When one does not (for example a classification head
/// trained for a different number of classes) the load fails and no loaded state is returned.
pub fn load<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let record = CompactRecorder::new()
        .load(recorder_path(path), device)
        .map_err(|e| {
            Error::Checkpoint(format!(
                "unable to load model weights from {}: {}",
                path.display(),
                e
            ))
        })?;

    let expected = parameter_shapes(&model);
    let loaded = model.load_record(record);
    let found = parameter_shapes(&loaded);

    if expected.len() != found.len() {
        return Err(Error::Checkpoint(format!(
            "{} holds {} parameters but the model has {}",
            path.display(),
            found.len(),
            expected.len()
        )));
    }

    if let Some((index, (want, got))) = expected
        .iter()
        .zip(found.iter())
        .enumerate()
        .find(|(_, (want, got))| want != got)
    {
        return Err(Error::Checkpoint(format!(
            "parameter {} in {} has shape {:?}, expected {:?}",
            index,
            path.display(),
            got,
            want
        )));
    }

    info!("Loaded checkpoint from {}", path.display());

    Ok(loaded)
}

/// The file the recorder actually writes for a checkpoint path
pub fn file_path(path: &Path) -> PathBuf {
    with_suffix(path, ".mpk.gz")
}

/// Where the model configuration for a checkpoint path is kept
pub fn config_path(path: &Path) -> PathBuf {
    with_suffix(path, ".json")
}

/// Where training statistics for a checkpoint path are kept
pub fn metrics_path(path: &Path) -> PathBuf {
    with_suffix(path, ".metrics.json")
}

/// The recorder swaps the final extension for its own, so `model.v1` must reach it as
/// `model.v1.mpk` to be written to `model.v1.mpk.gz`
fn recorder_path(path: &Path) -> PathBuf {
    with_suffix(path, ".mpk")
}

/// Append `suffix` to the full file name; a dot in the name is not treated as an extension
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);

    PathBuf::from(name)
}

/// Collects parameter shapes in module traversal order
#[derive(Default)]
struct Shapes {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for Shapes {
    fn visit_float<const D: usize>(&mut self, _id: &ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

fn parameter_shapes<B: Backend, M: Module<B>>(model: &M) -> Vec<Vec<usize>> {
    let mut visitor = Shapes::default();
    model.visit(&mut visitor);

    visitor.shapes
}
