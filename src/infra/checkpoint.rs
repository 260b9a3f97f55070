// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights as safetensors, one file
// per completed epoch:
//
//   workdir/
//     config.json               ← model config + training section
//     weights_1.safetensors     ← weights after epoch 1
//     weights_2.safetensors
//     ...
//
// "Latest" is simply the highest N on disk; there is no
// pointer file to keep in sync.
//
// Tensors are stored as little-endian F32 in canonical layout
// (see ml::params). The metadata entry `param_order` records
// the export order, which the shape-based fallback relies on.
//
// Loading aligns the saved names to the target model:
//   1. exact names
//   2. strip a uniform wrapper prefix ("module.", "wrapped.")
//      from the saved side, the target side, or both
//   3. positional matching within groups of equal shape
//
// Reference: safetensors format (huggingface/safetensors)
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use std::{
    cmp::Ordering,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use burn::prelude::*;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};

use crate::ml::{
    error::ModelError,
    model::{BasecallModel, ModelConfig},
    params::{ParamSet, ParamTensor},
};

const CONFIG_FILE: &str = "config.json";
const ORDER_KEY:   &str = "param_order";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint does not match the model; unmatched parameters: {unmatched:?}")]
    Mismatch { unmatched: Vec<String> },

    #[error("invalid checkpoint: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Manages the checkpoints and config of one training run.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn weights_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("weights_{epoch}.safetensors"))
    }

    /// Highest N over weights_N.safetensors, or 0 when there are none.
    pub fn latest_epoch(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| parse_epoch(&e.file_name().to_string_lossy()))
            .max()
            .unwrap_or(0)
    }

    // ─── Weights ──────────────────────────────────────────────────────────────

    pub fn save<B: Backend>(&self, model: &BasecallModel<B>, epoch: usize) -> Result<PathBuf, CheckpointError> {
        self.save_params(&model.export_params()?, epoch)
    }

    /// Write a parameter set. Empty tensors (disabled biases) are skipped.
    pub fn save_params(&self, params: &ParamSet, epoch: usize) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        if params.is_empty() {
            tracing::warn!("Saving epoch {} with no parameters", epoch);
        }

        let stored: Vec<(&str, &ParamTensor, Vec<u8>)> = params
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(name, t)| (name, t, t.values.iter().flat_map(|v| v.to_le_bytes()).collect()))
            .collect();

        let mut views = Vec::with_capacity(stored.len());
        for (name, tensor, bytes) in &stored {
            views.push((name.to_string(), TensorView::new(Dtype::F32, tensor.shape.clone(), bytes)?));
        }

        let order: Vec<&str> = stored.iter().map(|(name, _, _)| *name).collect();
        let order = serde_json::to_string(&order).map_err(|e| CheckpointError::Format(e.to_string()))?;
        let metadata = Some(HashMap::from([(ORDER_KEY.to_string(), order)]));

        let bytes = safetensors::tensor::serialize(views, &metadata)?;
        let path = self.weights_path(epoch);
        fs::write(&path, bytes)?;

        tracing::debug!("Saved {} tensors to '{}'", stored.len(), path.display());
        Ok(path)
    }

    /// Read every tensor of a checkpoint in saved order.
    pub fn read(&self, epoch: usize) -> Result<ParamSet, CheckpointError> {
        let path = self.weights_path(epoch);
        let bytes = fs::read(&path)?;
        let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
        let tensors = SafeTensors::deserialize(&bytes)?;

        let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
        let recorded = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(ORDER_KEY))
            .and_then(|order| serde_json::from_str::<Vec<String>>(order).ok());
        match recorded {
            Some(order) if order.len() == names.len() => names = order,
            _ => names.sort_by(|a, b| natural_cmp(a, b)),
        }

        let mut params = ParamSet::new();
        for name in names {
            let view = tensors.tensor(&name)?;
            if view.dtype() != Dtype::F32 {
                return Err(CheckpointError::Format(format!(
                    "tensor '{}' has dtype {:?}, expected F32",
                    name,
                    view.dtype()
                )));
            }
            let values = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            params.insert(name, ParamTensor::new(view.shape().to_vec(), values)?);
        }
        Ok(params)
    }

    /// Load epoch `epoch` into `model`, aligning names as needed.
    pub fn load_and_align<B: Backend>(
        &self,
        epoch:  usize,
        model:  BasecallModel<B>,
        device: &B::Device,
    ) -> Result<BasecallModel<B>, CheckpointError> {
        let saved   = self.read(epoch)?;
        let target  = model.export_params()?;
        let aligned = align(&saved, &target)?;
        tracing::info!("Loaded {} tensors from epoch {}", aligned.len(), epoch);
        Ok(model.import_params(&aligned, device)?)
    }

    // ─── Config ───────────────────────────────────────────────────────────────

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn save_config(&self, cfg: &ModelConfig) -> Result<()> {
        let path = self.config_path();
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<ModelConfig> {
        load_config(&self.config_path())
    }
}

/// Read a model config from an explicit path.
pub fn load_config(path: &Path) -> Result<ModelConfig> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Invalid model config in '{}'", path.display()))
}

fn parse_epoch(file_name: &str) -> Option<usize> {
    let digits = file_name.strip_prefix("weights_")?.strip_suffix(".safetensors")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Compare names with digit runs ordered numerically ("2.W" < "10.W").
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None)    => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = a.iter().take_while(|c| c.is_ascii_digit()).count();
                let nb = b.iter().take_while(|c| c.is_ascii_digit()).count();
                let (da, db) = (trim_zeros(&a[..na]), trim_zeros(&b[..nb]));
                let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = &a[na..];
                b = &b[nb..];
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let start = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len());
    &digits[start..]
}

// ─── Alignment ────────────────────────────────────────────────────────────────

/// Map saved tensors onto the target's names. The result holds
/// every non-empty target parameter, keyed by its target name.
pub fn align(saved: &ParamSet, target: &ParamSet) -> Result<ParamSet, CheckpointError> {
    let wanted: Vec<(&str, &ParamTensor)> = target.iter().filter(|(_, t)| !t.is_empty()).collect();

    // ── Exact and prefix-stripped names ──
    let saved_names: Vec<&str> = saved.names().collect();
    let target_names: Vec<&str> = wanted.iter().map(|(n, _)| *n).collect();
    let saved_prefix  = uniform_prefix(&saved_names);
    let target_prefix = uniform_prefix(&target_names);

    let mut attempts = vec![(None, None)];
    if saved_prefix.is_some() {
        attempts.push((saved_prefix, None));
    }
    if target_prefix.is_some() {
        attempts.push((None, target_prefix));
    }
    if saved_prefix.is_some() && target_prefix.is_some() {
        attempts.push((saved_prefix, target_prefix));
    }

    for (strip_saved, strip_target) in attempts {
        let renamed: HashMap<&str, &ParamTensor> = saved
            .iter()
            .map(|(n, t)| (strip(n, strip_saved), t))
            .collect();
        let matched: Option<ParamSet> = wanted
            .iter()
            .map(|(name, t)| {
                renamed
                    .get(strip(name, strip_target))
                    .filter(|s| s.shape == t.shape)
                    .map(|s| (name.to_string(), (*s).clone()))
            })
            .collect();
        if let Some(matched) = matched {
            if strip_saved.is_some() || strip_target.is_some() {
                tracing::info!(
                    "Matched checkpoint after stripping prefixes {:?} / {:?}",
                    strip_saved,
                    strip_target
                );
            }
            return Ok(matched);
        }
    }

    // ── Positional matching within shape groups ──
    tracing::warn!("Checkpoint names do not match the model; falling back to shape order");
    let mut saved_groups: HashMap<&[usize], Vec<&ParamTensor>> = HashMap::new();
    for (_, t) in saved.iter().filter(|(_, t)| !t.is_empty()) {
        saved_groups.entry(t.shape.as_slice()).or_default().push(t);
    }
    let mut target_groups: HashMap<&[usize], Vec<&str>> = HashMap::new();
    for (name, t) in &wanted {
        target_groups.entry(t.shape.as_slice()).or_default().push(name);
    }

    let mut unmatched: Vec<String> = target_groups
        .iter()
        .filter(|(shape, names)| saved_groups.get(*shape).map(Vec::len) != Some(names.len()))
        .flat_map(|(_, names)| names.iter().map(|n| n.to_string()))
        .collect();
    if !unmatched.is_empty() {
        unmatched.sort_by(|a, b| natural_cmp(a, b));
        return Err(CheckpointError::Mismatch { unmatched });
    }

    let mut cursor: HashMap<&[usize], usize> = HashMap::new();
    let mut aligned = ParamSet::new();
    for (name, t) in &wanted {
        let shape = t.shape.as_slice();
        let k = cursor.entry(shape).or_insert(0);
        if let Some(source) = saved_groups.get(shape).and_then(|g| g.get(*k)) {
            aligned.insert(*name, (*source).clone());
        }
        *k += 1;
    }
    Ok(aligned)
}

/// The first dotted segment, when every name shares it and has more after it.
fn uniform_prefix<'a>(names: &[&'a str]) -> Option<&'a str> {
    let first = names.first()?.split_once('.')?.0;
    names
        .iter()
        .all(|n| n.split_once('.').is_some_and(|(head, _)| head == first))
        .then_some(first)
}

fn strip<'a>(name: &'a str, prefix: Option<&str>) -> &'a str {
    match prefix {
        Some(p) => name
            .strip_prefix(p)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name),
        None => name,
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: &[usize], fill: f32) -> ParamTensor {
        let n = shape.iter().product();
        ParamTensor::new(shape.to_vec(), vec![fill; n]).unwrap()
    }

    fn set(entries: &[(&str, &[usize], f32)]) -> ParamSet {
        entries
            .iter()
            .map(|(n, s, v)| (n.to_string(), tensor(s, *v)))
            .collect()
    }

    #[test]
    fn test_latest_epoch_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CheckpointManager::new(dir.path()).latest_epoch(), 0);
        assert_eq!(CheckpointManager::new(dir.path().join("missing")).latest_epoch(), 0);
    }

    #[test]
    fn test_latest_epoch_picks_numeric_max() {
        let dir = tempfile::tempdir().unwrap();
        for n in [3, 1, 7, 2] {
            fs::write(dir.path().join(format!("weights_{n}.safetensors")), b"").unwrap();
        }
        fs::write(dir.path().join("weights_x.safetensors"), b"").unwrap();
        fs::write(dir.path().join("weights_9.tar"), b"").unwrap();
        assert_eq!(CheckpointManager::new(dir.path()).latest_epoch(), 7);
    }

    #[test]
    fn test_save_and_read_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let mut params = set(&[("10.W", &[2, 3], 1.0), ("2.W", &[3], 2.0)]);
        params.insert("2.b", ParamTensor::empty());

        manager.save_params(&params, 4).unwrap();
        assert_eq!(manager.latest_epoch(), 4);
        let back = manager.read(4).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["10.W", "2.W"]);
        assert_eq!(back.get("10.W"), params.get("10.W"));
    }

    #[test]
    fn test_natural_order() {
        let mut names = vec!["10.W", "2.W", "1.b", "1.W"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["1.W", "1.b", "2.W", "10.W"]);
    }

    #[test]
    fn test_align_exact() {
        let saved  = set(&[("layer.w", &[2], 1.0)]);
        let target = set(&[("layer.w", &[2], 0.0)]);
        assert_eq!(align(&saved, &target).unwrap(), saved);
    }

    #[test]
    fn test_align_strips_wrapper_prefix() {
        let saved  = set(&[("wrapped.layer.w", &[2], 1.0), ("wrapped.layer.b", &[1], 2.0)]);
        let target = set(&[("layer.w", &[2], 0.0), ("layer.b", &[1], 0.0)]);
        let aligned = align(&saved, &target).unwrap();
        assert_eq!(aligned.get("layer.w"), saved.get("wrapped.layer.w"));
        assert_eq!(aligned.get("layer.b"), saved.get("wrapped.layer.b"));
    }

    #[test]
    fn test_align_strips_both_prefixes() {
        let saved  = set(&[("module.0.W", &[2], 1.0), ("module.1.W", &[3], 2.0)]);
        let target = set(&[("encoder.0.W", &[2], 0.0), ("encoder.1.W", &[3], 0.0)]);
        let aligned = align(&saved, &target).unwrap();
        assert_eq!(aligned.get("encoder.1.W"), saved.get("module.1.W"));
    }

    #[test]
    fn test_align_by_shape_position() {
        let saved = set(&[("a", &[2, 2], 1.0), ("b", &[3], 2.0), ("c", &[2, 2], 3.0)]);
        let target = set(&[("x", &[2, 2], 0.0), ("y", &[2, 2], 0.0), ("z", &[3], 0.0)]);
        let aligned = align(&saved, &target).unwrap();
        assert_eq!(aligned.get("x"), saved.get("a"));
        assert_eq!(aligned.get("y"), saved.get("c"));
        assert_eq!(aligned.get("z"), saved.get("b"));
    }

    #[test]
    fn test_align_ambiguous_group_fails() {
        let saved  = set(&[("a", &[2, 2], 1.0)]);
        let target = set(&[("x", &[2, 2], 0.0), ("y", &[2, 2], 0.0), ("z", &[5], 0.0)]);
        match align(&saved, &target) {
            Err(CheckpointError::Mismatch { unmatched }) => {
                assert_eq!(unmatched, vec!["x", "y", "z"]);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_targets_are_not_required() {
        let saved = set(&[("0.W", &[2], 1.0)]);
        let mut target = set(&[("0.W", &[2], 0.0)]);
        target.insert("0.b", ParamTensor::empty());
        let aligned = align(&saved, &target).unwrap();
        assert_eq!(aligned.len(), 1);
    }
}
