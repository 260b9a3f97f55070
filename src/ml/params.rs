// ============================================================
// Layer 5 — Canonical Parameter Tensors
// ============================================================
// Engine-independent copies of learned parameters.
//
// Burn stores some weights in its own layout (a Linear keeps
// its weight as [in, out]). Model documents and checkpoints
// always use the canonical layout instead:
//
//   linear      W [out, in]      b [out]
//   convolution W [out, in, k]   b [out]
//   lstm        iW [4, H, I]     sW [4, H, H]   b [4, H]
//
// A disabled bias is an empty tensor (shape [0]), written to
// JSON as [].
//
// Each layer converts between its Burn Params and a ParamSet
// of ParamTensors; everything above the layer works only with
// ParamSets.

use burn::{module::Param, prelude::*};
use serde_json::Value;
use std::collections::HashMap;

use crate::ml::error::{ModelError, ModelResult};

/// A host-side f32 tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> ModelResult<Self> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(ModelError::TensorData(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                numel,
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    /// The placeholder for a disabled bias.
    pub fn empty() -> Self {
        Self { shape: vec![0], values: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy a device tensor to the host.
    pub fn from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> ModelResult<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ModelError::TensorData(format!("{e:?}")))?;
        Self::new(shape, values)
    }

    pub fn from_param<B: Backend, const D: usize>(param: &Param<Tensor<B, D>>) -> ModelResult<Self> {
        Self::from_tensor(param.val())
    }

    /// Upload to `device`. Fails if the rank is not `D`.
    pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> ModelResult<Tensor<B, D>> {
        if self.shape.len() != D {
            return Err(ModelError::TensorData(format!(
                "expected a rank {} tensor, got shape {:?}",
                D, self.shape
            )));
        }
        let data = TensorData::new(self.values.clone(), self.shape.clone());
        Ok(Tensor::from_data(data, device))
    }

    pub fn to_param<B: Backend, const D: usize>(&self, device: &B::Device) -> ModelResult<Param<Tensor<B, D>>> {
        Ok(Param::from_tensor(self.to_tensor(device)?))
    }

    /// Same values, new shape with the same element count.
    pub fn reshape(self, shape: Vec<usize>) -> ModelResult<Self> {
        Self::new(shape, self.values)
    }

    /// Swap the two axes of a rank 2 tensor.
    pub fn transpose(&self) -> ModelResult<Self> {
        let &[rows, cols] = self.shape.as_slice() else {
            return Err(ModelError::TensorData(format!(
                "cannot transpose shape {:?}",
                self.shape
            )));
        };
        let mut values = vec![0f32; self.values.len()];
        for r in 0..rows {
            for c in 0..cols {
                values[c * rows + r] = self.values[r * cols + c];
            }
        }
        Self::new(vec![cols, rows], values)
    }

    // ─── JSON ─────────────────────────────────────────────────────────────────

    /// Nested JSON arrays, outermost axis first.
    pub fn to_json(&self) -> Value {
        if self.is_empty() {
            return Value::Array(Vec::new());
        }
        fn nest(shape: &[usize], values: &[f32]) -> Value {
            match shape {
                [] => Value::from(values[0] as f64),
                [_] => Value::Array(values.iter().map(|&v| Value::from(v as f64)).collect()),
                [n, rest @ ..] => {
                    let stride: usize = rest.iter().product();
                    Value::Array(
                        (0..*n)
                            .map(|i| nest(rest, &values[i * stride..(i + 1) * stride]))
                            .collect(),
                    )
                }
            }
        }
        nest(&self.shape, &self.values)
    }

    /// Parse nested JSON arrays. The nesting must be rectangular.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let mut shape = Vec::new();
        let mut cursor = value;
        while let Value::Array(items) = cursor {
            shape.push(items.len());
            match items.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }
        if shape.is_empty() {
            return Err(ModelError::TensorData("tensor must be a JSON array".into()));
        }
        if shape.contains(&0) {
            return Ok(Self::empty());
        }

        let mut values = Vec::with_capacity(shape.iter().product());
        fn flatten(v: &Value, shape: &[usize], out: &mut Vec<f32>) -> ModelResult<()> {
            match (shape, v) {
                ([], Value::Number(n)) => {
                    let x = n
                        .as_f64()
                        .ok_or_else(|| ModelError::TensorData(format!("bad number {n}")))?;
                    out.push(x as f32);
                    Ok(())
                }
                ([len, rest @ ..], Value::Array(items)) if items.len() == *len => {
                    items.iter().try_for_each(|item| flatten(item, rest, out))
                }
                _ => Err(ModelError::TensorData("ragged or non-numeric tensor".into())),
            }
        }
        flatten(value, &shape, &mut values)?;
        Self::new(shape, values)
    }
}

// ─── ParamSet ─────────────────────────────────────────────────────────────────
/// An ordered name → tensor mapping.
///
/// Entries keep first-insertion order; `index` maps each name to
/// its position so lookups and replacements do not scan.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    entries: Vec<(String, ParamTensor)>,
    index:   HashMap<String, usize>,
}

impl PartialEq for ParamSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping first-insertion order.
    pub fn insert(&mut self, name: impl Into<String>, tensor: ParamTensor) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&pos) => self.entries[pos].1 = tensor,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, tensor));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.index.get(name).map(|&pos| &self.entries[pos].1)
    }

    /// Look up a parameter the layer cannot work without.
    pub fn require(&self, name: &str) -> ModelResult<&ParamTensor> {
        self.get(name)
            .ok_or_else(|| ModelError::TensorData(format!("missing parameter '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose name starts with `prefix.`, with the prefix removed.
    pub fn scoped(&self, prefix: &str) -> ParamSet {
        if prefix.is_empty() {
            return self.clone();
        }
        let dotted = format!("{prefix}.");
        self.entries
            .iter()
            .filter_map(|(n, t)| n.strip_prefix(&dotted).map(|rest| (rest.to_string(), t.clone())))
            .collect()
    }

    /// One set per scope in a single pass: `scope.rest` lands in
    /// the set of `scope` as `rest`. Scopes must not nest, except
    /// that a lone "" scope takes every entry.
    pub fn partition(&self, scopes: &[String]) -> Vec<ParamSet> {
        let slot: HashMap<&str, usize> = scopes
            .iter()
            .enumerate()
            .map(|(i, scope)| (scope.as_str(), i))
            .collect();
        let mut sets = vec![ParamSet::new(); scopes.len()];
        for (name, tensor) in &self.entries {
            let target = match slot.get("") {
                Some(&i) => Some((i, name.as_str())),
                None => name
                    .match_indices('.')
                    .find_map(|(dot, _)| slot.get(&name[..dot]).map(|&i| (i, &name[dot + 1..]))),
            };
            let Some((i, rest)) = target else { continue };
            if let Some(set) = sets.get_mut(i) {
                set.insert(rest, tensor.clone());
            }
        }
        sets
    }

    /// Copy every entry of `other` in under `prefix.`.
    pub fn extend_scoped(&mut self, prefix: &str, other: ParamSet) {
        for (name, tensor) in other.entries {
            self.insert(join(prefix, &name), tensor);
        }
    }
}

impl FromIterator<(String, ParamTensor)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (String, ParamTensor)>>(iter: I) -> Self {
        let mut set = ParamSet::new();
        for (name, tensor) in iter {
            set.insert(name, tensor);
        }
        set
    }
}

/// Dotted parameter path.
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

// ─── ParamVisitor ─────────────────────────────────────────────────────────────
/// Walks every learnable Param of a layer tree in a fixed order.
/// Used by the trainer for gradient norms and clipping.
pub trait ParamVisitor<B: Backend> {
    fn visit<const D: usize>(&mut self, param: &Param<Tensor<B, D>>);
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use serde_json::json;

    type TestBackend = NdArray;

    #[test]
    fn test_json_nesting_matches_shape() {
        let t = ParamTensor::new(vec![2, 3], vec![1., 2., 3., 4., 5., 6.]).unwrap();
        assert_eq!(t.to_json(), json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        assert_eq!(ParamTensor::from_json(&t.to_json()).unwrap(), t);
    }

    #[test]
    fn test_empty_bias() {
        let t = ParamTensor::from_json(&json!([])).unwrap();
        assert!(t.is_empty());
        assert_eq!(ParamTensor::empty().to_json(), json!([]));
    }

    #[test]
    fn test_ragged_json_rejected() {
        assert!(ParamTensor::from_json(&json!([[1.0, 2.0], [3.0]])).is_err());
        assert!(ParamTensor::from_json(&json!(3.0)).is_err());
    }

    #[test]
    fn test_transpose() {
        let t = ParamTensor::new(vec![2, 3], vec![1., 2., 3., 4., 5., 6.]).unwrap();
        let tt = t.transpose().unwrap();
        assert_eq!(tt.shape, vec![3, 2]);
        assert_eq!(tt.values, vec![1., 4., 2., 5., 3., 6.]);
    }

    #[test]
    fn test_tensor_round_trip() {
        let device = Default::default();
        let t = ParamTensor::new(vec![2, 2], vec![0.5, -1.25, 3.0, 1e-7]).unwrap();
        let tensor: Tensor<TestBackend, 2> = t.to_tensor(&device).unwrap();
        assert_eq!(ParamTensor::from_tensor(tensor).unwrap(), t);
        assert!(t.to_tensor::<TestBackend, 3>(&device).is_err());
    }

    #[test]
    fn test_scoped_and_extend() {
        let mut set = ParamSet::new();
        set.insert("0.W", ParamTensor::empty());
        set.insert("1.W", ParamTensor::empty());
        set.insert("1.b", ParamTensor::empty());
        let inner = set.scoped("1");
        assert_eq!(inner.names().collect::<Vec<_>>(), vec!["W", "b"]);

        let mut outer = ParamSet::new();
        outer.extend_scoped("encoder", inner);
        assert_eq!(outer.names().collect::<Vec<_>>(), vec!["encoder.W", "encoder.b"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut set = ParamSet::new();
        set.insert("a", ParamTensor::empty());
        set.insert("b", ParamTensor::empty());
        let w = ParamTensor::new(vec![1], vec![2.0]).unwrap();
        set.insert("a", w.clone());
        assert_eq!(set.len(), 2);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.get("a"), Some(&w));
        assert_eq!(set.get("c"), None);

        let same: ParamSet = vec![("a".to_string(), w), ("b".to_string(), ParamTensor::empty())]
            .into_iter()
            .collect();
        assert_eq!(set, same);
    }

    #[test]
    fn test_partition_by_leaf_scope() {
        let mut set = ParamSet::new();
        for name in ["0.W", "0.b", "2.0.iW", "2.0.sW", "2.1.W", "9.W"] {
            set.insert(name, ParamTensor::empty());
        }
        let scopes: Vec<String> = ["0", "2.0", "2.1"].iter().map(|s| s.to_string()).collect();
        let parts = set.partition(&scopes);
        let names: Vec<Vec<&str>> = parts.iter().map(|p| p.names().collect()).collect();
        assert_eq!(names, vec![vec!["W", "b"], vec!["iW", "sW"], vec!["W"]]);

        let whole = set.partition(&[String::new()]);
        assert_eq!(whole[0], set);
    }
}
