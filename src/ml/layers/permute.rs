// Axis permutation for rank 3 tensors, e.g. [batch, C, time]
// → [time, batch, C] between the convolution front end and
// the recurrent stack.

use burn::{module::Ignored, prelude::*};
use serde::{Deserialize, Serialize};

use crate::ml::error::ConstructionFailure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermuteConfig {
    pub dims: Vec<usize>,
}

impl PermuteConfig {
    pub fn new(dims: [usize; 3]) -> Self {
        Self { dims: dims.to_vec() }
    }

    pub fn init(&self) -> Result<Permute, ConstructionFailure> {
        let mut sorted = self.dims.clone();
        sorted.sort_unstable();
        if sorted != [0, 1, 2] {
            return Err(ConstructionFailure::Invalid(format!(
                "dims must be a permutation of [0, 1, 2], got {:?}",
                self.dims
            )));
        }
        Ok(Permute { dims: Ignored([self.dims[0], self.dims[1], self.dims[2]]) })
    }
}

#[derive(Module, Clone, Debug)]
pub struct Permute {
    pub dims: Ignored<[usize; 3]>,
}

impl Permute {
    /// Output axis i is input axis dims[i].
    pub fn forward<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let target = self.dims.0;
        // current[i] = input axis now sitting at position i
        let mut current = [0usize, 1, 2];
        let mut x = x;
        for i in 0..3 {
            if current[i] != target[i] {
                if let Some(j) = (i + 1..3).find(|&j| current[j] == target[i]) {
                    x = x.swap_dims(i, j);
                    current.swap(i, j);
                }
            }
        }
        x
    }

    pub fn config(&self) -> PermuteConfig {
        PermuteConfig::new(self.dims.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_permute_shape() {
        let device = Default::default();
        let p = PermuteConfig::new([2, 0, 1]).init().unwrap();
        let x = Tensor::<TestBackend, 3>::zeros([2, 3, 5], &device);
        assert_eq!(p.forward(x).dims(), [5, 2, 3]);
    }

    #[test]
    fn test_permute_values() {
        let device = Default::default();
        let p = PermuteConfig::new([1, 2, 0]).init().unwrap();
        // x[a][b][c] = 100a + 10b + c
        let data: Vec<f32> = (0..2)
            .flat_map(|a| (0..3).flat_map(move |b| (0..4).map(move |c| (100 * a + 10 * b + c) as f32)))
            .collect();
        let x = Tensor::<TestBackend, 3>::from_data(TensorData::new(data, [2, 3, 4]), &device);
        let y = p.forward(x);
        assert_eq!(y.dims(), [3, 4, 2]);
        // y[b][c][a] == x[a][b][c]
        let v: Vec<f32> = y.slice([2..3, 1..2, 1..2]).into_data().to_vec().unwrap();
        assert_eq!(v, vec![121.0]);
    }

    #[test]
    fn test_invalid_dims_rejected() {
        assert!(PermuteConfig { dims: vec![0, 0, 1] }.init().is_err());
        assert!(PermuteConfig { dims: vec![0, 1] }.init().is_err());
    }
}
