use super::Tensor;
#[cfg(test)]
use super::Shape;
use crate::core::Result;

pub trait TensorOps {
    fn softmax(&self, dim: usize) -> Result<Tensor>;
    fn scale(&self, factor: f32) -> Tensor;
    fn sum(&self) -> f32;
    fn max(&self) -> f32;
    fn argmax(&self) -> Option<usize>;
    /// Indices and values of the `k` largest entries of a 1-D tensor,
    /// largest first. Equal values keep ascending index order.
    fn top_k(&self, k: usize) -> Result<Vec<(usize, f32)>>;
}

impl TensorOps for Tensor {
    fn softmax(&self, dim: usize) -> Result<Tensor> {
        let dims = self.shape.dims();
        if dim >= dims.len() {
            anyhow::bail!("Softmax: invalid dimension");
        }

        let dim_size = dims[dim];
        let outer: usize = dims[..dim].iter().product();
        let inner: usize = dims[dim + 1..].iter().product();

        let mut result = self.data.clone();

        for o in 0..outer {
            for i in 0..inner {
                let start = o * dim_size * inner + i;

                let max = (0..dim_size)
                    .map(|d| self.data[start + d * inner])
                    .fold(f32::NEG_INFINITY, |a, b| a.max(b));

                let sum: f32 = (0..dim_size)
                    .map(|d| (self.data[start + d * inner] - max).exp())
                    .sum();

                for d in 0..dim_size {
                    result[start + d * inner] =
                        (self.data[start + d * inner] - max).exp() / sum;
                }
            }
        }

        Tensor::new(result, self.shape.clone())
    }

    fn scale(&self, factor: f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&x| x * factor).collect(),
            shape: self.shape.clone(),
        }
    }

    fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    fn max(&self) -> f32 {
        self.data.iter().cloned().fold(f32::NEG_INFINITY, |a, b| a.max(b))
    }

    fn argmax(&self) -> Option<usize> {
        self.data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i)
    }

    fn top_k(&self, k: usize) -> Result<Vec<(usize, f32)>> {
        if self.shape.dims().len() != 1 {
            anyhow::bail!("top_k expects a 1-D tensor, got shape {:?}", self.shape.dims());
        }
        let k = k.min(self.data.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let order = |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
        let mut indexed: Vec<(usize, f32)> = self.data.iter().copied().enumerate().collect();
        if k < indexed.len() {
            indexed.select_nth_unstable_by(k - 1, order);
            indexed.truncate(k);
        }
        indexed.sort_by(order);
        Ok(indexed)
    }
}
