pub mod ops;

pub use ops::TensorOps;

use crate::core::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

}

/// Row-major `f32` tensor living in host memory.
///
/// Everything the service hands back to callers passes through this type:
/// device tensors are copied over with [`Tensor::from_candle`] and then
/// sliced and reshaped into plain nested vectors for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            anyhow::bail!(
                "tensor data has {} elements but shape {:?} needs {}",
                data.len(),
                shape.dims(),
                shape.numel()
            );
        }
        Ok(Self { data, shape })
    }

    pub fn vector(data: Vec<f32>) -> Self {
        let shape = Shape::new(vec![data.len()]);
        Self { data, shape }
    }

    pub fn from_candle(t: &candle_core::Tensor) -> Result<Self> {
        let shape = Shape::from_slice(t.dims());
        let data = t
            .to_dtype(candle_core::DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Self::new(data, shape)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    fn matrix_dims(&self) -> Result<(usize, usize)> {
        match self.shape.dims() {
            [rows, cols] => Ok((*rows, *cols)),
            dims => anyhow::bail!("expected a 2-D tensor, got shape {:?}", dims),
        }
    }

    pub fn row(&self, idx: usize) -> Result<&[f32]> {
        let (rows, cols) = self.matrix_dims()?;
        if idx >= rows {
            anyhow::bail!("row {} out of range for {} rows", idx, rows);
        }
        Ok(&self.data[idx * cols..(idx + 1) * cols])
    }

    pub fn to_rows(&self) -> Result<Vec<Vec<f32>>> {
        let (rows, cols) = self.matrix_dims()?;
        if cols == 0 {
            return Ok(vec![Vec::new(); rows]);
        }
        Ok(self.data.chunks(cols).map(|c| c.to_vec()).collect())
    }
}
