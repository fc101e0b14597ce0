use crate::error::KernelError;
use std::borrow::Cow;

/// Lightweight shaped view over a borrowed or owned buffer.
#[derive(Debug, Clone)]
pub struct TensorView<'a, T: Clone> {
    pub data: Cow<'a, [T]>,
    pub shape: Cow<'a, [usize]>,
}

impl<'a, T: Clone> TensorView<'a, T> {
    pub fn new(data: &'a [T], shape: &'a [usize]) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            data: Cow::Borrowed(data),
            shape: Cow::Borrowed(shape),
        }
    }

    pub fn from_owned(data: Vec<T>, shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            data: Cow::Owned(data),
            shape: Cow::Owned(shape),
        }
    }

    pub fn from_slice(data: &'a [T], shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            data: Cow::Borrowed(data),
            shape: Cow::Owned(shape),
        }
    }

    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self, dim: usize) -> usize {
        self.shape[dim]
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    F32,
    I8,
    I32,
    Bool,
}

/// Semantic dimension order of a rank-4 tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Nhwc,
    Nchw,
}

/// Affine quantization parameters: real = scale * (quantized - zero_point).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParam {
    pub scale: f64,
    pub zero_point: i32,
}

#[derive(Debug, Clone)]
pub enum TensorData {
    F32(Vec<f32>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

/// Owning, dtype-tagged tensor used at the operator boundary. Weights live for
/// the model lifetime; activations for one invocation.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Vec<usize>,
    layout: Layout,
    data: TensorData,
    quant: Vec<QuantParam>,
}

impl Tensor {
    pub fn new_f32(shape: Vec<usize>, layout: Layout, data: Vec<f32>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            shape,
            layout,
            data: TensorData::F32(data),
            quant: Vec::new(),
        }
    }

    pub fn new_i8(shape: Vec<usize>, layout: Layout, data: Vec<i8>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            shape,
            layout,
            data: TensorData::I8(data),
            quant: Vec::new(),
        }
    }

    pub fn new_i32(shape: Vec<usize>, layout: Layout, data: Vec<i32>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            shape,
            layout,
            data: TensorData::I32(data),
            quant: Vec::new(),
        }
    }

    pub fn new_bool(shape: Vec<usize>, layout: Layout, data: Vec<bool>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            shape,
            layout,
            data: TensorData::Bool(data),
            quant: Vec::new(),
        }
    }

    /// Zero-filled output tensor.
    pub fn zeroed(dtype: DataType, shape: Vec<usize>, layout: Layout) -> Self {
        let len: usize = shape.iter().product();
        let data = match dtype {
            DataType::F32 => TensorData::F32(vec![0.0; len]),
            DataType::I8 => TensorData::I8(vec![0; len]),
            DataType::I32 => TensorData::I32(vec![0; len]),
            DataType::Bool => TensorData::Bool(vec![false; len]),
        };
        Self {
            shape,
            layout,
            data,
            quant: Vec::new(),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self.data {
            TensorData::F32(_) => DataType::F32,
            TensorData::I8(_) => DataType::I8,
            TensorData::I32(_) => DataType::I32,
            TensorData::Bool(_) => DataType::Bool,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    pub fn height(&self) -> usize {
        match self.layout {
            Layout::Nhwc => self.shape[1],
            Layout::Nchw => self.shape[2],
        }
    }

    pub fn width(&self) -> usize {
        match self.layout {
            Layout::Nhwc => self.shape[2],
            Layout::Nchw => self.shape[3],
        }
    }

    pub fn channel(&self) -> usize {
        match self.layout {
            Layout::Nhwc => self.shape[3],
            Layout::Nchw => self.shape[1],
        }
    }

    pub fn as_f32(&self) -> Result<&[f32], KernelError> {
        match &self.data {
            TensorData::F32(v) => Ok(v),
            _ => Err(KernelError::precondition("expected f32 tensor")),
        }
    }

    pub fn as_i8(&self) -> Result<&[i8], KernelError> {
        match &self.data {
            TensorData::I8(v) => Ok(v),
            _ => Err(KernelError::precondition("expected int8 tensor")),
        }
    }

    pub fn as_i32(&self) -> Result<&[i32], KernelError> {
        match &self.data {
            TensorData::I32(v) => Ok(v),
            _ => Err(KernelError::precondition("expected int32 tensor")),
        }
    }

    pub fn as_bool(&self) -> Result<&[bool], KernelError> {
        match &self.data {
            TensorData::Bool(v) => Ok(v),
            _ => Err(KernelError::precondition("expected bool tensor")),
        }
    }

    pub fn as_bool_mut(&mut self) -> Result<&mut [bool], KernelError> {
        match &mut self.data {
            TensorData::Bool(v) => Ok(v),
            _ => Err(KernelError::precondition("expected bool tensor")),
        }
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32], KernelError> {
        match &mut self.data {
            TensorData::F32(v) => Ok(v),
            _ => Err(KernelError::precondition("expected f32 tensor")),
        }
    }

    pub fn as_i8_mut(&mut self) -> Result<&mut [i8], KernelError> {
        match &mut self.data {
            TensorData::I8(v) => Ok(v),
            _ => Err(KernelError::precondition("expected int8 tensor")),
        }
    }

    pub fn add_quant_param(&mut self, q: QuantParam) {
        self.quant.push(q);
    }

    pub fn quant_params(&self) -> &[QuantParam] {
        &self.quant
    }

    /// Valid counts are 0 (unquantized), 1 (per-tensor) or one per channel.
    pub fn check_quant_params(&self, channel_count: usize) -> Result<(), KernelError> {
        match self.quant.len() {
            0 | 1 => Ok(()),
            n if n == channel_count => Ok(()),
            n => Err(KernelError::precondition(format!(
                "quant param count {} matches neither 1 nor channel count {}",
                n, channel_count
            ))),
        }
    }

    pub fn per_tensor_quant(&self) -> Result<QuantParam, KernelError> {
        self.quant
            .first()
            .copied()
            .ok_or_else(|| KernelError::precondition("tensor has no quantization parameters"))
    }
}
