// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/tensor.rs - 张量定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt;

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("数据长度不匹配: 形状 {shape} 期望 {expected} 个元素, 实际 {actual} 个")]
  LengthMismatch {
    shape: TensorShape,
    expected: usize,
    actual: usize,
  },
  #[error("张量维度不匹配: 期望 {expected} 维, 实际形状 {shape}")]
  RankMismatch { expected: usize, shape: TensorShape },
}

/// 张量形状，例如 (1, H, W, 3) 或检测输出 (1, 通道, 锚点)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorShape(Box<[usize]>);

impl TensorShape {
  pub fn new(dims: impl Into<Box<[usize]>>) -> Self {
    Self(dims.into())
  }

  /// 单张 NHWC 图像张量的形状
  pub fn nhwc(height: usize, width: usize, channels: usize) -> Self {
    Self::new([1, height, width, channels])
  }

  pub fn dims(&self) -> &[usize] {
    &self.0
  }

  pub fn rank(&self) -> usize {
    self.0.len()
  }

  pub fn element_count(&self) -> usize {
    self.0.iter().product()
  }
}

impl From<Vec<usize>> for TensorShape {
  fn from(dims: Vec<usize>) -> Self {
    Self(dims.into_boxed_slice())
  }
}

impl FromIterator<usize> for TensorShape {
  fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "(")?;
    for (i, dim) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", dim)?;
    }
    write!(f, ")")
  }
}

/// 与模型交换的 f32 张量。创建后不可变，元素数量恒等于形状各维之积。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn from_vec(shape: TensorShape, data: Vec<f32>) -> Result<Self, TensorError> {
    let expected = shape.element_count();
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn filled(shape: TensorShape, value: f32) -> Self {
    let data = vec![value; shape.element_count()].into_boxed_slice();
    Self { shape, data }
  }

  pub fn shape(&self) -> &TensorShape {
    &self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 以固定维数 N 查看张量，维数不符时返回错误
  pub fn view<const N: usize>(&self) -> Result<TensorView<'_, N>, TensorError> {
    let dims: [usize; N] =
      self
        .shape
        .dims()
        .try_into()
        .map_err(|_| TensorError::RankMismatch {
          expected: N,
          shape: self.shape.clone(),
        })?;

    let mut strides = [1usize; N];
    for axis in (0..N.saturating_sub(1)).rev() {
      strides[axis] = strides[axis + 1] * dims[axis + 1];
    }

    Ok(TensorView {
      dims,
      strides,
      data: &self.data,
    })
  }
}

/// 行主序、带边界检查的只读张量视图
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a, const N: usize> {
  dims: [usize; N],
  strides: [usize; N],
  data: &'a [f32],
}

impl<'a, const N: usize> TensorView<'a, N> {
  pub fn dims(&self) -> [usize; N] {
    self.dims
  }

  pub fn get(&self, index: [usize; N]) -> Option<f32> {
    let mut offset = 0;
    for axis in 0..N {
      if index[axis] >= self.dims[axis] {
        return None;
      }
      offset += index[axis] * self.strides[axis];
    }
    self.data.get(offset).copied()
  }

  /// 最后一维上的连续切片，`prefix` 为前 N-1 维的索引
  pub fn lane(&self, prefix: [usize; N]) -> Option<&'a [f32]> {
    if N == 0 {
      return None;
    }
    let mut offset = 0;
    for axis in 0..N - 1 {
      if prefix[axis] >= self.dims[axis] {
        return None;
      }
      offset += prefix[axis] * self.strides[axis];
    }
    self.data.get(offset..offset + self.dims[N - 1])
  }
}
