// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/preprocess.rs - 图像预处理（缩放、去除 Alpha、归一化）
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

use image::{GenericImageView, Rgba, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error};

use crate::tensor::{RGB_CHANNELS, Tensor, TensorError, TensorShape};

/// 模型输入的目标尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
  pub width: u32,
  pub height: u32,
}

impl TargetSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub const fn square(side: u32) -> Self {
    Self::new(side, side)
  }

  /// 对应的 NHWC 张量形状 (1, H, W, 3)
  pub fn tensor_shape(&self) -> TensorShape {
    TensorShape::nhwc(self.height as usize, self.width as usize, RGB_CHANNELS)
  }

  pub fn rgb_byte_count(&self) -> usize {
    self.width as usize * self.height as usize * RGB_CHANNELS
  }
}

impl fmt::Display for TargetSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像为空: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("目标尺寸无效: {0}")]
  InvalidTargetSize(TargetSize),
  #[error("RGB 数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  ByteCountMismatch { expected: usize, actual: usize },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 将图像拉伸到 `size`（不保持宽高比），去除 Alpha 通道，并归一化为 [0, 1] 的 NHWC 张量
pub fn prepare<I>(image: &I, size: TargetSize) -> Result<Tensor, PreprocessError>
where
  I: GenericImageView<Pixel = Rgba<u8>>,
{
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    error!("图像为空，无法预处理");
    return Err(PreprocessError::EmptyImage { width, height });
  }
  if size.width == 0 || size.height == 0 {
    return Err(PreprocessError::InvalidTargetSize(size));
  }

  // 单次三角滤波重采样，模型训练时即按拉伸后的图像输入
  let resized = image::imageops::resize(image, size.width, size.height, FilterType::Triangle);
  debug!("图像缩放成功: {}x{} -> {}", width, height, size);

  let rgb: Vec<u8> = resized
    .pixels()
    .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
    .collect();
  debug!("获取 RGB 数据成功，数据长度: {}", rgb.len());

  normalize(&rgb, size)
}

fn normalize(rgb: &[u8], size: TargetSize) -> Result<Tensor, PreprocessError> {
  let expected = size.rgb_byte_count();
  if rgb.len() != expected {
    error!("数据长度不匹配，预期: {}，实际: {}", expected, rgb.len());
    return Err(PreprocessError::ByteCountMismatch {
      expected,
      actual: rgb.len(),
    });
  }

  let data = rgb.iter().map(|&b| b as f32 / 255.0).collect();
  Ok(Tensor::from_vec(size.tensor_shape(), data)?)
}
