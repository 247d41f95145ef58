// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/model/generator.rs - 消反光模型与输出图像重建
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

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  model::{InferenceEngine, InferenceError, Model, ModelHandle, ModelLoadError},
  preprocess::TargetSize,
  tensor::{RGB_CHANNELS, Tensor},
};

#[derive(Error, Debug)]
pub enum ReconstructError {
  #[error("输出张量过小: 期望至少 {expected} 个元素, 实际 {actual} 个")]
  Undersized { expected: usize, actual: usize },
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidSize { width: u32, height: u32 },
}

/// 生成器输出值域约为 [-1, 1]，映射回 [0, 255]
fn to_byte(value: f32) -> u8 {
  ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

/// 将 (1, H, W, 3) 的生成器输出重建为不透明 RGBA 图像（行主序，自上而下）
pub fn reconstruct(output: &Tensor, width: u32, height: u32) -> Result<RgbaImage, ReconstructError> {
  let expected = (width as usize)
    .checked_mul(height as usize)
    .and_then(|n| n.checked_mul(RGB_CHANNELS))
    .filter(|&n| n > 0)
    .ok_or(ReconstructError::InvalidSize { width, height })?;

  let data = output.as_slice();
  if data.len() < expected {
    error!("无法转换消反光模型输出为图片: 期望 {} 个元素, 实际 {} 个", expected, data.len());
    return Err(ReconstructError::Undersized {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
  for rgb in data[..expected].chunks_exact(RGB_CHANNELS) {
    pixels.extend_from_slice(&[to_byte(rgb[0]), to_byte(rgb[1]), to_byte(rgb[2]), 255]);
  }

  debug!("消反光输出重建为 {}x{} 图像", width, height);
  RgbaImage::from_raw(width, height, pixels).ok_or(ReconstructError::InvalidSize { width, height })
}

/// 消反光（去眩光）生成模型
pub struct Deglare<E> {
  handle: ModelHandle<E>,
  input_size: TargetSize,
  output_size: TargetSize,
}

impl<E: InferenceEngine> Deglare<E> {
  /// 输出图像尺寸默认与输入一致；模型输入必须为 (1, H, W, 3)
  pub fn new(handle: ModelHandle<E>) -> Result<Self, ModelLoadError> {
    let input_size = handle.image_input_size()?;
    Ok(Self {
      handle,
      input_size,
      output_size: input_size,
    })
  }

  pub fn output_size(mut self, size: TargetSize) -> Self {
    self.output_size = size;
    self
  }

  pub fn reconstruct(&self, output: &Tensor) -> Result<RgbaImage, ReconstructError> {
    reconstruct(output, self.output_size.width, self.output_size.height)
  }
}

impl<E: InferenceEngine> Model for Deglare<E> {
  type Output = Tensor;
  type Error = InferenceError;

  fn input_size(&self) -> TargetSize {
    self.input_size
  }

  fn infer(&self, input: &Tensor) -> Result<Self::Output, Self::Error> {
    self.handle.run(input)
  }
}
