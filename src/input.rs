// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/input.rs - 图像采集输入
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

use image::DynamicImage;
use thiserror::Error;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("相机权限被拒绝")]
  Denied,
  #[error("没有可用的图像")]
  Exhausted,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 采集一张照片；权限被拒绝时返回 [`CaptureError::Denied`]
pub trait Capture {
  fn request_capture(&mut self) -> Result<DynamicImage, CaptureError>;
}

/// 内存中已有的单张照片，取走一次后即耗尽
#[derive(Debug, Clone, Default)]
pub struct StillCapture {
  image: Option<DynamicImage>,
}

impl StillCapture {
  pub fn new(image: DynamicImage) -> Self {
    Self { image: Some(image) }
  }
}

impl Capture for StillCapture {
  fn request_capture(&mut self) -> Result<DynamicImage, CaptureError> {
    self.image.take().ok_or(CaptureError::Exhausted)
  }
}

/// 未获授权的相机
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedCapture;

impl Capture for DeniedCapture {
  fn request_capture(&mut self) -> Result<DynamicImage, CaptureError> {
    Err(CaptureError::Denied)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn still_capture_yields_once() {
    let mut capture = StillCapture::new(DynamicImage::ImageRgb8(RgbImage::new(3, 2)));
    assert_eq!(capture.request_capture().unwrap().width(), 3);
    assert!(matches!(
      capture.request_capture(),
      Err(CaptureError::Exhausted)
    ));
  }

  #[test]
  fn denied_capture_reports_denied() {
    assert!(matches!(
      DeniedCapture.request_capture(),
      Err(CaptureError::Denied)
    ));
  }
}
