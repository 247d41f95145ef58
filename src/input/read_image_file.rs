// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::PathBuf;

use image::{DynamicImage, ImageReader};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{Capture, CaptureError},
};

/// 从 `image:///path/to/photo.jpg` 读取照片，每个实例只产出一张
pub struct ImageFileInput {
  path: PathBuf,
  consumed: bool,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(CaptureError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(ImageFileInput {
      path: crate::url_to_path(url),
      consumed: false,
    })
  }
}

impl Capture for ImageFileInput {
  fn request_capture(&mut self) -> Result<DynamicImage, CaptureError> {
    if self.consumed {
      return Err(CaptureError::Exhausted);
    }
    self.consumed = true;

    info!("读取图像文件: {}", self.path.display());
    let image = ImageReader::open(&self.path)?.with_guessed_format()?.decode()?;
    info!("图像尺寸: {}x{}", image.width(), image.height());
    Ok(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn reads_png_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    RgbImage::from_pixel(5, 4, Rgb([1, 2, 3])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    let image = input.request_capture().unwrap();
    assert_eq!((image.width(), image.height()), (5, 4));
    assert!(matches!(
      input.request_capture(),
      Err(CaptureError::Exhausted)
    ));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert!(matches!(
      input.request_capture(),
      Err(CaptureError::IoError(_))
    ));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(CaptureError::SchemeMismatch(_))
    ));
  }
}
