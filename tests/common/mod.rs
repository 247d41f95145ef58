// 该文件是 Wenwu （文物识别） 项目的一部分。
// tests/common/mod.rs - 测试用的脚本化推理引擎
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

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, Rgb, RgbImage};
use wenwu::{
  config::LabelTable,
  model::{Deglare, Detector, InferenceEngine, InferenceError, ModelHandle},
  pipeline::PipelineContext,
  tensor::{Tensor, TensorShape},
};

pub const ANCHORS: usize = 64;
pub const DETECTOR_SIDE: usize = 32;
pub const DEGLARE_SIDE: usize = 16;

type Script = Box<dyn FnMut(usize, &Tensor) -> Result<Tensor, InferenceError> + Send>;

/// 按调用序号返回预设输出的引擎
pub struct ScriptedEngine {
  input_shape: TensorShape,
  calls: Arc<AtomicUsize>,
  script: Script,
}

impl ScriptedEngine {
  pub fn new(
    input_shape: TensorShape,
    script: impl FnMut(usize, &Tensor) -> Result<Tensor, InferenceError> + Send + 'static,
  ) -> Self {
    Self {
      input_shape,
      calls: Arc::default(),
      script: Box::new(script),
    }
  }

  pub fn calls(&self) -> Arc<AtomicUsize> {
    self.calls.clone()
  }
}

impl InferenceEngine for ScriptedEngine {
  fn input_shape(&self) -> &TensorShape {
    &self.input_shape
  }

  fn output_shape(&self) -> Option<&TensorShape> {
    None
  }

  fn execute(&mut self, input: &Tensor) -> Result<Tensor, InferenceError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    (self.script)(call, input)
  }
}

/// 检测输出 (1, 11, ANCHORS)：`hits` 中的 (类别序号, 置信度) 写在锚点 3，其余为 0.1
pub fn detector_output(hits: &[(usize, f32)]) -> Tensor {
  let channels = 4 + 7;
  let mut data = vec![0.1; channels * ANCHORS];
  for &(class, confidence) in hits {
    data[(4 + class) * ANCHORS + 3] = confidence;
  }
  Tensor::from_vec(TensorShape::new([1, channels, ANCHORS]), data).unwrap()
}

/// 第 0 次调用（原图）返回 `pass_a`，之后（消反光图）返回 `pass_b`
pub fn detector(pass_a: Vec<(usize, f32)>, pass_b: Vec<(usize, f32)>) -> ScriptedEngine {
  ScriptedEngine::new(
    TensorShape::nhwc(DETECTOR_SIDE, DETECTOR_SIDE, 3),
    move |call, _| {
      Ok(if call % 2 == 0 {
        detector_output(&pass_a)
      } else {
        detector_output(&pass_b)
      })
    },
  )
}

/// 输出全零（即中灰）图像的消反光引擎
pub fn gray_deglare() -> ScriptedEngine {
  ScriptedEngine::new(
    TensorShape::nhwc(DEGLARE_SIDE, DEGLARE_SIDE, 3),
    |_, input| Ok(Tensor::filled(input.shape().clone(), 0.0)),
  )
}

pub fn context(
  detector: ScriptedEngine,
  deglare: ScriptedEngine,
) -> PipelineContext<ScriptedEngine, ScriptedEngine> {
  PipelineContext::new(
    Some(Detector::new(
      ModelHandle::new("detector", detector),
      LabelTable::default(),
      0.7,
    )
    .unwrap()),
    Some(Deglare::new(ModelHandle::new("deglare", deglare)).unwrap()),
  )
}

pub fn photo() -> DynamicImage {
  DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 36, Rgb([200, 180, 150])))
}
