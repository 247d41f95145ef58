// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/model/rten_engine.rs - 基于 RTen 的推理引擎
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

use std::path::Path;

use rten::{Dimension, Model as RtenModel};
use rten_tensor::Tensor as RtenTensor;
use rten_tensor::prelude::*;
use tracing::debug;

use crate::{
  model::{InferenceEngine, InferenceError, LoadEngine, ModelLoadError},
  tensor::{Tensor, TensorShape},
};

const RTEN_NUM_INPUTS: usize = 1;

pub struct RtenEngine {
  model: RtenModel,
  name: String,
  input_shape: TensorShape,
  output_shape: Option<TensorShape>,
}

/// 用回退形状补全符号维度；模型声明的维数与预期不一致时视为无效模型
fn resolve_dims(
  dims: Option<Vec<Dimension>>,
  fallback: &TensorShape,
) -> Result<TensorShape, ModelLoadError> {
  match dims {
    Some(dims) if dims.len() == fallback.rank() => Ok(
      dims
        .iter()
        .zip(fallback.dims())
        .map(|(dim, &fallback)| match dim {
          Dimension::Fixed(n) => *n,
          Dimension::Symbolic(_) => fallback,
        })
        .collect(),
    ),
    Some(dims) => Err(ModelLoadError::ModelInvalid(format!(
      "模型声明的输入维数为 {}, 预期为 {} {}",
      dims.len(),
      fallback.rank(),
      fallback
    ))),
    None => {
      debug!("模型未声明输入形状，使用预期形状 {}", fallback);
      Ok(fallback.clone())
    }
  }
}

fn fixed_dims(dims: Option<Vec<Dimension>>) -> Option<TensorShape> {
  dims?
    .iter()
    .map(|dim| match dim {
      Dimension::Fixed(n) => Some(*n),
      Dimension::Symbolic(_) => None,
    })
    .collect::<Option<Vec<usize>>>()
    .map(TensorShape::from)
}

impl LoadEngine for RtenEngine {
  fn load_engine(path: &Path, fallback_input: &TensorShape) -> Result<Self, ModelLoadError> {
    let model = RtenModel::load_file(path)?;

    let input_ids = model.input_ids();
    if input_ids.len() != RTEN_NUM_INPUTS {
      return Err(ModelLoadError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RTEN_NUM_INPUTS,
        input_ids.len()
      )));
    }
    let output_id = *model
      .output_ids()
      .first()
      .ok_or_else(|| ModelLoadError::ModelInvalid("模型没有输出".to_string()))?;

    let input_shape = resolve_dims(
      model.node_info(input_ids[0]).and_then(|info| info.shape()),
      fallback_input,
    )?;
    let output_shape = fixed_dims(model.node_info(output_id).and_then(|info| info.shape()));
    debug!("RTen 模型输入形状: {}", input_shape);

    let name = path
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| "rten".to_string());

    Ok(Self {
      model,
      name,
      input_shape,
      output_shape,
    })
  }
}

impl InferenceEngine for RtenEngine {
  fn input_shape(&self) -> &TensorShape {
    &self.input_shape
  }

  fn output_shape(&self) -> Option<&TensorShape> {
    self.output_shape.as_ref()
  }

  fn execute(&mut self, input: &Tensor) -> Result<Tensor, InferenceError> {
    let input = RtenTensor::from_data(input.shape().dims(), input.as_slice().to_vec());
    let output = self
      .model
      .run_one(input.view().into(), None)
      .map_err(|e| InferenceError::execution(&self.name, e))?;

    let output: RtenTensor<f32> = output
      .try_into()
      .map_err(|_| InferenceError::OutputShape("模型输出不是 f32 张量".to_string()))?;
    let shape = TensorShape::new(output.shape().to_vec());
    Ok(Tensor::from_vec(shape, output.to_vec())?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn symbolic(name: &str) -> Dimension {
    Dimension::Symbolic(name.to_string())
  }

  #[test]
  fn fixed_dims_are_kept() {
    let declared = vec![
      Dimension::Fixed(1),
      Dimension::Fixed(320),
      Dimension::Fixed(480),
      Dimension::Fixed(3),
    ];
    let shape = resolve_dims(Some(declared), &TensorShape::nhwc(640, 640, 3)).unwrap();
    assert_eq!(shape, TensorShape::nhwc(320, 480, 3));
  }

  #[test]
  fn symbolic_dims_take_the_fallback() {
    let declared = vec![
      symbolic("batch"),
      symbolic("height"),
      symbolic("width"),
      Dimension::Fixed(3),
    ];
    let shape = resolve_dims(Some(declared), &TensorShape::nhwc(256, 256, 3)).unwrap();
    assert_eq!(shape, TensorShape::nhwc(256, 256, 3));

    let shape = resolve_dims(None, &TensorShape::nhwc(256, 256, 3)).unwrap();
    assert_eq!(shape, TensorShape::nhwc(256, 256, 3));
  }

  #[test]
  fn channels_first_declaration_keeps_its_own_dims() {
    let declared = vec![
      Dimension::Fixed(1),
      Dimension::Fixed(3),
      Dimension::Fixed(640),
      Dimension::Fixed(640),
    ];
    let shape = resolve_dims(Some(declared), &TensorShape::nhwc(640, 640, 3)).unwrap();
    assert_eq!(shape, TensorShape::new([1, 3, 640, 640]));
  }

  #[test]
  fn rank_mismatch_is_rejected() {
    let declared = vec![symbolic("height"), symbolic("width"), Dimension::Fixed(3)];
    assert!(matches!(
      resolve_dims(Some(declared), &TensorShape::nhwc(640, 640, 3)),
      Err(ModelLoadError::ModelInvalid(_))
    ));
  }

  #[test]
  fn output_shape_is_known_only_when_fully_fixed() {
    let declared = vec![Dimension::Fixed(1), Dimension::Fixed(11), Dimension::Fixed(8400)];
    assert_eq!(fixed_dims(Some(declared)), Some(TensorShape::new([1, 11, 8400])));

    let declared = vec![Dimension::Fixed(1), Dimension::Fixed(11), symbolic("anchors")];
    assert_eq!(fixed_dims(Some(declared)), None);
    assert_eq!(fixed_dims(None), None);
  }
}
