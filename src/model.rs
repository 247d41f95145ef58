// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/model.rs - 模型加载与推理适配
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  preprocess::TargetSize,
  tensor::{RGB_CHANNELS, Tensor, TensorError, TensorShape},
};

mod detector;
mod generator;
#[cfg(feature = "rten_engine")]
mod rten_engine;

pub use self::detector::{Detection, DetectionSet, Detector, UNKNOWN_LABEL, decode};
pub use self::generator::{Deglare, ReconstructError, reconstruct};
#[cfg(feature = "rten_engine")]
pub use self::rten_engine::RtenEngine;

/// 已加载模型的统一推理接口
pub trait Model {
  type Output;
  type Error;

  fn input_size(&self) -> TargetSize;
  fn infer(&self, input: &Tensor) -> Result<Self::Output, Self::Error>;
}

/// 底层推理引擎。每次 `execute` 都会改写引擎内部绑定的缓冲区，
/// 因此同一引擎不可并发调用，由 [`ModelHandle`] 负责串行化。
pub trait InferenceEngine: Send {
  fn input_shape(&self) -> &TensorShape;
  fn output_shape(&self) -> Option<&TensorShape>;
  fn execute(&mut self, input: &Tensor) -> Result<Tensor, InferenceError>;
}

/// 可从模型文件构造的推理引擎
pub trait LoadEngine: InferenceEngine + Sized {
  /// `fallback_input` 用于补全模型中未固定的输入维度
  fn load_engine(path: &Path, fallback_input: &TensorShape) -> Result<Self, ModelLoadError>;
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("找不到模型: {0}")]
  NotFound(String),
  #[error("模型加载错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[cfg(feature = "rten_engine")]
  #[error("RTen 模型加载错误: {0}")]
  RtenError(#[from] rten::LoadError),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型 {model} 输入形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    model: String,
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("模型输出形状无效: {0}")]
  OutputShape(String),
  #[error("模型 {model} 执行失败: {message}")]
  ExecutionFailed { model: String, message: String },
  #[error("模型 {0} 的句柄已损坏")]
  HandlePoisoned(String),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

impl InferenceError {
  pub fn execution(model: &str, message: impl ToString) -> Self {
    InferenceError::ExecutionFailed {
      model: model.to_string(),
      message: message.to_string(),
    }
  }
}

/// 已加载、已分配张量的模型实例。进程内长期持有，调用方之间共享只读引用；
/// 同一句柄上的 `run` 通过互斥锁串行执行。
pub struct ModelHandle<E> {
  name: String,
  input_shape: TensorShape,
  engine: Mutex<E>,
}

impl<E: InferenceEngine> ModelHandle<E> {
  pub fn new(name: impl Into<String>, engine: E) -> Self {
    let input_shape = engine.input_shape().clone();
    Self {
      name: name.into(),
      input_shape,
      engine: Mutex::new(engine),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn input_shape(&self) -> &TensorShape {
    &self.input_shape
  }

  /// 由声明的输入形状推出图像尺寸，只接受 `prepare` 产出的 (1, H, W, 3) 布局
  pub fn image_input_size(&self) -> Result<TargetSize, ModelLoadError> {
    match self.input_shape.dims() {
      &[1, height, width, RGB_CHANNELS] if height > 0 && width > 0 => {
        let height = u32::try_from(height).map_err(|_| self.layout_error())?;
        let width = u32::try_from(width).map_err(|_| self.layout_error())?;
        Ok(TargetSize::new(width, height))
      }
      _ => Err(self.layout_error()),
    }
  }

  fn layout_error(&self) -> ModelLoadError {
    error!("模型 {} 的输入形状 {} 不是 NHWC RGB 布局", self.name, self.input_shape);
    ModelLoadError::ModelInvalid(format!(
      "模型 {} 的输入形状应为 (1, H, W, {}), 实际为 {}",
      self.name, RGB_CHANNELS, self.input_shape
    ))
  }

  pub fn run(&self, input: &Tensor) -> Result<Tensor, InferenceError> {
    if input.shape() != &self.input_shape {
      error!(
        "模型 {} 输入形状不匹配: 期望 {}, 实际 {}",
        self.name,
        self.input_shape,
        input.shape()
      );
      return Err(InferenceError::ShapeMismatch {
        model: self.name.clone(),
        expected: self.input_shape.clone(),
        actual: input.shape().clone(),
      });
    }

    let mut engine = self
      .engine
      .lock()
      .map_err(|_| InferenceError::HandlePoisoned(self.name.clone()))?;

    debug!("执行模型 {} 推理", self.name);
    let now = std::time::Instant::now();
    let output = engine.execute(input)?;
    debug!(
      "模型 {} 推理完成，输出形状 {}，耗时: {:.2?}",
      self.name,
      output.shape(),
      now.elapsed()
    );

    Ok(output)
  }
}

/// 模型存储：将模型标识解析为可加载的文件路径
pub trait ModelStore {
  fn resolve(&self, id: &str) -> Result<PathBuf, ModelLoadError>;
}

/// 在目录中按 `<id>.<extension>` 查找模型文件
#[derive(Debug, Clone)]
pub struct DirectoryModelStore {
  root: PathBuf,
  extension: String,
}

impl DirectoryModelStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      extension: "rten".to_string(),
    }
  }
}

impl ModelStore for DirectoryModelStore {
  fn resolve(&self, id: &str) -> Result<PathBuf, ModelLoadError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
      return Err(ModelLoadError::ModelPathError(format!("模型标识无效: {}", id)));
    }
    let path = self.root.join(format!("{}.{}", id, self.extension));
    if path.is_file() {
      Ok(path)
    } else {
      Err(ModelLoadError::NotFound(id.to_string()))
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelLocation {
  Path(PathBuf),
  Id(String),
}

/// 模型构建器，支持 `rten:///path/model.rten` 与 `model://detector-v2` 两种地址
#[derive(Debug, Clone)]
pub struct ModelBuilder {
  location: ModelLocation,
  input_size: TargetSize,
}

const RTEN_SCHEME: &str = "rten";
const MODEL_ID_SCHEME: &str = "model";

impl FromUrl for ModelBuilder {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let location = match url.scheme() {
      RTEN_SCHEME => ModelLocation::Path(crate::url_to_path(url)),
      MODEL_ID_SCHEME => {
        let id = url
          .host_str()
          .filter(|host| !host.is_empty())
          .ok_or_else(|| ModelLoadError::ModelPathError(format!("缺少模型标识: {}", url)))?;
        ModelLocation::Id(id.to_string())
      }
      scheme => {
        return Err(ModelLoadError::ModelPathError(format!(
          "模型路径必须使用 {} 或 {} 方案, 实际为 {}",
          RTEN_SCHEME, MODEL_ID_SCHEME, scheme
        )));
      }
    };

    Ok(ModelBuilder {
      location,
      input_size: TargetSize::square(640),
    })
  }
}

impl ModelBuilder {
  pub fn from_path(path: impl Into<PathBuf>) -> Self {
    Self {
      location: ModelLocation::Path(path.into()),
      input_size: TargetSize::square(640),
    }
  }

  pub fn from_id(id: impl Into<String>) -> Self {
    Self {
      location: ModelLocation::Id(id.into()),
      input_size: TargetSize::square(640),
    }
  }

  pub fn input_size(mut self, size: TargetSize) -> Self {
    self.input_size = size;
    self
  }

  fn resolve(&self, store: &dyn ModelStore) -> Result<PathBuf, ModelLoadError> {
    match &self.location {
      ModelLocation::Path(path) if path.is_file() => Ok(path.clone()),
      ModelLocation::Path(path) => Err(ModelLoadError::NotFound(path.display().to_string())),
      ModelLocation::Id(id) => store.resolve(id),
    }
  }

  pub fn build<E: LoadEngine>(
    self,
    name: &str,
    store: &dyn ModelStore,
  ) -> Result<ModelHandle<E>, ModelLoadError> {
    let path = self.resolve(store)?;
    info!("加载模型文件: {}", path.display());
    let size = std::fs::metadata(&path)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let engine = E::load_engine(&path, &self.input_size.tensor_shape())?;
    info!("{} 模型加载成功", name);
    info!("{} 模型输入尺寸: {}", name, engine.input_shape());
    match engine.output_shape() {
      Some(shape) => info!("{} 模型输出尺寸: {}", name, shape),
      None => info!("{} 模型输出尺寸: 动态", name),
    }

    Ok(ModelHandle::new(name, engine))
  }
}
