// 该文件是 Luyan （路眼） 项目的一部分。
// src/model.rs - 检测模型
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
  sync::MutexGuard,
};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Blob};

mod darknet_cfg;
mod labels;
mod palette;
mod pool;

#[cfg(feature = "onnx_runtime")]
mod onnx;

pub use self::darknet_cfg::{DarknetConfig, DarknetConfigError};
pub use self::labels::ClassLabels;
pub use self::palette::{PALETTE_SEED, Palette};
pub use self::pool::{BackendPool, PoisonedHandle};

#[cfg(feature = "onnx_runtime")]
pub use self::onnx::{OrtBackend, OrtBackendError};

/// 网络输入边长
pub const DETECTOR_INPUT_SIZE: u32 = 416;

/// 一个输出层的原始结果，按行存储，每行是一个候选框
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArray {
  pub name: String,
  pub rows: usize,
  pub cols: usize,
  pub data: Vec<f32>,
}

impl OutputArray {
  /// 按最后一维展开，前面的维度全部并入行数
  pub fn from_dims(name: impl Into<String>, dims: &[i64], data: Vec<f32>) -> Self {
    let cols = dims.last().copied().unwrap_or(0).max(0) as usize;
    let rows = if cols == 0 { 0 } else { data.len() / cols };
    Self {
      name: name.into(),
      rows,
      cols,
      data,
    }
  }

  pub fn row(&self, idx: usize) -> &[f32] {
    &self.data[idx * self.cols..(idx + 1) * self.cols]
  }

  pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
    (0..self.rows).map(move |i| self.row(i))
  }
}

/// 推理后端：持有网络并执行一次前向推理
pub trait InferenceBackend: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 没有下游消费者的层，即网络的输出层，加载时确定
  fn output_layer_names(&self) -> &[String];

  /// 返回的数组与 `output_layer_names` 顺序一致
  fn forward(&mut self, blob: &Blob) -> Result<Vec<OutputArray>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("推理句柄 {0} 已损坏")]
  PoisonedHandle(usize),
  #[error("输出层 {layer} 的行宽为 {cols}，与 {classes} 个类别不匹配")]
  UnexpectedLayout {
    layer: String,
    cols: usize,
    classes: usize,
  },
}

impl From<PoisonedHandle> for InferenceError {
  fn from(err: PoisonedHandle) -> Self {
    InferenceError::PoisonedHandle(err.0)
  }
}

/// 模型资源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Weights,
  Config,
  Labels,
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResourceKind::Weights => write!(f, "权重"),
      ResourceKind::Config => write!(f, "网络配置"),
      ResourceKind::Labels => write!(f, "类别标签"),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("缺少模型{kind}文件: {}", path.display())]
  MissingResource { kind: ResourceKind, path: PathBuf },
  #[error("读取类别标签失败: {0}")]
  LabelsError(std::io::Error),
  #[error("类别标签为空")]
  EmptyLabels,
  #[error("网络配置错误: {0}")]
  ConfigError(#[from] DarknetConfigError),
  #[error("推理后端加载失败: {0}")]
  BackendError(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("至少需要一个推理句柄")]
  NoHandles,
  #[error("推理句柄 {0} 已损坏")]
  PoisonedHandle(usize),
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: &'static str, value: String },
}

/// 三个模型资源的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResources {
  pub weights: PathBuf,
  pub config: PathBuf,
  pub labels: PathBuf,
}

impl ModelResources {
  /// 三个资源必须同时存在
  pub fn verify(&self) -> Result<(), ModelError> {
    for (kind, path) in [
      (ResourceKind::Weights, &self.weights),
      (ResourceKind::Config, &self.config),
      (ResourceKind::Labels, &self.labels),
    ] {
      if !path.is_file() {
        return Err(ModelError::MissingResource {
          kind,
          path: path.clone(),
        });
      }
    }
    Ok(())
  }
}

/// 计算设备选择，加载时决定一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  /// 有加速设备则使用，否则退回 CPU
  #[default]
  Auto,
  Cpu,
  Cuda,
}

impl FromStr for Device {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(Device::Auto),
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda),
      _ => Err(ModelError::InvalidParameter {
        key: "device",
        value: s.to_string(),
      }),
    }
  }
}

/// 加载完成后只读的检测模型
pub struct DetectorModel<B> {
  labels: ClassLabels,
  palette: Palette,
  output_layer_names: Vec<String>,
  input_size: u32,
  pool: BackendPool<B>,
}

impl<B: InferenceBackend> DetectorModel<B> {
  /// 用已加载的推理句柄组装模型，输出层名称在这里解析并缓存
  pub fn from_parts(labels: ClassLabels, handles: Vec<B>) -> Result<Self, ModelError> {
    if labels.is_empty() {
      return Err(ModelError::EmptyLabels);
    }
    let pool = BackendPool::new(handles).ok_or(ModelError::NoHandles)?;
    let output_layer_names = pool
      .first()
      .map_err(|e| ModelError::PoisonedHandle(e.0))?
      .output_layer_names()
      .to_vec();
    debug!("输出层: {:?}", output_layer_names);

    let palette = Palette::seeded(labels.len());
    Ok(Self {
      labels,
      palette,
      output_layer_names,
      input_size: DETECTOR_INPUT_SIZE,
      pool,
    })
  }

  pub fn labels(&self) -> &ClassLabels {
    &self.labels
  }

  pub fn palette(&self) -> &Palette {
    &self.palette
  }

  pub fn output_layer_names(&self) -> &[String] {
    &self.output_layer_names
  }

  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  pub fn workers(&self) -> usize {
    self.pool.len()
  }

  /// 借出一个推理句柄
  pub fn checkout(&self) -> Result<MutexGuard<'_, B>, InferenceError> {
    Ok(self.pool.checkout()?)
  }

  /// 借出句柄并执行一次前向推理
  pub fn forward(&self, blob: &Blob) -> Result<Vec<OutputArray>, InferenceError> {
    let mut handle = self.checkout()?;
    handle
      .forward(blob)
      .map_err(|e| InferenceError::Backend(Box::new(e)))
  }
}

const DETECTOR_MODEL_SCHEME: &str = "yolo";

/// 从 URL 构建检测模型
///
/// `yolo:///models/yolov4.onnx?config=/models/yolov4.cfg&labels=/models/coco.names&workers=2&device=auto`
#[derive(Debug, Clone)]
pub struct DetectorModelBuilder {
  resources: ModelResources,
  workers: usize,
  device: Device,
}

impl FromUrlWithScheme for DetectorModelBuilder {
  const SCHEME: &'static str = DETECTOR_MODEL_SCHEME;
}

impl FromUrl for DetectorModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let mut config = None;
    let mut labels = None;
    let mut workers = 1usize;
    let mut device = Device::default();

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "config" => config = Some(PathBuf::from(value.as_ref())),
        "labels" => labels = Some(PathBuf::from(value.as_ref())),
        "workers" => {
          workers = value
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| ModelError::InvalidParameter {
              key: "workers",
              value: value.to_string(),
            })?
        }
        "device" => device = value.parse()?,
        other => warn!("忽略未知参数: {}", other),
      }
    }

    // 查询参数已由 query_pairs 解码，路径需要单独解码
    let weights = urlencoding::decode(url.path()).map_err(|_| ModelError::InvalidParameter {
      key: "path",
      value: url.path().to_string(),
    })?;

    Ok(Self {
      resources: ModelResources {
        weights: PathBuf::from(weights.as_ref()),
        config: config.ok_or(ModelError::MissingParameter("config"))?,
        labels: labels.ok_or(ModelError::MissingParameter("labels"))?,
      },
      workers,
      device,
    })
  }
}

impl DetectorModelBuilder {
  pub fn new(resources: ModelResources) -> Self {
    Self {
      resources,
      workers: 1,
      device: Device::default(),
    }
  }

  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn resources(&self) -> &ModelResources {
    &self.resources
  }

  /// 校验资源、读取标签与网络配置，再用 `load` 为每个工作线程加载一个句柄
  pub fn build_with<B, E, F>(self, mut load: F) -> Result<DetectorModel<B>, ModelError>
  where
    B: InferenceBackend,
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut(&Path, Device) -> Result<B, E>,
  {
    self.resources.verify()?;

    let labels = ClassLabels::from_file(&self.resources.labels).map_err(ModelError::LabelsError)?;
    info!("加载类别标签: {} 个", labels.len());

    let cfg = DarknetConfig::from_file(&self.resources.config)?;
    check_config(&cfg, &labels);

    info!(
      "加载模型文件: {} ({} 个推理句柄)",
      self.resources.weights.display(),
      self.workers
    );
    let handles = (0..self.workers)
      .map(|_| load(&self.resources.weights, self.device))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| ModelError::BackendError(Box::new(e)))?;

    let model = DetectorModel::from_parts(labels, handles)?;
    info!("模型加载完成");
    Ok(model)
  }

  #[cfg(feature = "onnx_runtime")]
  pub fn build(self) -> Result<DetectorModel<OrtBackend>, ModelError> {
    self.build_with(OrtBackend::load)
  }
}

fn check_config(cfg: &DarknetConfig, labels: &ClassLabels) {
  if cfg.width != DETECTOR_INPUT_SIZE || cfg.height != DETECTOR_INPUT_SIZE {
    warn!(
      "网络配置输入尺寸为 {}x{}，推理仍使用 {}x{}",
      cfg.width, cfg.height, DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE
    );
  }
  for (head, &classes) in cfg.yolo_classes.iter().enumerate() {
    if classes != labels.len() {
      warn!(
        "检测头 {} 声明 {} 个类别，标签文件有 {} 个",
        head,
        classes,
        labels.len()
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Error)]
  #[error("never")]
  struct Never;

  struct Fixed {
    names: Vec<String>,
  }

  impl InferenceBackend for Fixed {
    type Error = Never;

    fn output_layer_names(&self) -> &[String] {
      &self.names
    }

    fn forward(&mut self, _blob: &Blob) -> Result<Vec<OutputArray>, Self::Error> {
      Ok(vec![OutputArray::from_dims("out", &[1, 2, 6], vec![0.0; 12])])
    }
  }

  fn fixed() -> Fixed {
    Fixed {
      names: vec!["yolo_139".into(), "yolo_150".into()],
    }
  }

  fn write_resources(dir: &Path) -> ModelResources {
    let resources = ModelResources {
      weights: dir.join("yolov4.onnx"),
      config: dir.join("yolov4.cfg"),
      labels: dir.join("coco.names"),
    };
    std::fs::write(&resources.weights, b"onnx").unwrap();
    std::fs::write(&resources.config, "[net]\nwidth=416\nheight=416\n[yolo]\nclasses=2\n").unwrap();
    std::fs::write(&resources.labels, "person\ncar\n").unwrap();
    resources
  }

  #[test]
  fn output_array_flattens_leading_dims() {
    let arr = OutputArray::from_dims("o", &[1, 3, 7], (0..21).map(|v| v as f32).collect());
    assert_eq!((arr.rows, arr.cols), (3, 7));
    assert_eq!(arr.row(2)[0], 14.0);
    assert_eq!(arr.iter_rows().count(), 3);
  }

  #[test]
  fn each_missing_resource_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let resources = write_resources(dir.path());

    for kind in [ResourceKind::Weights, ResourceKind::Config, ResourceKind::Labels] {
      let mut broken = resources.clone();
      match kind {
        ResourceKind::Weights => broken.weights = dir.path().join("nope.onnx"),
        ResourceKind::Config => broken.config = dir.path().join("nope.cfg"),
        ResourceKind::Labels => broken.labels = dir.path().join("nope.names"),
      }
      let err = DetectorModelBuilder::new(broken)
        .build_with(|_, _| Ok::<_, Never>(fixed()))
        .err()
        .unwrap();
      match err {
        ModelError::MissingResource { kind: k, .. } => assert_eq!(k, kind),
        other => panic!("unexpected error: {other}"),
      }
    }
  }

  #[test]
  fn builds_one_handle_per_worker_and_caches_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let resources = write_resources(dir.path());
    let mut loads = 0;
    let model = DetectorModelBuilder::new(resources)
      .workers(3)
      .build_with(|_, _| {
        loads += 1;
        Ok::<_, Never>(fixed())
      })
      .unwrap();

    assert_eq!(loads, 3);
    assert_eq!(model.workers(), 3);
    assert_eq!(model.labels().name(1), Some("car"));
    assert_eq!(model.palette().len(), 2);
    assert_eq!(model.output_layer_names(), ["yolo_139", "yolo_150"]);
  }

  #[test]
  fn url_carries_all_resources() {
    let url = Url::parse(
      "yolo:///m/yolov4.onnx?config=/m/yolov4.cfg&labels=/m/coco.names&workers=4&device=cpu",
    )
    .unwrap();
    let builder = DetectorModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.resources().weights, PathBuf::from("/m/yolov4.onnx"));
    assert_eq!(builder.resources().labels, PathBuf::from("/m/coco.names"));
    assert_eq!(builder.workers, 4);
    assert_eq!(builder.device, Device::Cpu);
  }

  #[test]
  fn percent_encoded_paths_are_decoded() {
    let url = Url::parse(
      "yolo:///my%20models/yolov4.onnx?config=/my%20models/yolov4.cfg&labels=/my models/coco.names",
    )
    .unwrap();
    let builder = DetectorModelBuilder::from_url(&url).unwrap();
    let resources = builder.resources();
    assert_eq!(resources.weights, PathBuf::from("/my models/yolov4.onnx"));
    assert_eq!(resources.config, PathBuf::from("/my models/yolov4.cfg"));
    assert_eq!(resources.labels, PathBuf::from("/my models/coco.names"));
  }

  #[test]
  fn weights_path_must_be_utf8() {
    let url = Url::parse("yolo:///m/%FF.onnx?config=/m/a.cfg&labels=/m/a.names").unwrap();
    assert!(matches!(
      DetectorModelBuilder::from_url(&url),
      Err(ModelError::InvalidParameter { key: "path", .. })
    ));
  }

  #[test]
  fn url_without_labels_is_rejected() {
    let url = Url::parse("yolo:///m/yolov4.onnx?config=/m/yolov4.cfg").unwrap();
    assert!(matches!(
      DetectorModelBuilder::from_url(&url),
      Err(ModelError::MissingParameter("labels"))
    ));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("file:///m/yolov4.onnx").unwrap();
    assert!(matches!(
      DetectorModelBuilder::from_url(&url),
      Err(ModelError::SchemeMismatch { .. })
    ));
  }
}
