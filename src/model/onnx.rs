// 该文件是 Luyan （路眼） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider},
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::Blob,
  model::{Device, InferenceBackend, OutputArray},
};

#[derive(Error, Debug)]
pub enum OrtBackendError {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型没有输入")]
  NoInput,
  #[error("模型没有输出")]
  NoOutput,
  #[error("指定了 CUDA 设备，但当前环境不可用")]
  CudaUnavailable,
}

/// 一个 ONNX Runtime 会话，即一个推理句柄
pub struct OrtBackend {
  session: Session,
  input_name: String,
  output_names: Vec<String>,
}

impl OrtBackend {
  pub fn load(path: &Path, device: Device) -> Result<Self, OrtBackendError> {
    let cuda = CUDAExecutionProvider::default();
    let use_cuda = match device {
      Device::Cpu => false,
      Device::Cuda => {
        if !cuda.is_available()? {
          return Err(OrtBackendError::CudaUnavailable);
        }
        true
      }
      Device::Auto => cuda.is_available().unwrap_or_else(|e| {
        warn!("查询 CUDA 可用性失败: {}", e);
        false
      }),
    };

    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let builder = if use_cuda {
      info!("使用 CUDA 推理");
      builder.with_execution_providers([cuda.build().error_on_failure()])?
    } else {
      info!("使用 CPU 推理");
      builder.with_execution_providers([CPUExecutionProvider::default().build()])?
    };
    let session = builder.commit_from_file(path)?;

    let input_name = session
      .inputs
      .first()
      .map(|i| i.name.clone())
      .ok_or(OrtBackendError::NoInput)?;
    let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
    if output_names.is_empty() {
      return Err(OrtBackendError::NoOutput);
    }

    debug!("模型输入: {}", input_name);
    debug!("模型输出: {:?}", output_names);

    Ok(Self {
      session,
      input_name,
      output_names,
    })
  }
}

impl InferenceBackend for OrtBackend {
  type Error = OrtBackendError;

  fn output_layer_names(&self) -> &[String] {
    &self.output_names
  }

  fn forward(&mut self, blob: &Blob) -> Result<Vec<OutputArray>, Self::Error> {
    let tensor = Tensor::from_array((blob.shape(), blob.as_slice().to_vec().into_boxed_slice()))?;
    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor])?;

    let mut arrays = Vec::with_capacity(self.output_names.len());
    for name in &self.output_names {
      let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
      let dims: Vec<i64> = shape.iter().copied().collect();
      debug!("输出层 {}: {:?}", name, dims);
      arrays.push(OutputArray::from_dims(name.clone(), &dims, data.to_vec()));
    }

    Ok(arrays)
  }
}
