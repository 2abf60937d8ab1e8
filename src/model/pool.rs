// 该文件是 Luyan （路眼） 项目的一部分。
// src/model/pool.rs - 推理句柄池
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

use std::sync::{
  Mutex, MutexGuard, TryLockError,
  atomic::{AtomicUsize, Ordering},
};

use tracing::debug;

/// 一组独立的推理句柄。每次前向推理先借出一个句柄，借用期间独占。
pub struct BackendPool<B> {
  handles: Box<[Mutex<B>]>,
  next: AtomicUsize,
}

/// 句柄在上一次借用期间发生 panic
#[derive(Debug, Clone, Copy)]
pub struct PoisonedHandle(pub usize);

impl<B> BackendPool<B> {
  /// 句柄列表不能为空
  pub fn new(handles: Vec<B>) -> Option<Self> {
    if handles.is_empty() {
      return None;
    }
    Some(Self {
      handles: handles.into_iter().map(Mutex::new).collect(),
      next: AtomicUsize::new(0),
    })
  }

  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }

  /// 借出一个空闲句柄；全部被占用时阻塞等待轮询到的那一个
  pub fn checkout(&self) -> Result<MutexGuard<'_, B>, PoisonedHandle> {
    let n = self.handles.len();
    let start = self.next.fetch_add(1, Ordering::Relaxed) % n;

    for offset in 0..n {
      let idx = (start + offset) % n;
      match self.handles[idx].try_lock() {
        Ok(guard) => {
          debug!("借出推理句柄 {}", idx);
          return Ok(guard);
        }
        Err(TryLockError::WouldBlock) => continue,
        Err(TryLockError::Poisoned(_)) => return Err(PoisonedHandle(idx)),
      }
    }

    debug!("推理句柄全部占用，等待句柄 {}", start);
    self.handles[start].lock().map_err(|_| PoisonedHandle(start))
  }

  /// 直接访问第一个句柄，只用于加载期间读取元信息
  pub(crate) fn first(&self) -> Result<MutexGuard<'_, B>, PoisonedHandle> {
    self.handles[0].lock().map_err(|_| PoisonedHandle(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_pool_is_rejected() {
    assert!(BackendPool::<u8>::new(Vec::new()).is_none());
  }

  #[test]
  fn busy_handle_is_skipped() {
    let pool = BackendPool::new(vec![1u8, 2u8]).unwrap();
    let first = pool.checkout().unwrap();
    let second = pool.checkout().unwrap();
    assert_ne!(*first, *second);
  }

  #[test]
  fn concurrent_checkouts_are_exclusive() {
    let pool = std::sync::Arc::new(BackendPool::new(vec![0u64; 3]).unwrap());
    let threads: Vec<_> = (0..6)
      .map(|_| {
        let pool = pool.clone();
        std::thread::spawn(move || {
          for _ in 0..100 {
            let mut handle = pool.checkout().unwrap();
            *handle += 1;
          }
        })
      })
      .collect();
    for t in threads {
      t.join().unwrap();
    }
    let total: u64 = (0..3).map(|i| *pool.handles[i].lock().unwrap()).sum();
    assert_eq!(total, 600);
  }
}
