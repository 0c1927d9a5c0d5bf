// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 推理任务
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

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 推理耗时统计
#[derive(Debug, Default, Clone)]
pub struct TimingStats {
  times: Vec<Duration>,
}

impl TimingStats {
  /// 计算平均值时跳过的预热次数
  pub const WARMUP: usize = 2;

  pub fn record(&mut self, elapsed: Duration) {
    self.times.push(elapsed);
  }

  pub fn count(&self) -> usize {
    self.times.len()
  }

  pub fn total(&self) -> Duration {
    self.times.iter().sum()
  }

  pub fn min(&self) -> Option<Duration> {
    self.times.iter().min().copied()
  }

  pub fn max(&self) -> Option<Duration> {
    self.times.iter().max().copied()
  }

  pub fn mean(&self) -> Option<Duration> {
    Self::mean_of(&self.times)
  }

  /// 跳过预热后的平均值；次数不足时为 None
  pub fn warm_mean(&self) -> Option<Duration> {
    if self.times.len() <= Self::WARMUP {
      return None;
    }
    Self::mean_of(&self.times[Self::WARMUP..])
  }

  fn mean_of(times: &[Duration]) -> Option<Duration> {
    if times.is_empty() {
      return None;
    }
    Some(times.iter().sum::<Duration>() / times.len() as u32)
  }

  pub fn report(&self) {
    let (Some(min), Some(max), Some(mean)) = (self.min(), self.max(), self.mean()) else {
      warn!("没有推理耗时记录");
      return;
    };
    warn!(
      "推理 {} 次, 总耗时: {:.2?}, 最短: {:.2?}, 最长: {:.2?}, 平均: {:.2?}",
      self.count(),
      self.total(),
      min,
      max,
      mean
    );
    if let Some(warm) = self.warm_mean() {
      warn!("预热后平均推理时间: {:.2?}", warm);
    }
  }
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理并统计耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub const DEFAULT_TIMES: usize = 5;

  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }

  pub fn times(&self) -> usize {
    self.times
  }

  /// 与 `run_task` 相同，但返回耗时统计
  pub fn run_with_stats<F, D, ME, RE, I, M, O>(
    &self,
    mut input: I,
    model: M,
    output: O,
  ) -> anyhow::Result<TimingStats>
  where
    ME: std::error::Error + Sync + Send + 'static,
    RE: std::error::Error + Sync + Send + 'static,
    I: Iterator<Item = F>,
    M: Model<Input = F, Output = D, Error = ME>,
    O: Render<F, D, Error = RE>,
  {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut stats = TimingStats::default();
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed());
      stats.record(elapsed);
    }

    stats.report();
    Ok(stats)
  }
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      times: Self::DEFAULT_TIMES,
    }
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    self.run_with_stats(input, model, output).map(|_| ())
  }
}
