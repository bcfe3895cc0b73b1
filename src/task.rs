// 该文件是 Jinghu （镜湖） 项目的一部分。
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{thread, time::Duration};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{
  orchestrator::{Orchestrator, OrchestratorError, RunReport},
  output::Render,
  runner::TaskOptions,
};

#[async_trait]
pub trait Task<O>: Sized {
  type Error;
  async fn run_task(self, orchestrator: &Orchestrator, outputs: &[O]) -> Result<(), Self::Error>;
}

fn render_all<O, RE>(outputs: &[O], report: &RunReport) -> Result<(), RE>
where
  O: Render<Error = RE>,
{
  for output in outputs {
    output.render_result(&report.outcome.frame, &report.presentation)?;
  }
  Ok(())
}

#[derive(Default, Debug)]
pub struct OneShotTask {
  options: Option<TaskOptions>,
}

impl OneShotTask {
  pub fn with_options(mut self, options: Option<TaskOptions>) -> Self {
    self.options = options;
    self
  }
}

#[async_trait]
impl<O, RE> Task<O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<Error = RE> + Sync,
{
  type Error = anyhow::Error;

  async fn run_task(self, orchestrator: &Orchestrator, outputs: &[O]) -> Result<(), Self::Error> {
    info!("开始任务...");
    let report = orchestrator.run_selected(self.options).await?;
    info!("推理完成，耗时: {:.2?}", report.outcome.elapsed);
    render_all(outputs, &report)?;
    info!("渲染完成");

    Ok(())
  }
}

#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
  options: Option<TaskOptions>,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      times: 100,
      options: None,
    }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }

  pub fn with_options(mut self, options: Option<TaskOptions>) -> Self {
    self.options = options;
    self
  }
}

/// 前两次推理视为预热，不计入平均值
fn average_without_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > 2 { &times[2..] } else { times };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

#[async_trait]
impl<O, RE> Task<O> for RepeatShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<Error = RE> + Sync,
{
  type Error = anyhow::Error;

  async fn run_task(self, orchestrator: &Orchestrator, outputs: &[O]) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let report = orchestrator.run_selected(self.options.clone()).await?;
      info!("({})推理完成，耗时: {:.2?}", i, report.outcome.elapsed);
      render_all(outputs, &report)?;
      times.push(report.outcome.elapsed);
    }

    if let Some(average) = average_without_warmup(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interval: Duration,
  options: Option<TaskOptions>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_options(mut self, options: Option<TaskOptions>) -> Self {
    self.options = options;
    self
  }
}

#[async_trait]
impl<O, RE> Task<O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<Error = RE> + Sync,
{
  type Error = anyhow::Error;

  async fn run_task(self, orchestrator: &Orchestrator, outputs: &[O]) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(true, Ordering::Release);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    while !stop.load(Ordering::Acquire) {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);

      match orchestrator.run_selected(self.options.clone()).await {
        Ok(report) => {
          render_all(outputs, &report)?;
          info!("推理完成，耗时: {:.2?}", report.outcome.elapsed);
        }
        Err(OrchestratorError::Busy) => warn!("上一帧仍在推理, 跳过"),
        // 推理失败不终止循环，结果面板保留上一次的结果
        Err(OrchestratorError::Run(e)) => error!("第 {} 帧推理失败: {}", frame_index, e),
        Err(e) => return Err(e.into()),
      }

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if !self.interval.is_zero() {
        tokio::time::sleep(self.interval).await;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn warmup_runs_are_excluded() {
    let ms = Duration::from_millis;
    assert_eq!(average_without_warmup(&[]), None);
    assert_eq!(average_without_warmup(&[ms(10)]), Some(ms(10)));
    assert_eq!(average_without_warmup(&[ms(500), ms(300), ms(10), ms(30)]), Some(ms(20)));
  }
}
