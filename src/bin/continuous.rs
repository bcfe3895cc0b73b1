// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/bin/continuous.rs - 持续推理程序
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

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use jinghu::{
  args::{OptionsArgs, SessionArgs, build_orchestrator, build_outputs},
  task::{ContinuousTask, Task},
};

/// Jinghu 持续推理，按 Ctrl-C 退出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub session: SessionArgs,

  /// 模型 ID
  #[arg(long, value_name = "MODEL")]
  pub model: String,

  /// 摄像头设备 ID
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<String>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 两次推理之间的间隔
  #[arg(long, value_name = "MILLISECONDS", default_value_t = 0)]
  pub interval_ms: u64,

  #[command(flatten)]
  pub options: OptionsArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.session.load_config().await?;
  let orchestrator = build_orchestrator(&config)?;
  let outputs = build_outputs(&config)?;

  orchestrator.initialize().await?;
  info!("设备配置: {}", orchestrator.pipeline_cache().device_config());

  orchestrator.start_camera(args.device.as_deref()).await?;
  orchestrator.select_model(&args.model).await?;

  let result = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_interval(Duration::from_millis(args.interval_ms))
    .with_options(args.options.task_options())
    .run_task(&orchestrator, &outputs)
    .await;

  orchestrator.shutdown().await;
  result
}
