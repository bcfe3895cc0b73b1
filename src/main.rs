// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use jinghu::{
  args::{OptionsArgs, SessionArgs, build_orchestrator, build_outputs},
  model::{HubClient, ModelDefinition, Task as ModelTask, hub::DEFAULT_SUGGESTION_LIMIT, hub::format_count},
  task::{OneShotTask, RepeatShotTask, Task},
};

/// Jinghu 视觉模型演示程序
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub session: SessionArgs,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 对摄像头当前画面执行推理
  Run {
    /// 模型 ID
    #[arg(long, value_name = "MODEL")]
    model: String,
    /// 摄像头设备 ID
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,
    /// 重复推理次数，大于 1 时输出平均耗时
    #[arg(long, value_name = "TIMES", default_value_t = 1)]
    repeat: usize,
    #[command(flatten)]
    options: OptionsArgs,
  },
  /// 管理模型
  #[command(subcommand)]
  Models(ModelsCommand),
  /// 列出视频输入设备
  Devices,
  /// 探测 GPU 能力
  Probe,
  /// 依次加载所有模型
  Preload,
}

#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
  /// 列出内置与自定义模型
  List,
  /// 添加自定义模型
  Add {
    #[arg(long)]
    id: String,
    /// image-classification, zero-shot-image-classification 或 object-detection
    #[arg(long)]
    task: ModelTask,
    /// 模型路径，如 Xenova/vit-base-patch16-224
    #[arg(long)]
    model_ref: String,
    /// 零样本分类的默认标签，以逗号分隔
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
  },
  /// 删除自定义模型
  Remove { id: String },
  /// 删除所有自定义模型
  Clear,
  /// 查询 Hugging Face 上下载量最高的模型
  Search {
    /// 只查询某一任务类型
    #[arg(long)]
    task: Option<ModelTask>,
    #[arg(long, default_value_t = DEFAULT_SUGGESTION_LIMIT)]
    limit: usize,
  },
}

/// 查询模型仓库并打印添加命令，只要有一个任务查询成功就不算失败
async fn search_models(task: Option<ModelTask>, limit: usize) -> Result<()> {
  let client = HubClient::new()?.with_limit(limit);
  let results = match task {
    Some(task) => vec![(task, client.popular(task).await)],
    None => client.popular_all().await,
  };

  let mut failed = 0;
  let total = results.len();
  for (task, result) in results {
    println!("[{}]", task);
    match result {
      Ok(models) if models.is_empty() => println!("  (无结果)"),
      Ok(models) => {
        for model in models {
          let def = model.to_definition(task);
          println!(
            "  {:<48} 下载 {:>7}  点赞 {:>6}",
            model.id,
            format_count(model.downloads),
            format_count(model.likes)
          );
          println!("    jinghu models add --id {} --task {} --model-ref {}", def.id, task, def.model_ref);
        }
      }
      Err(e) => {
        failed += 1;
        println!("  查询失败: {}", e);
      }
    }
  }
  if failed == total {
    anyhow::bail!("模型仓库不可用");
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  match args.command {
    // 查询模型仓库不需要会话
    Command::Models(ModelsCommand::Search { task, limit }) => search_models(task, limit).await?,
    command => run_session(&args.session, command).await?,
  }

  info!("完成");
  Ok(())
}

async fn run_session(session: &SessionArgs, command: Command) -> Result<()> {
  let config = session.load_config().await?;
  let orchestrator = build_orchestrator(&config)?;
  let report = orchestrator.initialize().await?;

  match command {
    Command::Run {
      model,
      device,
      repeat,
      options,
    } => {
      let outputs = build_outputs(&config)?;
      orchestrator.start_camera(device.as_deref()).await?;
      orchestrator.select_model(&model).await?;

      let result = if repeat > 1 {
        RepeatShotTask::default()
          .with_times(repeat)
          .with_options(options.task_options())
          .run_task(&orchestrator, &outputs)
          .await
      } else {
        OneShotTask::default()
          .with_options(options.task_options())
          .run_task(&orchestrator, &outputs)
          .await
      };
      orchestrator.shutdown().await;
      result?;
    }
    Command::Models(ModelsCommand::List) => {
      for def in orchestrator.models() {
        let origin = if def.is_user_defined { "自定义" } else { "内置" };
        println!("{:<12} {:<32} {:<6} {}", def.id, def.task, origin, def.model_ref);
        if !def.default_labels.is_empty() {
          println!("{:<12} 默认标签: {}", "", def.default_labels.join(", "));
        }
      }
    }
    Command::Models(ModelsCommand::Add {
      id,
      task,
      model_ref,
      labels,
      name,
      description,
    }) => {
      let mut def = ModelDefinition::new(id, task, model_ref).with_default_labels(labels);
      if let Some(name) = name {
        def = def.with_display_name(name);
      }
      if let Some(description) = description {
        def = def.with_description(description);
      }
      orchestrator.add_user_model(def).await?;
    }
    Command::Models(ModelsCommand::Remove { id }) => orchestrator.remove_user_model(&id).await?,
    Command::Models(ModelsCommand::Clear) => orchestrator.clear_user_models().await?,
    Command::Models(ModelsCommand::Search { task, limit }) => search_models(task, limit).await?,
    Command::Devices => {
      let devices = orchestrator.devices().await;
      if devices.is_empty() {
        warn!("未发现视频输入设备");
      }
      for device in devices {
        println!("{:<24} {}", device.device_id, device.label);
      }
    }
    Command::Probe => {
      println!("{}", serde_json::to_string_pretty(&report)?);
      println!("设备配置: {}", orchestrator.pipeline_cache().device_config());
    }
    Command::Preload => {
      let mut failed = 0;
      for (id, result) in orchestrator.preload_all().await {
        match result {
          Ok(()) => println!("{:<12} 已加载", id),
          Err(e) => {
            failed += 1;
            println!("{:<12} 失败: {}", id, e);
          }
        }
      }
      orchestrator.shutdown().await;
      if failed > 0 {
        anyhow::bail!("{} 个模型加载失败", failed);
      }
    }
  }
  Ok(())
}
