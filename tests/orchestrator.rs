// 该文件是 Jinghu （镜湖） 项目的一部分。
// tests/orchestrator.rs - 会话流程测试
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

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use jinghu::{
  model::{DeviceConfig, ModelDefinition, ModelStore, RegistryError, Task},
  orchestrator::OrchestratorError,
  output::Presentation,
  runner::{RunError, TaskOptions},
  runtime::InvokeArgs,
};

use common::{MockGpu, harness, harness_with};

#[tokio::test]
async fn classification_end_to_end() {
  let h = harness();
  let report = h.orchestrator.initialize().await.unwrap();
  assert!(!report.supported);

  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("vit").await.unwrap();
  let run = h.orchestrator.run_selected(None).await.unwrap();

  assert_eq!(run.outcome.model_id, "vit");
  assert_eq!(run.outcome.device, DeviceConfig::cpu());
  match &run.presentation {
    Presentation::Ranked { summary, rows } => {
      assert_eq!(summary.task, Task::ImageClassification);
      assert_eq!(summary.backend, "CPU");
      assert_eq!(rows[0].label, "tabby cat");
      assert_eq!(rows[0].score_text, "82.0%");
      assert_eq!(rows.len(), 2);
    }
    other => panic!("应为排序结果: {:?}", other),
  }
  assert_eq!(h.orchestrator.panel().presentation(), Some(&run.presentation));
  assert_eq!(h.runtime.invocations()[0].args, InvokeArgs::None);
  assert!(!h.orchestrator.is_running());
}

#[tokio::test]
async fn gpu_path_is_used_when_probed() {
  let h = harness_with(MockGpu::available(&["shader-f16"]), Vec::new());
  let report = h.orchestrator.initialize().await.unwrap();
  assert!(report.supported && report.reduced_precision);

  h.orchestrator.start_camera(None).await.unwrap();
  let handle = h.orchestrator.select_model("vit").await.unwrap();
  assert_eq!(handle.device(), DeviceConfig::gpu(true));

  let run = h.orchestrator.run_selected(None).await.unwrap();
  assert!(run.presentation.badge().starts_with("GPU · "));
}

#[tokio::test]
async fn zero_shot_uses_default_or_given_labels() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("clip").await.unwrap();

  h.orchestrator.run_selected(None).await.unwrap();
  let given = TaskOptions::default().with_labels(["a cat", "  ", "a dog"]);
  let run = h.orchestrator.run_selected(Some(given)).await.unwrap();

  let calls = h.runtime.invocations();
  match &calls[0].args {
    InvokeArgs::CandidateLabels(labels) => assert_eq!(labels.len(), 9),
    other => panic!("应为候选标签: {:?}", other),
  }
  assert_eq!(
    calls[1].args,
    InvokeArgs::CandidateLabels(vec!["a cat".to_string(), "a dog".to_string()])
  );
  // 嵌套输出被展开
  assert!(matches!(run.presentation, Presentation::Ranked { ref rows, .. } if rows[0].label == "a photo of a cat"));
}

#[tokio::test]
async fn empty_detections_are_not_an_error() {
  let h = harness();
  h.runtime.set_output("Xenova/detr-resnet-50", json!([]));
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("detr").await.unwrap();

  let run = h.orchestrator.run_selected(None).await.unwrap();
  assert!(run.presentation.is_empty());
  assert_eq!(h.runtime.invocations()[0].args, InvokeArgs::Threshold(0.5));
  assert!(h.orchestrator.panel().error().is_none());
}

#[tokio::test]
async fn detections_are_scaled_and_coloured() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("detr").await.unwrap();

  let run = h
    .orchestrator
    .run_selected(Some(TaskOptions::default().with_threshold(0.9)))
    .await
    .unwrap();
  assert_eq!(h.runtime.invocations()[0].args, InvokeArgs::Threshold(0.9));
  match run.presentation {
    Presentation::Detections { overlays, surface, .. } => {
      assert_eq!((surface.width, surface.height), (common::FRAME_WIDTH, common::FRAME_HEIGHT));
      assert_eq!(overlays.len(), 1);
      assert_eq!(overlays[0].caption(), "cat 97%");
      assert_eq!(overlays[0].color, "#FF6B6B");
      assert_eq!(overlays[0].bbox.xmax, 110.0);
    }
    other => panic!("应为检测结果: {:?}", other),
  }
}

#[tokio::test]
async fn invalid_options_are_rejected_before_invoke() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("detr").await.unwrap();

  let err = h
    .orchestrator
    .run_selected(Some(TaskOptions::default().with_threshold(1.5)))
    .await
    .unwrap_err();
  assert!(matches!(err, OrchestratorError::Run(RunError::InvalidOptions(_))));
  assert!(h.runtime.invocations().is_empty());
}

#[tokio::test]
async fn user_model_overrides_builtin_task() {
  let user = ModelDefinition::new("vit", Task::ObjectDetection, "Xenova/detr-resnet-50");
  let h = harness_with(MockGpu::missing(), vec![user]);
  h.orchestrator.initialize().await.unwrap();

  let def = h.orchestrator.model("vit").unwrap();
  assert!(def.is_user_defined);
  assert_eq!(def.task, Task::ObjectDetection);
  // 覆盖后仍保持内置模型的位置
  assert_eq!(h.orchestrator.models()[0].id, "vit");
  assert_eq!(h.orchestrator.models().len(), 3);

  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("vit").await.unwrap();
  let run = h.orchestrator.run_selected(None).await.unwrap();
  assert_eq!(run.outcome.task, Task::ObjectDetection);
  assert!(matches!(run.presentation, Presentation::Detections { .. }));
}

#[tokio::test]
async fn run_requires_model_and_camera() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();

  let err = h.orchestrator.run_selected(None).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::NoModelSelected));

  h.orchestrator.select_model("vit").await.unwrap();
  let err = h.orchestrator.run_selected(None).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::CameraInactive));

  let err = h.orchestrator.select_model("nope").await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Registry(RegistryError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn overlapping_runs_are_rejected() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("vit").await.unwrap();
  h.runtime.set_invoke_delay(Duration::from_millis(300));

  let first = {
    let orchestrator = h.orchestrator.clone();
    tokio::spawn(async move { orchestrator.run_selected(None).await.map(|_| ()) })
  };
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(h.orchestrator.is_running());

  let err = h.orchestrator.run_selected(None).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Busy));

  first.await.unwrap().unwrap();
  assert!(!h.orchestrator.is_running());
  assert_eq!(h.runtime.invocations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn later_selection_supersedes_earlier_load() {
  let h = harness();
  h.runtime.with_delay(Duration::from_millis(200));
  h.orchestrator.initialize().await.unwrap();

  let (vit, detr) = tokio::join!(h.orchestrator.select_model("vit"), h.orchestrator.select_model("detr"));

  assert!(matches!(vit, Err(OrchestratorError::Superseded(ref id)) if id == "vit"));
  assert!(detr.is_ok());
  assert_eq!(h.orchestrator.selected_model().unwrap().id, "detr");
  // 被取代的加载结果仍留在缓存中，之后可以直接使用
  assert!(h.orchestrator.pipeline_cache().is_loaded("vit"));
}

#[tokio::test]
async fn user_models_are_persisted() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();

  let def = ModelDefinition::new("owlvit", Task::ZeroShotImageClassification, "Xenova/owlvit-base-patch32")
    .with_default_labels(["a red mug"]);
  h.orchestrator.add_user_model(def.clone()).await.unwrap();

  let stored = h.store.load().await.unwrap();
  assert_eq!(stored.len(), 1);
  assert!(stored[0].is_user_defined);
  assert_eq!(h.orchestrator.models().len(), 4);

  let err = h.orchestrator.add_user_model(def).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Registry(RegistryError::Duplicate(_))));

  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("owlvit").await.unwrap();
  h.orchestrator.remove_user_model("owlvit").await.unwrap();

  assert!(h.store.load().await.unwrap().is_empty());
  assert!(h.orchestrator.model("owlvit").is_none());
  assert!(h.orchestrator.selected_model().is_none());
  assert!(!h.orchestrator.pipeline_cache().is_loaded("owlvit"));

  let err = h.orchestrator.remove_user_model("owlvit").await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Registry(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn invalid_user_models_are_rejected() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();

  let bad_id = ModelDefinition::new("has space", Task::ImageClassification, "x/y");
  let err = h.orchestrator.add_user_model(bad_id).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Registry(RegistryError::InvalidId(_))));

  let labels_on_detector =
    ModelDefinition::new("det", Task::ObjectDetection, "x/y").with_default_labels(["a cat"]);
  let err = h.orchestrator.add_user_model(labels_on_detector).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Registry(RegistryError::UnexpectedLabels(..))));

  assert!(h.store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn clearing_user_models_restores_builtins() {
  let user = ModelDefinition::new("vit", Task::ObjectDetection, "Xenova/detr-resnet-50");
  let h = harness_with(MockGpu::missing(), vec![user]);
  h.orchestrator.initialize().await.unwrap();

  h.orchestrator.clear_user_models().await.unwrap();
  let def = h.orchestrator.model("vit").unwrap();
  assert!(!def.is_user_defined);
  assert_eq!(def.task, Task::ImageClassification);
  assert!(h.orchestrator.user_models().await.is_empty());
}

#[tokio::test]
async fn preload_isolates_failures() {
  let h = harness();
  h.runtime.fail_ref("Xenova/detr-resnet-50");
  h.orchestrator.initialize().await.unwrap();

  let results = h.orchestrator.preload_all().await;
  let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
  assert_eq!(ids, vec!["vit", "clip", "detr"]);
  assert!(results[0].1.is_ok());
  assert!(results[1].1.is_ok());
  assert!(results[2].1.is_err());
  assert_eq!(
    h.orchestrator.pipeline_cache().loaded_ids(),
    vec!["clip".to_string(), "vit".to_string()]
  );
}

#[tokio::test]
async fn panel_keeps_last_result_on_failure() {
  let h = harness();
  h.runtime.set_output("Xenova/detr-resnet-50", json!("not a result"));
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();

  h.orchestrator.select_model("vit").await.unwrap();
  let good = h.orchestrator.run_selected(None).await.unwrap();

  h.orchestrator.select_model("detr").await.unwrap();
  let err = h.orchestrator.run_selected(None).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Run(RunError::UnrecognizedResultShape(_))));

  let panel = h.orchestrator.panel();
  assert_eq!(panel.presentation(), Some(&good.presentation));
  assert!(panel.error().is_some());
}

#[tokio::test]
async fn invoke_failure_is_reported_once_without_reload() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(None).await.unwrap();
  h.orchestrator.select_model("vit").await.unwrap();
  let good = h.orchestrator.run_selected(None).await.unwrap();

  h.runtime.fail_invoke.store(true, Ordering::SeqCst);
  let err = h.orchestrator.run_selected(None).await.unwrap_err();
  let (task, model_id, reason) = match err {
    OrchestratorError::Run(RunError::Inference { task, model_id, reason }) => (task, model_id, reason),
    other => panic!("推理失败应报告为 Inference 错误: {:?}", other),
  };
  assert_eq!(task, Task::ImageClassification);
  assert_eq!(model_id, "vit");
  assert!(reason.contains("显存不足"));

  // 失败不重试，也不会重新加载管线
  assert_eq!(h.runtime.invocations().len(), 2);
  assert_eq!(h.runtime.instantiation_count(), 1);
  assert!(!h.orchestrator.is_running());

  let panel = h.orchestrator.panel();
  assert_eq!(panel.presentation(), Some(&good.presentation));
  assert!(panel.error().unwrap().contains("显存不足"));

  // 恢复后同一管线继续可用
  h.runtime.fail_invoke.store(false, Ordering::SeqCst);
  h.orchestrator.run_selected(None).await.unwrap();
  assert_eq!(h.runtime.instantiation_count(), 1);
  assert!(h.orchestrator.panel().error().is_none());
}

#[tokio::test]
async fn switching_camera_keeps_one_stream() {
  let h = harness();
  h.orchestrator.initialize().await.unwrap();
  h.orchestrator.start_camera(Some("cam-a")).await.unwrap();
  h.orchestrator.switch_camera("cam-b").await.unwrap();

  assert_eq!(h.camera.active_streams().len(), 1);
  assert_eq!(h.orchestrator.capture_state().selected_device.as_deref(), Some("cam-b"));

  h.orchestrator.shutdown().await;
  assert!(h.camera.active_streams().is_empty());
  assert!(!h.orchestrator.capture_state().active);
}
