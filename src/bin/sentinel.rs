// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 空间站安全设备检测 (Safety Sentinel)
///
/// 流程:
/// 1. 加载配置 + 命令行覆盖
/// 2. 加载模型 (失败则检测功能禁用)
/// 3. 读取图像 → 环境模拟 (光照/遮挡)
/// 4. 检测会话 (工作线程推理) → 聚合 + 告警
/// 5. 绘制叠加层并保存
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use safety_sentinel::detection::{DetectionSession, SessionEvent};
use safety_sentinel::{effects, gen_time_string, models, Args, SentinelConfig};

// 使用 mimalloc 作为全局分配器
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 单帧推理超时
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ========== 配置 ==========
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(SentinelConfig::default_path);
    let mut config = SentinelConfig::load(&config_path);
    config.apply_args(&args);

    info!("🚀 安全设备检测启动");
    info!("📦 检测模型: {}", config.model);
    info!("🖼️ 输入图像: {}", args.source);

    // ========== 模型 ==========
    let mut options = config.model_options();
    options.profile = args.profile;
    let adapter = match models::load(&options) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("❌ 检测功能已禁用: {}", e);
            std::process::exit(2);
        }
    };

    // ========== 环境模拟 ==========
    let image = image::open(&args.source)
        .with_context(|| format!("failed to open image {}", args.source))?
        .to_rgba8();
    let params = config.effect_parameters(args.lighting, args.occlusion);
    info!(
        "🌗 环境: {} | lighting={:.2} occlusion={:.2}",
        config.preset, params.lighting, params.occlusion
    );
    let composed = effects::apply(&image, params);

    // ========== 检测 ==========
    let session =
        DetectionSession::with_aggregator(adapter, config.label_mapper(), config.aggregator());
    let events = session.subscribe();
    session.start();
    session.submit(composed.clone())?;
    if !session.wait_until_settled(INFERENCE_TIMEOUT) {
        bail!("inference did not finish within {:?}", INFERENCE_TIMEOUT);
    }

    for event in events.try_iter() {
        if let SessionEvent::Warning(msg) = event {
            warn!("⚠️ {}", msg);
        }
    }
    let snapshot = session.snapshot();
    session.stop();

    // ========== 叠加层 ==========
    let overlay = config.renderer().render_or_base(&composed, &snapshot.detections);
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| format!("runs/sentinel-{}.png", gen_time_string("-")));
    if let Some(parent) = Path::new(&output).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    overlay
        .save(&output)
        .with_context(|| format!("failed to save overlay {}", output))?;
    info!("💾 叠加层已保存到 {}", output);

    // ========== 结果 ==========
    println!(
        "检测结果: {} 个 (危险 {} 个)",
        snapshot.detections.len(),
        snapshot.hazard_count
    );
    for det in &snapshot.detections {
        let b = det.bbox();
        println!(
            "  {:<24} {:>3}%  [x={:.3} y={:.3} w={:.3} h={:.3}]",
            det.name(),
            det.confidence_percent(),
            b.x,
            b.y,
            b.width,
            b.height
        );
    }
    for alert in &snapshot.alerts {
        println!("🚨 {}: {}", alert.title, alert.message);
    }
    if !snapshot.detections.is_empty() {
        println!("检测精度: {:.0}%", snapshot.detection_accuracy * 100.0);
    }
    println!("耗时: {:.1}ms", snapshot.last_processing_ms);

    if let Some(path) = &args.alerts_json {
        let json = serde_json::to_string_pretty(&snapshot.alerts)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path))?;
        info!("💾 告警列表已保存到 {}", path);
    }

    Ok(())
}
