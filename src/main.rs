//! Bookvox - EPUB 转有声书 CLI
//!
//! 加载配置、装配适配器、驱动转换编排器，
//! 订阅进度事件渲染到终端，Ctrl-C 触发协作式取消。

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use bookvox::application::ports::{AudioFormat, ContainerEncoderPort, SynthesizerFactoryPort};
use bookvox::application::ConversionError;
use bookvox::config::{load_config_from_path, print_config};
use bookvox::infrastructure::adapters::encoder::{OggOpusEncoder, WavCopyEncoder};
use bookvox::infrastructure::adapters::pcm::WavPcmStore;
use bookvox::infrastructure::adapters::tts::{HttpSynthesizerConfig, HttpSynthesizerFactory};
use bookvox::infrastructure::events::{ConversionEvent, ProgressPublisher};
use bookvox::infrastructure::memory::InMemorySessionManager;
use bookvox::infrastructure::worker::{ConversionWorker, ConversionWorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "bookvox", about = "Convert a DRM-free EPUB into a narrated audiobook")]
struct Cli {
    /// EPUB 文件路径
    epub: Option<PathBuf>,

    /// 输出目录（覆盖配置）
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// 音色标识（覆盖配置）
    #[arg(long)]
    voice: Option<String>,

    /// 成品格式: opus | wav
    #[arg(long)]
    format: Option<String>,

    /// 并行 worker 上限（覆盖配置）
    #[arg(long)]
    workers: Option<usize>,

    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    /// 列出 TTS 服务的可用音色后退出
    #[arg(long)]
    list_voices: bool,

    /// 转换成功后删除会话目录
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 加载配置（优先级: 环境变量 > 配置文件 > 默认值）
    let mut config = load_config_from_path(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // CLI 覆盖
    if let Some(dir) = cli.output_dir {
        config.output.dir = dir;
    }
    if let Some(voice) = cli.voice {
        config.tts.voice = voice;
    }
    if let Some(workers) = cli.workers {
        config.tts.parallel_workers = workers.max(1);
    }
    if let Some(format) = cli.format.as_deref() {
        config.output.format = match format {
            "opus" => AudioFormat::Opus,
            "wav" => AudioFormat::Wav,
            other => anyhow::bail!("Unknown output format: {} (expected opus or wav)", other),
        };
    }

    // 初始化日志
    let log_filter = format!("{},bookvox={}", config.log.level, config.log.level);
    let subscriber = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
    );
    if config.log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    print_config(&config);

    // TTS 工厂
    let tts_config = HttpSynthesizerConfig::new(config.tts.url.clone())
        .with_timeout(config.tts.timeout_secs);
    let factory: Arc<dyn SynthesizerFactoryPort> =
        Arc::new(HttpSynthesizerFactory::new(tts_config));

    if cli.list_voices {
        let voices = factory
            .voices()
            .await
            .map_err(|e| anyhow::anyhow!("Voice enumeration failed: {}", e))?;
        for voice in voices {
            println!(
                "{}\t{}\t{} Hz, {} ch",
                voice.id, voice.language, voice.format.sample_rate, voice.format.channels
            );
        }
        return Ok(());
    }

    let epub_path = cli
        .epub
        .ok_or_else(|| anyhow::anyhow!("No EPUB path given (see --help)"))?;

    // 装配适配器
    let encoder: Arc<dyn ContainerEncoderPort> = match config.output.format {
        AudioFormat::Opus => Arc::new(OggOpusEncoder::new(config.output.bitrate)),
        AudioFormat::Wav => Arc::new(WavCopyEncoder::new()),
    };
    let session_manager = InMemorySessionManager::new().arc();
    let publisher = ProgressPublisher::new().arc();

    let worker = Arc::new(ConversionWorker::new(
        ConversionWorkerConfig {
            output_dir: config.output.dir.clone(),
            voice: config.tts.voice.clone(),
            language: config.tts.language.clone(),
            parallel_workers: config.tts.parallel_workers,
            normalize: config.normalize.clone(),
        },
        session_manager.clone(),
        factory,
        Arc::new(WavPcmStore::new()),
        encoder,
        publisher.clone(),
    ));

    let session_id = worker
        .create_session()
        .map_err(|e| anyhow::anyhow!("Failed to create session: {}", e))?;

    // 先订阅再启动，不丢早期事件
    let mut events = publisher.register_session(&session_id);
    let render = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConversionEvent::StageChanged { stage, status, .. } => {
                    println!("[{}] {}", stage, status);
                }
                ConversionEvent::ChapterCompleted {
                    chapter_index,
                    title,
                    fraction,
                    ..
                } => {
                    println!(
                        "  [{:>3.0}%] chapter {} \"{}\"",
                        fraction * 100.0,
                        chapter_index,
                        title
                    );
                }
                ConversionEvent::LogLine { message, .. } => {
                    println!("  {}", message);
                }
                ConversionEvent::Completed { .. }
                | ConversionEvent::Failed { .. }
                | ConversionEvent::Cancelled { .. } => break,
            }
        }
    });

    // Ctrl-C → 协作式取消
    let mut run = {
        let worker = worker.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { worker.run(&session_id, &epub_path).await })
    };
    let result = tokio::select! {
        joined = &mut run => {
            joined.map_err(|e| anyhow::anyhow!("conversion task failed: {}", e))?
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupt received, cancelling...");
            worker.cancel(&session_id);
            // 等编排器观察到取消标志并收尾
            (&mut run)
                .await
                .map_err(|e| anyhow::anyhow!("conversion task failed: {}", e))?
        }
    };

    let _ = render.await;

    match result {
        Ok(artifact) => {
            println!("Audiobook: {}", artifact.container_path.display());
            println!("Chapters:  {}", artifact.sidecar_path.display());
            println!("Duration:  {:.1}s", artifact.total_duration_secs);
            println!("Session:   {}", artifact.session_folder.display());
            if artifact.limit_hits > 0 {
                println!(
                    "Warning: token limit exceeded {} time(s); affected chapters were bisected",
                    artifact.limit_hits
                );
            }
            if cli.cleanup {
                worker
                    .cleanup_session(&session_id)
                    .await
                    .map_err(|e| anyhow::anyhow!("Cleanup failed: {}", e))?;
                println!("Session folder removed");
            }
            Ok(())
        }
        Err(ConversionError::Cancelled) => {
            eprintln!("Conversion cancelled; session folder preserved");
            std::process::exit(130);
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}
