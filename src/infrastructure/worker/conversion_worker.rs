//! Conversion Worker - 转换编排器
//!
//! 驱动四个子系统走完阶段状态机:
//! Idle → Parsing → Normalizing → Synthesizing → Assembling
//!      → Complete | Cancelled | Failed
//!
//! 失败策略:
//! - 解析失败立即中止
//! - 任一章规整失败中止
//! - 任一章合成失败中止（不产出部分有声书），会话目录保留
//! - 取消保留已写出的章节中间产物
//! - token 超限二分与格式转换 best-effort 只记日志，绝不中止

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::ports::{
    ContainerEncoderPort, ConversionSession, ConversionStage, PcmStorePort, SessionManagerPort,
    SynthesizerFactoryPort,
};
use crate::application::ConversionError;
use crate::domain::book::TitleSource;
use crate::domain::normalize::{extract_title, normalize_chapter, NormalizeOptions};
use crate::infrastructure::audio::AudioAssembler;
use crate::infrastructure::epub::EpubReader;
use crate::infrastructure::events::ProgressPublisher;

use super::synthesis::{ChapterText, SynthesisScheduler};

/// Worker 配置
#[derive(Debug, Clone)]
pub struct ConversionWorkerConfig {
    /// 成品输出目录（会话目录也建在其下）
    pub output_dir: PathBuf,
    /// 音色标识
    pub voice: String,
    /// 语言标签
    pub language: String,
    /// 用户并行上限（调度器再按 CPU/章节数收紧）
    pub parallel_workers: usize,
    /// 文本规整配置
    pub normalize: NormalizeOptions,
}

/// 一次成功转换的产物
#[derive(Debug, Clone)]
pub struct AudiobookArtifact {
    /// 成品压缩容器
    pub container_path: PathBuf,
    /// chapters.json 侧车
    pub sidecar_path: PathBuf,
    /// 保留的会话目录
    pub session_folder: PathBuf,
    /// 总时长（秒）
    pub total_duration_secs: f64,
    /// 全书 token 超限次数（汇总为警告，不是错误）
    pub limit_hits: u32,
}

/// 转换编排器
pub struct ConversionWorker {
    config: ConversionWorkerConfig,
    session_manager: Arc<dyn SessionManagerPort>,
    publisher: Arc<ProgressPublisher>,
    assembler: Arc<AudioAssembler>,
    scheduler: SynthesisScheduler,
}

impl ConversionWorker {
    pub fn new(
        config: ConversionWorkerConfig,
        session_manager: Arc<dyn SessionManagerPort>,
        factory: Arc<dyn SynthesizerFactoryPort>,
        pcm_store: Arc<dyn PcmStorePort>,
        encoder: Arc<dyn ContainerEncoderPort>,
        publisher: Arc<ProgressPublisher>,
    ) -> Self {
        let assembler = Arc::new(AudioAssembler::new(pcm_store, encoder));
        let scheduler = SynthesisScheduler::new(
            factory,
            session_manager.clone(),
            assembler.clone(),
            publisher.clone(),
        );
        Self {
            config,
            session_manager,
            publisher,
            assembler,
            scheduler,
        }
    }

    /// 登记新会话并返回会话 ID
    ///
    /// 调用方应在 run 之前订阅该会话的事件通道
    pub fn create_session(&self) -> Result<String, ConversionError> {
        let session = ConversionSession::new(&self.config.output_dir);
        let id = self.session_manager.create(session)?;
        Ok(id)
    }

    /// 请求取消（幂等）
    pub fn cancel(&self, session_id: &str) {
        self.session_manager.cancel(session_id);
    }

    /// 显式清理: 删除会话目录并移除会话记录
    pub async fn cleanup_session(&self, session_id: &str) -> Result<(), ConversionError> {
        if let Ok(session) = self.session_manager.get(session_id) {
            if session.folder.exists() {
                tokio::fs::remove_dir_all(&session.folder)
                    .await
                    .map_err(|e| ConversionError::io(&session.folder, e))?;
            }
            tracing::info!(session_id = %session_id, "Session folder removed");
        }
        self.session_manager.remove(session_id);
        self.publisher.unregister_session(session_id);
        Ok(())
    }

    /// 执行一次完整转换
    pub async fn run(
        &self,
        session_id: &str,
        epub_path: &Path,
    ) -> Result<AudiobookArtifact, ConversionError> {
        let result = self.run_pipeline(session_id, epub_path).await;

        // 终态迁移与事件
        match &result {
            Ok(artifact) => {
                let _ = self.session_manager.set_progress(session_id, 1.0);
                let _ = self.session_manager.set_stage(
                    session_id,
                    ConversionStage::Complete,
                    &format!("Complete: {}", artifact.container_path.display()),
                );
                if artifact.limit_hits > 0 {
                    // 超限汇总是警告，不是错误
                    let message = format!(
                        "warning: token limit exceeded {} time(s), inputs were bisected",
                        artifact.limit_hits
                    );
                    self.session_manager.append_log(session_id, &message);
                    self.publisher.publish_log(session_id, &message);
                }
                self.publisher.publish_completed(
                    session_id,
                    &artifact.container_path.display().to_string(),
                    artifact.total_duration_secs,
                    artifact.limit_hits,
                );
            }
            Err(ConversionError::Cancelled) => {
                let _ = self.session_manager.set_stage(
                    session_id,
                    ConversionStage::Cancelled,
                    "Conversion cancelled",
                );
                self.publisher.publish_cancelled(session_id);
                tracing::info!(session_id = %session_id, "Conversion cancelled");
            }
            Err(e) => {
                let status = format!("Conversion failed: {}", e);
                let _ = self.session_manager.set_stage(
                    session_id,
                    ConversionStage::Failed,
                    &status,
                );
                self.publisher.publish_failed(session_id, &status);
                tracing::error!(session_id = %session_id, error = %e, "Conversion failed");
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        session_id: &str,
        epub_path: &Path,
    ) -> Result<AudiobookArtifact, ConversionError> {
        let session = self.session_manager.get(session_id)?;
        let folder = session.folder.clone();
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| ConversionError::io(&folder, e))?;

        // ---- Parsing ----
        self.transition(
            session_id,
            ConversionStage::Parsing,
            &format!("Parsing {}", epub_path.display()),
            0.0,
        )?;
        self.check_cancelled(session_id)?;

        let path = epub_path.to_path_buf();
        let mut book = tokio::task::spawn_blocking(move || EpubReader::read_book(&path))
            .await
            .map_err(|e| ConversionError::internal(format!("parse task failed: {}", e)))??;

        self.session_manager.append_log(
            session_id,
            &format!(
                "parsed \"{}\" by {} ({} chapters)",
                book.title(),
                book.author(),
                book.chapter_count()
            ),
        );

        // ---- Normalizing ----
        self.transition(
            session_id,
            ConversionStage::Normalizing,
            "Normalizing chapter text",
            0.0,
        )?;

        let opts: &NormalizeOptions = &self.config.normalize;
        let mut texts: Vec<ChapterText> = Vec::with_capacity(book.chapter_count());
        for chapter in book.chapters_mut() {
            self.check_cancelled(session_id)?;
            let index = chapter.index();
            let text = normalize_chapter(chapter.html(), opts)
                .map_err(|e| ConversionError::normalization(index, e.to_string()))?;

            // 目录未收录的章节在此以启发式定标题
            if chapter.title_source() == TitleSource::Pending {
                let title = extract_title(chapter.html(), &text, opts.title_mode);
                chapter.resolve_title(title);
            }

            texts.push(ChapterText {
                index,
                title: chapter.title().to_string(),
                text,
            });
        }

        // ---- Synthesizing ----
        self.transition(
            session_id,
            ConversionStage::Synthesizing,
            &format!("Synthesizing {} chapters", texts.len()),
            0.0,
        )?;

        let output = self
            .scheduler
            .synthesize_book(
                session_id,
                &folder,
                texts,
                &self.config.voice,
                &self.config.language,
                self.config.parallel_workers,
            )
            .await?;

        // ---- Assembling ----
        self.transition(
            session_id,
            ConversionStage::Assembling,
            "Assembling audiobook",
            self.session_manager
                .get(session_id)
                .map(|s| s.progress)
                .unwrap_or(0.0),
        )?;
        self.check_cancelled(session_id)?;

        let cancelled = {
            let session_manager = self.session_manager.clone();
            let session_id = session_id.to_string();
            move || session_manager.is_cancelled(&session_id)
        };
        let assembled = self
            .assembler
            .finalize_audiobook(
                &mut book,
                &output.chapters,
                output.target,
                &folder,
                &self.config.output_dir,
                &cancelled,
            )
            .await?;

        Ok(AudiobookArtifact {
            container_path: assembled.container_path,
            sidecar_path: assembled.sidecar_path,
            session_folder: folder,
            total_duration_secs: assembled.total_duration_secs,
            limit_hits: output.limit_hits,
        })
    }

    fn transition(
        &self,
        session_id: &str,
        stage: ConversionStage,
        status: &str,
        fraction: f64,
    ) -> Result<(), ConversionError> {
        self.session_manager.set_stage(session_id, stage, status)?;
        self.publisher
            .publish_stage(session_id, stage.as_str(), status, fraction);
        Ok(())
    }

    fn check_cancelled(&self, session_id: &str) -> Result<(), ConversionError> {
        if self.session_manager.is_cancelled(session_id) {
            return Err(ConversionError::Cancelled);
        }
        Ok(())
    }
}
