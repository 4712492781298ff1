//! Synthesis Scheduler - 有界并行合成与 token 超限二分回退
//!
//! 调度模型:
//! - worker 数 W = max(1, min(CPU, 章节数, 用户上限, 8))
//! - 按索引顺序派发，乱序收集，交付前按索引排序
//! - 目标格式由第一章产出的首个缓冲决定，后完成的章节等待其裁定
//!
//! 每章在超限时二分重试，二分树的中序遍历即章内缓冲顺序。
//! 取消检查: 派发每个 worker 之前、每层递归之前。

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::application::ports::{
    PcmBuffer, PcmFormat, SessionManagerPort, SpeechSynthesizerPort, SynthesizerFactoryPort,
    TtsError,
};
use crate::application::ConversionError;
use crate::domain::split_text;
use crate::infrastructure::audio::{AudioAssembler, ChapterAudio};
use crate::infrastructure::events::ProgressPublisher;

/// worker 数硬上限
const MAX_WORKERS: usize = 8;

/// 待合成的一章
#[derive(Debug, Clone)]
pub struct ChapterText {
    pub index: usize,
    pub title: String,
    pub text: String,
}

/// 合成阶段的整体产出
pub struct SynthesisOutput {
    /// 按索引有序的章节音频
    pub chapters: Vec<ChapterAudio>,
    /// 裁定的目标格式
    pub target: PcmFormat,
    /// 全书 token 超限总次数（所有 worker 完成后聚合）
    pub limit_hits: u32,
}

/// 章节任务内部错误
enum SynthTaskError {
    Cancelled,
    Failed(String),
}

/// 计算 worker 数
pub fn worker_count(chapter_count: usize, user_cap: usize) -> usize {
    num_cpus::get()
        .min(chapter_count)
        .min(user_cap)
        .min(MAX_WORKERS)
        .max(1)
}

/// 目标格式裁定单元
///
/// 按章节索引顺序消费 offer：第一个产出缓冲的章节的首缓冲格式
/// 即目标格式。全部章节都无缓冲时裁定为失败。
struct TargetCell {
    state: Mutex<TargetState>,
    tx: watch::Sender<Option<Result<PcmFormat, ()>>>,
}

struct TargetState {
    offers: std::collections::BTreeMap<usize, Option<PcmFormat>>,
    next: usize,
    total: usize,
    decided: bool,
}

impl TargetCell {
    fn new(total: usize) -> (Arc<Self>, watch::Receiver<Option<Result<PcmFormat, ()>>>) {
        let (tx, rx) = watch::channel(None);
        (
            Arc::new(Self {
                state: Mutex::new(TargetState {
                    offers: std::collections::BTreeMap::new(),
                    next: 0,
                    total,
                    decided: false,
                }),
                tx,
            }),
            rx,
        )
    }

    /// 提交某章的首缓冲格式（无缓冲为 None）
    fn offer(&self, index: usize, format: Option<PcmFormat>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.decided {
            return;
        }
        state.offers.insert(index, format);
        while let Some(fmt) = state.offers.get(&state.next).copied() {
            state.next += 1;
            if let Some(fmt) = fmt {
                state.decided = true;
                let _ = self.tx.send(Some(Ok(fmt)));
                return;
            }
        }
        if state.next >= state.total {
            state.decided = true;
            let _ = self.tx.send(Some(Err(())));
        }
    }
}

/// 合成调度器
pub struct SynthesisScheduler {
    factory: Arc<dyn SynthesizerFactoryPort>,
    session_manager: Arc<dyn SessionManagerPort>,
    assembler: Arc<AudioAssembler>,
    publisher: Arc<ProgressPublisher>,
}

impl SynthesisScheduler {
    pub fn new(
        factory: Arc<dyn SynthesizerFactoryPort>,
        session_manager: Arc<dyn SessionManagerPort>,
        assembler: Arc<AudioAssembler>,
        publisher: Arc<ProgressPublisher>,
    ) -> Self {
        Self {
            factory,
            session_manager,
            assembler,
            publisher,
        }
    }

    /// 合成整本书
    ///
    /// 成功时章节按索引有序；取消时不产出部分结果。
    pub async fn synthesize_book(
        &self,
        session_id: &str,
        session_folder: &Path,
        chapters: Vec<ChapterText>,
        voice: &str,
        language: &str,
        user_cap: usize,
    ) -> Result<SynthesisOutput, ConversionError> {
        let total = chapters.len();
        let workers = worker_count(total, user_cap);
        tracing::info!(
            session_id = %session_id,
            chapters = total,
            workers,
            voice = %voice,
            "Synthesis started"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let (target_cell, target_rx) = TargetCell::new(total);
        let completed = Arc::new(AtomicUsize::new(0));
        let mut join_set: JoinSet<Result<ChapterAudio, ConversionError>> = JoinSet::new();

        for chapter in chapters {
            // 派发前的取消检查
            if self.session_manager.is_cancelled(session_id) {
                join_set.abort_all();
                return Err(ConversionError::Cancelled);
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ConversionError::internal(format!("semaphore closed: {}", e)))?;

            let factory = self.factory.clone();
            let session_manager = self.session_manager.clone();
            let assembler = self.assembler.clone();
            let publisher = self.publisher.clone();
            let target_cell = target_cell.clone();
            let mut target_rx = target_rx.clone();
            let completed = completed.clone();
            let session_id = session_id.to_string();
            let session_folder = session_folder.to_path_buf();
            let voice = voice.to_string();
            let language = language.to_string();

            join_set.spawn(async move {
                let index = chapter.index;

                let cancelled = {
                    let session_manager = session_manager.clone();
                    let session_id = session_id.clone();
                    move || session_manager.is_cancelled(&session_id)
                };
                if cancelled() {
                    target_cell.offer(index, None);
                    return Err(ConversionError::Cancelled);
                }

                // 按 worker 实例化合成器，章节间无状态
                let mut synthesizer = factory
                    .create(&voice, &language)
                    .await
                    .map_err(|e| ConversionError::synthesis(index, e.to_string()))?;

                let mut limit_hits = 0u32;
                let buffers = match synthesize_with_fallback(
                    &mut synthesizer,
                    &chapter.text,
                    &mut limit_hits,
                    &cancelled,
                )
                .await
                {
                    Ok(buffers) => buffers,
                    Err(SynthTaskError::Cancelled) => {
                        target_cell.offer(index, None);
                        return Err(ConversionError::Cancelled);
                    }
                    Err(SynthTaskError::Failed(message)) => {
                        target_cell.offer(index, None);
                        return Err(ConversionError::synthesis(index, message));
                    }
                };

                // 目标格式: 提交本章首缓冲格式并等待裁定。
                // 并发额度只覆盖 TTS 调用；裁定可能要等更低索引的
                // 章节合成完成，等待前必须释放额度，否则该章节
                // 永远得不到派发
                target_cell.offer(index, buffers.first().map(|b| b.format()));
                drop(permit);
                let target = match target_rx
                    .wait_for(|decision| decision.is_some())
                    .await
                {
                    Ok(decision) => match *decision {
                        Some(Ok(format)) => format,
                        _ => {
                            return Err(ConversionError::internal(
                                "no chapter produced any audio",
                            ))
                        }
                    },
                    Err(e) => {
                        return Err(ConversionError::internal(format!(
                            "target format channel closed: {}",
                            e
                        )))
                    }
                };

                if limit_hits > 0 {
                    tracing::warn!(
                        chapter = index,
                        limit_hits,
                        "Token limit hit, input was bisected"
                    );
                    let message = format!(
                        "chapter {}: token limit hit {} time(s), bisected",
                        index, limit_hits
                    );
                    session_manager.append_log(&session_id, &message);
                    publisher.publish_log(&session_id, &message);
                }

                let mut audio = assembler
                    .write_chapter_intermediate(
                        &session_folder,
                        index,
                        &chapter.title,
                        buffers,
                        target,
                    )
                    .await
                    .map_err(|e| ConversionError::internal(format!("pcm store: {}", e)))?;
                audio.limit_hits = limit_hits;

                // 进度: 已完成章节数 / 总章节数
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let fraction = done as f64 / total.max(1) as f64;
                let _ = session_manager.set_progress(&session_id, fraction);
                session_manager.append_log(
                    &session_id,
                    &format!("chapter {} \"{}\" synthesized", index, chapter.title),
                );
                publisher.publish_chapter_completed(
                    &session_id,
                    index,
                    &chapter.title,
                    audio.duration_secs,
                    fraction,
                );

                Ok(audio)
            });
        }

        // 乱序收集
        let mut results: Vec<ChapterAudio> = Vec::with_capacity(total);
        let mut first_error: Option<ConversionError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(audio)) => results.push(audio),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        join_set.abort_all();
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(ConversionError::internal(format!(
                            "synthesis task panicked: {}",
                            e
                        )));
                        join_set.abort_all();
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        // 交付前按索引排序
        results.sort_by_key(|c| c.index);
        let limit_hits = results.iter().map(|c| c.limit_hits).sum();
        // 所有任务成功后裁定值必然可读
        let target = match *target_rx.borrow() {
            Some(Ok(format)) => format,
            _ => return Err(ConversionError::internal("no chapter produced any audio")),
        };

        tracing::info!(
            session_id = %session_id,
            chapters = results.len(),
            limit_hits,
            "Synthesis complete"
        );

        Ok(SynthesisOutput {
            chapters: results,
            target,
            limit_hits,
        })
    }
}

/// 超限二分回退
///
/// 每次递归前检查取消；单字符输入再超限时升级为合成失败。
/// 产出缓冲的拼接顺序是二分树的中序遍历，
/// 文本划分精确覆盖原文每个字符。
fn synthesize_with_fallback<'a>(
    synthesizer: &'a mut Box<dyn SpeechSynthesizerPort>,
    text: &'a str,
    limit_hits: &'a mut u32,
    cancelled: &'a (dyn Fn() -> bool + Send + Sync),
) -> Pin<Box<dyn Future<Output = Result<Vec<PcmBuffer>, SynthTaskError>> + Send + 'a>> {
    Box::pin(async move {
        if cancelled() {
            return Err(SynthTaskError::Cancelled);
        }

        match synthesizer.synthesize(text).await {
            Ok(buffers) => Ok(buffers),
            Err(TtsError::TokenLimitExceeded) => {
                if text.chars().count() <= 1 {
                    // 单字符不应超限，升级为失败
                    return Err(SynthTaskError::Failed(
                        "token limit exceeded for a single character".to_string(),
                    ));
                }
                *limit_hits += 1;
                let (left, right) = split_text(text);
                tracing::debug!(
                    len = text.chars().count(),
                    left_len = left.chars().count(),
                    right_len = right.chars().count(),
                    "Token limit exceeded, bisecting"
                );

                let mut buffers =
                    synthesize_with_fallback(synthesizer, &left, limit_hits, cancelled).await?;
                buffers.extend(
                    synthesize_with_fallback(synthesizer, &right, limit_hits, cancelled).await?,
                );
                Ok(buffers)
            }
            Err(e) => Err(SynthTaskError::Failed(e.to_string())),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_clamps() {
        assert_eq!(worker_count(0, 4), 1);
        assert_eq!(worker_count(1, 4), 1);
        assert!(worker_count(100, 100) <= MAX_WORKERS);
        assert_eq!(worker_count(100, 2), 2);
    }

    #[test]
    fn test_target_cell_first_chapter_wins() {
        let (cell, rx) = TargetCell::new(3);
        // 乱序提交: 第 2 章先完成
        cell.offer(2, Some(PcmFormat::mono_f32(16000)));
        assert!(rx.borrow().is_none());
        cell.offer(0, Some(PcmFormat::mono_f32(24000)));
        assert_eq!(*rx.borrow(), Some(Ok(PcmFormat::mono_f32(24000))));
    }

    #[test]
    fn test_target_cell_skips_empty_chapters() {
        let (cell, rx) = TargetCell::new(3);
        cell.offer(0, None);
        cell.offer(1, Some(PcmFormat::mono_f32(22050)));
        assert_eq!(*rx.borrow(), Some(Ok(PcmFormat::mono_f32(22050))));
    }

    #[test]
    fn test_target_cell_exhausted() {
        let (cell, rx) = TargetCell::new(2);
        cell.offer(0, None);
        cell.offer(1, None);
        assert_eq!(*rx.borrow(), Some(Err(())));
    }
}
