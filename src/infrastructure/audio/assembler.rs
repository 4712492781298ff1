//! Audio Assembler - 格式统一、master 装配、转码、标签与侧车
//!
//! 职责:
//! - 章节缓冲统一到目标格式后写每章中间产物（调度器随完成调用）
//! - 按索引顺序把中间产物流式追加进 master PCM（8192 帧一块）
//! - master → 成品压缩容器（经编码器端口），成功后删除 master
//! - 写 chapters.json 侧车与成品命名冲突消解
//!
//! 装配单线程执行，master 文件句柄独占。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::application::ports::{
    ContainerEncoderPort, EncodeMetadata, PcmBuffer, PcmFormat, PcmStoreError, PcmStorePort,
};
use crate::application::ConversionError;
use crate::domain::book::{sanitize_component, Book};

use super::convert;

/// master 流式装配的块大小（帧）
const CHUNK_FRAMES: usize = 8192;

/// 一章合成后的音频产物
#[derive(Debug, Clone)]
pub struct ChapterAudio {
    pub index: usize,
    /// 中间产物路径
    pub intermediate: PathBuf,
    /// 写入的帧数
    pub frames: u64,
    /// 时长（秒），frames / 目标采样率
    pub duration_secs: f64,
    /// 该章观测到的 token 超限次数
    pub limit_hits: u32,
}

/// 装配完成的有声书
#[derive(Debug, Clone)]
pub struct AssembledAudiobook {
    /// 成品压缩容器路径
    pub container_path: PathBuf,
    /// chapters.json 侧车路径
    pub sidecar_path: PathBuf,
    /// 成品总时长（秒）
    pub total_duration_secs: f64,
}

/// 侧车条目，字段按键名排序（start < title）
#[derive(Debug, Serialize)]
struct SidecarEntry {
    start: f64,
    title: String,
}

/// 音频装配器
pub struct AudioAssembler {
    pcm_store: Arc<dyn PcmStorePort>,
    encoder: Arc<dyn ContainerEncoderPort>,
}

impl AudioAssembler {
    pub fn new(pcm_store: Arc<dyn PcmStorePort>, encoder: Arc<dyn ContainerEncoderPort>) -> Self {
        Self { pcm_store, encoder }
    }

    /// 统一一章缓冲到目标格式并写中间产物
    ///
    /// 转换失败的缓冲按 best-effort 原样沿用并记录警告，绝不中止。
    pub async fn write_chapter_intermediate(
        &self,
        session_folder: &Path,
        index: usize,
        title: &str,
        buffers: Vec<PcmBuffer>,
        target: PcmFormat,
    ) -> Result<ChapterAudio, PcmStoreError> {
        let unified: Vec<PcmBuffer> = buffers
            .into_iter()
            .map(|buffer| {
                if buffer.format() == target {
                    return buffer;
                }
                match convert::convert(&buffer, target) {
                    Ok(converted) => converted,
                    Err(e) => {
                        tracing::warn!(
                            chapter = index,
                            error = %e,
                            "Format conversion failed, using original buffer"
                        );
                        buffer
                    }
                }
            })
            .collect();

        let filename = format!(
            "chapter_{:02}_{}.{}",
            index,
            sanitize_component(title),
            self.pcm_store.extension()
        );
        let path = session_folder.join(filename);

        let frames = self.pcm_store.write_chapter(&path, target, &unified).await?;
        let duration_secs = frames as f64 / target.sample_rate as f64;

        tracing::debug!(
            chapter = index,
            path = %path.display(),
            frames,
            duration_secs,
            "Chapter intermediate written"
        );

        Ok(ChapterAudio {
            index,
            intermediate: path,
            frames,
            duration_secs,
            limit_hits: 0,
        })
    }

    /// master 装配 + 转码 + 标签 + 侧车 + 命名
    ///
    /// `chapters` 必须按索引有序且与 book 章节对位。
    /// 取消检查发生在每块写入之前；取消时保留已有产物。
    pub async fn finalize_audiobook(
        &self,
        book: &mut Book,
        chapters: &[ChapterAudio],
        target: PcmFormat,
        session_folder: &Path,
        output_dir: &Path,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<AssembledAudiobook, ConversionError> {
        // 1. master 流式装配
        let master_path =
            session_folder.join(format!("master.{}", self.pcm_store.extension()));
        let total_frames = self
            .assemble_master(&master_path, chapters, target, cancelled)
            .await?;
        let total_duration_secs = total_frames as f64 / target.sample_rate as f64;

        // 2. 起始时间回填: start[i] = Σ durations[0..i)
        let mut acc = 0.0f64;
        for chapter in chapters {
            let entry = &mut book.chapters_mut()[chapter.index];
            entry.set_start_time(acc);
            entry.set_output_artifact(chapter.intermediate.clone());
            acc += chapter.duration_secs;
        }

        // 3. 成品路径: 净化书名 + 冲突消解
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ConversionError::io(output_dir, e))?;
        let stem = {
            let s = sanitize_component(book.title());
            if s.is_empty() {
                "Audiobook".to_string()
            } else {
                s
            }
        };
        let container_path =
            resolve_collision(output_dir, &stem, self.encoder.format().extension());

        // 4. 转码与标签（先落在会话目录，成功后移动到成品位置）
        let metadata = EncodeMetadata {
            title: book.title().to_string(),
            artist: book.author().to_string(),
            artwork: book
                .cover()
                .map(|c| (c.data().to_vec(), c.media_type().to_string())),
        };
        let staged_path = session_folder.join(format!(
            "audiobook.{}",
            self.encoder.format().extension()
        ));
        let summary = self
            .encoder
            .transcode(&master_path, &staged_path, &metadata)
            .await?;

        // 5. 转码成功后删除 master；失败路径在上面 ? 返回，master 留作诊断
        if let Err(e) = tokio::fs::remove_file(&master_path).await {
            tracing::warn!(path = %master_path.display(), error = %e, "Failed to remove master PCM");
        }

        // 成品从会话目录移动到最终命名位置
        tokio::fs::rename(&staged_path, &container_path)
            .await
            .map_err(|e| ConversionError::io(&container_path, e))?;

        // 6. chapters.json 侧车
        let sidecar_path = container_path
            .parent()
            .unwrap_or(output_dir)
            .join("chapters.json");
        let entries: Vec<SidecarEntry> = book
            .chapters()
            .iter()
            .map(|c| SidecarEntry {
                start: c.start_time().unwrap_or(0.0),
                title: c.title().to_string(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| ConversionError::internal(format!("sidecar serialization: {}", e)))?;
        tokio::fs::write(&sidecar_path, json.as_bytes())
            .await
            .map_err(|e| ConversionError::io(&sidecar_path, e))?;

        tracing::info!(
            container = %container_path.display(),
            duration_ms = summary.duration_ms,
            output_size = summary.output_size,
            "Audiobook assembled"
        );

        Ok(AssembledAudiobook {
            container_path,
            sidecar_path,
            total_duration_secs,
        })
    }

    /// 按索引顺序把章节中间产物流式追加进 master
    async fn assemble_master(
        &self,
        master_path: &Path,
        chapters: &[ChapterAudio],
        target: PcmFormat,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<u64, ConversionError> {
        let mut writer = self
            .pcm_store
            .create_writer(master_path, target)
            .await
            .map_err(pcm_err)?;

        for chapter in chapters {
            let mut reader = self
                .pcm_store
                .open_reader(&chapter.intermediate)
                .await
                .map_err(pcm_err)?;
            while let Some(chunk) = reader.read_chunk(CHUNK_FRAMES).await.map_err(pcm_err)? {
                if cancelled() {
                    return Err(ConversionError::Cancelled);
                }
                writer.write(&chunk).await.map_err(pcm_err)?;
            }
        }

        writer.finalize().await.map_err(pcm_err)
    }
}

fn pcm_err(e: PcmStoreError) -> ConversionError {
    ConversionError::internal(format!("pcm store: {}", e))
}

/// 为成品选择不冲突的路径: 追加 " (N)"，N 取最小可用值
fn resolve_collision(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let plain = dir.join(format!("{}.{}", stem, ext));
    if !plain.exists() {
        return plain;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{} ({}).{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::SampleData;

    #[test]
    fn test_resolve_collision_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let first = resolve_collision(dir.path(), "Book", "opus");
        assert_eq!(first.file_name().unwrap().to_string_lossy(), "Book.opus");

        std::fs::write(&first, b"x").unwrap();
        let second = resolve_collision(dir.path(), "Book", "opus");
        assert_eq!(
            second.file_name().unwrap().to_string_lossy(),
            "Book (1).opus"
        );

        std::fs::write(&second, b"x").unwrap();
        let third = resolve_collision(dir.path(), "Book", "opus");
        assert_eq!(
            third.file_name().unwrap().to_string_lossy(),
            "Book (2).opus"
        );
    }

    #[test]
    fn test_sidecar_keys_sorted() {
        let entry = SidecarEntry {
            start: 1.5,
            title: "One".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        // start 在 title 之前（按键名排序）
        assert!(json.find("start").unwrap() < json.find("title").unwrap());
    }

    #[tokio::test]
    async fn test_intermediate_naming_distinct_for_identical_titles() {
        use crate::infrastructure::adapters::pcm::WavPcmStore;
        use crate::infrastructure::adapters::encoder::WavCopyEncoder;

        let dir = tempfile::tempdir().unwrap();
        let assembler = AudioAssembler::new(
            Arc::new(WavPcmStore::new()),
            Arc::new(WavCopyEncoder::new()),
        );
        let target = PcmFormat::mono_f32(24000);
        let buffers =
            vec![PcmBuffer::new(target, SampleData::F32(vec![0.0; 2400]))];

        let a = assembler
            .write_chapter_intermediate(dir.path(), 0, "Same Title", buffers.clone(), target)
            .await
            .unwrap();
        let b = assembler
            .write_chapter_intermediate(dir.path(), 1, "Same Title", buffers, target)
            .await
            .unwrap();

        assert_ne!(a.intermediate, b.intermediate);
        assert!(a
            .intermediate
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("chapter_00_"));
        assert!(b
            .intermediate
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("chapter_01_"));
        assert_eq!(a.frames, 2400);
        assert!((a.duration_secs - 0.1).abs() < 1e-9);
    }
}
