//! WAV Copy Encoder - 备选输出格式的直通"编码器"
//!
//! master 本身即 WAV，直通复制到成品路径。
//! WAV 容器没有标签支持，元数据仅记录日志。

use async_trait::async_trait;
use std::path::Path;

use crate::application::ports::{
    AudioFormat, ContainerEncoderPort, EncodeMetadata, TranscodeError, TranscodeSummary,
};
use crate::infrastructure::adapters::pcm::probe_wav_file;

/// WAV 直通编码器
pub struct WavCopyEncoder;

impl WavCopyEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WavCopyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEncoderPort for WavCopyEncoder {
    fn format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    async fn transcode(
        &self,
        master_pcm: &Path,
        dest: &Path,
        metadata: &EncodeMetadata,
    ) -> Result<TranscodeSummary, TranscodeError> {
        let (format, frames) =
            probe_wav_file(master_pcm).map_err(|e| TranscodeError::InvalidInput(e.to_string()))?;

        let copied = tokio::fs::copy(master_pcm, dest)
            .await
            .map_err(|e| TranscodeError::IoError(e.to_string()))?;

        if !metadata.title.is_empty() || metadata.artwork.is_some() {
            tracing::debug!(
                title = %metadata.title,
                "WAV container has no tag support, metadata skipped"
            );
        }

        let duration_ms = if format.sample_rate > 0 {
            frames * 1000 / format.sample_rate as u64
        } else {
            0
        };

        Ok(TranscodeSummary {
            duration_ms,
            input_size: copied,
            output_size: copied,
        })
    }
}
