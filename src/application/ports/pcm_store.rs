//! PCM Store Port - PCM 文件读写抽象
//!
//! 中间产物与 master 文件的持有格式对核心不透明，
//! 具体实现（WAV 容器）在 infrastructure/adapters 层。

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// PCM 存储错误
#[derive(Debug, Error)]
pub enum PcmStoreError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Invalid PCM file: {0}")]
    InvalidFile(String),

    #[error("Unsupported sample layout: {0}")]
    UnsupportedLayout(String),
}

/// 样本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// 32 位浮点
    F32,
    /// 16 位有符号整数
    I16,
}

impl SampleType {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::F32 => 4,
            SampleType::I16 => 2,
        }
    }
}

/// PCM 流格式描述
///
/// 首个缓冲的格式成为整次转换的目标格式，
/// 之后的缓冲要么逐位一致要么被转换到它。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数
    pub channels: u16,
    /// 样本类型
    pub sample_type: SampleType,
    /// 是否交织存放
    pub interleaved: bool,
}

impl PcmFormat {
    pub fn mono_f32(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            sample_type: SampleType::F32,
            interleaved: true,
        }
    }
}

/// 原始样本数据
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            SampleData::F32(v) => v.len(),
            SampleData::I16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// PCM 缓冲 - TTS 产出、Assembler 消费一次
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    format: PcmFormat,
    data: SampleData,
}

impl PcmBuffer {
    /// 创建缓冲，样本数必须能被声道数整除
    pub fn new(format: PcmFormat, data: SampleData) -> Self {
        debug_assert!(
            format.channels > 0 && data.len() % format.channels as usize == 0,
            "样本数必须与声道数对齐"
        );
        Self { format, data }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn data(&self) -> &SampleData {
        &self.data
    }

    /// 帧数（每帧含所有声道各一个样本）
    pub fn frames(&self) -> usize {
        self.data.len() / self.format.channels as usize
    }

    /// 时长（秒）
    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.format.sample_rate as f64
    }
}

/// PCM 流式读取器
#[async_trait]
pub trait PcmFrameReader: Send {
    /// 流的格式
    fn format(&self) -> PcmFormat;

    /// 读取至多 max_frames 帧，流结束返回 None
    async fn read_chunk(&mut self, max_frames: usize) -> Result<Option<PcmBuffer>, PcmStoreError>;
}

/// PCM 流式写入器
#[async_trait]
pub trait PcmFrameWriter: Send {
    /// 追加一个缓冲（格式须与创建时一致）
    async fn write(&mut self, buffer: &PcmBuffer) -> Result<(), PcmStoreError>;

    /// 终结文件头并落盘，返回总帧数
    async fn finalize(&mut self) -> Result<u64, PcmStoreError>;
}

/// PCM Store Port
#[async_trait]
pub trait PcmStorePort: Send + Sync {
    /// 中间产物的文件扩展名（不含点）
    fn extension(&self) -> &'static str;

    /// 将一章的缓冲序列按给定格式写为单个 PCM 文件，返回帧数
    async fn write_chapter(
        &self,
        path: &Path,
        format: PcmFormat,
        buffers: &[PcmBuffer],
    ) -> Result<u64, PcmStoreError>;

    /// 打开已有 PCM 文件做流式读取
    async fn open_reader(&self, path: &Path) -> Result<Box<dyn PcmFrameReader>, PcmStoreError>;

    /// 创建流式写入器（master 装配用）
    async fn create_writer(
        &self,
        path: &Path,
        format: PcmFormat,
    ) -> Result<Box<dyn PcmFrameWriter>, PcmStoreError>;
}
