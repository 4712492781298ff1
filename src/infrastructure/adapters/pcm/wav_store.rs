//! WAV PCM Store - 以 WAV 容器持有 PCM 的文件读写
//!
//! 支持:
//! - 16 位整型 (format 1) 与 32 位浮点 (format 3) 两种样本布局
//! - 流式分块读取（master 装配不整载样本）
//! - 流式追加写入，finalize 时回填 RIFF 头长度

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use async_trait::async_trait;

use crate::application::ports::{
    PcmBuffer, PcmFormat, PcmFrameReader, PcmFrameWriter, PcmStoreError, PcmStorePort, SampleData,
    SampleType,
};

/// WAV 文件头固定长度
const HEADER_LEN: u64 = 44;

/// WAV PCM 存储
pub struct WavPcmStore;

impl WavPcmStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WavPcmStore {
    fn default() -> Self {
        Self::new()
    }
}

fn io_err(e: std::io::Error) -> PcmStoreError {
    PcmStoreError::IoError(e.to_string())
}

/// 样本布局对应的 WAV 格式码
fn format_code(sample_type: SampleType) -> u16 {
    match sample_type {
        SampleType::I16 => 1, // PCM
        SampleType::F32 => 3, // IEEE float
    }
}

/// 写入 44 字节 WAV 头
///
/// data_size 先写占位值，finalize 时回填
fn write_header(file: &mut File, format: PcmFormat, data_size: u32) -> Result<(), PcmStoreError> {
    let bits_per_sample = (format.sample_type.bytes_per_sample() * 8) as u16;
    let block_align = format.channels * (bits_per_sample / 8);
    let byte_rate = format.sample_rate * block_align as u32;

    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_size).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&format_code(format.sample_type).to_le_bytes());
    header.extend_from_slice(&format.channels.to_le_bytes());
    header.extend_from_slice(&format.sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bits_per_sample.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_size.to_le_bytes());

    file.write_all(&header).map_err(io_err)
}

/// 解析 WAV 头，返回 (格式, data 起始偏移, data 字节数)
fn parse_header<R: Read + Seek>(file: &mut R) -> Result<(PcmFormat, u64, u64), PcmStoreError> {
    let mut riff = [0u8; 12];
    file.read_exact(&mut riff).map_err(io_err)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(PcmStoreError::InvalidFile(
            "missing RIFF/WAVE header".to_string(),
        ));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;

    loop {
        let mut chunk_header = [0u8; 8];
        if file.read_exact(&mut chunk_header).is_err() {
            return Err(PcmStoreError::InvalidFile(
                "missing data chunk".to_string(),
            ));
        }
        let chunk_id = &chunk_header[0..4];
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as u64;

        match chunk_id {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(PcmStoreError::InvalidFile(
                        "fmt chunk too short".to_string(),
                    ));
                }
                let mut body = vec![0u8; chunk_size as usize];
                file.read_exact(&mut body).map_err(io_err)?;
                let code = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let bits = u16::from_le_bytes([body[14], body[15]]);
                fmt = Some((code, channels, sample_rate, bits));
                // 奇数长度 chunk 对齐到偶数字节
                if chunk_size % 2 != 0 {
                    file.seek(SeekFrom::Current(1)).map_err(io_err)?;
                }
            }
            b"data" => {
                let (code, channels, sample_rate, bits) = fmt.ok_or_else(|| {
                    PcmStoreError::InvalidFile("data chunk before fmt chunk".to_string())
                })?;
                let sample_type = match (code, bits) {
                    (1, 16) => SampleType::I16,
                    (3, 32) => SampleType::F32,
                    _ => {
                        return Err(PcmStoreError::UnsupportedLayout(format!(
                            "format code {} with {} bits",
                            code, bits
                        )))
                    }
                };
                if channels == 0 || sample_rate == 0 {
                    return Err(PcmStoreError::InvalidFile(
                        "zero channels or sample rate".to_string(),
                    ));
                }
                let format = PcmFormat {
                    sample_rate,
                    channels,
                    sample_type,
                    interleaved: true,
                };
                let data_start = file.stream_position().map_err(io_err)?;
                return Ok((format, data_start, chunk_size));
            }
            _ => {
                // 跳过未知 chunk（含对齐字节）
                let skip = chunk_size + (chunk_size % 2);
                file.seek(SeekFrom::Current(skip as i64)).map_err(io_err)?;
            }
        }
    }
}

/// 将缓冲样本按目标布局编码为小端字节
///
/// 样本类型不匹配时做数值转换，使 best-effort 保留的
/// 缓冲仍能写入（采样率不匹配按原样落盘，时长漂移由上游告警）。
fn encode_samples(data: &SampleData, target: SampleType) -> Vec<u8> {
    match (data, target) {
        (SampleData::I16(v), SampleType::I16) => {
            let mut out = Vec::with_capacity(v.len() * 2);
            for s in v {
                out.extend_from_slice(&s.to_le_bytes());
            }
            out
        }
        (SampleData::F32(v), SampleType::F32) => {
            let mut out = Vec::with_capacity(v.len() * 4);
            for s in v {
                out.extend_from_slice(&s.to_le_bytes());
            }
            out
        }
        (SampleData::F32(v), SampleType::I16) => {
            let mut out = Vec::with_capacity(v.len() * 2);
            for s in v {
                let clamped = s.clamp(-1.0, 1.0);
                out.extend_from_slice(&((clamped * 32767.0) as i16).to_le_bytes());
            }
            out
        }
        (SampleData::I16(v), SampleType::F32) => {
            let mut out = Vec::with_capacity(v.len() * 4);
            for s in v {
                out.extend_from_slice(&(*s as f32 / 32768.0).to_le_bytes());
            }
            out
        }
    }
}

/// 解码整段 WAV 字节为单个缓冲
///
/// TTS HTTP 适配器解析服务返回的音频时复用
pub(crate) fn decode_wav_bytes(bytes: &[u8]) -> Result<PcmBuffer, PcmStoreError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let (format, data_start, data_size) = parse_header(&mut cursor)?;

    let end = (data_start + data_size).min(bytes.len() as u64) as usize;
    let raw = &bytes[data_start as usize..end];

    let data = match format.sample_type {
        SampleType::I16 => SampleData::I16(
            raw.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ),
        SampleType::F32 => SampleData::F32(
            raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    };

    Ok(PcmBuffer::new(format, data))
}

/// 探测 WAV 文件的格式与帧数（不读样本）
pub(crate) fn probe_wav_file(path: &Path) -> Result<(PcmFormat, u64), PcmStoreError> {
    let mut file = File::open(path).map_err(io_err)?;
    let (format, _data_start, data_size) = parse_header(&mut file)?;
    let bytes_per_frame =
        format.channels as u64 * format.sample_type.bytes_per_sample() as u64;
    Ok((format, data_size / bytes_per_frame))
}

/// WAV 流式读取器
struct WavFrameReader {
    file: File,
    format: PcmFormat,
    remaining_bytes: u64,
}

#[async_trait]
impl PcmFrameReader for WavFrameReader {
    fn format(&self) -> PcmFormat {
        self.format
    }

    async fn read_chunk(&mut self, max_frames: usize) -> Result<Option<PcmBuffer>, PcmStoreError> {
        if self.remaining_bytes == 0 {
            return Ok(None);
        }

        let bytes_per_frame =
            self.format.channels as usize * self.format.sample_type.bytes_per_sample();
        let want = (max_frames * bytes_per_frame) as u64;
        let take = want.min(self.remaining_bytes);
        // 只取整帧
        let take = take - (take % bytes_per_frame as u64);
        if take == 0 {
            self.remaining_bytes = 0;
            return Ok(None);
        }

        let mut raw = vec![0u8; take as usize];
        self.file.read_exact(&mut raw).map_err(io_err)?;
        self.remaining_bytes -= take;

        let data = match self.format.sample_type {
            SampleType::I16 => SampleData::I16(
                raw.chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
            SampleType::F32 => SampleData::F32(
                raw.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
        };

        Ok(Some(PcmBuffer::new(self.format, data)))
    }
}

/// WAV 流式写入器
struct WavFrameWriter {
    file: File,
    format: PcmFormat,
    data_bytes: u64,
    finalized: bool,
}

#[async_trait]
impl PcmFrameWriter for WavFrameWriter {
    async fn write(&mut self, buffer: &PcmBuffer) -> Result<(), PcmStoreError> {
        if self.finalized {
            return Err(PcmStoreError::IoError(
                "writer already finalized".to_string(),
            ));
        }
        let bytes = encode_samples(buffer.data(), self.format.sample_type);
        self.file.write_all(&bytes).map_err(io_err)?;
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<u64, PcmStoreError> {
        if self.finalized {
            return Err(PcmStoreError::IoError(
                "writer already finalized".to_string(),
            ));
        }
        self.finalized = true;

        // 回填 RIFF 与 data 长度
        let data_size = self.data_bytes.min(u32::MAX as u64) as u32;
        self.file.seek(SeekFrom::Start(4)).map_err(io_err)?;
        self.file
            .write_all(&(36 + data_size).to_le_bytes())
            .map_err(io_err)?;
        self.file.seek(SeekFrom::Start(40)).map_err(io_err)?;
        self.file.write_all(&data_size.to_le_bytes()).map_err(io_err)?;
        self.file.flush().map_err(io_err)?;

        let bytes_per_frame =
            self.format.channels as u64 * self.format.sample_type.bytes_per_sample() as u64;
        Ok(self.data_bytes / bytes_per_frame)
    }
}

#[async_trait]
impl PcmStorePort for WavPcmStore {
    fn extension(&self) -> &'static str {
        "wav"
    }

    async fn write_chapter(
        &self,
        path: &Path,
        format: PcmFormat,
        buffers: &[PcmBuffer],
    ) -> Result<u64, PcmStoreError> {
        let mut writer = self.create_writer(path, format).await?;
        for buffer in buffers {
            writer.write(buffer).await?;
        }
        writer.finalize().await
    }

    async fn open_reader(&self, path: &Path) -> Result<Box<dyn PcmFrameReader>, PcmStoreError> {
        let mut file = File::open(path).map_err(io_err)?;
        let (format, _data_start, data_size) = parse_header(&mut file)?;
        Ok(Box::new(WavFrameReader {
            file,
            format,
            remaining_bytes: data_size,
        }))
    }

    async fn create_writer(
        &self,
        path: &Path,
        format: PcmFormat,
    ) -> Result<Box<dyn PcmFrameWriter>, PcmStoreError> {
        if !format.interleaved {
            return Err(PcmStoreError::UnsupportedLayout(
                "planar sample layout".to_string(),
            ));
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;
        write_header(&mut file, format, 0)?;
        Ok(Box::new(WavFrameWriter {
            file,
            format,
            data_bytes: 0,
            finalized: false,
        }))
    }
}
