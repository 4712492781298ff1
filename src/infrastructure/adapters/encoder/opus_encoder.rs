//! Ogg/Opus Encoder - master PCM 到成品压缩容器
//!
//! 基于 symphonia 流式解码 master WAV，opus 编码后写入 OGG 容器:
//! - 20ms 帧，granule position 按 RFC 7845 折算到 48kHz
//! - 采样率不在 Opus 支持集时做流式线性重采样
//! - OpusTags 嵌入 TITLE / ARTIST，封面以 METADATA_BLOCK_PICTURE 嵌入

use async_trait::async_trait;
use base64::Engine;
use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use opus::{Application, Channels, Encoder};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;

use crate::application::ports::{
    AudioFormat, ContainerEncoderPort, EncodeMetadata, TranscodeError, TranscodeSummary,
};

/// Opus 最大包大小
const MAX_PACKET: usize = 4000;

/// Ogg/Opus 编码器
pub struct OggOpusEncoder {
    /// 目标比特率（bps）
    bitrate: u32,
}

impl OggOpusEncoder {
    pub fn new(bitrate: u32) -> Self {
        Self { bitrate }
    }

    /// Opus 支持的采样率: 8000, 12000, 16000, 24000, 48000
    fn opus_compatible_rate(sample_rate: u32) -> u32 {
        match sample_rate {
            8000 | 12000 | 16000 | 24000 | 48000 => sample_rate,
            r if r <= 8000 => 8000,
            r if r <= 12000 => 12000,
            r if r <= 16000 => 16000,
            r if r <= 24000 => 24000,
            _ => 48000,
        }
    }

    /// Opus Head 包 (RFC 7845)
    fn opus_head(channels: u8, input_rate: u32, pre_skip: u16) -> Vec<u8> {
        let mut head = Vec::with_capacity(19);
        head.extend_from_slice(b"OpusHead");
        head.push(1); // version
        head.push(channels);
        head.extend_from_slice(&pre_skip.to_le_bytes());
        head.extend_from_slice(&input_rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes()); // output gain
        head.push(0); // channel mapping family
        head
    }

    /// Opus Tags 包: vendor + 元数据注释
    fn opus_tags(metadata: &EncodeMetadata) -> Vec<u8> {
        let vendor = "bookvox";
        let mut comments: Vec<String> = Vec::new();
        if !metadata.title.is_empty() {
            comments.push(format!("TITLE={}", metadata.title));
        }
        if !metadata.artist.is_empty() {
            comments.push(format!("ARTIST={}", metadata.artist));
        }
        if let Some((data, mime)) = &metadata.artwork {
            comments.push(format!(
                "METADATA_BLOCK_PICTURE={}",
                base64::engine::general_purpose::STANDARD.encode(picture_block(data, mime))
            ));
        }

        let mut tags = Vec::new();
        tags.extend_from_slice(b"OpusTags");
        tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        tags.extend_from_slice(vendor.as_bytes());
        tags.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for comment in comments {
            tags.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            tags.extend_from_slice(comment.as_bytes());
        }
        tags
    }
}

/// FLAC picture block（METADATA_BLOCK_PICTURE 的载荷，字段大端）
fn picture_block(data: &[u8], mime: &str) -> Vec<u8> {
    let mut block = Vec::with_capacity(32 + mime.len() + data.len());
    block.extend_from_slice(&3u32.to_be_bytes()); // type: front cover
    block.extend_from_slice(&(mime.len() as u32).to_be_bytes());
    block.extend_from_slice(mime.as_bytes());
    block.extend_from_slice(&0u32.to_be_bytes()); // description length
    block.extend_from_slice(&0u32.to_be_bytes()); // width
    block.extend_from_slice(&0u32.to_be_bytes()); // height
    block.extend_from_slice(&0u32.to_be_bytes()); // color depth
    block.extend_from_slice(&0u32.to_be_bytes()); // colors used
    block.extend_from_slice(&(data.len() as u32).to_be_bytes());
    block.extend_from_slice(data);
    block
}

/// 流式线性重采样器
///
/// 跨块保持源位置连续，块边界不产生断点
struct LinearResampler {
    from_rate: f64,
    to_rate: f64,
    channels: usize,
    /// 未消费的源样本（交织）
    src: Vec<f32>,
    /// src[0] 对应的全局源帧号
    src_offset: u64,
    /// 已产出的目标帧数
    emitted: u64,
}

impl LinearResampler {
    fn new(from_rate: u32, to_rate: u32, channels: usize) -> Self {
        Self {
            from_rate: from_rate as f64,
            to_rate: to_rate as f64,
            channels,
            src: Vec::new(),
            src_offset: 0,
            emitted: 0,
        }
    }

    /// 喂入一块源样本，返回可产出的目标样本
    fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        self.src.extend_from_slice(samples);
        self.drain(false)
    }

    /// 流结束，吐出尾部
    fn finish(&mut self) -> Vec<f32> {
        self.drain(true)
    }

    fn drain(&mut self, at_end: bool) -> Vec<f32> {
        let ch = self.channels;
        let mut out = Vec::new();
        let frames_avail = (self.src.len() / ch) as u64;

        loop {
            let pos = self.emitted as f64 * self.from_rate / self.to_rate;
            let idx = pos as u64;
            let frac = (pos - idx as f64) as f32;

            let last = self.src_offset + frames_avail;
            // 插值需要 idx 与 idx+1 两帧；流尾允许用末帧顶替
            if idx >= last || (!at_end && idx + 1 >= last) {
                break;
            }

            let local0 = ((idx - self.src_offset) as usize) * ch;
            let local1 = if idx + 1 < last {
                ((idx + 1 - self.src_offset) as usize) * ch
            } else {
                local0
            };
            for c in 0..ch {
                let s0 = self.src[local0 + c];
                let s1 = self.src[local1 + c];
                out.push(s0 + (s1 - s0) * frac);
            }
            self.emitted += 1;
        }

        // 丢弃不再需要的源帧
        let needed = (self.emitted as f64 * self.from_rate / self.to_rate) as u64;
        if needed > self.src_offset {
            let drop_frames = (needed - self.src_offset).min(frames_avail);
            self.src.drain(0..(drop_frames as usize) * ch);
            self.src_offset += drop_frames;
        }

        out
    }
}

#[async_trait]
impl ContainerEncoderPort for OggOpusEncoder {
    fn format(&self) -> AudioFormat {
        AudioFormat::Opus
    }

    async fn transcode(
        &self,
        master_pcm: &Path,
        dest: &Path,
        metadata: &EncodeMetadata,
    ) -> Result<TranscodeSummary, TranscodeError> {
        use symphonia::core::codecs::DecoderOptions;
        use symphonia::core::formats::FormatOptions;
        use symphonia::core::io::MediaSourceStream;
        use symphonia::core::meta::MetadataOptions;
        use symphonia::core::probe::Hint;

        let input_size = std::fs::metadata(master_pcm)
            .map_err(|e| TranscodeError::IoError(e.to_string()))?
            .len();

        let source = File::open(master_pcm).map_err(|e| TranscodeError::IoError(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("wav");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| TranscodeError::DecodingError(format!("probe failed: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| TranscodeError::DecodingError("no audio track found".to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| TranscodeError::DecodingError("unknown sample rate".to_string()))?;
        let channel_count = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| TranscodeError::DecodingError("unknown channel count".to_string()))?;

        // Opus 仅支持单/双声道
        let (opus_channels, opus_channel_count) = if channel_count == 1 {
            (Channels::Mono, 1usize)
        } else {
            (Channels::Stereo, 2usize)
        };
        if channel_count > 2 {
            return Err(TranscodeError::InvalidInput(format!(
                "{} channels not supported by Opus",
                channel_count
            )));
        }

        let target_rate = Self::opus_compatible_rate(sample_rate);
        let mut resampler = (target_rate != sample_rate)
            .then(|| LinearResampler::new(sample_rate, target_rate, opus_channel_count));

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| TranscodeError::DecodingError(format!("decoder creation: {}", e)))?;

        let mut encoder = Encoder::new(target_rate, opus_channels, Application::Voip)
            .map_err(|e| TranscodeError::EncodingError(format!("opus encoder creation: {}", e)))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(self.bitrate as i32))
            .map_err(|e| TranscodeError::EncodingError(format!("set bitrate: {}", e)))?;
        let pre_skip = encoder.get_lookahead().map(|l| l as u16).unwrap_or(312);

        let dest_file =
            File::create(dest).map_err(|e| TranscodeError::IoError(e.to_string()))?;
        let mut packet_writer = PacketWriter::new(BufWriter::new(dest_file));

        packet_writer
            .write_packet(
                Self::opus_head(opus_channel_count as u8, sample_rate, pre_skip),
                0,
                PacketWriteEndInfo::EndPage,
                0,
            )
            .map_err(|e| TranscodeError::EncodingError(format!("write opus head: {}", e)))?;
        packet_writer
            .write_packet(Self::opus_tags(metadata), 0, PacketWriteEndInfo::EndPage, 0)
            .map_err(|e| TranscodeError::EncodingError(format!("write opus tags: {}", e)))?;

        // 20ms 帧
        let frame_size = (target_rate as usize * 20) / 1000;
        let samples_per_frame = frame_size * opus_channel_count;

        // RFC 7845: granule position 折算到 48kHz
        let granule_scale = 48000.0 / target_rate as f64;
        let frame_granule = (frame_size as f64 * granule_scale) as u64;
        let mut granule_pos: u64 = (pre_skip as f64 * granule_scale) as u64;

        let mut fifo: Vec<i16> = Vec::with_capacity(samples_per_frame * 4);
        let mut output_buf = vec![0u8; MAX_PACKET];
        let mut input_frames_total: u64 = 0;

        // 解码循环: packet → f32 交织样本 → (重采样) → i16 FIFO → opus 帧
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    return Err(TranscodeError::DecodingError(format!(
                        "packet read: {}",
                        e
                    )));
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();
            input_frames_total += num_frames as u64;
            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            let actual = num_frames * spec.channels.count();
            let samples = &sample_buf.samples()[..actual];

            let chunk: Vec<f32> = match resampler.as_mut() {
                Some(r) => r.push(samples),
                None => samples.to_vec(),
            };
            push_i16(&mut fifo, &chunk);

            while fifo.len() >= samples_per_frame {
                let frame: Vec<i16> = fifo.drain(0..samples_per_frame).collect();
                let encoded_len = encoder
                    .encode(&frame, &mut output_buf)
                    .map_err(|e| TranscodeError::EncodingError(format!("opus encode: {}", e)))?;
                granule_pos += frame_granule;
                packet_writer
                    .write_packet(
                        output_buf[..encoded_len].to_vec(),
                        0,
                        PacketWriteEndInfo::NormalPacket,
                        granule_pos,
                    )
                    .map_err(|e| {
                        TranscodeError::EncodingError(format!("write opus packet: {}", e))
                    })?;
            }
        }

        // 重采样器尾部
        if let Some(r) = resampler.as_mut() {
            let tail = r.finish();
            push_i16(&mut fifo, &tail);
        }

        // 末帧零填充
        if !fifo.is_empty() {
            fifo.resize(samples_per_frame, 0);
            let encoded_len = encoder
                .encode(&fifo, &mut output_buf)
                .map_err(|e| TranscodeError::EncodingError(format!("opus encode: {}", e)))?;
            granule_pos += frame_granule;
            packet_writer
                .write_packet(
                    output_buf[..encoded_len].to_vec(),
                    0,
                    PacketWriteEndInfo::NormalPacket,
                    granule_pos,
                )
                .map_err(|e| TranscodeError::EncodingError(format!("write opus packet: {}", e)))?;
        }

        // 刷新编码器延迟（pre_skip 样本）
        let flush_frames = (pre_skip as usize).div_ceil(frame_size);
        let silence = vec![0i16; samples_per_frame];
        for flush_idx in 0..flush_frames.max(1) {
            let encoded_len = encoder
                .encode(&silence, &mut output_buf)
                .map_err(|e| TranscodeError::EncodingError(format!("opus flush: {}", e)))?;
            granule_pos += frame_granule;
            let end_info = if flush_idx == flush_frames.max(1) - 1 {
                PacketWriteEndInfo::EndStream
            } else {
                PacketWriteEndInfo::NormalPacket
            };
            packet_writer
                .write_packet(
                    output_buf[..encoded_len].to_vec(),
                    0,
                    end_info,
                    granule_pos,
                )
                .map_err(|e| TranscodeError::EncodingError(format!("write flush packet: {}", e)))?;
        }

        let mut dest_writer = packet_writer.into_inner();
        std::io::Write::flush(&mut dest_writer)
            .map_err(|e| TranscodeError::IoError(e.to_string()))?;
        drop(dest_writer);

        let output_size = std::fs::metadata(dest)
            .map_err(|e| TranscodeError::IoError(e.to_string()))?
            .len();
        let duration_ms = if sample_rate > 0 {
            input_frames_total * 1000 / sample_rate as u64
        } else {
            0
        };

        tracing::debug!(
            input_size,
            output_size,
            duration_ms,
            bitrate = self.bitrate,
            "Encoded to Opus"
        );

        Ok(TranscodeSummary {
            duration_ms,
            input_size,
            output_size,
        })
    }
}

/// f32 样本追加为 i16 FIFO
fn push_i16(fifo: &mut Vec<i16>, samples: &[f32]) {
    fifo.extend(
        samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
    );
}
