//! 格式统一 - 缓冲间的采样率/声道/样本布局转换
//!
//! 首个缓冲的格式是整次转换的目标格式，之后每个缓冲
//! 要么逐位一致要么经此模块转换。转换失败由调用方
//! 记录警告并沿用原缓冲（best-effort，绝不中止）。

use thiserror::Error;

use crate::application::ports::{PcmBuffer, PcmFormat, SampleData, SampleType};

/// 重采样输出容量的冗余帧数
const RESAMPLE_SLACK_FRAMES: usize = 16;

/// 格式转换错误
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("planar sample layout is not supported")]
    PlanarLayout,

    #[error("unsupported channel mapping: {from} -> {to}")]
    UnsupportedChannels { from: u16, to: u16 },
}

/// 将缓冲转换到目标格式
///
/// 流程: 样本提升为 f32 → 声道映射 → 线性插值重采样 → 目标样本类型。
/// 格式一致时原样克隆返回。
pub fn convert(buffer: &PcmBuffer, target: PcmFormat) -> Result<PcmBuffer, ConvertError> {
    let source = buffer.format();
    if source == target {
        return Ok(buffer.clone());
    }
    if !source.interleaved || !target.interleaved {
        return Err(ConvertError::PlanarLayout);
    }

    // 提升为 f32 工作样本
    let mut samples: Vec<f32> = match buffer.data() {
        SampleData::F32(v) => v.clone(),
        SampleData::I16(v) => v.iter().map(|&s| s as f32 / 32768.0).collect(),
    };

    // 声道映射
    if source.channels != target.channels {
        samples = remap_channels(&samples, source.channels, target.channels)?;
    }

    // 重采样
    if source.sample_rate != target.sample_rate {
        samples = resample(
            &samples,
            source.sample_rate,
            target.sample_rate,
            target.channels,
        );
    }

    // 目标样本类型
    let data = match target.sample_type {
        SampleType::F32 => SampleData::F32(samples),
        SampleType::I16 => SampleData::I16(
            samples
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect(),
        ),
    };

    Ok(PcmBuffer::new(target, data))
}

/// 声道映射
///
/// 支持 N→1（均值混缩）与 1→N（复制）；其余组合不支持
fn remap_channels(samples: &[f32], from: u16, to: u16) -> Result<Vec<f32>, ConvertError> {
    let from_n = from as usize;
    let to_n = to as usize;

    if from_n == 0 || to_n == 0 {
        return Err(ConvertError::UnsupportedChannels { from, to });
    }

    if to_n == 1 {
        // 混缩为单声道
        let frames = samples.len() / from_n;
        let mut out = Vec::with_capacity(frames);
        for frame in 0..frames {
            let sum: f32 = samples[frame * from_n..(frame + 1) * from_n].iter().sum();
            out.push(sum / from_n as f32);
        }
        return Ok(out);
    }

    if from_n == 1 {
        // 单声道复制到各声道
        let mut out = Vec::with_capacity(samples.len() * to_n);
        for &s in samples {
            for _ in 0..to_n {
                out.push(s);
            }
        }
        return Ok(out);
    }

    Err(ConvertError::UnsupportedChannels { from, to })
}

/// 线性插值重采样
///
/// 输出容量按 frames * to_rate / from_rate 加冗余估算
fn resample(samples: &[f32], from_rate: u32, to_rate: u32, channels: u16) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let channel_count = channels as usize;
    let frame_count = samples.len() / channel_count;
    let new_frame_count = (frame_count as f64 * ratio) as usize;
    let mut resampled =
        Vec::with_capacity((new_frame_count + RESAMPLE_SLACK_FRAMES) * channel_count);

    for i in 0..new_frame_count {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f64;

        for ch in 0..channel_count {
            let idx0 = src_idx * channel_count + ch;
            let idx1 = (src_idx + 1).min(frame_count.saturating_sub(1)) * channel_count + ch;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            // 线性插值
            resampled.push(s0 + (s1 - s0) * frac as f32);
        }
    }

    resampled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(rate: u32, channels: u16, sample_type: SampleType, frames: usize) -> PcmBuffer {
        let format = PcmFormat {
            sample_rate: rate,
            channels,
            sample_type,
            interleaved: true,
        };
        let data = match sample_type {
            SampleType::F32 => SampleData::F32(vec![0.5; frames * channels as usize]),
            SampleType::I16 => SampleData::I16(vec![16384; frames * channels as usize]),
        };
        PcmBuffer::new(format, data)
    }

    #[test]
    fn test_identical_format_passthrough() {
        let b = buffer(24000, 1, SampleType::F32, 100);
        let out = convert(&b, b.format()).unwrap();
        assert_eq!(out.data(), b.data());
    }

    #[test]
    fn test_resample_preserves_duration() {
        let b = buffer(16000, 1, SampleType::I16, 16000); // 1 秒
        let target = PcmFormat::mono_f32(24000);
        let out = convert(&b, target).unwrap();
        assert_eq!(out.format(), target);
        // 时长误差在一帧以内
        assert!((out.duration_secs() - 1.0).abs() < 1.0 / 24000.0 * 2.0);
        assert_eq!(out.frames(), 24000);
    }

    #[test]
    fn test_i16_to_f32_scaling() {
        let b = buffer(24000, 1, SampleType::I16, 4);
        let out = convert(&b, PcmFormat::mono_f32(24000)).unwrap();
        if let SampleData::F32(v) = out.data() {
            assert!((v[0] - 0.5).abs() < 0.001);
        } else {
            panic!("expected f32");
        }
    }

    #[test]
    fn test_stereo_to_mono_mixdown() {
        let format = PcmFormat {
            sample_rate: 24000,
            channels: 2,
            sample_type: SampleType::F32,
            interleaved: true,
        };
        let b = PcmBuffer::new(format, SampleData::F32(vec![1.0, 0.0, 0.5, 0.5]));
        let out = convert(&b, PcmFormat::mono_f32(24000)).unwrap();
        assert_eq!(out.data(), &SampleData::F32(vec![0.5, 0.5]));
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let b = buffer(24000, 1, SampleType::F32, 2);
        let target = PcmFormat {
            sample_rate: 24000,
            channels: 2,
            sample_type: SampleType::F32,
            interleaved: true,
        };
        let out = convert(&b, target).unwrap();
        assert_eq!(out.frames(), 2);
        assert_eq!(out.data().len(), 4);
    }

    #[test]
    fn test_unsupported_channel_map() {
        let format = PcmFormat {
            sample_rate: 24000,
            channels: 6,
            sample_type: SampleType::F32,
            interleaved: true,
        };
        let b = PcmBuffer::new(format, SampleData::F32(vec![0.0; 12]));
        let target = PcmFormat {
            sample_rate: 24000,
            channels: 2,
            sample_type: SampleType::F32,
            interleaved: true,
        };
        assert!(matches!(
            convert(&b, target),
            Err(ConvertError::UnsupportedChannels { from: 6, to: 2 })
        ));
    }
}
