//! Container Encoders - 成品容器编码端口实现
//!
//! - OggOpusEncoder: Opus 压缩 + OpusTags 标签（主格式）
//! - WavCopyEncoder: WAV 直通（备选格式）

mod opus_encoder;
mod wav_copy;

pub use opus_encoder::OggOpusEncoder;
pub use wav_copy::WavCopyEncoder;
