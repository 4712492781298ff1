//! TTS Adapters - 神经合成端口实现
//!
//! - HttpSynthesizer: 经 HTTP 调用外部神经 TTS 服务（默认实现）
//! - FakeSynthesizer: 确定性正弦波测试替身

mod fake_synthesizer;
mod http_synthesizer;

pub use fake_synthesizer::{FakeSynthesizer, FakeSynthesizerConfig, FakeSynthesizerFactory};
pub use http_synthesizer::{HttpSynthesizer, HttpSynthesizerConfig, HttpSynthesizerFactory};
