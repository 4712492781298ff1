//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod container_encoder;
mod pcm_store;
mod session_manager;
mod tts_engine;

pub use container_encoder::{
    AudioFormat, ContainerEncoderPort, EncodeMetadata, TranscodeError, TranscodeSummary,
};
pub use pcm_store::{
    PcmBuffer, PcmFormat, PcmFrameReader, PcmFrameWriter, PcmStoreError, PcmStorePort, SampleData,
    SampleType,
};
pub use session_manager::{
    ConversionSession, ConversionStage, LogEntry, SessionError, SessionManagerPort,
};
pub use tts_engine::{
    SpeechSynthesizerPort, SynthesizerFactoryPort, TtsError, VoiceInfo,
};
