//! PCM Adapters - PCM 存储端口实现

mod wav_store;

pub(crate) use wav_store::{decode_wav_bytes, probe_wav_file};
pub use wav_store::WavPcmStore;
