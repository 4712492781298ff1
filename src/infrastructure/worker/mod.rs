//! Workers - 合成调度与转换编排

mod conversion_worker;
mod synthesis;

pub use conversion_worker::{AudiobookArtifact, ConversionWorker, ConversionWorkerConfig};
pub use synthesis::{ChapterText, SynthesisOutput, SynthesisScheduler};
