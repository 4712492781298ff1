//! 端到端转换管线测试
//!
//! 在临时目录里构造真实 EPUB 档案，用 Fake 合成器驱动完整编排:
//! 解析 → 规整 → 并行合成 → 装配 → 成品与侧车。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use bookvox::application::ports::{
    AudioFormat, ContainerEncoderPort, EncodeMetadata, PcmBuffer, PcmFormat, SampleData,
    SampleType, SessionManagerPort, SpeechSynthesizerPort, SynthesizerFactoryPort, TranscodeError,
    TranscodeSummary, TtsError, VoiceInfo,
};
use bookvox::application::ConversionError;
use bookvox::domain::normalize::{NewlineMode, NormalizeOptions};
use bookvox::infrastructure::adapters::encoder::{OggOpusEncoder, WavCopyEncoder};
use bookvox::infrastructure::adapters::pcm::WavPcmStore;
use bookvox::infrastructure::adapters::tts::{FakeSynthesizerConfig, FakeSynthesizerFactory};
use bookvox::infrastructure::events::{ConversionEvent, ProgressPublisher};
use bookvox::infrastructure::memory::InMemorySessionManager;
use bookvox::infrastructure::worker::{ConversionWorker, ConversionWorkerConfig};

const CONTAINER_XML: &[u8] = br#"<?xml version="1.0"?>
<container><rootfiles><rootfile full-path="OEBPS/content.opf"/></rootfiles></container>"#;

/// 以章节列表构造 EPUB 档案
fn build_epub(dir: &Path, title: &str, chapters: &[(&str, &str)]) -> PathBuf {
    let mut manifest = String::new();
    let mut spine = String::new();
    for (i, (name, _)) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            r#"<item id="c{i}" href="{name}" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="c{i}"/>"#));
    }
    let opf = format!(
        r#"<?xml version="1.0"?>
<package xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata>
    <dc:title>{title}</dc:title>
    <dc:creator>Test Author</dc:creator>
  </metadata>
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#
    );

    let path = dir.join("book.epub");
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("META-INF/container.xml", options).unwrap();
    writer.write_all(CONTAINER_XML).unwrap();
    writer.start_file("OEBPS/content.opf", options).unwrap();
    writer.write_all(opf.as_bytes()).unwrap();
    for (name, html) in chapters {
        writer
            .start_file(format!("OEBPS/{}", name), options)
            .unwrap();
        writer.write_all(html.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

struct Harness {
    worker: Arc<ConversionWorker>,
    session_manager: Arc<InMemorySessionManager>,
    publisher: Arc<ProgressPublisher>,
}

/// 装配一个完整的 worker
fn harness(
    output_dir: &Path,
    factory: Arc<dyn SynthesizerFactoryPort>,
    encoder: Arc<dyn ContainerEncoderPort>,
    workers: usize,
    normalize: NormalizeOptions,
) -> Harness {
    let session_manager = InMemorySessionManager::new().arc();
    let publisher = ProgressPublisher::new().arc();
    let worker = Arc::new(ConversionWorker::new(
        ConversionWorkerConfig {
            output_dir: output_dir.to_path_buf(),
            voice: "fake".to_string(),
            language: "en".to_string(),
            parallel_workers: workers,
            normalize,
        },
        session_manager.clone(),
        factory,
        Arc::new(WavPcmStore::new()),
        encoder,
        publisher.clone(),
    ));
    Harness {
        worker,
        session_manager,
        publisher,
    }
}

fn none_mode() -> NormalizeOptions {
    NormalizeOptions {
        newline_mode: NewlineMode::None,
        ..NormalizeOptions::default()
    }
}

/// 会话目录里的章节中间产物（排除 master）
fn intermediates(session_folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(session_folder)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().starts_with("chapter_"))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test]
async fn two_chapter_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(
        dir.path(),
        "Test Book",
        &[("c1.xhtml", "<p>Hello.</p>"), ("c2.xhtml", "<p>World.</p>")],
    );

    // 每章固定 24000 帧 @ 24kHz = 恰好 1 秒
    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig {
        fixed_frames: Some(24000),
        ..Default::default()
    }));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        2,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &epub).await.unwrap();

    // 成品与总时长
    assert!(artifact.container_path.exists());
    assert!((artifact.total_duration_secs - 2.0).abs() < 1.0 / 24000.0);
    assert_eq!(artifact.limit_hits, 0);

    // 两个中间产物
    let files = intermediates(&artifact.session_folder);
    assert_eq!(files.len(), 2);

    // master 已在转码成功后删除
    assert!(!artifact.session_folder.join("master.wav").exists());

    // 侧车内容
    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.sidecar_path).unwrap()).unwrap();
    let entries = sidecar.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["start"].as_f64().unwrap(), 0.0);
    assert!((entries[1]["start"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    // 无 nav 无 ncx: href 兜底标题
    assert_eq!(entries[0]["title"].as_str().unwrap(), "c1");
    assert_eq!(entries[1]["title"].as_str().unwrap(), "c2");

    // 会话目录保留
    assert!(artifact.session_folder.exists());

    // 终态
    let session = h.session_manager.get(&session_id).unwrap();
    assert_eq!(session.stage.as_str(), "complete");
    assert!((session.progress - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn token_limit_bisection_counts_hits() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(
        dir.path(),
        "Bisect",
        &[(
            "only.xhtml",
            "<p>Sentence one. Sentence two? Sentence three!</p>",
        )],
    );

    // 30 字符以上触发超限: 整章超限一次，右半再超限一次
    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig {
        char_limit: Some(30),
        ..Default::default()
    }));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &epub).await.unwrap();

    assert_eq!(artifact.limit_hits, 2);
    assert!(artifact.container_path.exists());
    assert!(artifact.total_duration_secs > 0.0);
}

#[tokio::test]
async fn single_character_over_limit_surfaces_as_synthesis_failure() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(dir.path(), "Tiny", &[("a.xhtml", "<p>X</p>")]);

    // 上限 1: 单字符也超限，二分无法推进，升级为合成失败
    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig {
        char_limit: Some(1),
        ..Default::default()
    }));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let result = h.worker.run(&session_id, &epub).await;
    assert!(matches!(
        result,
        Err(ConversionError::SynthesisFailed { chapter: 0, .. })
    ));
}

#[tokio::test]
async fn partial_toc_falls_back_to_heading_heuristic() {
    let dir = tempfile::tempdir().unwrap();

    // NCX 只收录第一章；第二章标题由启发式从 <h1> 求得
    let opf = br#"<?xml version="1.0"?>
<package xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata><dc:title>Partial</dc:title></metadata>
  <manifest>
    <item id="toc" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c0" href="a.xhtml" media-type="application/xhtml+xml"/>
    <item id="c1" href="b.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="c0"/><itemref idref="c1"/></spine>
</package>"#;
    let ncx = br#"<ncx><navMap>
      <navPoint><navLabel><text>Listed Chapter</text></navLabel><content src="a.xhtml"/></navPoint>
    </navMap></ncx>"#;

    let path = dir.path().join("book.epub");
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in [
        ("META-INF/container.xml", CONTAINER_XML),
        ("OEBPS/content.opf", opf.as_slice()),
        ("OEBPS/toc.ncx", ncx.as_slice()),
        ("OEBPS/a.xhtml", b"<p>First body.</p>".as_slice()),
        (
            "OEBPS/b.xhtml",
            b"<body><h1>Unlisted Heading</h1><p>Second body.</p></body>".as_slice(),
        ),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig::default()));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &path).await.unwrap();

    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.sidecar_path).unwrap()).unwrap();
    let entries = sidecar.as_array().unwrap();
    assert_eq!(entries[0]["title"].as_str().unwrap(), "Listed Chapter");
    assert_eq!(entries[1]["title"].as_str().unwrap(), "Unlisted Heading");
}

#[tokio::test]
async fn synthesis_failure_aborts_and_preserves_session() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(
        dir.path(),
        "Doomed",
        &[
            ("a.xhtml", "<p>Fine text.</p>"),
            ("b.xhtml", "<p>This chapter EXPLODES here.</p>"),
        ],
    );

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig {
        fail_marker: Some("EXPLODES".to_string()),
        ..Default::default()
    }));
    let out = dir.path().join("out");
    let h = harness(
        &out,
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let result = h.worker.run(&session_id, &epub).await;

    assert!(matches!(
        result,
        Err(ConversionError::SynthesisFailed { chapter: 1, .. })
    ));

    // 不产出部分有声书，但会话目录保留
    assert!(!out.join("Doomed.wav").exists());
    assert!(!out.join("chapters.json").exists());
    let session = h.session_manager.get(&session_id).unwrap();
    assert!(session.folder.exists());
    assert_eq!(session.stage.as_str(), "failed");
}

#[tokio::test]
async fn cancellation_mid_synthesis_keeps_partial_intermediates() {
    let dir = tempfile::tempdir().unwrap();
    let chapters: Vec<(String, String)> = (0..10)
        .map(|i| {
            (
                format!("ch{i}.xhtml"),
                format!("<p>Chapter number {i} body text.</p>"),
            )
        })
        .collect();
    let chapter_refs: Vec<(&str, &str)> = chapters
        .iter()
        .map(|(n, h)| (n.as_str(), h.as_str()))
        .collect();
    let epub = build_epub(dir.path(), "Long Book", &chapter_refs);

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig {
        delay_ms: 40,
        ..Default::default()
    }));
    let out = dir.path().join("out");
    let h = harness(
        &out,
        factory,
        Arc::new(WavCopyEncoder::new()),
        2,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();

    // 第 3 章完成后触发取消
    let mut events = h.publisher.register_session(&session_id);
    let session_manager: Arc<dyn SessionManagerPort> = h.session_manager.clone();
    let cancel_id = session_id.clone();
    tokio::spawn(async move {
        let mut completed = 0;
        while let Ok(event) = events.recv().await {
            if matches!(event, ConversionEvent::ChapterCompleted { .. }) {
                completed += 1;
                if completed == 3 {
                    session_manager.cancel(&cancel_id);
                    break;
                }
            }
        }
    });

    let result = h.worker.run(&session_id, &epub).await;
    assert!(matches!(result, Err(ConversionError::Cancelled)));

    let session = h.session_manager.get(&session_id).unwrap();
    assert_eq!(session.stage.as_str(), "cancelled");

    // 已完成章节的中间产物保留（取消在一章边界内被观察到）
    let files = intermediates(&session.folder);
    assert!(
        (3..=8).contains(&files.len()),
        "expected partial intermediates, got {}",
        files.len()
    );

    // 无成品、无侧车
    assert!(!out.join("Long Book.wav").exists());
    assert!(!out.join("chapters.json").exists());
}

/// 第一章 24kHz f32，之后 16kHz i16 — 验证端到端格式统一
struct MixedFormatFactory {
    calls: AtomicUsize,
}

struct MixedFormatSynthesizer {
    format: PcmFormat,
    frames: usize,
}

#[async_trait]
impl SynthesizerFactoryPort for MixedFormatFactory {
    async fn voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
        Ok(Vec::new())
    }

    async fn create(
        &self,
        _voice: &str,
        _language: &str,
    ) -> Result<Box<dyn SpeechSynthesizerPort>, TtsError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Ok(Box::new(MixedFormatSynthesizer {
                format: PcmFormat::mono_f32(24000),
                frames: 24000,
            }))
        } else {
            Ok(Box::new(MixedFormatSynthesizer {
                format: PcmFormat {
                    sample_rate: 16000,
                    channels: 1,
                    sample_type: SampleType::I16,
                    interleaved: true,
                },
                frames: 16000,
            }))
        }
    }
}

#[async_trait]
impl SpeechSynthesizerPort for MixedFormatSynthesizer {
    async fn synthesize(&mut self, _text: &str) -> Result<Vec<PcmBuffer>, TtsError> {
        let data = match self.format.sample_type {
            SampleType::F32 => SampleData::F32(vec![0.1; self.frames]),
            SampleType::I16 => SampleData::I16(vec![3000; self.frames]),
        };
        Ok(vec![PcmBuffer::new(self.format, data)])
    }
}

#[tokio::test]
async fn mixed_formats_unified_to_first_chapter_format() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(
        dir.path(),
        "Mixed",
        &[("a.xhtml", "<p>First.</p>"), ("b.xhtml", "<p>Second.</p>")],
    );

    let factory = Arc::new(MixedFormatFactory {
        calls: AtomicUsize::new(0),
    });
    // 单 worker 保证第一章先合成
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &epub).await.unwrap();

    // 两章各 1 秒: 16000 帧 @16kHz 重采样为 24000 帧 @24kHz
    assert!((artifact.total_duration_secs - 2.0).abs() < 2.0 / 24000.0);

    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.sidecar_path).unwrap()).unwrap();
    let entries = sidecar.as_array().unwrap();
    assert!((entries[1]["start"].as_f64().unwrap() - 1.0).abs() < 1e-3);
}

/// 总是失败的编码器，验证 TranscodeFailed 保留 master
struct FailingEncoder;

#[async_trait]
impl ContainerEncoderPort for FailingEncoder {
    fn format(&self) -> AudioFormat {
        AudioFormat::Opus
    }

    async fn transcode(
        &self,
        _master_pcm: &Path,
        _dest: &Path,
        _metadata: &EncodeMetadata,
    ) -> Result<TranscodeSummary, TranscodeError> {
        Err(TranscodeError::EncodingError("injected".to_string()))
    }
}

#[tokio::test]
async fn transcode_failure_keeps_master_pcm() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(dir.path(), "Keep Master", &[("a.xhtml", "<p>Text.</p>")]);

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig::default()));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(FailingEncoder),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let result = h.worker.run(&session_id, &epub).await;
    assert!(matches!(result, Err(ConversionError::TranscodeFailed(_))));

    // master 留作诊断
    let session = h.session_manager.get(&session_id).unwrap();
    assert!(session.folder.join("master.wav").exists());
}

#[tokio::test]
async fn opus_container_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(
        dir.path(),
        "Opus Book",
        &[("a.xhtml", "<p>Some narration text for the encoder.</p>")],
    );

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig {
        fixed_frames: Some(12000),
        ..Default::default()
    }));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(OggOpusEncoder::new(32000)),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &epub).await.unwrap();

    assert_eq!(
        artifact.container_path.extension().unwrap().to_string_lossy(),
        "opus"
    );
    let bytes = std::fs::read(&artifact.container_path).unwrap();
    assert_eq!(&bytes[0..4], b"OggS");

    // OpusTags 带书名与作者
    let haystack = String::from_utf8_lossy(&bytes);
    assert!(haystack.contains("Opus Book"));
    assert!(haystack.contains("Test Author"));
}

#[tokio::test]
async fn filename_collision_appends_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let epub = build_epub(dir.path(), "Same Name", &[("a.xhtml", "<p>Text.</p>")]);

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig::default()));
    let h = harness(
        &out,
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let first_id = h.worker.create_session().unwrap();
    let first = h.worker.run(&first_id, &epub).await.unwrap();
    assert_eq!(
        first.container_path.file_name().unwrap().to_string_lossy(),
        "Same Name.wav"
    );

    let second_id = h.worker.create_session().unwrap();
    let second = h.worker.run(&second_id, &epub).await.unwrap();
    assert_eq!(
        second.container_path.file_name().unwrap().to_string_lossy(),
        "Same Name (1).wav"
    );
}

#[tokio::test]
async fn cleanup_session_removes_folder() {
    let dir = tempfile::tempdir().unwrap();
    let epub = build_epub(dir.path(), "Tidy", &[("a.xhtml", "<p>Text.</p>")]);

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig::default()));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        1,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &epub).await.unwrap();
    assert!(artifact.session_folder.exists());

    h.worker.cleanup_session(&session_id).await.unwrap();
    assert!(!artifact.session_folder.exists());
    assert!(h.session_manager.get(&session_id).is_err());
    // 成品不受清理影响
    assert!(artifact.container_path.exists());
}

#[tokio::test]
async fn sidecar_starts_are_non_decreasing() {
    let dir = tempfile::tempdir().unwrap();
    let chapters: Vec<(String, String)> = (0..5)
        .map(|i| (format!("c{i}.xhtml"), format!("<p>Body {i}.</p>")))
        .collect();
    let chapter_refs: Vec<(&str, &str)> = chapters
        .iter()
        .map(|(n, h)| (n.as_str(), h.as_str()))
        .collect();
    let epub = build_epub(dir.path(), "Monotonic", &chapter_refs);

    let factory = Arc::new(FakeSynthesizerFactory::new(FakeSynthesizerConfig::default()));
    let h = harness(
        &dir.path().join("out"),
        factory,
        Arc::new(WavCopyEncoder::new()),
        4,
        none_mode(),
    );

    let session_id = h.worker.create_session().unwrap();
    let artifact = h.worker.run(&session_id, &epub).await.unwrap();

    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.sidecar_path).unwrap()).unwrap();
    let starts: Vec<f64> = sidecar
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["start"].as_f64().unwrap())
        .collect();
    assert_eq!(starts.len(), 5);
    for pair in starts.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
}
