//! 章节标题启发式
//!
//! 每章以原始 HTML 与规整后文本共同求标题:
//! - tag_text: 取 title/h1/h2/h3 中第一个有非空白内容的标签文本
//! - first_few: 取规整后文本前 60 个字符
//! - auto: 先试标签文本，结果为空或纯数字空格时退化为 first_few
//!
//! 所有输出经过文件名净化（标题会成为文件名组成部分）。

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::domain::book::sanitize_component;

use super::{TitleMode, BLANK_TITLE};

/// first_few 模式截取的字符数
const FIRST_FEW_CHARS: usize = 60;

/// 标题候选标签，按优先级排列
const HEADING_TAGS: [&[u8]; 4] = [b"title", b"h1", b"h2", b"h3"];

/// 提取章节标题
pub fn extract_title(html: &[u8], normalized_text: &str, mode: TitleMode) -> String {
    match mode {
        TitleMode::TagText => {
            let candidate = first_heading_text(html).map(|t| sanitize_component(&t));
            match candidate {
                Some(t) if !t.is_empty() => t,
                _ => BLANK_TITLE.to_string(),
            }
        }
        TitleMode::FirstFew => first_few(normalized_text),
        TitleMode::Auto => {
            let candidate = first_heading_text(html).map(|t| sanitize_component(&t));
            match candidate {
                Some(t) if !t.is_empty() && !is_digits_and_spaces(&t) => t,
                _ => first_few(normalized_text),
            }
        }
    }
}

/// 规整后文本的前 60 个字符，净化后为空时给占位符
fn first_few(normalized_text: &str) -> String {
    let head: String = normalized_text.chars().take(FIRST_FEW_CHARS).collect();
    let sanitized = sanitize_component(&head);
    if sanitized.is_empty() {
        BLANK_TITLE.to_string()
    } else {
        sanitized
    }
}

/// 是否仅由数字和空格构成（auto 模式视为无效标题，如页码）
fn is_digits_and_spaces(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_digit() || c == ' ')
}

/// 去掉命名空间前缀
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// 按优先级取第一个有非空白内容的标题标签文本
///
/// 单遍扫描，每种标签只记录文档中的首次出现。
fn first_heading_text(html: &[u8]) -> Option<String> {
    let content = String::from_utf8_lossy(html);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().check_end_names = false;

    // 与 HEADING_TAGS 对位的首个文本
    let mut found: [Option<String>; 4] = [None, None, None, None];
    // 正在捕获的标签槽位与嵌套深度
    let mut capture: Option<(usize, usize, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if let Some((_, depth, _)) = capture.as_mut() {
                    *depth += 1;
                } else if let Some(slot) = HEADING_TAGS.iter().position(|&tag| tag == local) {
                    if found[slot].is_none() {
                        capture = Some((slot, 1, String::new()));
                    }
                }
            }
            Ok(Event::End(_)) => {
                let finished = match capture.as_mut() {
                    Some((slot, depth, buf)) => {
                        *depth -= 1;
                        if *depth == 0 {
                            Some((*slot, std::mem::take(buf)))
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                if let Some((slot, text)) = finished {
                    capture = None;
                    if !text.trim().is_empty() {
                        found[slot] = Some(text);
                        // title 命中即可提前结束
                        if slot == 0 {
                            break;
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    // 标题内的实体以空格兜底即可
                    let entity = String::from_utf8_lossy(e.as_ref());
                    match entity.as_ref() {
                        "amp" => buf.push('&'),
                        "lt" => buf.push('<'),
                        "gt" => buf.push('>'),
                        "quot" => buf.push('"'),
                        "apos" => buf.push('\''),
                        _ => buf.push(' '),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    found.into_iter().flatten().next()
}
