//! 规整管线 - 脚注清理、用户规则、换行模式、空白压缩

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use super::html::extract_text;
use super::{NewlineMode, NormalizeError, NormalizeOptions};

/// 上标脚注：标点或右引号之后的 1-3 位数字串（其间无单词字符）
fn superscript_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([.!?,;:)\]"'\u{2019}\u{201D}\u{00BB}])\s*\d{1,3}\b"#).unwrap()
    })
}

/// 方括号数字引用: [3] [3.1] [10.2.4]
fn bracketed_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\d+(\.\d+)*\]").unwrap())
}

/// 连续换行（一个及以上）
fn newline_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n+").unwrap())
}

/// 连续换行（两个及以上）
fn double_newline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").unwrap())
}

/// 对章节 HTML 执行完整规整管线
pub fn normalize_chapter(html: &[u8], opts: &NormalizeOptions) -> Result<String, NormalizeError> {
    let text = extract_text(html)?;
    normalize_text(&text, opts)
}

/// 对已剥离 HTML 的文本执行管线后半段
pub fn normalize_text(text: &str, opts: &NormalizeOptions) -> Result<String, NormalizeError> {
    let mut current = text.to_string();

    if opts.footnote_cleanup {
        current = strip_footnotes(&current);
    }

    for rule in &opts.rules {
        let re = RegexBuilder::new(&rule.pattern)
            .case_insensitive(rule.case_insensitive)
            .build()
            .map_err(|e| NormalizeError::InvalidRule {
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?;
        current = re.replace_all(&current, rule.replacement.as_str()).into_owned();
    }

    Ok(apply_newline_mode(&current, opts.newline_mode, &opts.break_string))
}

/// 清理方括号引用与上标脚注
///
/// 先去方括号引用：上标正则会把 [3.1] 里的 `.1` 当作
/// 标点后的数字串吃掉，留下无法再匹配的 [3.]
fn strip_footnotes(text: &str) -> String {
    let pass1 = bracketed_ref_re().replace_all(text, "");
    superscript_ref_re().replace_all(&pass1, "$1").into_owned()
}

/// 按换行模式折叠文本并压缩空白
///
/// break_string 原样插入，不参与空白压缩，
/// 因此成品中唯一允许的连续空白来自 break_string 本身。
fn apply_newline_mode(text: &str, mode: NewlineMode, break_string: &str) -> String {
    match mode {
        NewlineMode::Single => {
            let segments: Vec<String> = newline_run_re()
                .split(text)
                .map(collapse_whitespace)
                .filter(|s| !s.is_empty())
                .collect();
            segments.join(break_string)
        }
        NewlineMode::Double => {
            let paragraphs: Vec<String> = double_newline_re()
                .split(text)
                .map(|p| collapse_whitespace(&p.replace('\n', " ")))
                .filter(|s| !s.is_empty())
                .collect();
            paragraphs.join(break_string)
        }
        NewlineMode::None => collapse_whitespace(&text.replace('\n', " ")),
    }
}

/// 空白压缩：任意空白串折叠为单个空格，去除首尾空白
fn collapse_whitespace(text: impl AsRef<str>) -> String {
    let mut out = String::with_capacity(text.as_ref().len());
    let mut pending_space = false;
    for ch in text.as_ref().chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }
    out
}
