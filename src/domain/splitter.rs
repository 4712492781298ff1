//! 文本二分器
//!
//! TTS 输入超出模型上下文时，调度器以二分回退重试。
//! 切分点优先落在句末标点之后，保证每一半仍是可朗读的完整片段。
//!
//! 切分是对输入的精确划分：两半拼接后逐字符等于原文，
//! 这样装配产物的拼接顺序才能覆盖原文的每一个字符。

/// 句边界字符：句号、叹号、问号、换行
#[inline]
fn is_boundary(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '\n')
}

/// 在中点附近寻找切分索引并精确划分文本
///
/// 策略:
/// 1. 从字符中点向左扫描句边界字符，命中则在其后切分
/// 2. 左侧无边界时从中点向右扫描
/// 3. 两侧均无边界时按字符数在中点硬切
/// 4. 任一半去除空白后为空时，退回中点硬切（下限 1 字符，保证推进）
///
/// 调用方保证输入至少 2 个字符。
pub fn split_text(text: &str) -> (String, String) {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    debug_assert!(n >= 2, "split_text 要求至少 2 个字符");

    let mid = n / 2;

    // 边界扫描：先向左（含中点），再向右
    let boundary = (0..=mid.min(n - 1))
        .rev()
        .find(|&i| is_boundary(chars[i]))
        .or_else(|| (mid + 1..n).find(|&i| is_boundary(chars[i])));

    let split_at = boundary.map(|i| i + 1).unwrap_or(mid);

    if split_at >= 1 && split_at < n {
        let left: String = chars[..split_at].iter().collect();
        let right: String = chars[split_at..].iter().collect();
        if !left.trim().is_empty() && !right.trim().is_empty() {
            return (left, right);
        }
    }

    // 边界切分产生了空的一半（或落在端点），改为中点硬切，
    // 下限 1 字符保证两半均非空
    let strict = mid.clamp(1, n - 1);
    let left: String = chars[..strict].iter().collect();
    let right: String = chars[strict..].iter().collect();
    (left, right)
}
