use crate::error::{EdfError, Result};

/// 定宽头部数字字段是否是有效整数（允许显式正负号）
pub fn is_integer_number(s: &str) -> bool {
    let s = s.trim();
    let digits = s.strip_prefix('+').or_else(|| s.strip_prefix('-')).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// 解析定宽整数字段；空白或坏值回落到0，调用方先用
/// `is_integer_number`区分关键字段
pub fn parse_int_field(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}

/// 解析定宽浮点字段；空白或坏值回落到0
pub fn parse_float_field(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

/// 从固定宽度头部字段中取出修剪后的字符串
pub fn header_field(buf: &[u8], offset: usize, len: usize) -> String {
    let end = (offset + len).min(buf.len());
    String::from_utf8_lossy(&buf[offset..end]).trim().to_string()
}

/// Parse a TAL onset or duration field into seconds.
///
/// Onsets carry a mandatory `+`/`-` sign, durations none. Anything
/// else that `f64::from_str` rejects is malformed annotation data.
pub fn parse_tal_number(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(EdfError::MalformedAnnotation("empty number field".to_string()));
    }

    s.parse::<f64>()
        .map_err(|_| EdfError::MalformedAnnotation(format!("invalid number: {:?}", s)))
}
