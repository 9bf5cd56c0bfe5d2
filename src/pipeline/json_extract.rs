//! JSON 提取：从模型的自由文本输出中恢复第一个完整的 JSON 对象
//!
//! 从第一个 `{` 向后扫描，跟踪是否处于字符串字面量内、上一个字符是否为未消费的转义符；
//! 仅在字符串外统计花括号深度，深度回到 0 时返回对应切片。前后的说明文字、markdown 围栏都会被忽略。

use serde::de::DeserializeOwned;

use crate::pipeline::ParseStage;

/// 返回第一个平衡的 `{...}` 子串；没有闭合对象时返回 None
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 解析失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 文本中没有闭合的 JSON 对象
    NoObject,
    /// 找到对象但严格反序列化失败
    Invalid(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NoObject => write!(f, "no JSON object found"),
            DecodeError::Invalid(e) => write!(f, "invalid JSON: {}", e),
        }
    }
}

/// 先整段严格解析，失败再提取后严格解析；返回值与产出它的解析阶段
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<(T, ParseStage), DecodeError> {
    if let Ok(value) = serde_json::from_str::<T>(text.trim()) {
        return Ok((value, ParseStage::Direct));
    }
    let slice = extract_json(text).ok_or(DecodeError::NoObject)?;
    serde_json::from_str::<T>(slice)
        .map(|v| (v, ParseStage::Extracted))
        .map_err(|e| DecodeError::Invalid(e.to_string()))
}
