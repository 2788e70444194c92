use regex::Regex;
use std::sync::OnceLock;

fn han_pattern() -> &'static Regex {
    static HAN: OnceLock<Regex> = OnceLock::new();
    HAN.get_or_init(|| Regex::new(r"\p{Han}").expect("汉字正则无效"))
}

/// 修复被按单字节编码（latin1）误读的 UTF-8 文本，例如上传后乱码的文件名。
///
/// 只有重新解码后含有汉字且没有替换字符时才采用修复结果，否则原样返回。
/// 已经正确的文本必然含有 U+00FF 以上的字符，会直接原样返回。
pub fn repair_mojibake(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match u8::try_from(u32::from(ch)) {
            Ok(byte) => bytes.push(byte),
            Err(_) => return text.to_string(),
        }
    }

    match String::from_utf8(bytes) {
        Ok(repaired) if !repaired.contains('\u{FFFD}') && han_pattern().is_match(&repaired) => {
            repaired
        }
        _ => text.to_string(),
    }
}
