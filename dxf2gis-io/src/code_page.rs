use std::borrow::Cow;

use encoding_rs::Encoding;

/// 将 DXF 文本解码为 UTF-8。合法 UTF-8 直接借用，否则按 `$DWGCODEPAGE` 选择编码。
pub(crate) fn decode_dxf_bytes(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(text.strip_prefix('\u{feff}').unwrap_or(text));
    }
    let preview = String::from_utf8_lossy(bytes);
    let encoding = header_code_page(&preview)
        .and_then(|code_page| encoding_for(&code_page))
        .unwrap_or(encoding_rs::WINDOWS_1252);
    tracing::debug!(encoding = encoding.name(), "DXF 非 UTF-8，按代码页解码");
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::warn!(encoding = encoding.name(), "DXF 解码时遇到无法映射的字节，已替换");
    }
    text
}

/// 在 HEADER 段中查找 `$DWGCODEPAGE` 的值（组码 3）。
fn header_code_page(text: &str) -> Option<String> {
    let mut lines = text.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if line == "$DWGCODEPAGE" {
            let code = lines.next()?;
            let value = lines.next()?;
            if code == "3" {
                return Some(value.to_string());
            }
            return None;
        }
        if line == "ENDSEC" {
            return None;
        }
    }
    None
}

fn encoding_for(code_page: &str) -> Option<&'static Encoding> {
    let encoding = match code_page.to_ascii_lowercase().as_str() {
        "ansi_950" | "big5" => encoding_rs::BIG5,
        "ansi_936" | "gb2312" => encoding_rs::GBK,
        "ansi_932" => encoding_rs::SHIFT_JIS,
        "ansi_949" | "korean" => encoding_rs::EUC_KR,
        "ansi_874" => encoding_rs::WINDOWS_874,
        "ansi_1250" => encoding_rs::WINDOWS_1250,
        "ansi_1251" => encoding_rs::WINDOWS_1251,
        "ansi_1253" => encoding_rs::WINDOWS_1253,
        "ansi_1254" => encoding_rs::WINDOWS_1254,
        "ansi_1255" => encoding_rs::WINDOWS_1255,
        "ansi_1256" => encoding_rs::WINDOWS_1256,
        "ansi_1257" => encoding_rs::WINDOWS_1257,
        "ansi_1258" => encoding_rs::WINDOWS_1258,
        "utf-8" | "utf8" => encoding_rs::UTF_8,
        _ => return None,
    };
    Some(encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_utf8_is_borrowed_without_bom() {
        let text = decode_dxf_bytes("\u{feff}0\nEOF\n".as_bytes());
        assert!(matches!(text, Cow::Borrowed(_)));
        assert!(text.starts_with('0'));
    }

    #[test]
    fn big5_drawing_is_decoded_by_header_code_page() {
        let (layer, _, _) = encoding_rs::BIG5.encode("道路");
        let mut bytes = b"0\nSECTION\n2\nHEADER\n9\n$DWGCODEPAGE\n3\nANSI_950\n0\nENDSEC\n0\nSECTION\n2\nENTITIES\n0\nPOINT\n8\n".to_vec();
        bytes.extend_from_slice(&layer);
        bytes.extend_from_slice(b"\n0\nENDSEC\n0\nEOF\n");
        let text = decode_dxf_bytes(&bytes);
        assert!(text.contains("道路"), "解码结果：{text}");
    }

    #[test]
    fn unknown_code_page_falls_back_to_none() {
        assert!(encoding_for("dos999").is_none());
        assert_eq!(encoding_for("ANSI_936"), Some(encoding_rs::GBK));
    }
}
