//! `.prj` 内容：把注册表中的 OGC WKT1 改写成 ESRI 风格。
//!
//! ESRI 读取器不认 AUTHORITY、AXIS、TOWGS84、EXTENSION 节点，基准面名带 `D_` 前缀。

use std::iter::Peekable;
use std::str::Chars;

use tracing::debug;

const DROPPED_NODES: &[&str] = &["AUTHORITY", "AXIS", "TOWGS84", "EXTENSION"];
const DATUM_PREFIX: &str = "D_";

/// 无法解析的定义原样返回。
pub(crate) fn esri_wkt(wkt: &str) -> String {
    match WktParser::new(wkt).parse() {
        Some(root) => {
            let mut out = String::with_capacity(wkt.len());
            root.write_esri(&mut out);
            out
        }
        None => {
            debug!("WKT 无法解析，按原样写出 .prj");
            wkt.to_string()
        }
    }
}

struct WktNode {
    keyword: String,
    items: Vec<WktItem>,
}

enum WktItem {
    Quoted(String),
    Bare(String),
    Node(WktNode),
}

impl WktItem {
    fn is_dropped(&self) -> bool {
        matches!(self, WktItem::Node(node) if DROPPED_NODES.contains(&node.keyword.as_str()))
    }
}

impl WktNode {
    fn write_esri(&self, out: &mut String) {
        out.push_str(&self.keyword);
        out.push('[');
        let kept = self.items.iter().enumerate().filter(|(_, item)| !item.is_dropped());
        for (position, (index, item)) in kept.enumerate() {
            if position > 0 {
                out.push(',');
            }
            match item {
                WktItem::Quoted(text) => {
                    out.push('"');
                    if index == 0 && self.keyword == "DATUM" && !text.starts_with(DATUM_PREFIX) {
                        out.push_str(DATUM_PREFIX);
                    }
                    out.push_str(&text.replace('"', "\"\""));
                    out.push('"');
                }
                WktItem::Bare(value) => out.push_str(value),
                WktItem::Node(node) => node.write_esri(out),
            }
        }
        out.push(']');
    }
}

struct WktParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> WktParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn parse(mut self) -> Option<WktNode> {
        self.skip_whitespace();
        let keyword = self.token();
        if keyword.is_empty() {
            return None;
        }
        let root = self.node_body(keyword)?;
        self.skip_whitespace();
        self.chars.next().is_none().then_some(root)
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|ch| ch.is_whitespace()).is_some() {}
    }

    fn token(&mut self) -> String {
        let mut token = String::new();
        while let Some(ch) = self
            .chars
            .next_if(|ch| !ch.is_whitespace() && !matches!(ch, '[' | ']' | '(' | ')' | ',' | '"'))
        {
            token.push(ch);
        }
        token
    }

    fn quoted(&mut self) -> Option<String> {
        let mut text = String::new();
        loop {
            match self.chars.next()? {
                '"' if self.chars.next_if_eq(&'"').is_some() => text.push('"'),
                '"' => return Some(text),
                ch => text.push(ch),
            }
        }
    }

    /// 从左括号开始读取节点参数，`[]` 与 `()` 均可。
    fn node_body(&mut self, keyword: String) -> Option<WktNode> {
        self.skip_whitespace();
        let close = match self.chars.next()? {
            '[' => ']',
            '(' => ')',
            _ => return None,
        };
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            let item = if self.chars.next_if_eq(&'"').is_some() {
                WktItem::Quoted(self.quoted()?)
            } else {
                let token = self.token();
                if token.is_empty() {
                    return None;
                }
                self.skip_whitespace();
                if matches!(self.chars.peek(), Some('[' | '(')) {
                    WktItem::Node(self.node_body(token)?)
                } else {
                    WktItem::Bare(token)
                }
            };
            items.push(item);
            self.skip_whitespace();
            match self.chars.next()? {
                ',' => {}
                ch if ch == close => return Some(WktNode { keyword, items }),
                _ => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_axis_and_towgs84_are_stripped() {
        let ogc = r#"PROJCS["TWD97 / TM2 zone 121",
            GEOGCS["TWD97",DATUM["Taiwan_Datum_1997",SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],TOWGS84[0,0,0,0,0,0,0],AUTHORITY["EPSG","1026"]],
            PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433]],
            PROJECTION["Transverse_Mercator"],PARAMETER["central_meridian",121],UNIT["metre",1],
            AXIS["Easting",EAST],AXIS["Northing",NORTH],AUTHORITY["EPSG","3826"]]"#;
        assert_eq!(
            esri_wkt(ogc),
            r#"PROJCS["TWD97 / TM2 zone 121",GEOGCS["TWD97",DATUM["D_Taiwan_Datum_1997",SPHEROID["GRS 1980",6378137,298.257222101]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["central_meridian",121],UNIT["metre",1]]"#
        );
    }

    #[test]
    fn existing_datum_prefix_is_kept() {
        let wkt = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137,298.257223563]]]"#;
        assert_eq!(esri_wkt(wkt), wkt);
    }

    #[test]
    fn unparseable_definitions_pass_through() {
        assert_eq!(esri_wkt("PROJCS[\"broken\""), "PROJCS[\"broken\"");
        assert_eq!(esri_wkt("+proj=longlat"), "+proj=longlat");
    }
}
