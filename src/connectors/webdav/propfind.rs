//! PROPFIND multistatus 响应解析

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use silent_bridge_core::{BridgeError, Result};

/// multistatus 中的一个 `response` 条目
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavEntry {
    /// 解码后的路径部分，不含末尾 `/`
    pub href: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Href,
    ContentLength,
    LastModified,
    ContentType,
}

pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field = Field::None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                match e.local_name().as_ref() {
                    b"response" => current = Some(DavEntry::default()),
                    b"collection" => set_collection(&mut current),
                    b"href" => field = Field::Href,
                    b"getcontentlength" => field = Field::ContentLength,
                    b"getlastmodified" => field = Field::LastModified,
                    b"getcontenttype" => field = Field::ContentType,
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    set_collection(&mut current);
                }
            }
            Ok(Event::Text(t)) if field != Field::None => {
                let decoded = t.decode().map_err(xml_error)?;
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(r)) if field != Field::None => {
                let name = r.decode().map_err(xml_error)?;
                if let Some(resolved) = resolve_predefined_entity(&name) {
                    text.push_str(resolved);
                } else if let Ok(Some(ch)) = r.resolve_char_ref() {
                    text.push(ch);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"href" | b"getcontentlength" | b"getlastmodified" | b"getcontenttype" => {
                    if let Some(entry) = current.as_mut() {
                        apply_field(entry, field, text.trim())?;
                    }
                    field = Field::None;
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(BridgeError::Io(format!(
                    "PROPFIND 响应解析失败 (位置 {}): {}",
                    reader.error_position(),
                    e
                )));
            }
        }
    }
    Ok(entries)
}

fn set_collection(current: &mut Option<DavEntry>) {
    if let Some(entry) = current.as_mut() {
        entry.is_collection = true;
    }
}

fn apply_field(entry: &mut DavEntry, field: Field, value: &str) -> Result<()> {
    match field {
        Field::Href => entry.href = href_path(value)?,
        Field::ContentLength => entry.content_length = value.parse().ok(),
        Field::LastModified => {
            entry.last_modified = DateTime::parse_from_rfc2822(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        Field::ContentType if !value.is_empty() => {
            entry.content_type = Some(value.to_string());
        }
        _ => {}
    }
    Ok(())
}

/// href 可能是绝对 URL 或绝对路径，统一取解码后的路径部分
pub fn href_path(href: &str) -> Result<String> {
    let path = if href.contains("://") {
        url::Url::parse(href)
            .map_err(|e| BridgeError::Io(format!("无效的 href: {}", e)))?
            .path()
            .to_string()
    } else {
        href.to_string()
    };
    let decoded = urlencoding::decode(&path)
        .map_err(|e| BridgeError::Io(format!("无效的 href 编码: {}", e)))?;
    let trimmed = decoded.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

fn xml_error(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Io(format!("PROPFIND 响应解析失败: {}", e))
}
