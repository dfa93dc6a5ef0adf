//! Package inspection: read an EPUB back into a [`PackageSummary`].
//!
//! Follows the container chain the way a reading system does:
//! `META-INF/container.xml` → rootfile OPF → spine → chapter documents. Each
//! chapter's title is taken from its `<title>` element, so the summary
//! reflects what actually landed in the container rather than what the
//! navigation documents claim.

use crate::error::Pdf2EpubError;
use crate::pipeline::package::EPUB_MEDIA_TYPE;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// What an EPUB contains, in reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
    /// One entry per spine item.
    pub chapter_titles: Vec<String>,
}

/// Parse an EPUB held in memory.
pub fn read_package(bytes: &[u8]) -> Result<PackageSummary, Pdf2EpubError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(malformed)?;

    let mimetype = read_entry(&mut archive, "mimetype")?;
    if mimetype.trim() != EPUB_MEDIA_TYPE {
        return Err(Pdf2EpubError::MalformedPackage {
            detail: format!("unexpected mimetype '{}'", mimetype.trim()),
        });
    }

    let container = read_entry(&mut archive, "META-INF/container.xml")?;
    let opf_path = rootfile_path(&container)?;
    let opf_dir = match opf_path.rfind('/') {
        Some(i) => &opf_path[..=i],
        None => "",
    };

    let opf = read_entry(&mut archive, &opf_path)?;
    let parsed = parse_opf(&opf)?;

    let mut chapter_titles = Vec::with_capacity(parsed.spine.len());
    for idref in &parsed.spine {
        let href = parsed.manifest.get(idref).ok_or_else(|| Pdf2EpubError::MalformedPackage {
            detail: format!("spine references unknown item '{idref}'"),
        })?;
        let doc = read_entry(&mut archive, &format!("{opf_dir}{href}"))?;
        chapter_titles.push(first_element_text(&doc, b"title")?.unwrap_or_default());
    }

    Ok(PackageSummary {
        title: parsed.title,
        author: parsed.author,
        language: parsed.language,
        identifier: parsed.identifier,
        chapter_titles,
    })
}

fn malformed(e: impl std::fmt::Display) -> Pdf2EpubError {
    Pdf2EpubError::MalformedPackage {
        detail: e.to_string(),
    }
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<String, Pdf2EpubError> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| malformed(format!("{name}: {e}")))?;
    let mut s = String::new();
    file.read_to_string(&mut s)
        .map_err(|e| malformed(format!("{name}: {e}")))?;
    Ok(s)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn rootfile_path(container: &str) -> Result<String, Pdf2EpubError> {
    let mut reader = Reader::from_str(container);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attr(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("container.xml: {e}"))),
            _ => {}
        }
    }
    Err(malformed("container.xml has no rootfile"))
}

#[derive(Default)]
struct OpfData {
    title: Option<String>,
    author: Option<String>,
    language: Option<String>,
    identifier: Option<String>,
    manifest: HashMap<String, String>,
    spine: Vec<String>,
}

fn parse_opf(content: &str) -> Result<OpfData, Pdf2EpubError> {
    // No trim_text here: it would eat the spaces around entity references.
    let mut reader = Reader::from_str(content);

    let mut data = OpfData::default();
    let mut current: Option<Vec<u8>> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"title" | b"creator" | b"language" | b"identifier" => {
                        current = Some(name.as_ref().to_vec());
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        data.manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr(&e, b"idref") {
                        data.spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current.is_some() {
                    text.push_str(&resolve_entity(&String::from_utf8_lossy(e.as_ref())));
                }
            }
            Ok(Event::End(e)) => {
                if current.as_deref() == Some(e.local_name().as_ref()) {
                    let value = Some(text.trim().to_string());
                    match e.local_name().as_ref() {
                        b"title" if data.title.is_none() => data.title = value,
                        b"creator" if data.author.is_none() => data.author = value,
                        b"language" if data.language.is_none() => data.language = value,
                        b"identifier" if data.identifier.is_none() => data.identifier = value,
                        _ => {}
                    }
                    current = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("content.opf: {e}"))),
            _ => {}
        }
    }

    Ok(data)
}

/// Text of the first element named `local` in an XML document.
fn first_element_text(xml: &str, local: &[u8]) -> Result<Option<String>, Pdf2EpubError> {
    let mut reader = Reader::from_str(xml);

    let mut inside = false;
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == local => {
                inside = true;
                text.clear();
            }
            Ok(Event::Text(e)) if inside => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::GeneralRef(e)) if inside => {
                text.push_str(&resolve_entity(&String::from_utf8_lossy(e.as_ref())));
            }
            Ok(Event::End(e)) if inside && e.local_name().as_ref() == local => {
                return Ok(Some(text.trim().to_string()));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(malformed(e)),
            _ => {}
        }
    }
}

/// Resolve a predefined or numeric character reference (without `&`/`;`).
fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        }
    }
}
