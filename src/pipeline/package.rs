//! Package building: chapters + metadata → EPUB bytes.
//!
//! ## Container layout
//!
//! ```text
//! mimetype                    stored, first entry, no extra fields
//! META-INF/container.xml      points at OEBPS/content.opf
//! OEBPS/content.opf           metadata, manifest, spine
//! OEBPS/nav.xhtml             EPUB 3 navigation document
//! OEBPS/toc.ncx               EPUB 2 table of contents for older readers
//! OEBPS/style.css
//! OEBPS/chapter-001.xhtml …   one per chapter, spine order = input order
//! ```
//!
//! The output depends only on its inputs: the package identifier is a
//! name-based UUID derived from the metadata and chapter text, and the
//! `dcterms:modified` stamp is passed in by the caller.

use crate::error::Pdf2EpubError;
use crate::output::ResolvedMetadata;
use crate::pipeline::segment::{escape_xml, Chapter};
use chrono::{DateTime, Utc};
use std::io::{Cursor, Write};
use tracing::{debug, info};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLE_CSS: &str = "body { margin: 0 5%; line-height: 1.5; }\n\
h2 { margin: 1.5em 0 1em; text-align: center; }\n\
p { text-indent: 0; white-space: pre-line; }\n";

/// Build an EPUB from `chapters`, in order.
///
/// # Errors
/// - [`Pdf2EpubError::MissingMetadata`] when the title or author is blank
/// - [`Pdf2EpubError::NoChapters`] when `chapters` is empty
/// - [`Pdf2EpubError::ContainerWriteFailed`] when the zip cannot be finalized
pub fn build_package(
    chapters: &[Chapter],
    metadata: &ResolvedMetadata,
    modified: DateTime<Utc>,
) -> Result<Vec<u8>, Pdf2EpubError> {
    if metadata.title.trim().is_empty() {
        return Err(Pdf2EpubError::MissingMetadata { field: "title" });
    }
    if metadata.author.trim().is_empty() {
        return Err(Pdf2EpubError::MissingMetadata { field: "author" });
    }
    if chapters.is_empty() {
        return Err(Pdf2EpubError::NoChapters);
    }

    let identifier = format!("urn:uuid:{}", package_uuid(chapters, metadata));
    let modified = modified.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let language = if metadata.language.trim().is_empty() {
        "en"
    } else {
        metadata.language.trim()
    };

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // mimetype must be first and uncompressed
    write_entry(&mut zip, "mimetype", EPUB_MEDIA_TYPE.as_bytes(), stored)?;
    write_entry(&mut zip, "META-INF/container.xml", CONTAINER_XML.as_bytes(), deflated)?;

    let opf = generate_opf(chapters, metadata, &identifier, language, &modified);
    write_entry(&mut zip, "OEBPS/content.opf", opf.as_bytes(), deflated)?;

    let nav = generate_nav(chapters, metadata, language);
    write_entry(&mut zip, "OEBPS/nav.xhtml", nav.as_bytes(), deflated)?;

    let ncx = generate_ncx(chapters, metadata, &identifier);
    write_entry(&mut zip, "OEBPS/toc.ncx", ncx.as_bytes(), deflated)?;

    write_entry(&mut zip, "OEBPS/style.css", STYLE_CSS.as_bytes(), deflated)?;

    for (i, chapter) in chapters.iter().enumerate() {
        let path = format!("OEBPS/{}", chapter_href(i));
        let xhtml = generate_chapter(chapter, language);
        write_entry(&mut zip, path.as_str(), xhtml.as_bytes(), deflated)?;
        debug!("Packaged {} ({} bytes)", path, xhtml.len());
    }

    let bytes = zip
        .finish()
        .map_err(|e| Pdf2EpubError::ContainerWriteFailed {
            detail: e.to_string(),
        })?
        .into_inner();

    info!(
        "Built package '{}' with {} chapters ({} bytes)",
        metadata.title,
        chapters.len(),
        bytes.len()
    );
    Ok(bytes)
}

fn write_entry(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<(), Pdf2EpubError> {
    zip.start_file(name, options)
        .map_err(|e| Pdf2EpubError::ContainerWriteFailed {
            detail: format!("{name}: {e}"),
        })?;
    zip.write_all(data)
        .map_err(|e| Pdf2EpubError::ContainerWriteFailed {
            detail: format!("{name}: {e}"),
        })
}

/// Href of the `index`-th (0-based) chapter document, relative to OEBPS/.
pub fn chapter_href(index: usize) -> String {
    format!("chapter-{:03}.xhtml", index + 1)
}

fn chapter_id(index: usize) -> String {
    format!("chapter-{:03}", index + 1)
}

fn package_uuid(chapters: &[Chapter], metadata: &ResolvedMetadata) -> Uuid {
    let mut seed = Vec::new();
    seed.extend_from_slice(metadata.title.as_bytes());
    seed.push(0);
    seed.extend_from_slice(metadata.author.as_bytes());
    for chapter in chapters {
        seed.push(0);
        seed.extend_from_slice(chapter.title.as_bytes());
        seed.push(0);
        seed.extend_from_slice(chapter.plain_text.as_bytes());
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &seed)
}

fn generate_opf(
    chapters: &[Chapter],
    metadata: &ResolvedMetadata,
    identifier: &str,
    language: &str,
    modified: &str,
) -> String {
    let mut opf = String::new();

    opf.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
"#,
    );
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(identifier)
    ));
    opf.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_xml(&metadata.title)
    ));
    opf.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        escape_xml(&metadata.author)
    ));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(language)
    ));
    if let Some(ref description) = metadata.description {
        opf.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_xml(description)
        ));
    }
    opf.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        modified
    ));
    opf.push_str("  </metadata>\n  <manifest>\n");

    opf.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
    );
    opf.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
    );
    opf.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>\n");
    for i in 0..chapters.len() {
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            chapter_id(i),
            chapter_href(i)
        ));
    }

    opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    for i in 0..chapters.len() {
        opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter_id(i)));
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

fn generate_nav(chapters: &[Chapter], metadata: &ResolvedMetadata, language: &str) -> String {
    let lang = escape_xml(language);
    let mut nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <title>{}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
"#,
        escape_xml(&metadata.title)
    );
    for (i, chapter) in chapters.iter().enumerate() {
        nav.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            chapter_href(i),
            escape_xml(&chapter.title)
        ));
    }
    nav.push_str("    </ol>\n  </nav>\n</body>\n</html>\n");
    nav
}

fn generate_ncx(chapters: &[Chapter], metadata: &ResolvedMetadata, identifier: &str) -> String {
    let mut ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{}</text></docTitle>
  <navMap>
"#,
        escape_xml(identifier),
        escape_xml(&metadata.title)
    );
    for (i, chapter) in chapters.iter().enumerate() {
        ncx.push_str(&format!(
            "    <navPoint id=\"navpoint-{n}\" playOrder=\"{n}\">\n      <navLabel><text>{}</text></navLabel>\n      <content src=\"{}\"/>\n    </navPoint>\n",
            escape_xml(&chapter.title),
            chapter_href(i),
            n = i + 1,
        ));
    }
    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}

fn generate_chapter(chapter: &Chapter, language: &str) -> String {
    let lang = escape_xml(language);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <title>{}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <section epub:type="chapter">
{}
  </section>
</body>
</html>
"#,
        escape_xml(&chapter.title),
        chapter.markup
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Read;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sample_chapters() -> Vec<Chapter> {
        vec![
            Chapter::new("Chapter 1", "Call me Ishmael."),
            Chapter::new("Chapter 2", "It was the best of times & the worst."),
        ]
    }

    fn entry(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut s = String::new();
        file.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn mimetype_is_first_and_stored() {
        let bytes = build_package(
            &sample_chapters(),
            &ResolvedMetadata::new("Book", "Author"),
            fixed_time(),
        )
        .unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);
        assert_eq!(entry(&bytes, "mimetype"), EPUB_MEDIA_TYPE);
    }

    #[test]
    fn opf_lists_chapters_in_order() {
        let bytes = build_package(
            &sample_chapters(),
            &ResolvedMetadata::new("Book", "Author"),
            fixed_time(),
        )
        .unwrap();
        let opf = entry(&bytes, "OEBPS/content.opf");
        let first = opf.find("idref=\"chapter-001\"").unwrap();
        let second = opf.find("idref=\"chapter-002\"").unwrap();
        assert!(first < second);
        assert!(opf.contains("<dc:creator>Author</dc:creator>"));
        assert!(opf.contains("2024-05-01T12:00:00Z"));
    }

    #[test]
    fn chapter_content_is_escaped() {
        let bytes = build_package(
            &sample_chapters(),
            &ResolvedMetadata::new("Book", "Author"),
            fixed_time(),
        )
        .unwrap();
        let xhtml = entry(&bytes, "OEBPS/chapter-002.xhtml");
        assert!(xhtml.contains("best of times &amp; the worst"));
    }

    #[test]
    fn description_is_optional() {
        let mut meta = ResolvedMetadata::new("Book", "Author");
        let bytes = build_package(&sample_chapters(), &meta, fixed_time()).unwrap();
        assert!(!entry(&bytes, "OEBPS/content.opf").contains("dc:description"));

        meta.description = Some("A <short> book".into());
        let bytes = build_package(&sample_chapters(), &meta, fixed_time()).unwrap();
        assert!(entry(&bytes, "OEBPS/content.opf")
            .contains("<dc:description>A &lt;short&gt; book</dc:description>"));
    }

    #[test]
    fn missing_metadata_is_rejected() {
        let err = build_package(
            &sample_chapters(),
            &ResolvedMetadata::new("", "Author"),
            fixed_time(),
        )
        .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::MissingMetadata { field: "title" }));

        let err = build_package(
            &sample_chapters(),
            &ResolvedMetadata::new("Book", " "),
            fixed_time(),
        )
        .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::MissingMetadata { field: "author" }));
    }

    #[test]
    fn empty_chapter_list_is_rejected() {
        let err = build_package(&[], &ResolvedMetadata::new("Book", "Author"), fixed_time())
            .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::NoChapters));
    }

    #[test]
    fn output_is_deterministic() {
        let meta = ResolvedMetadata::new("Book", "Author");
        let a = build_package(&sample_chapters(), &meta, fixed_time()).unwrap();
        let b = build_package(&sample_chapters(), &meta, fixed_time()).unwrap();
        assert_eq!(
            entry(&a, "OEBPS/content.opf"),
            entry(&b, "OEBPS/content.opf")
        );
    }
}
