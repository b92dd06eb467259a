//! XML manifest written for a finished scan list, and the reader for it.

use chrono::{DateTime, Local};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};

use super::{ScanEntry, ScanSession};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Replace the five XML special characters with entities. Nothing else changes.
pub fn escape_xml(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for ch in value.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&apos;"),
      _ => out.push(ch),
    }
  }
  out
}

/// Inverse of [`escape_xml`].
pub fn unescape_xml(value: &str) -> String {
  value
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&apos;", "'")
    .replace("&amp;", "&")
}

pub fn to_xml(session: &ScanSession) -> String {
  let mut xml = String::new();
  xml.push_str(XML_DECLARATION);
  xml.push('\n');
  xml.push_str(&format!(
    "<ScanList title=\"{}\">\n",
    escape_xml(&session.title)
  ));
  xml.push_str(&format!("  <Devices count=\"{}\">\n", session.target_count));

  for entry in &session.entries {
    xml.push_str(&format!("    <Device id=\"{}\">\n", entry.ordinal));
    xml.push_str(&format!("      <Text>{}</Text>\n", escape_xml(&entry.text)));
    xml.push_str("    </Device>\n");
  }

  xml.push_str("  </Devices>\n");
  xml.push_str("</ScanList>");
  xml
}

/// `{title}_{YYYY-MM-DD_HH-MM-SS}.xml`, with anything outside `[A-Za-z0-9]`
/// in the title replaced by `_`.
pub fn export_file_name(title: &str, at: DateTime<Local>) -> String {
  let safe: String = title
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
    .collect();
  format!("{}_{}.xml", safe, at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Write an exported manifest into `dir` under a timestamped name derived
/// from `title` and return the file path.
pub fn write_manifest(dir: &Path, title: &str, xml: &str) -> Result<PathBuf> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create export directory {}: {}", dir.display(), e))?;

  let path = dir.join(export_file_name(title, Local::now()));
  std::fs::write(&path, xml)
    .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;

  Ok(path)
}

/// Contents of a manifest read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  pub title: String,
  pub target_count: u32,
  pub entries: Vec<ScanEntry>,
}

/// Read a document produced by [`to_xml`]. Only that schema is understood.
pub fn parse_manifest(xml: &str) -> Result<Manifest> {
  let mut reader = Reader { rest: xml };

  reader.skip_ws();
  if reader.rest.starts_with("<?") {
    reader.take_until("?>")?;
  }

  let title = reader.open_tag_with_attr("ScanList", "title")?;
  let count = reader.open_tag_with_attr("Devices", "count")?;
  let target_count = count
    .parse::<u32>()
    .map_err(|_| eyre!("Invalid device count '{}'", count))?;

  let mut entries = Vec::new();
  loop {
    reader.skip_ws();
    if reader.eat("</Devices>") {
      break;
    }

    let id = reader.open_tag_with_attr("Device", "id")?;
    let ordinal = id
      .parse::<u32>()
      .map_err(|_| eyre!("Invalid device id '{}'", id))?;

    reader.skip_ws();
    let text = if reader.eat("<Text/>") {
      String::new()
    } else {
      reader.expect("<Text>")?;
      unescape_xml(reader.take_until("</Text>")?)
    };

    reader.skip_ws();
    reader.expect("</Device>")?;
    entries.push(ScanEntry { ordinal, text });
  }

  reader.skip_ws();
  reader.expect("</ScanList>")?;

  Ok(Manifest {
    title: unescape_xml(&title),
    target_count,
    entries,
  })
}

struct Reader<'a> {
  rest: &'a str,
}

impl<'a> Reader<'a> {
  fn skip_ws(&mut self) {
    self.rest = self.rest.trim_start();
  }

  fn eat(&mut self, literal: &str) -> bool {
    match self.rest.strip_prefix(literal) {
      Some(rest) => {
        self.rest = rest;
        true
      }
      None => false,
    }
  }

  fn expect(&mut self, literal: &str) -> Result<()> {
    if self.eat(literal) {
      Ok(())
    } else {
      Err(eyre!("Expected '{}' near '{}'", literal, preview(self.rest)))
    }
  }

  /// Consume up to and including `end`, returning what came before it.
  fn take_until(&mut self, end: &str) -> Result<&'a str> {
    let rest = self.rest;
    let idx = rest.find(end).ok_or_else(|| eyre!("Missing '{}'", end))?;
    self.rest = &rest[idx + end.len()..];
    Ok(&rest[..idx])
  }

  /// `<Name attr="value">` returning the raw (still escaped) value.
  fn open_tag_with_attr(&mut self, name: &str, attr: &str) -> Result<String> {
    self.skip_ws();
    self.expect(&format!("<{} {}=\"", name, attr))?;
    let value = self.take_until("\"")?.to_string();
    self.skip_ws();
    self.expect(">")?;
    Ok(value)
  }
}

fn preview(s: &str) -> String {
  s.chars().take(24).collect()
}
