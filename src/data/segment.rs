//! Structural segmentation of legal codes into articles

use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::data::Segments;
use crate::error::{RagError, Result};

const RUSSIAN_ARTICLE: &str = r"(?m)^[ \t]*Статья\s+(\d+)\.";
const ENGLISH_ARTICLE: &str = r"(?m)^[ \t]*Article\s+(\d+)\.";

/// Marker regex plus the template used to turn its capture into a unit id.
///
/// The regex must have one capture group (the article number); the
/// template must contain `{}`, which is replaced by that capture.
#[derive(Debug, Clone)]
pub struct BoundaryPattern {
    regex: Regex,
    label_template: String,
}

impl BoundaryPattern {
    pub fn new(pattern: &str, label_template: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| RagError::invalid_config(format!("bad boundary pattern: {}", e)))?;
        if regex.captures_len() < 2 {
            return Err(RagError::invalid_config(
                "boundary pattern needs a capture group for the label",
            ));
        }
        if !label_template.contains("{}") {
            return Err(RagError::invalid_config(
                "label template must contain '{}'",
            ));
        }
        Ok(Self {
            regex,
            label_template: label_template.to_string(),
        })
    }

    /// `Статья N.` at the start of a line
    pub fn russian_article() -> Result<Self> {
        Self::new(RUSSIAN_ARTICLE, "Статья {}")
    }

    /// `Article N.` at the start of a line
    pub fn english_article() -> Result<Self> {
        Self::new(ENGLISH_ARTICLE, "Article {}")
    }

    /// Build from a preset name or a `regex|template` pair
    pub fn from_spec(spec: &str) -> Result<Self> {
        match spec {
            "ru" | "russian" => Self::russian_article(),
            "en" | "english" => Self::english_article(),
            custom => {
                let (pattern, template) = custom.rsplit_once('|').ok_or_else(|| {
                    RagError::invalid_config(format!(
                        "unknown boundary preset '{}' (use ru, en or REGEX|TEMPLATE)",
                        custom
                    ))
                })?;
                Self::new(pattern, template)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    fn label(&self, capture: &str) -> String {
        self.label_template.replacen("{}", capture, 1)
    }
}

/// Split `raw_text` at every boundary marker.
///
/// Text before the first marker is discarded. A trailing marker with an
/// empty body is dropped; empty bodies between markers are kept. A label
/// seen twice keeps its first position and takes the later body.
pub fn segment(raw_text: &str, pattern: &BoundaryPattern) -> Result<Segments> {
    let markers: Vec<(usize, usize, String)> = pattern
        .regex
        .captures_iter(raw_text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?;
            Some((whole.start(), whole.end(), pattern.label(label.as_str())))
        })
        .collect();

    if markers.is_empty() {
        return Err(RagError::SegmentationEmpty(pattern.as_str().to_string()));
    }

    let mut segments = Segments::new();
    for (i, (_, body_start, id)) in markers.iter().enumerate() {
        let is_last = i + 1 == markers.len();
        let body_end = markers
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(raw_text.len());
        let body = raw_text[*body_start..body_end].trim();

        if is_last && body.is_empty() {
            tracing::debug!("Dropping dangling marker '{}' with empty body", id);
            continue;
        }

        if segments.insert(id.clone(), body.to_string()).is_some() {
            tracing::warn!("Duplicate label '{}': later body replaces earlier one", id);
        }
    }

    tracing::debug!("Segmented {} units", segments.len());
    Ok(segments)
}

/// Segment a UTF-8 text file and write the units as a pretty JSON object.
///
/// Non-ASCII text is written as-is. Returns the number of units written.
pub fn split_articles_to_json(
    input_txt: &Path,
    output_json: &Path,
    pattern: &BoundaryPattern,
) -> anyhow::Result<usize> {
    let raw = fs::read_to_string(input_txt)
        .with_context(|| format!("Failed to read {:?}", input_txt))?;
    let segments = segment(&raw, pattern)?;

    if let Some(parent) = output_json.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    segments.serialize(&mut serializer)?;
    fs::write(output_json, buf).with_context(|| format!("Failed to write {:?}", output_json))?;

    tracing::info!(
        "Wrote {} articles from {:?} to {:?}",
        segments.len(),
        input_txt,
        output_json
    );
    Ok(segments.len())
}
