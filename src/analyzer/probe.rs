//! Signature-based engine used when no external codec library is linked.
//!
//! Identifies the container from its leading bytes and, for ISO-BMFF files, walks the
//! top-level boxes by issuing seek requests until the `moov` box is reached. Only a
//! General track is produced.

use serde_json::{Map, Value, json};
use std::fmt::Write as _;

use super::engine::{AnalysisEngine, ContinueStatus, EngineError};
use super::offset::{NO_SEEK, split_seek_offset};
use super::types::Format;

/// Leading bytes needed before the container is identified
const DETECT_BYTES: usize = 512;
/// Bytes read past the start of `moov` looking for `mvhd`
const MOOV_PEEK: u64 = 256;
const MAX_RECORDED_BOXES: usize = 64;
const TEXT_LABEL_WIDTH: usize = 41;

#[derive(Debug, Default)]
pub struct ProbeEngine {
    filename: String,
    size: u64,
    window_start: u64,
    window: Vec<u8>,
    detected: bool,
    container: Option<&'static str>,
    brand: Option<String>,
    next_box: u64,
    boxes: Vec<String>,
    moov_at: Option<u64>,
    duration_ms: Option<u64>,
    pending_seek: Option<u64>,
    finished: bool,
    finalized: bool,
}

impl ProbeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn window_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    fn finish(&mut self) -> ContinueStatus {
        self.finished = true;
        self.window = Vec::new();
        ContinueStatus::enough_data()
    }

    fn walk_boxes(&mut self) -> ContinueStatus {
        loop {
            let window_end = self.window_end();

            if let Some(moov) = self.moov_at {
                if window_end < (moov + MOOV_PEEK).min(self.size) {
                    return ContinueStatus::accepted();
                }
                let rel = (moov - self.window_start) as usize;
                self.duration_ms = parse_mvhd_duration_ms(&self.window[rel..]);
                return self.finish();
            }

            if self.next_box >= self.size {
                return self.finish();
            }
            if self.next_box > window_end {
                self.pending_seek = Some(self.next_box);
                return ContinueStatus::accepted();
            }

            let rel = (self.next_box - self.window_start) as usize;
            let Some(header) = read_box_header(&self.window[rel..], self.size - self.next_box)
            else {
                if window_end >= self.size {
                    return self.finish();
                }
                // keep the partial header and wait for the next chunk
                self.window.drain(..rel);
                self.window_start = self.next_box;
                return ContinueStatus::accepted();
            };

            if header.size < 8 {
                return self.finish();
            }
            if self.boxes.len() < MAX_RECORDED_BOXES {
                self.boxes.push(header.kind.clone());
            }
            if header.kind == "moov" {
                self.window.drain(..rel);
                self.window_start = self.next_box;
                self.moov_at = Some(self.next_box);
                continue;
            }

            self.next_box = self.next_box.saturating_add(header.size);
            if self.next_box <= self.window_end() {
                let rel = (self.next_box - self.window_start) as usize;
                self.window.drain(..rel);
                self.window_start = self.next_box;
            }
        }
    }

    fn general_fields(&self) -> Vec<(&'static str, &'static str, String)> {
        let mut fields = Vec::new();
        if !self.filename.is_empty() {
            fields.push(("CompleteName", "Complete name", self.filename.clone()));
        }
        fields.push((
            "Format",
            "Format",
            self.container.unwrap_or("Unknown").to_string(),
        ));
        if let Some(brand) = &self.brand {
            fields.push(("CodecID", "Codec ID", brand.clone()));
        }
        fields.push(("FileSize", "File size", self.size.to_string()));
        if let Some(ms) = self.duration_ms {
            fields.push(("Duration", "Duration", format!("{}.{:03}", ms / 1000, ms % 1000)));
        }
        if !self.boxes.is_empty() {
            fields.push(("HeaderBoxes", "Header boxes", self.boxes.join(" ")));
        }
        fields
    }

    fn render_json(&self) -> Result<String, EngineError> {
        let mut track = Map::new();
        track.insert("@type".to_string(), Value::from("General"));
        for (key, _, value) in self.general_fields() {
            track.insert(key.to_string(), Value::from(value));
        }
        let document = json!({
            "creatingLibrary": { "name": "mediapeek-probe", "version": env!("CARGO_PKG_VERSION") },
            "media": { "@ref": self.filename, "track": [track] },
        });
        serde_json::to_string_pretty(&document).map_err(|e| EngineError::Render {
            format: Format::Json,
            message: e.to_string(),
        })
    }

    fn render_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<MediaInfo>\n");
        let _ = writeln!(out, "<media ref=\"{}\">", escape_markup(&self.filename));
        out.push_str("<track type=\"General\">\n");
        for (key, _, value) in self.general_fields() {
            let _ = writeln!(out, "<{key}>{}</{key}>", escape_markup(&value));
        }
        out.push_str("</track>\n</media>\n</MediaInfo>\n");
        out
    }

    fn render_html(&self) -> String {
        let mut out = String::from("<html>\n<body>\n<table>\n<tr><th colspan=\"2\">General</th></tr>\n");
        for (_, label, value) in self.general_fields() {
            let _ = writeln!(
                out,
                "<tr><td>{}</td><td>{}</td></tr>",
                escape_markup(label),
                escape_markup(&value)
            );
        }
        out.push_str("</table>\n</body>\n</html>\n");
        out
    }

    fn render_text(&self) -> String {
        let mut out = String::from("General\n");
        for (_, label, value) in self.general_fields() {
            let _ = writeln!(out, "{:<width$}: {}", label, value, width = TEXT_LABEL_WIDTH);
        }
        out
    }
}

impl AnalysisEngine for ProbeEngine {
    fn name(&self) -> &str {
        "probe"
    }

    fn set_option(&mut self, key: &str, value: &str) {
        if key == "File_FileName" {
            self.filename = value.to_string();
        }
    }

    fn init_buffer(&mut self, size: u64, offset: u64) -> Result<(), EngineError> {
        if offset > size {
            return Err(EngineError::Init(format!(
                "offset {offset} is beyond file size {size}"
            )));
        }
        self.size = size;
        self.window_start = offset;
        self.window.clear();
        Ok(())
    }

    fn continue_buffer(&mut self, chunk: &[u8]) -> Result<ContinueStatus, EngineError> {
        if self.finalized {
            return Err(EngineError::Data("engine already finalized".to_string()));
        }
        if self.finished {
            return Ok(ContinueStatus::enough_data());
        }
        self.window.extend_from_slice(chunk);

        if !self.detected {
            if self.window.len() < DETECT_BYTES && self.window_end() < self.size {
                return Ok(ContinueStatus::accepted());
            }
            self.detected = true;
            self.container = detect_container(&self.window);
            if self.container == Some("MPEG-4") || self.container == Some("QuickTime") {
                self.brand = self
                    .window
                    .get(8..12)
                    .map(|b| String::from_utf8_lossy(b).trim_end().to_string());
            } else {
                return Ok(self.finish());
            }
        }

        Ok(self.walk_boxes())
    }

    fn seek_target_halves(&mut self) -> (i32, i32) {
        self.pending_seek
            .take()
            .map(split_seek_offset)
            .unwrap_or(NO_SEEK)
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        if !self.detected {
            self.container = detect_container(&self.window);
            self.detected = true;
        }
        self.window = Vec::new();
        self.finalized = true;
        Ok(())
    }

    fn render(&mut self, format: Format) -> Result<String, EngineError> {
        if !self.finalized {
            return Err(EngineError::NotFinalized);
        }
        match format {
            Format::Json => self.render_json(),
            Format::Xml => Ok(self.render_xml()),
            Format::Html => Ok(self.render_html()),
            Format::Text => Ok(self.render_text()),
        }
    }
}

struct BoxHeader {
    size: u64,
    kind: String,
}

/// `remaining` is the distance from the box start to the end of the file.
fn read_box_header(bytes: &[u8], remaining: u64) -> Option<BoxHeader> {
    let head = bytes.get(..8)?;
    let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let kind = String::from_utf8_lossy(&head[4..8]).to_string();
    let size = match size32 {
        0 => remaining,
        1 => {
            let large = bytes.get(8..16)?;
            u64::from_be_bytes(large.try_into().ok()?)
        }
        n => u64::from(n),
    };
    Some(BoxHeader { size, kind })
}

fn parse_mvhd_duration_ms(moov: &[u8]) -> Option<u64> {
    let at = moov.windows(4).position(|w| w == b"mvhd")? + 4;
    let body = moov.get(at..)?;
    let be32 = |b: &[u8]| u32::from_be_bytes([b[0], b[1], b[2], b[3]]);

    let (timescale, duration) = match *body.first()? {
        1 => {
            let timescale = be32(body.get(20..24)?);
            let duration = u64::from_be_bytes(body.get(24..32)?.try_into().ok()?);
            (timescale, duration)
        }
        _ => (be32(body.get(12..16)?), u64::from(be32(body.get(16..20)?))),
    };
    if timescale == 0 {
        return None;
    }
    Some(duration.saturating_mul(1000) / u64::from(timescale))
}

fn detect_container(head: &[u8]) -> Option<&'static str> {
    if head.get(4..8) == Some(b"ftyp") {
        return if head.get(8..12) == Some(b"qt  ") {
            Some("QuickTime")
        } else {
            Some("MPEG-4")
        };
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return if head.windows(4).any(|w| w == b"webm") {
            Some("WebM")
        } else {
            Some("Matroska")
        };
    }
    if head.starts_with(b"RIFF") {
        return match head.get(8..12) {
            Some(b"AVI ") => Some("AVI"),
            Some(b"WAVE") => Some("Wave"),
            _ => Some("RIFF"),
        };
    }
    if head.starts_with(b"OggS") {
        return Some("Ogg");
    }
    if head.starts_with(b"fLaC") {
        return Some("FLAC");
    }
    if head.starts_with(b"ID3") {
        return Some("MPEG Audio");
    }
    if head.len() > 188 && head[0] == 0x47 && head[188] == 0x47 {
        return Some("MPEG-TS");
    }
    match head {
        [0xFF, b1, ..] if b1 & 0xF6 == 0xF0 => Some("ADTS"),
        [0xFF, b1, ..] if b1 & 0xE0 == 0xE0 => Some("MPEG Audio"),
        _ => None,
    }
}

fn escape_markup(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
