//! Minimal TDMS-compatible container I/O.
//!
//! Writes the subset of the format this crate produces (little-endian
//! segments, one homogeneous f64 channel per group, string-keyed typed
//! properties on root/group/channel objects) and reads it back without
//! prior schema knowledge. While a streaming segment is open its lead-in
//! carries `u64::MAX` as the next-segment offset, the same convention
//! vendor loggers use for in-progress files, so a crashed session still
//! leaves a readable container.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::request::WriteMode;

const TDMS_TAG: &[u8; 4] = b"TDSm";
const TDMS_VERSION: u32 = 4713;
const LEAD_IN_LEN: u64 = 28;

const TOC_META_DATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;
const TOC_INTERLEAVED: u32 = 1 << 5;
const TOC_BIG_ENDIAN: u32 = 1 << 6;
const TOC_DAQMX_RAW: u32 = 1 << 7;

const DTYPE_I32: u32 = 0x03;
const DTYPE_U64: u32 = 0x08;
const DTYPE_F64: u32 = 0x0A;
const DTYPE_STRING: u32 = 0x20;
const DTYPE_BOOL: u32 = 0x21;

const RAW_INDEX_NONE: u32 = 0xFFFF_FFFF;
const RAW_INDEX_MATCHES_PREVIOUS: u32 = 0x0000_0000;

/// Marks a streaming segment whose length is not yet known.
const INCOMPLETE_SEGMENT: u64 = u64::MAX;

/// A typed property value on a root, group, or channel object.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    I32(i32),
    U64(u64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl PropertyValue {
    fn type_code(&self) -> u32 {
        match self {
            Self::I32(_) => DTYPE_I32,
            Self::U64(_) => DTYPE_U64,
            Self::F64(_) => DTYPE_F64,
            Self::Bool(_) => DTYPE_BOOL,
            Self::String(_) => DTYPE_STRING,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Bool(v) => out.push(*v as u8),
            Self::String(v) => {
                out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                out.extend_from_slice(v.as_bytes());
            }
        }
    }

    /// Numeric view, if the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I32(v) => Some(*v as f64),
            Self::U64(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

fn root_path() -> String {
    "/".to_string()
}

fn group_path(group: &str) -> String {
    format!("/'{}'", group.replace('\'', "''"))
}

fn channel_path(group: &str, channel: &str) -> String {
    format!(
        "/'{}'/'{}'",
        group.replace('\'', "''"),
        channel.replace('\'', "''")
    )
}

fn encode_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn encode_properties(props: &[(String, PropertyValue)], out: &mut Vec<u8>) {
    out.extend_from_slice(&(props.len() as u32).to_le_bytes());
    for (name, value) in props {
        encode_string(name, out);
        out.extend_from_slice(&value.type_code().to_le_bytes());
        value.encode(out);
    }
}

fn storage_err(context: &str, err: std::io::Error) -> CaptureError {
    CaptureError::Storage(format!("{context}: {err}"))
}

/// Streaming writer for one acquisition segment.
///
/// `create` lays down the segment lead-in and object metadata with a
/// placeholder sample count, `append` adds raw f64 samples as they
/// arrive from the hardware, and `close` patches the segment length and
/// count. Sample data is never rewritten after `close`; later metadata
/// goes through [`append_properties`].
pub struct TdmsStreamWriter {
    file: File,
    path: PathBuf,
    lead_in_pos: u64,
    count_field_pos: u64,
    samples_written: u64,
    closed: bool,
}

impl TdmsStreamWriter {
    /// Open a container for streaming writes of one f64 channel.
    ///
    /// `CreateOrReplace` truncates any existing file (collision handling
    /// is the caller's job, see `storage::path`). `Append` adds a new
    /// data segment to an existing container.
    pub fn create(
        path: &Path,
        group: &str,
        channel: &str,
        unit_label: &str,
        sample_rate: f64,
        mode: WriteMode,
    ) -> Result<Self, CaptureError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| storage_err("failed to create output directory", e))?;
            }
        }

        let mut file = match mode {
            WriteMode::CreateOrReplace => {
                File::create(path).map_err(|e| storage_err("failed to create container", e))?
            }
            WriteMode::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)
                .map_err(|e| storage_err("failed to open container", e))?,
        };
        let lead_in_pos = file
            .seek(SeekFrom::End(0))
            .map_err(|e| storage_err("failed to seek container", e))?;

        // Object metadata: root, group, and one f64 channel with a
        // count that is patched on close.
        let mut meta = Vec::new();
        meta.extend_from_slice(&3u32.to_le_bytes());

        encode_string(&root_path(), &mut meta);
        meta.extend_from_slice(&RAW_INDEX_NONE.to_le_bytes());
        encode_properties(&[], &mut meta);

        encode_string(&group_path(group), &mut meta);
        meta.extend_from_slice(&RAW_INDEX_NONE.to_le_bytes());
        encode_properties(&[], &mut meta);

        encode_string(&channel_path(group, channel), &mut meta);
        meta.extend_from_slice(&20u32.to_le_bytes()); // raw index length
        meta.extend_from_slice(&DTYPE_F64.to_le_bytes());
        meta.extend_from_slice(&1u32.to_le_bytes()); // array dimension
        let count_field_offset = meta.len() as u64;
        meta.extend_from_slice(&0u64.to_le_bytes()); // value count, patched
        encode_properties(
            &[
                ("unit_string".to_string(), PropertyValue::String(unit_label.to_string())),
                ("wf_increment".to_string(), PropertyValue::F64(1.0 / sample_rate)),
            ],
            &mut meta,
        );

        let mut segment = Vec::with_capacity(LEAD_IN_LEN as usize + meta.len());
        segment.extend_from_slice(TDMS_TAG);
        segment.extend_from_slice(&(TOC_META_DATA | TOC_NEW_OBJ_LIST | TOC_RAW_DATA).to_le_bytes());
        segment.extend_from_slice(&TDMS_VERSION.to_le_bytes());
        segment.extend_from_slice(&INCOMPLETE_SEGMENT.to_le_bytes()); // patched on close
        segment.extend_from_slice(&(meta.len() as u64).to_le_bytes());
        segment.extend_from_slice(&meta);

        file.write_all(&segment)
            .map_err(|e| storage_err("failed to write segment header", e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            lead_in_pos,
            count_field_pos: lead_in_pos + LEAD_IN_LEN + count_field_offset,
            samples_written: 0,
            closed: false,
        })
    }

    /// Append a block of samples to the open segment.
    pub fn append(&mut self, samples: &[f64]) -> Result<(), CaptureError> {
        if self.closed {
            return Err(CaptureError::Storage("writer is closed".into()));
        }
        if samples.is_empty() {
            return Ok(());
        }
        let mut bytes = Vec::with_capacity(samples.len() * 8);
        for &sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.file
            .write_all(&bytes)
            .map_err(|e| storage_err("failed to write samples", e))?;
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Patch the segment length and sample count and flush the file.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Ok(());
        }
        let end = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(|e| storage_err("failed to seek container", e))?;
        let next_segment_offset = end - (self.lead_in_pos + LEAD_IN_LEN);

        self.file
            .seek(SeekFrom::Start(self.lead_in_pos + 12))
            .map_err(|e| storage_err("failed to seek lead-in", e))?;
        self.file
            .write_all(&next_segment_offset.to_le_bytes())
            .map_err(|e| storage_err("failed to patch segment length", e))?;

        self.file
            .seek(SeekFrom::Start(self.count_field_pos))
            .map_err(|e| storage_err("failed to seek raw index", e))?;
        self.file
            .write_all(&self.samples_written.to_le_bytes())
            .map_err(|e| storage_err("failed to patch sample count", e))?;

        self.file
            .flush()
            .map_err(|e| storage_err("failed to flush container", e))?;
        self.closed = true;
        Ok(())
    }
}

/// Property updates applied by a metadata-only segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerProperties {
    pub root: Vec<(String, PropertyValue)>,
    pub group: Vec<(String, PropertyValue)>,
    pub channel: Vec<(String, PropertyValue)>,
}

/// Append descriptive properties to an existing container without
/// touching sample data. Keys are last-write-wins across calls.
pub fn append_properties(
    path: &Path,
    group: &str,
    channel: &str,
    properties: &ContainerProperties,
) -> Result<(), CaptureError> {
    let mut objects: Vec<(String, &[(String, PropertyValue)])> = Vec::new();
    if !properties.root.is_empty() {
        objects.push((root_path(), &properties.root));
    }
    if !properties.group.is_empty() {
        objects.push((group_path(group), &properties.group));
    }
    if !properties.channel.is_empty() {
        objects.push((channel_path(group, channel), &properties.channel));
    }
    if objects.is_empty() {
        return Ok(());
    }

    let mut meta = Vec::new();
    meta.extend_from_slice(&(objects.len() as u32).to_le_bytes());
    for (object_path, props) in &objects {
        encode_string(object_path, &mut meta);
        meta.extend_from_slice(&RAW_INDEX_NONE.to_le_bytes());
        encode_properties(props, &mut meta);
    }

    let mut segment = Vec::with_capacity(LEAD_IN_LEN as usize + meta.len());
    segment.extend_from_slice(TDMS_TAG);
    segment.extend_from_slice(&(TOC_META_DATA | TOC_NEW_OBJ_LIST).to_le_bytes());
    segment.extend_from_slice(&TDMS_VERSION.to_le_bytes());
    segment.extend_from_slice(&(meta.len() as u64).to_le_bytes());
    segment.extend_from_slice(&(meta.len() as u64).to_le_bytes());
    segment.extend_from_slice(&meta);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| storage_err("failed to open container for metadata append", e))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| storage_err("failed to seek container", e))?;
    file.write_all(&segment)
        .map_err(|e| storage_err("failed to append metadata segment", e))?;
    file.flush()
        .map_err(|e| storage_err("failed to flush container", e))?;
    Ok(())
}

/// Compute the SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data = fs::read(path).map_err(|e| storage_err("failed to read file for checksum", e))?;
    let digest = Sha256::digest(&data);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

// ---------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------

/// One channel of a read container: merged properties plus the
/// concatenated f64 sample stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TdmsChannel {
    pub name: String,
    pub properties: HashMap<String, PropertyValue>,
    pub data: Vec<f64>,
}

impl TdmsChannel {
    /// Recover the sample rate from waveform or explicit rate
    /// properties, if present.
    pub fn sample_rate(&self) -> Option<f64> {
        if let Some(dt) = self.properties.get("wf_increment").and_then(PropertyValue::as_f64) {
            if dt > 0.0 {
                return Some(1.0 / dt);
            }
        }
        for key in ["fs", "sampling_rate", "sample_rate", "Sample Rate (Hz)"] {
            if let Some(fs) = self.properties.get(key).and_then(PropertyValue::as_f64) {
                if fs > 0.0 {
                    return Some(fs);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TdmsGroup {
    pub name: String,
    pub properties: HashMap<String, PropertyValue>,
    pub channels: Vec<TdmsChannel>,
}

impl TdmsGroup {
    pub fn channel(&self, name: &str) -> Option<&TdmsChannel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// A fully read container: root properties and all groups/channels,
/// with per-key property values merged last-write-wins across segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TdmsFile {
    pub properties: HashMap<String, PropertyValue>,
    pub groups: Vec<TdmsGroup>,
}

impl TdmsFile {
    pub fn group(&self, name: &str) -> Option<&TdmsGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Read a container file written by this module (little-endian,
    /// contiguous non-DAQmx raw data).
    pub fn read(path: &Path) -> Result<Self, CaptureError> {
        let bytes = fs::read(path).map_err(|e| storage_err("failed to read container", e))?;
        parse(&bytes)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CaptureError> {
        if self.pos + n > self.buf.len() {
            return Err(CaptureError::Storage("truncated container segment".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, CaptureError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CaptureError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, CaptureError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, CaptureError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, CaptureError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CaptureError::Storage("invalid UTF-8 in container string".into()))
    }
}

fn read_property_value(cursor: &mut Cursor<'_>, type_code: u32) -> Result<PropertyValue, CaptureError> {
    match type_code {
        DTYPE_I32 => Ok(PropertyValue::I32(cursor.i32()?)),
        DTYPE_U64 => Ok(PropertyValue::U64(cursor.u64()?)),
        DTYPE_F64 => Ok(PropertyValue::F64(cursor.f64()?)),
        DTYPE_BOOL => Ok(PropertyValue::Bool(cursor.take(1)?[0] != 0)),
        DTYPE_STRING => Ok(PropertyValue::String(cursor.string()?)),
        other => Err(CaptureError::Storage(format!(
            "unsupported property type 0x{other:x}"
        ))),
    }
}

#[derive(Default)]
struct ObjectData {
    properties: HashMap<String, PropertyValue>,
    data: Vec<f64>,
}

/// Raw-data layout carried over between segments.
#[derive(Clone)]
struct RawEntry {
    path: String,
    count: u64,
}

fn parse(bytes: &[u8]) -> Result<TdmsFile, CaptureError> {
    let mut objects: HashMap<String, ObjectData> = HashMap::new();
    let mut object_order: Vec<String> = Vec::new();
    let mut raw_list: Vec<RawEntry> = Vec::new();
    let mut pos: usize = 0;

    while pos + LEAD_IN_LEN as usize <= bytes.len() {
        let mut cursor = Cursor { buf: bytes, pos };
        let tag = cursor.take(4)?;
        if tag != TDMS_TAG {
            return Err(CaptureError::Storage("bad segment tag".into()));
        }
        let toc = cursor.u32()?;
        let _version = cursor.u32()?;
        let next_segment_offset = cursor.u64()?;
        let raw_data_offset = cursor.u64()?;

        if toc & TOC_BIG_ENDIAN != 0 {
            return Err(CaptureError::Storage("big-endian containers are not supported".into()));
        }
        if toc & (TOC_DAQMX_RAW | TOC_INTERLEAVED) != 0 {
            return Err(CaptureError::Storage(
                "DAQmx/interleaved raw data is not supported".into(),
            ));
        }

        let lead_end = pos + LEAD_IN_LEN as usize;
        let segment_end = if next_segment_offset == INCOMPLETE_SEGMENT {
            bytes.len()
        } else {
            (lead_end + next_segment_offset as usize).min(bytes.len())
        };

        if toc & TOC_META_DATA != 0 {
            if toc & TOC_NEW_OBJ_LIST != 0 {
                raw_list.clear();
            }
            let num_objects = cursor.u32()?;
            for _ in 0..num_objects {
                let object_path = cursor.string()?;
                if !objects.contains_key(&object_path) {
                    objects.insert(object_path.clone(), ObjectData::default());
                    object_order.push(object_path.clone());
                }

                let raw_index = cursor.u32()?;
                match raw_index {
                    RAW_INDEX_NONE => {}
                    RAW_INDEX_MATCHES_PREVIOUS => {
                        // Layout unchanged from the previous segment.
                        if toc & TOC_NEW_OBJ_LIST != 0 {
                            return Err(CaptureError::Storage(
                                "raw index refers to previous segment but none exists".into(),
                            ));
                        }
                    }
                    _index_len => {
                        let dtype = cursor.u32()?;
                        if dtype != DTYPE_F64 {
                            return Err(CaptureError::Storage(format!(
                                "unsupported channel data type 0x{dtype:x}"
                            )));
                        }
                        let _dimension = cursor.u32()?;
                        let count = cursor.u64()?;
                        if let Some(entry) = raw_list.iter_mut().find(|e| e.path == object_path) {
                            entry.count = count;
                        } else {
                            raw_list.push(RawEntry { path: object_path.clone(), count });
                        }
                    }
                }

                let num_properties = cursor.u32()?;
                let object = objects.get_mut(&object_path).unwrap();
                for _ in 0..num_properties {
                    let name = cursor.string()?;
                    let type_code = cursor.u32()?;
                    let value = read_property_value(&mut cursor, type_code)?;
                    object.properties.insert(name, value);
                }
            }
        }

        if toc & TOC_RAW_DATA != 0 {
            let data_start = lead_end + raw_data_offset as usize;
            if data_start > segment_end {
                return Err(CaptureError::Storage("raw data offset beyond segment".into()));
            }
            let data_len = segment_end - data_start;
            let chunk_bytes: usize = raw_list.iter().map(|e| e.count as usize * 8).sum();

            let mut data_cursor = Cursor { buf: bytes, pos: data_start };
            if chunk_bytes == 0 {
                // In-progress or crashed segment: the count was never
                // patched. Derive it from the bytes present (single
                // channel only, which is all this writer produces).
                if raw_list.len() == 1 && data_len >= 8 {
                    let entry = raw_list[0].clone();
                    let object = objects.get_mut(&entry.path).unwrap();
                    for _ in 0..data_len / 8 {
                        object.data.push(data_cursor.f64()?);
                    }
                }
            } else {
                let chunks = (data_len / chunk_bytes).max(1);
                for _ in 0..chunks {
                    for entry in raw_list.clone() {
                        let object = objects.get_mut(&entry.path).unwrap();
                        for _ in 0..entry.count {
                            object.data.push(data_cursor.f64()?);
                        }
                    }
                }
            }
        }

        pos = segment_end;
    }

    assemble(objects, object_order)
}

fn assemble(
    mut objects: HashMap<String, ObjectData>,
    object_order: Vec<String>,
) -> Result<TdmsFile, CaptureError> {
    let mut file = TdmsFile::default();

    for path in object_order {
        let object = objects.remove(&path).unwrap();
        match parse_object_path(&path)? {
            ObjectKind::Root => file.properties.extend(object.properties),
            ObjectKind::Group(name) => {
                let group = find_or_insert_group(&mut file, &name);
                group.properties.extend(object.properties);
            }
            ObjectKind::Channel(group_name, name) => {
                let group = find_or_insert_group(&mut file, &group_name);
                group.channels.push(TdmsChannel {
                    name,
                    properties: object.properties,
                    data: object.data,
                });
            }
        }
    }

    Ok(file)
}

fn find_or_insert_group<'a>(file: &'a mut TdmsFile, name: &str) -> &'a mut TdmsGroup {
    if let Some(idx) = file.groups.iter().position(|g| g.name == name) {
        &mut file.groups[idx]
    } else {
        file.groups.push(TdmsGroup { name: name.to_string(), ..Default::default() });
        file.groups.last_mut().unwrap()
    }
}

enum ObjectKind {
    Root,
    Group(String),
    Channel(String, String),
}

fn parse_object_path(path: &str) -> Result<ObjectKind, CaptureError> {
    if path == "/" {
        return Ok(ObjectKind::Root);
    }
    let mut parts = Vec::new();
    let mut rest = path;
    while let Some(stripped) = rest.strip_prefix("/'") {
        // Find the closing quote, honoring '' escapes.
        let mut name = String::new();
        let mut chars = stripped.char_indices().peekable();
        let mut end = None;
        while let Some((i, ch)) = chars.next() {
            if ch == '\'' {
                if let Some(&(_, '\'')) = chars.peek() {
                    chars.next();
                    name.push('\'');
                } else {
                    end = Some(i + 1);
                    break;
                }
            } else {
                name.push(ch);
            }
        }
        match end {
            Some(e) => {
                parts.push(name);
                rest = &stripped[e..];
            }
            None => return Err(CaptureError::Storage(format!("malformed object path: {path}"))),
        }
    }
    if !rest.is_empty() {
        return Err(CaptureError::Storage(format!("malformed object path: {path}")));
    }
    match parts.len() {
        1 => Ok(ObjectKind::Group(parts.pop().unwrap())),
        2 => {
            let channel = parts.pop().unwrap();
            let group = parts.pop().unwrap();
            Ok(ObjectKind::Channel(group, channel))
        }
        _ => Err(CaptureError::Storage(format!("malformed object path: {path}"))),
    }
}
