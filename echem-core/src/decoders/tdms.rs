//! LabVIEW TDMS streams written by the electrolyser test benches.
//!
//! A file is a sequence of segments. Each segment starts with a 28-byte lead-in (`TDSm`, the
//! table-of-contents mask, the version, and the offsets of the next segment and of the raw
//! data), followed by optional metadata and optional raw data. Metadata is incremental: a
//! segment only lists objects whose index or properties changed unless it sets the
//! new-object-list flag, and a raw data index of zero means "same layout as before".
//!
//! The decoded dictionary holds one table per group with one column per channel. Root
//! properties are stored under their own name, group properties as `group/property` and
//! channel properties as `group/channel/property`.

use super::{Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, Duration, NaiveDateTime};
use indexmap::IndexMap;

pub const TAG: &[u8; 4] = b"TDSm";
const LEAD_IN: usize = 28;

const TOC_META_DATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;
const TOC_INTERLEAVED: u32 = 1 << 5;
const TOC_BIG_ENDIAN: u32 = 1 << 6;
const TOC_DAQMX_RAW_DATA: u32 = 1 << 7;

const NO_RAW_DATA: u32 = 0xFFFF_FFFF;
const SAME_AS_PREVIOUS: u32 = 0;

/// Seconds between the LabVIEW epoch (1904-01-01) and the Unix epoch.
const LABVIEW_EPOCH_OFFSET: i64 = 2_082_844_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Bool,
    Timestamp,
}

impl DataType {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x01 => Self::I8,
            0x02 => Self::I16,
            0x03 => Self::I32,
            0x04 => Self::I64,
            0x05 => Self::U8,
            0x06 => Self::U16,
            0x07 => Self::U32,
            0x08 => Self::U64,
            0x09 | 0x19 => Self::F32,
            0x0A | 0x1A => Self::F64,
            0x20 => Self::String,
            0x21 => Self::Bool,
            0x44 => Self::Timestamp,
            _ => return None,
        })
    }

    /// Width of one raw value; strings are variable-length.
    fn size(self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 | Self::Bool => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::Timestamp => Some(16),
            Self::String => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RawIndex {
    data_type: DataType,
    count: u64,
    /// Byte size of the string data, only for string channels.
    total_size: Option<u64>,
}

impl RawIndex {
    fn chunk_bytes(&self) -> u64 {
        match self.data_type.size() {
            Some(width) => width as u64 * self.count,
            None => self.total_size.unwrap_or(0),
        }
    }
}

#[derive(Debug, Default)]
struct Object {
    properties: IndexMap<String, Scalar>,
    index: Option<RawIndex>,
    values: Option<Column>,
}

struct Reader<'a> {
    file: &'a str,
    bytes: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EchemError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(EchemError::decode(
                self.file,
                format!("unexpected end of file at byte {}", self.pos),
            )),
        }
    }

    fn u8(&mut self) -> Result<u8, EchemError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, EchemError> {
        let b = self.take(2)?;
        Ok(if self.big_endian { BigEndian::read_u16(b) } else { LittleEndian::read_u16(b) })
    }

    fn u32(&mut self) -> Result<u32, EchemError> {
        let b = self.take(4)?;
        Ok(if self.big_endian { BigEndian::read_u32(b) } else { LittleEndian::read_u32(b) })
    }

    fn u64(&mut self) -> Result<u64, EchemError> {
        let b = self.take(8)?;
        Ok(if self.big_endian { BigEndian::read_u64(b) } else { LittleEndian::read_u64(b) })
    }

    fn string(&mut self) -> Result<String, EchemError> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn timestamp(&mut self) -> Result<Option<NaiveDateTime>, EchemError> {
        let (fraction, seconds) = if self.big_endian {
            let seconds = self.u64()? as i64;
            (self.u64()?, seconds)
        } else {
            let fraction = self.u64()?;
            (fraction, self.u64()? as i64)
        };
        let nanos = ((fraction as f64) / 2f64.powi(64) * 1e9) as i64;
        Ok(DateTime::from_timestamp(seconds - LABVIEW_EPOCH_OFFSET, 0)
            .map(|dt| dt.naive_utc() + Duration::nanoseconds(nanos)))
    }

    fn number(&mut self, data_type: DataType) -> Result<f64, EchemError> {
        Ok(match data_type {
            DataType::I8 => self.u8()? as i8 as f64,
            DataType::U8 => self.u8()? as f64,
            DataType::Bool => (self.u8()? != 0) as u8 as f64,
            DataType::I16 => self.u16()? as i16 as f64,
            DataType::U16 => self.u16()? as f64,
            DataType::I32 => self.u32()? as i32 as f64,
            DataType::U32 => self.u32()? as f64,
            DataType::I64 => self.u64()? as i64 as f64,
            DataType::U64 => self.u64()? as f64,
            DataType::F32 => f32::from_bits(self.u32()?) as f64,
            DataType::F64 => f64::from_bits(self.u64()?),
            DataType::String | DataType::Timestamp => {
                return Err(EchemError::decode(self.file, "non-numeric value read as a number"))
            }
        })
    }

    fn property(&mut self) -> Result<(String, Scalar), EchemError> {
        let name = self.string()?;
        let code = self.u32()?;
        let data_type = DataType::from_code(code).ok_or_else(|| {
            EchemError::decode(self.file, format!("property '{name}' has unsupported type {code:#x}"))
        })?;
        let value = match data_type {
            DataType::String => Scalar::Text(self.string()?),
            DataType::Bool => Scalar::Bool(self.u8()? != 0),
            DataType::Timestamp => match self.timestamp()? {
                Some(dt) => Scalar::DateTime(dt),
                None => Scalar::Text(String::new()),
            },
            DataType::F32 | DataType::F64 => Scalar::Number(self.number(data_type)?),
            other => Scalar::Int(self.number(other)? as i64),
        };
        Ok((name, value))
    }
}

/// Splits `/'group'/'channel'` into its unquoted components; `''` escapes a quote.
pub fn split_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut part = String::new();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    part.push('\'');
                } else {
                    break;
                }
            } else {
                part.push(c);
            }
        }
        parts.push(part);
    }
    parts
}

fn empty_column(data_type: DataType) -> Column {
    match data_type {
        DataType::String => Column::Text(Vec::new()),
        DataType::Timestamp => Column::Timestamps(Vec::new()),
        _ => Column::Numbers(Vec::new()),
    }
}

fn read_values(reader: &mut Reader, index: &RawIndex, column: &mut Column, count: u64) -> Result<(), EchemError> {
    match (index.data_type, column) {
        (DataType::String, Column::Text(values)) => {
            let mut ends = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ends.push(reader.u32()? as usize);
            }
            let mut start = 0;
            for end in ends {
                let raw = reader.take(end.saturating_sub(start))?;
                values.push(String::from_utf8_lossy(raw).into_owned());
                start = end;
            }
        }
        (DataType::Timestamp, Column::Timestamps(values)) => {
            for _ in 0..count {
                values.push(reader.timestamp()?);
            }
        }
        (data_type, Column::Numbers(values)) => {
            for _ in 0..count {
                values.push(reader.number(data_type)?);
            }
        }
        _ => return Err(EchemError::decode(reader.file, "channel changed its data type")),
    }
    Ok(())
}

fn read_metadata(reader: &mut Reader, objects: &mut IndexMap<String, Object>, active: &mut Vec<String>) -> Result<(), EchemError> {
    let count = reader.u32()?;
    for _ in 0..count {
        let path = reader.string()?;
        let raw_index = reader.u32()?;
        let object = objects.entry(path.clone()).or_default();
        match raw_index {
            NO_RAW_DATA => active.retain(|p| p != &path),
            SAME_AS_PREVIOUS => {
                if object.index.is_none() {
                    return Err(EchemError::decode(reader.file, format!("'{path}' reuses a missing raw index")));
                }
                if !active.contains(&path) {
                    active.push(path.clone());
                }
            }
            _ => {
                let code = reader.u32()?;
                let data_type = DataType::from_code(code).ok_or_else(|| {
                    EchemError::decode(reader.file, format!("channel '{path}' has unsupported type {code:#x}"))
                })?;
                let _dimension = reader.u32()?;
                let values = reader.u64()?;
                let total_size = if data_type == DataType::String { Some(reader.u64()?) } else { None };
                object.index = Some(RawIndex {
                    data_type,
                    count: values,
                    total_size,
                });
                if !active.contains(&path) {
                    active.push(path.clone());
                }
            }
        }
        let properties = reader.u32()?;
        for _ in 0..properties {
            let (name, value) = reader.property()?;
            object.properties.insert(name, value);
        }
    }
    Ok(())
}

fn read_raw_data(reader: &mut Reader, end: usize, interleaved: bool, objects: &mut IndexMap<String, Object>, active: &[String]) -> Result<(), EchemError> {
    let indices: Vec<(String, RawIndex)> = active
        .iter()
        .filter_map(|p| objects.get(p).and_then(|o| o.index).map(|i| (p.clone(), i)))
        .filter(|(_, i)| i.count > 0)
        .collect();
    let chunk: u64 = indices.iter().map(|(_, i)| i.chunk_bytes()).sum();
    if chunk == 0 {
        return Ok(());
    }
    let available = end.saturating_sub(reader.pos) as u64;
    let chunks = available / chunk;
    for _ in 0..chunks {
        if interleaved {
            let rows = indices.iter().map(|(_, i)| i.count).min().unwrap_or(0);
            for _ in 0..rows {
                for (path, index) in &indices {
                    let object = objects.entry(path.clone()).or_default();
                    let column = object.values.get_or_insert_with(|| empty_column(index.data_type));
                    read_values(reader, index, column, 1)?;
                }
            }
        } else {
            for (path, index) in &indices {
                let object = objects.entry(path.clone()).or_default();
                let column = object.values.get_or_insert_with(|| empty_column(index.data_type));
                read_values(reader, index, column, index.count)?;
            }
        }
    }
    Ok(())
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    if !bytes.starts_with(TAG) {
        return Err(EchemError::decode(file, "missing TDSm lead-in"));
    }
    let mut objects: IndexMap<String, Object> = IndexMap::new();
    let mut active: Vec<String> = Vec::new();
    let mut reader = Reader {
        file,
        bytes,
        pos: 0,
        big_endian: false,
    };

    while reader.pos + LEAD_IN <= bytes.len() {
        let segment = reader.pos;
        reader.big_endian = false;
        if reader.take(4)? != TAG {
            return Err(EchemError::decode(file, format!("bad segment tag at byte {segment}")));
        }
        let toc = reader.u32()?;
        let _version = reader.u32()?;
        let next_offset = reader.u64()?;
        let raw_offset = reader.u64()?;
        let body = segment + LEAD_IN;
        // An unfinished segment extends to the end of the file.
        let end = if next_offset == u64::MAX {
            bytes.len()
        } else {
            body.saturating_add(next_offset as usize).min(bytes.len())
        };
        reader.big_endian = toc & TOC_BIG_ENDIAN != 0;
        if toc & TOC_DAQMX_RAW_DATA != 0 {
            return Err(EchemError::decode(file, "DAQmx raw data is not supported"));
        }
        if toc & TOC_NEW_OBJ_LIST != 0 {
            active.clear();
        }
        if toc & TOC_META_DATA != 0 {
            read_metadata(&mut reader, &mut objects, &mut active)?;
        }
        if toc & TOC_RAW_DATA != 0 {
            reader.pos = body.saturating_add(raw_offset as usize).min(end);
            read_raw_data(&mut reader, end, toc & TOC_INTERLEAVED != 0, &mut objects, &active)?;
        }
        reader.pos = end;
    }

    let mut decoded = Decoded::new(DecoderKind::Tdms);
    decoded.technique = Some("TDMS".to_string());
    let mut tables: IndexMap<String, Table> = IndexMap::new();
    for (path, object) in objects {
        let parts = split_path(&path);
        let prefix = parts.join("/");
        for (name, value) in object.properties.iter() {
            let key = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
            decoded.metadata.insert(key, value.clone());
        }
        match parts.as_slice() {
            [group] => {
                tables.entry(group.clone()).or_insert_with(|| Table::new(group.clone()));
            }
            [group, channel] => {
                let unit = object.properties.get("unit_string").and_then(Scalar::as_str).map(str::to_string);
                let column = object.values.unwrap_or(Column::Numbers(Vec::new()));
                tables
                    .entry(group.clone())
                    .or_insert_with(|| Table::new(group.clone()))
                    .push(channel, unit.as_deref(), column);
            }
            _ => {}
        }
    }
    if let Some(start) = ["wf_start_time", "datetime", "DateTime"]
        .iter()
        .find_map(|k| decoded.metadata.get(*k).and_then(Scalar::as_datetime))
    {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(start));
    }
    decoded.tables = tables.into_values().collect();
    Ok(decoded)
}
