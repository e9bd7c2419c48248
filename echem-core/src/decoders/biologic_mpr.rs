//! BioLogic EC-Lab binary files (`.mpr`).
//!
//! The file is a magic string followed by `MODULE` blocks. Each module has a short name,
//! a long name, a length, a version and a date; two header layouts exist and are told apart
//! by where the `mm/dd/yy` date sits. The `VMP Set` module starts with the technique code
//! and carries the technique parameters further in, `VMP data` holds fixed-width records
//! described by a column-id list, and `VMP LOG` stores the acquisition start as an OLE
//! automation date.

use super::{Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;

pub const MAGIC: &[u8] = b"BIO-LOGIC MODULAR FILE\x1a";
const MODULE_TAG: &[u8] = b"MODULE";
const OLD_HEADER_LEN: usize = 51;
const NEW_HEADER_LEN: usize = 59;

#[derive(Debug)]
struct Module<'a> {
    short_name: String,
    version: u32,
    date: String,
    data: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
enum Dtype {
    F32,
    F64,
    U8,
    U16,
    U32,
}

impl Dtype {
    fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 | Self::U32 => 4,
            Self::F64 => 8,
        }
    }

    fn read(self, bytes: &[u8]) -> f64 {
        match self {
            Self::F32 => LittleEndian::read_f32(bytes) as f64,
            Self::F64 => LittleEndian::read_f64(bytes),
            Self::U8 => bytes[0] as f64,
            Self::U16 => LittleEndian::read_u16(bytes) as f64,
            Self::U32 => LittleEndian::read_u32(bytes) as f64,
        }
    }
}

/// Status bits packed into the single flag byte of each record.
const FLAG_COLUMNS: [(u16, &str, u8); 6] = [
    (1, "mode", 0x03),
    (2, "ox/red", 0x04),
    (3, "error", 0x08),
    (21, "control changes", 0x10),
    (31, "Ns changes", 0x20),
    (65, "counter inc.", 0x80),
];

fn column_spec(id: u16) -> Option<(&'static str, Dtype)> {
    let layout = match id {
        4 => ("time/s", Dtype::F64),
        5 => ("control/V/mA", Dtype::F32),
        6 => ("Ewe/V", Dtype::F32),
        7 => ("dq/mA.h", Dtype::F64),
        8 => ("I/mA", Dtype::F32),
        9 => ("Ece/V", Dtype::F32),
        11 => ("<I>/mA", Dtype::F64),
        13 => ("(Q-Qo)/mA.h", Dtype::F64),
        16 => ("Analog IN 1/V", Dtype::F32),
        19 => ("control/V", Dtype::F32),
        20 => ("control/mA", Dtype::F32),
        23 => ("dQ/mA.h", Dtype::F64),
        24 => ("cycle number", Dtype::F64),
        26 => ("Rapp/Ohm", Dtype::F32),
        27 => ("Ewe-Ece/V", Dtype::F32),
        32 => ("freq/Hz", Dtype::F32),
        33 => ("|Ewe|/V", Dtype::F32),
        34 => ("|I|/A", Dtype::F32),
        35 => ("Phase(Z)/deg", Dtype::F32),
        36 => ("|Z|/Ohm", Dtype::F32),
        37 => ("Re(Z)/Ohm", Dtype::F32),
        38 => ("-Im(Z)/Ohm", Dtype::F32),
        39 => ("I Range", Dtype::U16),
        69 => ("R/Ohm", Dtype::F32),
        70 => ("P/W", Dtype::F32),
        74 => ("|Energy|/W.h", Dtype::F64),
        75 => ("Analog OUT/V", Dtype::F32),
        76 => ("<I>/mA", Dtype::F32),
        77 => ("<Ewe>/V", Dtype::F32),
        78 => ("Cs-2/µF-2", Dtype::F32),
        96 => ("|Ece|/V", Dtype::F32),
        98 => ("Phase(Zce)/deg", Dtype::F32),
        99 => ("|Zce|/Ohm", Dtype::F32),
        100 => ("Re(Zce)/Ohm", Dtype::F32),
        101 => ("-Im(Zce)/Ohm", Dtype::F32),
        123 => ("Energy charge/W.h", Dtype::F64),
        124 => ("Energy discharge/W.h", Dtype::F64),
        125 => ("Capacitance charge/µF", Dtype::F64),
        126 => ("Capacitance discharge/µF", Dtype::F64),
        131 => ("Ns", Dtype::U16),
        163 => ("|Estack|/V", Dtype::F32),
        168 => ("Rcmp/Ohm", Dtype::F32),
        169 => ("Cs/µF", Dtype::F32),
        172 => ("Cp/µF", Dtype::F32),
        173 => ("Cp-2/µF-2", Dtype::F32),
        174 => ("<Ewe>/V", Dtype::F32),
        178 => ("(Q-Qo)/C", Dtype::F32),
        179 => ("dQ/C", Dtype::F32),
        211 => ("Q charge/discharge/mA.h", Dtype::F64),
        212 => ("half cycle", Dtype::U32),
        213 => ("z cycle", Dtype::U32),
        217 => ("THD Ewe/%", Dtype::F32),
        241 => ("|E1|/V", Dtype::F32),
        326 => ("P/W", Dtype::F32),
        438 => ("step time/s", Dtype::F64),
        _ => return None,
    };
    Some(layout)
}

/// EC-Lab technique codes as stored in the first byte of the `VMP Set` module.
pub fn technique_from_code(code: u8) -> Option<&'static str> {
    let name = match code {
        0x03 => "CA",
        0x04 => "GCPL",
        0x06 => "CV",
        0x0B => "OCV",
        0x15 => "LSV",
        0x19 => "CP",
        0x1A => "coC",
        0x1B => "coV",
        0x1D => "PEIS",
        0x1E => "GEIS",
        0x32 => "ZIR",
        _ => return None,
    };
    Some(name)
}

/// Where the parameter block may start inside `VMP Set`; it moved between EC-Lab versions.
const PARAMETER_OFFSETS: [usize; 3] = [0x0572, 0x1845, 0x1846];

const FREQUENCY_UNITS: &[&str] = &["MHz", "kHz", "Hz", "mHz", "µHz"];
const CURRENT_UNITS: &[&str] = &["A", "mA", "µA", "nA", "pA"];
const SCAN_RATE_UNITS: &[&str] = &["mV/s", "V/s"];
const REFERENCES: &[&str] = &["Ref", "Eoc", "Ectrl", "Emeas"];
const SPACINGS: &[&str] = &["Logarithmic", "Linear"];
const SINE_MODES: &[&str] = &["Single sine", "Multi sine"];

/// One packed field of a technique parameter record. Names follow the EC-Lab text export
/// so both BioLogic formats feed the same property readers.
#[derive(Debug, Clone, Copy)]
enum Param {
    Value(&'static str, Dtype),
    /// A one-byte code rendered through a lookup table.
    Code(&'static str, &'static [&'static str]),
}

impl Param {
    fn size(self) -> usize {
        match self {
            Self::Value(_, dtype) => dtype.size(),
            Self::Code(..) => 1,
        }
    }

    fn read(self, bytes: &[u8]) -> (&'static str, Scalar) {
        match self {
            Self::Value(name, dtype @ (Dtype::U8 | Dtype::U16 | Dtype::U32)) => {
                (name, Scalar::Int(dtype.read(bytes) as i64))
            }
            Self::Value(name, dtype) => (name, Scalar::Number(dtype.read(bytes))),
            Self::Code(name, table) => {
                let code = bytes[0] as usize;
                let value = table
                    .get(code)
                    .map_or_else(|| code.to_string(), |v| v.to_string());
                (name, Scalar::Text(value))
            }
        }
    }
}

const PEIS_PARAMS: &[Param] = &[
    Param::Code("Mode", SINE_MODES),
    Param::Value("E (V)", Dtype::F32),
    Param::Code("vs.", REFERENCES),
    Param::Value("tE (h:m:s)", Dtype::F32),
    Param::Value("record", Dtype::F32),
    Param::Value("dI", Dtype::F32),
    Param::Value("dt (s)", Dtype::F32),
    Param::Value("fi", Dtype::F32),
    Param::Code("unit fi", FREQUENCY_UNITS),
    Param::Value("ff", Dtype::F32),
    Param::Code("unit ff", FREQUENCY_UNITS),
    Param::Value("Nd", Dtype::U32),
    Param::Value("Points", Dtype::U8),
    Param::Code("spacing", SPACINGS),
    Param::Value("Va (mV)", Dtype::F32),
    Param::Value("pw", Dtype::F32),
    Param::Value("Na", Dtype::U32),
    Param::Value("corr", Dtype::U8),
];

const GEIS_PARAMS: &[Param] = &[
    Param::Code("Mode", SINE_MODES),
    Param::Value("Is", Dtype::F32),
    Param::Code("unit Is", CURRENT_UNITS),
    Param::Code("vs.", REFERENCES),
    Param::Value("tIs (h:m:s)", Dtype::F32),
    Param::Value("record", Dtype::F32),
    Param::Value("dE", Dtype::F32),
    Param::Value("dt (s)", Dtype::F32),
    Param::Value("fi", Dtype::F32),
    Param::Code("unit fi", FREQUENCY_UNITS),
    Param::Value("ff", Dtype::F32),
    Param::Code("unit ff", FREQUENCY_UNITS),
    Param::Value("Nd", Dtype::U32),
    Param::Value("Points", Dtype::U8),
    Param::Code("spacing", SPACINGS),
    Param::Value("Ia", Dtype::F32),
    Param::Code("unit Ia", CURRENT_UNITS),
    Param::Value("pw", Dtype::F32),
    Param::Value("Na", Dtype::U32),
    Param::Value("corr", Dtype::U8),
];

const CV_PARAMS: &[Param] = &[
    Param::Value("Ei (V)", Dtype::F32),
    Param::Code("vs.", REFERENCES),
    Param::Value("dE/dt", Dtype::F32),
    Param::Code("dE/dt unit", SCAN_RATE_UNITS),
    Param::Value("E1 (V)", Dtype::F32),
    Param::Value("E2 (V)", Dtype::F32),
    Param::Value("nc cycles", Dtype::U32),
    Param::Value("Ef (V)", Dtype::F32),
    Param::Value("dER (mV)", Dtype::F32),
    Param::Value("dtR (s)", Dtype::F32),
];

const LSV_PARAMS: &[Param] = &[
    Param::Value("Ei (V)", Dtype::F32),
    Param::Code("vs.", REFERENCES),
    Param::Value("dE/dt", Dtype::F32),
    Param::Code("dE/dt unit", SCAN_RATE_UNITS),
    Param::Value("EL (V)", Dtype::F32),
    Param::Value("dER (mV)", Dtype::F32),
    Param::Value("dtR (s)", Dtype::F32),
];

const CA_PARAMS: &[Param] = &[
    Param::Value("Ei (V)", Dtype::F32),
    Param::Code("vs.", REFERENCES),
    Param::Value("ti (h:m:s)", Dtype::F32),
    Param::Value("Imax", Dtype::F32),
    Param::Code("unit Imax", CURRENT_UNITS),
    Param::Value("Imin", Dtype::F32),
    Param::Code("unit Imin", CURRENT_UNITS),
    Param::Value("dtR (s)", Dtype::F32),
    Param::Value("nc cycles", Dtype::U32),
];

const CP_PARAMS: &[Param] = &[
    Param::Value("Is", Dtype::F32),
    Param::Code("unit Is", CURRENT_UNITS),
    Param::Code("vs.", REFERENCES),
    Param::Value("ts (h:m:s)", Dtype::F32),
    Param::Value("EM (V)", Dtype::F32),
    Param::Value("dtR (s)", Dtype::F32),
    Param::Value("nc cycles", Dtype::U32),
];

const OCV_PARAMS: &[Param] = &[
    Param::Value("tR (h:m:s)", Dtype::F32),
    Param::Value("dER/dt (mV/h)", Dtype::F32),
    Param::Value("dER (mV)", Dtype::F32),
    Param::Value("dtR (s)", Dtype::F32),
    Param::Value("E range min (V)", Dtype::F32),
    Param::Value("E range max (V)", Dtype::F32),
];

fn parameter_layout(technique: &str) -> Option<&'static [Param]> {
    let layout = match technique {
        "PEIS" => PEIS_PARAMS,
        "GEIS" => GEIS_PARAMS,
        "CV" => CV_PARAMS,
        "LSV" => LSV_PARAMS,
        "CA" => CA_PARAMS,
        "CP" => CP_PARAMS,
        "OCV" => OCV_PARAMS,
        _ => return None,
    };
    Some(layout)
}

/// Reads one parameter record per technique sequence. The block starts with the sequence
/// count and the field count (both `u16`); an offset only counts when its field count
/// matches the technique's layout.
fn read_parameters(settings: &[u8], layout: &[Param]) -> Option<Vec<IndexMap<String, Scalar>>> {
    let record_len: usize = layout.iter().map(|p| p.size()).sum();
    PARAMETER_OFFSETS.into_iter().find_map(|at| {
        let head = settings.get(at..at + 4)?;
        let sequences = LittleEndian::read_u16(&head[0..2]) as usize;
        let fields = LittleEndian::read_u16(&head[2..4]) as usize;
        if sequences == 0 || fields != layout.len() {
            return None;
        }
        let body = settings.get(at + 4..at + 4 + sequences * record_len)?;
        let records = body
            .chunks_exact(record_len)
            .map(|record| {
                let mut offset = 0;
                let mut params = IndexMap::new();
                for param in layout {
                    let (name, value) = param.read(&record[offset..offset + param.size()]);
                    params.insert(name.to_string(), value);
                    offset += param.size();
                }
                params
            })
            .collect();
        Some(records)
    })
}

fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn read_modules<'a>(file: &str, bytes: &'a [u8]) -> Result<Vec<Module<'a>>, EchemError> {
    if !bytes.starts_with(MAGIC) {
        return Err(EchemError::decode(file, "missing BIO-LOGIC MODULAR FILE magic"));
    }
    let mut pos = bytes
        .windows(MODULE_TAG.len())
        .position(|w| w == MODULE_TAG)
        .ok_or_else(|| EchemError::decode(file, "no MODULE block found"))?;

    let mut modules = Vec::new();
    while pos < bytes.len() {
        if !bytes[pos..].starts_with(MODULE_TAG) {
            return Err(EchemError::decode(file, format!("expected MODULE at byte {pos}")));
        }
        let header = pos + MODULE_TAG.len();
        if header + OLD_HEADER_LEN > bytes.len() {
            return Err(EchemError::decode(file, "truncated module header"));
        }
        let short_name = trimmed(&bytes[header..header + 10]);
        let old_date = &bytes[header + 43..header + 51];
        let (length, version, date, header_len) = if old_date.contains(&b'/') {
            (
                LittleEndian::read_u32(&bytes[header + 35..header + 39]) as usize,
                LittleEndian::read_u32(&bytes[header + 39..header + 43]),
                trimmed(old_date),
                OLD_HEADER_LEN,
            )
        } else {
            if header + NEW_HEADER_LEN > bytes.len() {
                return Err(EchemError::decode(file, "truncated module header"));
            }
            (
                LittleEndian::read_u32(&bytes[header + 39..header + 43]) as usize,
                LittleEndian::read_u32(&bytes[header + 43..header + 47]),
                trimmed(&bytes[header + 51..header + 59]),
                NEW_HEADER_LEN,
            )
        };
        let start = header + header_len;
        let end = start + length;
        if end > bytes.len() {
            return Err(EchemError::decode(
                file,
                format!("module '{short_name}' runs past the end of the file"),
            ));
        }
        modules.push(Module {
            short_name,
            version,
            date,
            data: &bytes[start..end],
        });
        pos = end;
    }
    Ok(modules)
}

fn read_data_module(file: &str, module: &Module) -> Result<Table, EchemError> {
    let data = module.data;
    if data.len() < 5 {
        return Err(EchemError::decode(file, "data module too short"));
    }
    let n_points = LittleEndian::read_u32(&data[0..4]) as usize;
    let n_columns = data[4] as usize;
    let (ids, offset): (Vec<u16>, usize) = match module.version {
        0 => {
            let ids = data
                .get(5..5 + n_columns)
                .ok_or_else(|| EchemError::decode(file, "truncated column list"))?;
            (ids.iter().map(|&b| b as u16).collect(), 100)
        }
        2 | 3 => {
            let raw = data
                .get(5..5 + 2 * n_columns)
                .ok_or_else(|| EchemError::decode(file, "truncated column list"))?;
            let ids = raw.chunks_exact(2).map(LittleEndian::read_u16).collect();
            (ids, if module.version == 3 { 0x196 } else { 0x195 })
        }
        v => {
            return Err(EchemError::decode(file, format!("unsupported data module version {v}")));
        }
    };

    // (name, dtype, byte offset in record); flags share one byte at `flag_offset`.
    let mut fields: Vec<(&'static str, Dtype, usize)> = Vec::new();
    let mut flags: Vec<(&'static str, u8)> = Vec::new();
    let mut flag_offset = None;
    let mut record_len = 0;
    for id in ids {
        if let Some(&(_, name, mask)) = FLAG_COLUMNS.iter().find(|(fid, _, _)| *fid == id) {
            if flag_offset.is_none() {
                flag_offset = Some(record_len);
                record_len += 1;
            }
            flags.push((name, mask));
            continue;
        }
        let (name, dtype) = column_spec(id)
            .ok_or_else(|| EchemError::decode(file, format!("unknown column id {id}")))?;
        fields.push((name, dtype, record_len));
        record_len += dtype.size();
    }

    let body = data.get(offset..).unwrap_or(&[]);
    if record_len == 0 || body.len() < n_points * record_len {
        return Err(EchemError::decode(
            file,
            format!(
                "expected {n_points} records of {record_len} bytes, found {} bytes",
                body.len()
            ),
        ));
    }

    let mut table = Table::new("data");
    let records: Vec<&[u8]> = body.chunks_exact(record_len).take(n_points).collect();
    if let Some(at) = flag_offset {
        for (name, mask) in &flags {
            let shift = mask.trailing_zeros();
            let values = records.iter().map(|r| ((r[at] & mask) >> shift) as f64).collect();
            table.push(name, None, Column::Numbers(values));
        }
    }
    for (name, dtype, at) in fields {
        let values = records
            .iter()
            .map(|r| dtype.read(&r[at..at + dtype.size()]))
            .collect();
        let unit = name.rsplit_once('/').map(|(_, u)| u);
        table.push(name, unit, Column::Numbers(values));
    }
    Ok(table)
}

/// Converts an OLE automation date (days since 1899-12-30) into a timestamp.
pub fn ole_to_datetime(days: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (days * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(chrono::Duration::milliseconds(millis))
}

fn read_log_timestamp(module: &Module) -> Option<f64> {
    let preferred = if module.version < 2 { 465 } else { 469 };
    [preferred, 465, 469, 473, 585]
        .into_iter()
        .filter_map(|at| module.data.get(at..at + 8).map(LittleEndian::read_f64))
        .find(|days| (20_000.0..80_000.0).contains(days))
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let modules = read_modules(file, bytes)?;
    let mut decoded = Decoded::new(DecoderKind::BiologicMpr);

    let data_module = modules
        .iter()
        .find(|m| m.short_name == "VMP data")
        .ok_or_else(|| EchemError::decode(file, "no VMP data module"))?;
    let table = read_data_module(file, data_module)?;

    if let Some(settings) = modules.iter().find(|m| m.short_name == "VMP Set") {
        if let Some(&code) = settings.data.first() {
            decoded
                .metadata
                .insert("technique_code".to_string(), Scalar::Int(code as i64));
            decoded.technique = technique_from_code(code).map(str::to_string);
            if decoded.technique.is_none() {
                log::warn!("'{}': unknown EC-Lab technique code {:#04x}", file, code);
            }
        }
        decoded
            .metadata
            .insert("settings_date".to_string(), Scalar::Text(settings.date.clone()));
    }
    if decoded.technique.is_none() && table.columns.contains_key("freq/Hz") {
        decoded.technique = Some("PEIS".to_string());
    }

    let settings = modules.iter().find(|m| m.short_name == "VMP Set");
    if let (Some(settings), Some(technique)) = (settings, decoded.technique.as_deref()) {
        match parameter_layout(technique).and_then(|layout| read_parameters(settings.data, layout)) {
            Some(parameters) => decoded.parameters = parameters,
            None => log::debug!("'{}': no {} parameter block found", file, technique),
        }
    }

    if let Some(log_module) = modules.iter().find(|m| m.short_name == "VMP LOG") {
        if let Some(days) = read_log_timestamp(log_module) {
            let offset = table.numbers("time/s").and_then(|t| t.first().copied()).unwrap_or(0.0);
            if let Some(start) = ole_to_datetime(days + offset / 86_400.0) {
                decoded
                    .metadata
                    .insert("datetime".to_string(), Scalar::DateTime(start));
            }
        }
    }

    decoded
        .metadata
        .insert("data_version".to_string(), Scalar::Int(data_module.version as i64));
    decoded.methods = decoded.technique.iter().cloned().collect();
    decoded.tables.push(table);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(short: &str, version: u32, data: &[u8]) -> Vec<u8> {
        let mut out = MODULE_TAG.to_vec();
        let mut name = short.as_bytes().to_vec();
        name.resize(10, b' ');
        out.extend(name);
        out.extend(vec![b' '; 25]);
        out.extend((data.len() as u32).to_le_bytes());
        out.extend((data.len() as u32).to_le_bytes());
        out.extend(version.to_le_bytes());
        out.extend(0u32.to_le_bytes());
        out.extend(b"03/14/23");
        out.extend_from_slice(data);
        out
    }

    fn file(technique: u8, rows: &[(f64, f32, f32)]) -> Vec<u8> {
        with_settings(&[technique, 0, 0, 0], rows)
    }

    fn with_settings(settings: &[u8], rows: &[(f64, f32, f32)]) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.resize(52, b' ');
        bytes.extend(module("VMP Set", 0, settings));

        let mut data = (rows.len() as u32).to_le_bytes().to_vec();
        data.push(3);
        for id in [1u16, 4, 6] {
            data.extend(id.to_le_bytes());
        }
        data.resize(0x195, 0);
        for (t, v, _) in rows {
            data.push(0x01);
            data.extend(t.to_le_bytes());
            data.extend(v.to_le_bytes());
        }
        bytes.extend(module("VMP data", 2, &data));

        let mut log = vec![0u8; 600];
        log[469..477].copy_from_slice(&45_000.5f64.to_le_bytes());
        bytes.extend(module("VMP LOG", 2, &log));
        bytes
    }

    #[test]
    fn test_reads_data_module_and_flags() {
        let bytes = file(0x0B, &[(0.0, 0.5, 0.0), (1.0, 0.51, 0.0)]);
        let decoded = decode("ocv.mpr", &bytes).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("OCV"));
        let table = &decoded.tables[0];
        assert_eq!(table.numbers("mode").unwrap(), &[1.0, 1.0]);
        assert_eq!(table.numbers("time/s").unwrap(), &[0.0, 1.0]);
        assert!((table.numbers("Ewe/V").unwrap()[1] - 0.51).abs() < 1e-6);
        assert_eq!(table.unit("Ewe/V"), Some("V"));
    }

    #[test]
    fn test_start_time_from_ole_log() {
        let bytes = file(0x06, &[(2.0, 0.1, 0.0)]);
        let decoded = decode("cv.mpr", &bytes).unwrap();
        let expected = ole_to_datetime(45_000.5).unwrap() + chrono::Duration::seconds(2);
        assert_eq!(decoded.start_datetime(), Some(expected));
        assert_eq!(decoded.technique.as_deref(), Some("CV"));
    }

    fn cv_sequence(scan_rate: f32, cycles: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend((-0.2f32).to_le_bytes());
        out.push(1);
        out.extend(scan_rate.to_le_bytes());
        out.push(0);
        out.extend(0.5f32.to_le_bytes());
        out.extend((-0.5f32).to_le_bytes());
        out.extend(cycles.to_le_bytes());
        out.extend(0.0f32.to_le_bytes());
        out.extend(1.0f32.to_le_bytes());
        out.extend(0.25f32.to_le_bytes());
        out
    }

    #[test]
    fn test_reads_cv_parameters_for_each_sequence() {
        let mut settings = vec![0u8; 0x1845];
        settings[0] = 0x06;
        settings.extend(2u16.to_le_bytes());
        settings.extend((CV_PARAMS.len() as u16).to_le_bytes());
        settings.extend(cv_sequence(100.0, 3));
        settings.extend(cv_sequence(50.0, 1));

        let decoded = decode("cv.mpr", &with_settings(&settings, &[(0.0, 0.1, 0.0)])).unwrap();
        assert_eq!(decoded.parameters.len(), 2);
        let first = &decoded.parameters[0];
        assert_eq!(first.get("dE/dt").and_then(Scalar::as_f64), Some(100.0));
        assert_eq!(first.get("dE/dt unit").and_then(Scalar::as_str), Some("mV/s"));
        assert_eq!(first.get("vs.").and_then(Scalar::as_str), Some("Eoc"));
        assert_eq!(first.get("E1 (V)").and_then(Scalar::as_f64), Some(0.5));
        assert_eq!(first.get("nc cycles"), Some(&Scalar::Int(3)));
        assert_eq!(decoded.parameters[1].get("dE/dt").and_then(Scalar::as_f64), Some(50.0));
    }

    #[test]
    fn test_parameter_block_with_wrong_field_count_is_ignored() {
        let mut settings = vec![0u8; 0x0572];
        settings[0] = 0x06;
        settings.extend(1u16.to_le_bytes());
        settings.extend(4u16.to_le_bytes());
        settings.extend(cv_sequence(100.0, 3));
        let decoded = decode("cv.mpr", &with_settings(&settings, &[(0.0, 0.1, 0.0)])).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("CV"));
        assert!(decoded.parameters.is_empty());
    }

    #[test]
    fn test_unknown_column_id_fails() {
        let mut bytes = MAGIC.to_vec();
        bytes.resize(52, b' ');
        let mut data = 0u32.to_le_bytes().to_vec();
        data.push(1);
        data.extend(9999u16.to_le_bytes());
        data.resize(0x195, 0);
        bytes.extend(module("VMP data", 2, &data));
        assert!(matches!(
            decode("bad.mpr", &bytes),
            Err(EchemError::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_rejects_foreign_files() {
        assert!(decode("x.mpr", b"not a biologic file").is_err());
    }

    #[test]
    fn test_ole_epoch() {
        let dt = ole_to_datetime(1.5).unwrap();
        assert_eq!(dt.to_string(), "1899-12-31 12:00:00");
    }
}
