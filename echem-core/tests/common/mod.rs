//! Synthetic instrument files shared by the integration tests.
#![allow(dead_code)]

use echem_core::decoders::workbook::{Sheet, Workbook};

/// Rows per cycle of [`triangle`].
pub const CYCLE_POINTS: usize = 200;

/// A triangular sweep 0 → 0.5 → -0.5 → 0 V repeated every [`CYCLE_POINTS`] rows.
pub fn triangle(i: usize) -> f64 {
    let k = i % CYCLE_POINTS;
    let x = k as f64;
    if k < 50 {
        0.5 * x / 50.0
    } else if k < 150 {
        0.5 - 0.5 * (x - 50.0) / 50.0
    } else {
        -0.5 + 0.5 * (x - 150.0) / 50.0
    }
}

/// A Gamry cyclic voltammogram with `rows` points and an ohmic 1 kOhm current response.
pub fn gamry_cv(rows: usize) -> Vec<u8> {
    let mut s = String::from("EXPLAIN\r\nTAG\tCV\r\nMETHOD\tLABEL\tCV\tMethod\r\n");
    s.push_str("TITLE\tLABEL\tCyclic Voltammetry\tTest &Identifier\r\n");
    s.push_str("DATE\tLABEL\t3/14/2023\tDate\r\nTIME\tLABEL\t14:03:11\tTime\r\n");
    s.push_str("PSTAT\tPSTAT\tREF600-12345\tPotentiostat\r\n");
    s.push_str("SAMPLEID\tLABEL\t0001\tSample ID\r\n");
    s.push_str("VLIMIT1\tONEPARAM\tT\t0,5\tLimit 1 (V)\r\n");
    s.push_str("VLIMIT2\tQUANT\t-0.5\tLimit 2 (V)\r\n");
    s.push_str("SCANRATE\tQUANT\t100\tScan Rate (mV/s)\r\n");
    s.push_str("AREA\tQUANT\t0.5\tSample Area (cm^2)\r\n");
    s.push_str(&format!("CURVE\tTABLE\t{rows}\r\n"));
    s.push_str("\tPt\tT\tVf\tIm\tVu\tSig\tAch\tIERange\tOver\r\n");
    s.push_str("\t#\ts\tV vs. Ref.\tA\tV\tV\tV\t#\tbits\r\n");
    for i in 0..rows {
        let v = triangle(i);
        s.push_str(&format!(
            "\t{i}\t{:.3}\t{:.4}\t{:.6E}\t0\t0\t0\t5\t...........\r\n",
            i as f64 * 0.01,
            v,
            v * 1e-3
        ));
    }
    s.into_bytes()
}

fn gamry_curve(name: &str, rows: &[(f64, f64, f64)]) -> String {
    let mut s = format!("{name}\tTABLE\t{}\r\n\tPt\tT\tVf\tIm\r\n\t#\ts\tV vs. Ref.\tA\r\n", rows.len());
    for (i, (t, v, im)) in rows.iter().enumerate() {
        s.push_str(&format!("\t{i}\t{t}\t{v}\t{im:E}\r\n"));
    }
    s
}

/// A Gamry `CV-CHRONOA` chain: a short sweep followed by a potential hold.
pub fn gamry_cv_ca() -> Vec<u8> {
    let mut s = String::from("EXPLAIN\r\nMETHOD\tLABEL\tCV-CHRONOA\tMethod\r\n");
    s.push_str("DATE\tLABEL\t3/14/2023\tDate\r\nTIME\tLABEL\t09:00:00\tTime\r\n");
    s.push_str(&gamry_curve(
        "CURVE1",
        &[(0.0, 0.0, 0.0), (0.1, 0.2, 2e-4), (0.2, 0.4, 4e-4), (0.3, 0.2, 2e-4), (0.4, 0.0, 0.0)],
    ));
    s.push_str(&gamry_curve("CURVE2", &[(0.0, 0.3, 1e-4), (1.0, 0.3, 9e-5), (2.0, 0.3, 8e-5)]));
    s.into_bytes()
}

fn mpr_module(short: &str, version: u32, data: &[u8]) -> Vec<u8> {
    let mut out = b"MODULE".to_vec();
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

pub const PEIS_FREQUENCIES: [f32; 4] = [1e5, 1e4, 1e3, 1e2];

/// PEIS settings: 100 kHz down to 100 Hz, one point per decade, 10 mV amplitude.
fn mpr_peis_settings() -> Vec<u8> {
    let mut set = vec![0u8; 0x0572];
    set[0] = 0x1D;
    set.extend(1u16.to_le_bytes());
    set.extend(18u16.to_le_bytes());
    set.push(0); // Mode
    set.extend(0.25f32.to_le_bytes()); // E (V)
    set.push(0); // vs. Ref
    for v in [0.0f32, 0.0, 0.0, 0.1] {
        set.extend(v.to_le_bytes()); // tE, record, dI, dt
    }
    set.extend(100.0f32.to_le_bytes());
    set.push(1); // kHz
    set.extend(100.0f32.to_le_bytes());
    set.push(2); // Hz
    set.extend(1u32.to_le_bytes()); // Nd
    set.extend([0u8, 0]); // Points, spacing
    set.extend(10.0f32.to_le_bytes()); // Va (mV)
    set.extend(0.1f32.to_le_bytes()); // pw
    set.extend(1u32.to_le_bytes()); // Na
    set.push(0); // corr
    set
}

/// An EC-Lab PEIS file with three spectra at 0.25, 0.50 and 0.75 V.
pub fn mpr_peis() -> Vec<u8> {
    let mut bytes = b"BIO-LOGIC MODULAR FILE\x1a".to_vec();
    bytes.resize(52, b' ');
    bytes.extend(mpr_module("VMP Set", 0, &mpr_peis_settings()));

    let points = 3 * PEIS_FREQUENCIES.len();
    let mut data = (points as u32).to_le_bytes().to_vec();
    // flags, freq/Hz, Re(Z)/Ohm, -Im(Z)/Ohm, <Ewe>/V, cycle number
    let ids = [1u16, 32, 37, 38, 77, 24];
    data.push(ids.len() as u8);
    for id in ids {
        data.extend(id.to_le_bytes());
    }
    data.resize(0x195, 0);
    for segment in 0..3 {
        for (k, f) in PEIS_FREQUENCIES.iter().enumerate() {
            data.push(0x01);
            data.extend(f.to_le_bytes());
            let re = 1489.251f32 + 100.0 * k as f32 + segment as f32;
            data.extend(re.to_le_bytes());
            data.extend((50.0f32 * (k + 1) as f32).to_le_bytes());
            data.extend((0.25f32 * (segment + 1) as f32).to_le_bytes());
            data.extend(((segment + 1) as f64).to_le_bytes());
        }
    }
    bytes.extend(mpr_module("VMP data", 2, &data));

    let mut log = vec![0u8; 600];
    log[469..477].copy_from_slice(&45_000.5f64.to_le_bytes());
    bytes.extend(mpr_module("VMP LOG", 2, &log));
    bytes
}

fn tdms_string(out: &mut Vec<u8>, s: &str) {
    out.extend((s.len() as u32).to_le_bytes());
    out.extend(s.as_bytes());
}

/// A LabVIEW TDMS file with a named root and one `Data/Time` channel.
pub fn tdms(name: &str, time: &[f64]) -> Vec<u8> {
    let mut meta = Vec::new();
    meta.extend(3u32.to_le_bytes());
    tdms_string(&mut meta, "/");
    meta.extend(0xFFFF_FFFFu32.to_le_bytes());
    meta.extend(1u32.to_le_bytes());
    tdms_string(&mut meta, "name");
    meta.extend(0x20u32.to_le_bytes());
    tdms_string(&mut meta, name);
    tdms_string(&mut meta, "/'Data'");
    meta.extend(0xFFFF_FFFFu32.to_le_bytes());
    meta.extend(0u32.to_le_bytes());
    tdms_string(&mut meta, "/'Data'/'Time'");
    meta.extend(20u32.to_le_bytes());
    meta.extend(0x0Au32.to_le_bytes());
    meta.extend(1u32.to_le_bytes());
    meta.extend((time.len() as u64).to_le_bytes());
    meta.extend(1u32.to_le_bytes());
    tdms_string(&mut meta, "unit_string");
    meta.extend(0x20u32.to_le_bytes());
    tdms_string(&mut meta, "s");
    let raw: Vec<u8> = time.iter().flat_map(|v| v.to_le_bytes()).collect();

    let toc: u32 = (1 << 1) | (1 << 2) | (1 << 3);
    let mut out = b"TDSm".to_vec();
    out.extend(toc.to_le_bytes());
    out.extend(4713u32.to_le_bytes());
    out.extend(((meta.len() + raw.len()) as u64).to_le_bytes());
    out.extend((meta.len() as u64).to_le_bytes());
    out.extend(meta);
    out.extend(raw);
    out
}

/// A four-sheet NECC workbook with four quantified gases.
pub fn necc_workbook() -> Workbook {
    let details = Sheet::new("Experimental details")
        .with_text_row(&["Cell type", "Flow cell"])
        .with_text_row(&["Membrane name", "Sustainion X37-50"])
        .with_text_row(&["Feed gas 1", "CO2", "20"]);
    let raw = Sheet::new("Raw Data")
        .with_text_row(&[
            "Date Time", "<I>/mA", "Ewe/V", "", "Date Time", "Temperature Cathode", "", "Experiment name", "Date",
            "Time", "Gas type", "RT", "area", "ppm value", "Gas type", "RT", "area", "ppm value",
        ])
        .with_text_row(&[
            "2023-03-14 10:00:00", "-100", "-3.1", "", "2023-03-14 10:00:30", "24", "", "inj1", "14.03.2023",
            "10:01:00", "CO", "1.2", "500", "1000", "H2", "0.5", "800", "2000",
        ])
        .with_text_row(&[
            "2023-03-14 10:03:00", "-101", "-3.1", "", "2023-03-14 10:04:10", "26", "", "inj2", "14.03.2023",
            "10:07:30", "CO", "1.2", "510", "1100", "H2", "0.5", "810", "2100",
        ])
        .with_text_row(&["2023-03-14 10:06:00", "-102", "-3.2", "", "2023-03-14 10:08:20", "30"]);
    let results = Sheet::new("Results")
        .with_text_row(&[
            "Time", "Cell voltage (V)", "CO I (mA)", "CO FE (%)", "H2 I (mA)", "H2 FE (%)", "CH4 I (mA)",
            "CH4 FE (%)", "C2H4 I (mA)", "C2H4 FE (%)", "Total FE (%)",
        ])
        .with_text_row(&[
            "2023-03-14 10:01:00", "-3.1", "-50", "50", "-30", "30", "-5", "5", "-10", "10", "95",
        ])
        .with_text_row(&[
            "2023-03-14 10:07:30", "-3.2", "-48", "48", "-32", "32", "-6", "6", "-9", "9", "95",
        ]);
    Workbook::default()
        .with_sheet(details)
        .with_sheet(raw)
        .with_sheet(results)
        .with_sheet(Sheet::new("Plots"))
}

/// A TFC sputtering run sheet.
pub fn sputtering_workbook() -> Workbook {
    let sheet = Sheet::new("Run")
        .with_text_row(&["Holder", "6\" Wafer"])
        .with_text_row(&["Substrate", "Si/SiO2"])
        .with_text_row(&[""])
        .with_text_row(&["Targets"])
        .with_text_row(&["Target", "Material", "Power [W]", "Power supply"])
        .with_text_row(&["1) Al", "Al", "150", "DC1"])
        .with_text_row(&["2) Ni", "Ni", "80", "RF1"])
        .with_text_row(&[""])
        .with_text_row(&["Process"])
        .with_text_row(&["Step", "Sputter pressure [mbar]", "Gas flow [sccm]", "Gas", "Duration [s]"])
        .with_text_row(&["Deposition", "0.0167", "20", "Ar", "3600"])
        .with_text_row(&[""])
        .with_text_row(&["Observables"])
        .with_text_row(&["Temperature [°C]", "Base pressure [mbar]"])
        .with_text_row(&["25", "1e-7"]);
    Workbook::default().with_sheet(sheet)
}
