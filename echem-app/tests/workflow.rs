use chrono::NaiveDate;
use echem_app::{config::IngestConfig, fs_host::FsUpload, workflow};
use echem_core::UploadContext;
use echem_schemas::{
    archive::{ArchiveFile, Record},
    measurement::MeasurementKind,
    sample::Sample,
};
use std::fs;
use std::path::Path;

fn gamry_cv() -> String {
    let mut s = String::from("EXPLAIN\r\nTAG\tCV\r\nMETHOD\tLABEL\tCV\tMethod\r\n");
    s.push_str("DATE\tLABEL\t3/14/2023\tDate\r\nTIME\tLABEL\t14:03:11\tTime\r\n");
    s.push_str("SCANRATE\tQUANT\t100\tScan Rate (mV/s)\r\n");
    s.push_str("AREA\tQUANT\t2\tSample Area (cm^2)\r\n");
    s.push_str("CURVE\tTABLE\t80\r\n\tPt\tT\tVf\tIm\r\n\t#\ts\tV vs. Ref.\tA\r\n");
    // Two sweeps 0 -> 0.5 -> -0.5 -> 0 V.
    for i in 0..80 {
        let k = (i % 40) as f64;
        let v = if k < 10.0 {
            0.05 * k
        } else if k < 30.0 {
            0.5 - 0.05 * (k - 10.0)
        } else {
            -0.5 + 0.05 * (k - 30.0)
        };
        s.push_str(&format!("\t{i}\t{:.2}\t{v:.3}\t{:E}\r\n", i as f64 * 0.1, v * 1e-3));
    }
    s
}

fn config(root: &Path) -> IngestConfig {
    IngestConfig {
        upload_dir: root.join("upload"),
        upload_id: "upload-1".to_string(),
        main_author: Some("AbCd".to_string()),
        report_path: root.join("out/report.csv"),
        plot_dir: Some(root.join("out/plots")),
        ..IngestConfig::default()
    }
}

#[test]
fn test_ingest_writes_archives_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    fs::create_dir_all(config.upload_dir.join("cv")).unwrap();
    fs::write(config.upload_dir.join("cv/run1.DTA"), gamry_cv()).unwrap();
    fs::write(config.upload_dir.join("notes.md"), "notes").unwrap();

    let summary = workflow::ingest(&config).unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.status("created"), 1);
    assert_eq!(summary.status("unmatched"), 1);

    let report = fs::read_to_string(&config.report_path).unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|l| l.starts_with("cv/run1.DTA,Gamry,CyclicVoltammetry,")));

    let upload = FsUpload::new(&config.upload_dir, &config.upload_id);
    assert!(upload.archive_path("cv/run1.DTA.archive.json").is_file());
    let Some(Record::Measurement(record)) = upload
        .read_archive("cv/run1.DTA.archive.json")
        .unwrap()
        .map(|a| a.data)
    else {
        panic!("no measurement archive");
    };
    let MeasurementKind::CyclicVoltammetry(cv) = record.details else {
        panic!("expected a cyclic voltammogram");
    };
    assert_eq!(cv.cycles.len(), 2);

    // Archives are never treated as raw input.
    assert!(upload.raw_file_names().iter().all(|n| !n.contains(".archives")));

    let again = workflow::ingest(&config).unwrap();
    assert_eq!(again.status("kept"), 1);
    assert_eq!(again.normalized, 0);
}

#[test]
fn test_mint_id_skips_taken_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let upload = config.open_upload().unwrap();
    let date = NaiveDate::from_ymd_opt(2023, 3, 14).unwrap();

    let first = workflow::mint_id(&config, "AbCd", date, Some("CE-NOME")).unwrap();
    assert_eq!(first, "CE-NOME_AbCd_230314_0000");

    let mut archive = ArchiveFile::new(
        "sample.archive.json",
        Record::Sample(Sample {
            lab_id: Some(first.clone()),
            ..Sample::default()
        }),
    );
    echem_core::normalize::index(&mut archive, upload.upload_id());
    upload.write_archive("sample.archive.json", &archive, false).unwrap();

    let second = workflow::mint_id(&config, "AbCd", date, Some("CE-NOME")).unwrap();
    assert_eq!(second, "CE-NOME_AbCd_230314_0001");
}

#[test]
fn test_index_dirs_resolve_foreign_ids() {
    let dir = tempfile::tempdir().unwrap();
    let other_root = dir.path().join("older-upload");
    let other = FsUpload::new(&other_root, "older-upload");
    let mut archive = ArchiveFile::new(
        "s.archive.json",
        Record::Sample(Sample {
            lab_id: Some("HZB_AbCd_230314_0004".to_string()),
            ..Sample::default()
        }),
    );
    echem_core::normalize::index(&mut archive, "older-upload");
    other.write_archive("s.archive.json", &archive, false).unwrap();

    let config = IngestConfig {
        index_dirs: vec![other_root],
        ..config(dir.path())
    };
    let date = NaiveDate::from_ymd_opt(2023, 3, 14).unwrap();
    assert_eq!(
        workflow::mint_id(&config, "AbCd", date, Some("HZB")).unwrap(),
        "HZB_AbCd_230314_0005"
    );
}
