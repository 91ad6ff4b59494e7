use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

use case_reconciler::app::{ReconcileUseCase, RunMode};
use case_reconciler::config::Config;
use case_reconciler::error::FatalKind;
use case_reconciler::infra::{CsvSheetSource, FileTimeSeriesSource, FsSnapshotOutput};
use case_reconciler::pipeline::processing::GeocodeTable;

const HEADER: &str = "row,ID,age,sex,city,province,country,latitude,longitude,geo_resolution,date_onset_symptoms,date_confirmation,symptoms,source,outcome,aggregated_num_cases";

const OUTSIDE_HUBEI: &str = "\
2,,34,Male,Milan,Lombardia,Italy,,,,,01.03.2020,fever,news,,2
3,,71,f,Milan,Lombardia,Italy,,,,,01.03.2020,,news,,
4,,40,M,Madrid,Madrid,Spain,40.4,-3.7,admin1,,02.03.2020,,who,,
5,,55,F,Lyon,Auvergne,France,45.760,4.840,admin2,,2/3/2020,,news,,
6,,twelve,M,Paris,Ile-de-France,France,48.85,2.35,admin2,,02.03.2020,,news,,
7,,60,M,Dubai,,United Arab Emirates,25.2,55.27,admin2,,03.03.2020,,news,,
";

const HUBEI: &str = "\
2,,50,male,Wuhan,Hubei,China,,,,,20.01.2020,,health commission,,
3,,45,Female,Wuhan,Hubei,China,,,,,21.01.2020,,health commission,,3
";

const SERIES: &str = "\
UID,Admin2,Province_State,Lat,Long_,3/1/20,3/2/20,3/3/20,3/4/20
1,Kings,New York,40.63,-73.95,2,5,5,9
2,Cook,Illinois,41.84,-87.82,5,3,,4
3,Unassigned,Illinois,0.0,0.0,7,7,7,7
";

const GEOCODES: &str = "\
city\tprovince\tcountry\tlatitude\tlongitude\tgeo_resolution\tlocation\tadmin3\tadmin2\tadmin1\tcountry_new\tadmin_id
Milan\tLombardia\tItaly\t45.4642\t9.19\tadmin2\t\t\tMilano\tLombardia\tItaly\t1001
Wuhan\tHubei\tChina\t30.5928\t114.3055\tadmin2\t\t\tWuhan\tHubei\tChina\t420100
";

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let root = dir.path().to_path_buf();
        fs::write(root.join("outside.csv"), format!("{}\n{}", HEADER, OUTSIDE_HUBEI))?;
        fs::write(root.join("hubei.csv"), format!("{}\n{}", HEADER, HUBEI))?;
        fs::write(root.join("series.csv"), SERIES)?;
        fs::write(root.join("geocodes.tsv"), GEOCODES)?;
        Ok(Self { _dir: dir, root })
    }

    fn config(&self) -> Result<Config> {
        let root = self.root.display();
        let config = Config::from_toml_str(&format!(
            r#"
[files]
output_dir = "{root}/out"
geocode_tsv = "{root}/geocodes.tsv"
publish_dir = "{root}/html"

[[sheets]]
name = "outside_Hubei"
tag = "000-1"
path = "{root}/outside.csv"
exclude_countries = ["United Arab Emirates"]

[[sheets]]
name = "Hubei"
tag = "000-2"
path = "{root}/hubei.csv"

[time_series]
tag = "JHU"
path = "{root}/series.csv"

[aggregation]
precision = 2
"#
        ))?;
        config.validate()?;
        Ok(config)
    }

    fn use_case(&self, config: Config) -> Result<ReconcileUseCase> {
        let geocodes = Arc::new(GeocodeTable::load(&config.files.geocode_tsv)?);
        let ts = config.time_series.clone().unwrap();
        let output = FsSnapshotOutput::new(
            config.files.output_dir.clone(),
            config.files.publish_dir.clone(),
        );
        Ok(ReconcileUseCase::new(
            config,
            Box::new(CsvSheetSource),
            Some(Box::new(FileTimeSeriesSource::new(ts.tag, ts.path.unwrap()))),
            geocodes,
            Box::new(output),
        ))
    }

    fn out(&self) -> std::path::PathBuf {
        self.root.join("out")
    }
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

#[tokio::test]
async fn full_run_writes_every_output() -> Result<()> {
    let fixture = Fixture::new()?;
    let manifest = fixture.use_case(fixture.config()?)?.run(RunMode::Full).await?;
    let summary = &manifest.summary;

    // outside_Hubei: 1 excluded, rows expand to 6 (2 + 1 + 1 + 1 + 1), Paris age rejected
    let outside = &summary.sheets[0];
    assert_eq!(outside.excluded_rows, 1);
    assert_eq!(outside.expanded_rows, 6);
    assert_eq!(outside.rejected_rows, 1);
    assert_eq!(outside.clean_rows, 5);
    assert_eq!(summary.sheets[1].clean_rows, 4);

    // Kings 2,3,0,4 and Cook 5,0,(carried),1; Unassigned skipped
    let series = summary.time_series.as_ref().unwrap();
    assert_eq!(series.skipped_locations, 1);
    assert_eq!(series.rows_emitted, 15);
    assert_eq!(series.anomalies.len(), 1);
    assert_eq!(manifest.anomalies, 1);

    assert_eq!(summary.identity.total, 5 + 4 + 15);

    let out = fixture.out();
    for file in [
        "latestdata.csv",
        "totals.json",
        "totals.geojson",
        "animation.json",
        "animation.geojson",
        "manifest.json",
        "errors/outside_Hubei.error-report.csv",
        "errors/Hubei.error-report.csv",
    ] {
        assert!(out.join(file).exists(), "missing {}", file);
    }
    assert!(fixture.root.join("html/totals.geojson").exists());
    assert!(fixture.root.join("html/animation.json").exists());

    let staging_left = fs::read_dir(&out)?
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with(".staging-"));
    assert!(!staging_left);

    // every id distinct across the three sources
    let mut reader = csv::Reader::from_path(out.join("latestdata.csv"))?;
    let ids: Vec<String> = reader
        .records()
        .map(|r| r.map(|rec| rec[0].to_string()))
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(ids.len(), 24);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 24);
    assert!(ids.contains(&"000-2-4".to_string()));
    assert!(ids.contains(&"JHU-15".to_string()));

    let errors = fs::read_to_string(out.join("errors/outside_Hubei.error-report.csv"))?;
    assert!(errors.lines().next().unwrap().ends_with(",reason"));
    assert!(errors.contains("age:pattern_mismatch"));

    // aggregate counts cover every placed, dated case
    let totals = read_json(&out.join("totals.json"))?;
    let sum: u64 = totals["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["count"].as_u64().unwrap())
        .sum();
    let aggregation = summary.aggregation.as_ref().unwrap();
    assert_eq!(sum as usize, 24 - aggregation.unplaceable - aggregation.undated);

    let written = read_json(&out.join("manifest.json"))?;
    assert_eq!(written["run_id"], manifest.run_id.to_string());
    assert_eq!(written["outputs"].as_array().unwrap().len(), manifest.outputs.len());
    Ok(())
}

#[tokio::test]
async fn milan_cases_take_the_geocode_table_location() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.use_case(fixture.config()?)?.run(RunMode::Full).await?;

    let mut reader = csv::Reader::from_path(fixture.out().join("latestdata.csv"))?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let (city, lat, admin_id) = (col("city"), col("latitude"), col("admin_id"));
    let mut milan = 0;
    for row in reader.records() {
        let row = row?;
        if &row[city] == "Milan" {
            milan += 1;
            assert_eq!(&row[lat], "45.4642");
            assert_eq!(&row[admin_id], "1001");
        }
    }
    assert_eq!(milan, 3);
    Ok(())
}

#[tokio::test]
async fn unmatched_rows_keep_their_coordinate_text() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.use_case(fixture.config()?)?.run(RunMode::Full).await?;

    let mut reader = csv::Reader::from_path(fixture.out().join("latestdata.csv"))?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let (city, lat, lon) = (col("city"), col("latitude"), col("longitude"));
    let lyon: Vec<_> = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|row| &row[city] == "Lyon")
        .collect();
    assert_eq!(lyon.len(), 1);
    assert_eq!(&lyon[0][lat], "45.760");
    assert_eq!(&lyon[0][lon], "4.840");
    Ok(())
}

#[tokio::test]
async fn rerun_reproduces_the_aggregates() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.use_case(fixture.config()?)?.run(RunMode::Full).await?;
    let first = fs::read(fixture.out().join("totals.json"))?;
    let first_geo = fs::read(fixture.out().join("totals.geojson"))?;

    fixture.use_case(fixture.config()?)?.run(RunMode::Full).await?;
    assert_eq!(fs::read(fixture.out().join("totals.json"))?, first);
    assert_eq!(fs::read(fixture.out().join("totals.geojson"))?, first_geo);
    Ok(())
}

#[tokio::test]
async fn missing_source_aborts_and_writes_nothing() -> Result<()> {
    let fixture = Fixture::new()?;
    fs::remove_file(fixture.root.join("series.csv"))?;

    let err = fixture
        .use_case(fixture.config()?)?
        .run(RunMode::Full)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FatalKind::Transport);

    let out = fixture.out();
    let leftovers: Vec<_> = match fs::read_dir(&out) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    assert!(leftovers.is_empty(), "unexpected outputs: {:?}", leftovers);
    assert!(!fixture.root.join("html").exists());
    Ok(())
}

#[tokio::test]
async fn clean_mode_writes_dataset_and_error_reports_only() -> Result<()> {
    let fixture = Fixture::new()?;
    let manifest = fixture
        .use_case(fixture.config()?)?
        .run(RunMode::SheetsOnly)
        .await?;
    assert!(manifest.summary.time_series.is_none());

    let out = fixture.out();
    assert!(out.join("latestdata.csv").exists());
    assert!(out.join("errors/Hubei.error-report.csv").exists());
    assert!(out.join("manifest.json").exists());
    assert!(!out.join("totals.json").exists());
    assert!(!out.join("animation.geojson").exists());
    Ok(())
}

fn entries(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    names.sort();
    Ok(names)
}

#[tokio::test]
async fn failed_promotion_into_empty_dir_leaves_it_empty() -> Result<()> {
    let fixture = Fixture::new()?;
    let out = fixture.out();
    // a directory where a map output should go cannot be replaced by a rename
    fs::create_dir_all(out.join("animation.json/blocker"))?;

    let err = fixture
        .use_case(fixture.config()?)?
        .run(RunMode::Full)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FatalKind::Io);

    assert_eq!(entries(&out)?, vec!["animation.json".to_string()]);
    assert!(out.join("animation.json/blocker").is_dir());
    assert!(!fixture.root.join("html").exists());
    Ok(())
}

#[tokio::test]
async fn failed_promotion_restores_previous_outputs() -> Result<()> {
    let fixture = Fixture::new()?;
    let first = fixture.use_case(fixture.config()?)?.run(RunMode::Full).await?;
    let out = fixture.out();
    let before: Vec<(String, Vec<u8>)> = [
        "latestdata.csv",
        "totals.json",
        "totals.geojson",
        "animation.geojson",
        "manifest.json",
        "errors/outside_Hubei.error-report.csv",
    ]
    .iter()
    .map(|name| Ok((name.to_string(), fs::read(out.join(name))?)))
    .collect::<Result<_>>()?;

    fs::remove_file(out.join("animation.json"))?;
    fs::create_dir_all(out.join("animation.json/blocker"))?;

    let err = fixture
        .use_case(fixture.config()?)?
        .run(RunMode::Full)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FatalKind::Io);

    for (name, bytes) in &before {
        assert_eq!(&fs::read(out.join(name))?, bytes, "{} changed", name);
    }
    let manifest = read_json(&out.join("manifest.json"))?;
    assert_eq!(manifest["run_id"], first.run_id.to_string());

    let names = entries(&out)?;
    assert_eq!(names.iter().filter(|n| n.starts_with("full-")).count(), 1);
    assert!(!names.iter().any(|n| n.starts_with(".staging-")));
    Ok(())
}
