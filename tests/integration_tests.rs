use lur_buffers::geometry::{GeometryService, GridRaster, PlanarEngine};
use lur_buffers::models::{AttrValue, PartitionKey, ZoneId};
use lur_buffers::processors::PipelineController;
use lur_buffers::utils::filename::ResultsLayout;
use lur_buffers::writers::ParquetWriter;
use lur_buffers::PipelineConfig;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// 70 monitors near zone 1 and 50 near zone 2, on a 100 m grid.
fn write_inputs(input: &Path) {
    fs::create_dir_all(input).unwrap();

    let mut monitors = String::from("id,x,y\n");
    for i in 0..70 {
        let x = 500.0 + (i % 10) as f64 * 100.0;
        let y = 500.0 + (i / 10) as f64 * 100.0;
        monitors.push_str(&format!("{},{},{}\n", 1000 + i, x, y));
    }
    for i in 0..50 {
        let x = 8500.0 + (i % 10) as f64 * 100.0;
        let y = 500.0 + (i / 10) as f64 * 100.0;
        monitors.push_str(&format!("{},{},{}\n", 2000 + i, x, y));
    }
    fs::write(input.join("monitors.csv"), monitors).unwrap();
    fs::write(input.join("zoneDef.csv"), "zone,x,y\n1,0,0\n2,10000,0\n").unwrap();

    GridRaster::from_fn(0.0, 2000.0, 20.0, 100, 500, |x, y| (x + y) / 100.0)
        .write(&input.join("N6.grid"))
        .unwrap();
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("lur.toml");
    let content = format!(
        r#"
input_folder = '{}'
results_folder = '{}'
buffer_distances = [100, 500]
partition_size = 50
max_attempts = 3
heartbeat_poll_secs = 1

[[variables]]
kind = "raster"
path = "N6.grid"
"#,
        dir.join("input").display(),
        dir.join("results").display()
    );
    fs::write(&path, content).unwrap();
    path
}

fn controller(config: PipelineConfig) -> PipelineController {
    PipelineController::new(config, Arc::new(PlanarEngine::new()))
}

#[tokio::test]
async fn test_end_to_end_static_raster() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    write_inputs(&dir.path().join("input"));
    let config = PipelineConfig::load(Some(&write_config(dir.path()))).unwrap();

    let summary = controller(config).run(None).await.unwrap();
    assert_eq!(summary.partitions, 3);
    assert_eq!(summary.monitors, 120);
    assert_eq!(summary.final_rows, 120);
    assert_eq!(summary.batch_retries, 0);

    let layout = ResultsLayout::new(dir.path().join("results"), "json");
    let engine = PlanarEngine::new();
    let expected = [
        (PartitionKey::new(ZoneId(1), 0), 50),
        (PartitionKey::new(ZoneId(1), 1), 20),
        (PartitionKey::new(ZoneId(2), 0), 50),
    ];
    for (key, len) in expected {
        assert_eq!(engine.count(&layout.partition_table(&key)).unwrap(), len);

        let shared: Vec<String> = fs::read_dir(layout.buffer_dir(&key))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| {
                name.strip_prefix("buffer")
                    .and_then(|rest| rest.strip_suffix("m.json"))
                    .is_some_and(|radius| radius.parse::<u32>().is_ok())
            })
            .collect();
        assert_eq!(shared.len(), 2, "{} has buffers {:?}", key, shared);
    }

    let final_table = engine.read_table(&summary.final_table).unwrap();
    assert_eq!(final_table.len(), 120);
    for field in ["N6100m", "N6500m"] {
        assert!(final_table.has_field(field));
        assert!(final_table
            .values(field)
            .all(|v| matches!(v, AttrValue::Float(f) if *f > 0.0)));
    }

    // Monitor at (500, 500) sits where the raster reads 10
    let first = &final_table.features[0];
    assert_eq!(first.get("MONITOR_ID"), Some(&AttrValue::Int(1000)));
    let n6 = first.get("N6100m").and_then(AttrValue::as_f64).unwrap();
    assert!((n6 - 10.0).abs() < 0.1, "unexpected mean {}", n6);

    let parquet = summary.parquet_file.expect("parquet export enabled by default");
    let info = ParquetWriter::new().get_file_info(&parquet).unwrap();
    assert_eq!(info.total_rows, 120);
    assert!(info.columns.iter().any(|c| c == "N6500m"));
}

#[tokio::test]
async fn test_rerun_computes_nothing() {
    let dir = TempDir::new().unwrap();
    write_inputs(&dir.path().join("input"));
    let config_path = write_config(dir.path());

    let first = controller(PipelineConfig::load(Some(&config_path)).unwrap())
        .run(None)
        .await
        .unwrap();
    let engine = PlanarEngine::new();
    let checksum = |table: &lur_buffers::models::FeatureTable| -> f64 {
        table
            .values("N6500m")
            .filter_map(AttrValue::as_f64)
            .sum()
    };
    let before = checksum(&engine.read_table(&first.final_table).unwrap());

    let second = controller(PipelineConfig::load(Some(&config_path)).unwrap())
        .run(None)
        .await
        .unwrap();
    let after = checksum(&engine.read_table(&second.final_table).unwrap());

    assert_eq!(first.jobs_recomputed, 6);
    assert_eq!(second.jobs_recomputed, 0);
    assert_eq!(before, after);
}

#[test]
fn test_plan_without_dispatch() {
    let dir = TempDir::new().unwrap();
    write_inputs(&dir.path().join("input"));
    let config = PipelineConfig::load(Some(&write_config(dir.path()))).unwrap();

    let controller = controller(config);
    let plans = controller.plan().unwrap();
    assert_eq!(plans.len(), 3);
    assert!(plans.iter().all(|p| p.variables.len() == 1));
    assert!(!controller.layout().final_table().exists());
}
