use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use dxf2gis_core::features::GeometryKind;
use dxf2gis_engine::errors::{Diagnostic, EngineError, ErrorKind};
use dxf2gis_engine::{
    BlockMode, CancellationToken, ConversionEvent, ConversionReport, ConversionRequest, Converter,
    EventSink, LayerSummary, OutputDriver,
};
use rusqlite::Connection;
use rusqlite::types::Value;

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn request(drawing: &str, output: &Path) -> ConversionRequest {
    ConversionRequest::new(fixture(drawing), output)
}

fn written_summary(report: &ConversionReport) -> Vec<(&str, GeometryKind, usize)> {
    report
        .written
        .iter()
        .map(|layer| (layer.name.as_str(), layer.kind, layer.feature_count))
        .collect()
}

/// `.shp` 文件头中的包络 `[xmin, ymin, xmax, ymax]`。
fn shp_bbox(path: &Path) -> [f64; 4] {
    let bytes = fs::read(path).expect("读取 .shp 失败");
    [
        LittleEndian::read_f64(&bytes[36..44]),
        LittleEndian::read_f64(&bytes[44..52]),
        LittleEndian::read_f64(&bytes[52..60]),
        LittleEndian::read_f64(&bytes[60..68]),
    ]
}

fn directory_bytes(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .expect("读取输出目录失败")
        .map(|entry| {
            let path = entry.expect("目录项").path();
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .expect("文件名")
                .to_string();
            (name, fs::read(&path).expect("读取输出文件失败"))
        })
        .collect()
}

fn gpkg_feature_tables(path: &Path) -> BTreeMap<String, Vec<Vec<Value>>> {
    let conn = Connection::open(path).expect("打开 GeoPackage 失败");
    let mut tables = conn
        .prepare("SELECT table_name FROM gpkg_contents ORDER BY table_name")
        .expect("查询 gpkg_contents 失败");
    let names: Vec<String> = tables
        .query_map([], |row| row.get(0))
        .expect("查询 gpkg_contents 失败")
        .collect::<Result<_, _>>()
        .expect("读取表名失败");
    names
        .into_iter()
        .map(|name| {
            let mut statement = conn
                .prepare(&format!("SELECT * FROM \"{name}\" ORDER BY 1"))
                .expect("查询要素表失败");
            let columns = statement.column_count();
            let rows: Vec<Vec<Value>> = statement
                .query_map([], |row| (0..columns).map(|i| row.get::<_, Value>(i)).collect())
                .expect("查询要素表失败")
                .collect::<Result<_, _>>()
                .expect("读取要素失败");
            (name, rows)
        })
        .collect()
}

#[test]
fn scan_reports_layers_in_drawing_order() {
    let layers = Converter::default()
        .scan(&fixture("road_parcel.dxf"), BlockMode::KeepMerge)
        .expect("扫描失败");
    assert_eq!(
        layers,
        vec![
            LayerSummary {
                name: "ROAD".to_string(),
                entity_count: 3,
            },
            LayerSummary {
                name: "PARCEL".to_string(),
                entity_count: 2,
            },
        ]
    );
}

#[test]
fn road_and_parcel_explode_keeps_source_coordinates() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let mut request = request("road_parcel.dxf", dir.path());
    request.block_mode = BlockMode::Explode;
    let report = Converter::default().convert(&request).expect("转换失败");

    assert_eq!(
        written_summary(&report),
        vec![
            ("ROAD", GeometryKind::LineString, 3),
            ("PARCEL", GeometryKind::Polygon, 2),
        ]
    );
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert!(!report.is_partial());

    let expected = [
        ("ROAD.shp", [0.0, 0.0, 160.0, 80.0]),
        ("PARCEL.shp", [10.0, 10.0, 80.0, 40.0]),
    ];
    for (file, bbox) in expected {
        let actual = shp_bbox(&dir.path().join(file));
        for (a, e) in actual.iter().zip(bbox) {
            assert!((a - e).abs() < 1e-9, "{file}: {actual:?} != {bbox:?}");
        }
    }
    let prj = fs::read_to_string(dir.path().join("ROAD.prj")).expect("读取 .prj 失败");
    assert!(prj.contains("TWD97"), "{prj}");
}

#[test]
fn keep_merge_pole_becomes_single_point_at_insertion() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let report = Converter::default()
        .convert(&request("pole.dxf", dir.path()))
        .expect("转换失败");
    assert_eq!(written_summary(&report), vec![("POLE", GeometryKind::Point, 1)]);

    let shp = fs::read(dir.path().join("POLE.shp")).expect("读取 .shp 失败");
    // 100 字节文件头 + 8 字节记录头 + 4 字节形状类型
    assert_eq!(LittleEndian::read_i32(&shp[108..112]), 1);
    assert!((LittleEndian::read_f64(&shp[112..120]) - 100.0).abs() < 1e-9);
    assert!((LittleEndian::read_f64(&shp[120..128]) - 200.0).abs() < 1e-9);
}

#[test]
fn empty_selected_layer_is_reported_and_others_written() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let mut request = request("road_parcel.dxf", dir.path());
    request.selected_layers = vec!["ROAD".into(), "EMPTY".into(), "PARCEL".into()];
    let report = Converter::default().convert(&request).expect("转换失败");

    let names: Vec<&str> = report.written.iter().map(|layer| layer.name.as_str()).collect();
    assert_eq!(names, vec!["ROAD", "PARCEL"]);
    assert_eq!(
        report.diagnostics,
        vec![Diagnostic::EmptyLayer {
            layer: "EMPTY".to_string()
        }]
    );
    assert!(report.is_partial());
    assert!(!dir.path().join("EMPTY.shp").exists());
}

#[test]
fn cyclic_blocks_abort_before_any_output() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let output = dir.path().join("out");
    let (sink, receiver) = EventSink::bounded(64);
    let err = Converter::default()
        .with_events(sink)
        .convert(&request("cyclic_blocks.dxf", &output))
        .unwrap_err();

    let EngineError::CyclicBlockReference { path, .. } = &err else {
        panic!("应为循环引用错误: {err:?}");
    };
    assert_eq!(path.first(), path.last());
    assert!(!output.exists(), "致命错误时不应创建输出");
    let last = receiver.try_iter().last().expect("应有终止事件");
    assert!(matches!(
        last,
        ConversionEvent::Failed {
            error_kind: ErrorKind::CyclicBlockReference,
            ..
        }
    ));
}

#[test]
fn explode_and_keep_merge_agree_without_inserts() {
    let explode_dir = tempfile::tempdir().expect("创建临时目录失败");
    let merge_dir = tempfile::tempdir().expect("创建临时目录失败");
    let converter = Converter::default();

    let mut explode = request("road_parcel.dxf", explode_dir.path());
    explode.block_mode = BlockMode::Explode;
    let mut merge = request("road_parcel.dxf", merge_dir.path());
    merge.block_mode = BlockMode::KeepMerge;

    converter.convert(&explode).expect("explode 转换失败");
    converter.convert(&merge).expect("keep-merge 转换失败");
    assert_eq!(
        directory_bytes(explode_dir.path()),
        directory_bytes(merge_dir.path())
    );
}

#[test]
fn repeated_shapefile_runs_are_byte_identical() {
    let first = tempfile::tempdir().expect("创建临时目录失败");
    let second = tempfile::tempdir().expect("创建临时目录失败");
    let converter = Converter::default();
    converter
        .convert(&request("mixed_kinds.dxf", first.path()))
        .expect("第一次转换失败");
    converter
        .convert(&request("mixed_kinds.dxf", second.path()))
        .expect("第二次转换失败");
    let files = directory_bytes(first.path());
    assert!(!files.is_empty());
    assert_eq!(files, directory_bytes(second.path()));
}

#[test]
fn repeated_geopackage_runs_produce_identical_tables() {
    let first = tempfile::tempdir().expect("创建临时目录失败");
    let second = tempfile::tempdir().expect("创建临时目录失败");
    let converter = Converter::default();
    for dir in [first.path(), second.path()] {
        let mut request = request("road_parcel.dxf", dir);
        request.driver = OutputDriver::GeoPackage;
        let report = converter.convert(&request).expect("转换失败");
        assert_eq!(report.written.len(), 2);
    }
    let tables = gpkg_feature_tables(&first.path().join("bundle.gpkg"));
    assert_eq!(
        tables.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["PARCEL", "ROAD"]
    );
    assert_eq!(tables["ROAD"].len(), 3);
    assert_eq!(tables, gpkg_feature_tables(&second.path().join("bundle.gpkg")));
}

#[test]
fn mixed_kinds_are_split_per_family() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let report = Converter::default()
        .convert(&request("mixed_kinds.dxf", dir.path()))
        .expect("转换失败");
    assert_eq!(
        written_summary(&report),
        vec![
            ("MIX_point", GeometryKind::Point, 1),
            ("MIX_line", GeometryKind::LineString, 2),
            ("MIX_polygon", GeometryKind::Polygon, 1),
        ]
    );
    assert!(report.written.iter().all(|layer| layer.source_layer == "MIX"));
    assert!(report.diagnostics.iter().any(|diagnostic| matches!(
        diagnostic,
        Diagnostic::UnsupportedEntity { layer, entity_type, .. }
            if layer == "NOTES" && entity_type == "TEXT"
    )));
    assert!(report.diagnostics.contains(&Diagnostic::EmptyLayer {
        layer: "NOTES".to_string()
    }));
}

#[test]
fn bbox_filter_and_reprojection_to_wgs84() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let mut request = request("twd97_sites.dxf", dir.path());
    request.target_epsg = Some(4326);
    request.bbox_wgs84 = Some([121.3, 24.8, 121.8, 25.3]);
    let report = Converter::default().convert(&request).expect("转换失败");

    assert_eq!(report.skipped_by_bbox, 1);
    assert_eq!(
        written_summary(&report),
        vec![
            ("SITE_point", GeometryKind::Point, 1),
            ("SITE_polygon", GeometryKind::Polygon, 1),
        ]
    );
    let [min_lon, min_lat, max_lon, max_lat] = shp_bbox(&dir.path().join("SITE_polygon.shp"));
    assert!(min_lon > 121.3 && max_lon < 121.8, "{min_lon} {max_lon}");
    assert!(min_lat > 24.8 && max_lat < 25.3, "{min_lat} {max_lat}");
    let prj = fs::read_to_string(dir.path().join("SITE_point.prj")).expect("读取 .prj 失败");
    assert!(prj.contains("WGS 84"), "{prj}");
}

#[test]
fn unknown_target_crs_is_fatal() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let mut request = request("road_parcel.dxf", dir.path());
    request.target_epsg = Some(9);
    let err = Converter::default().convert(&request).unwrap_err();
    assert!(matches!(err, EngineError::UnknownCrs(9)));
}

#[test]
fn missing_drawing_is_a_read_error() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let err = Converter::default()
        .convert(&request("does_not_exist.dxf", dir.path()))
        .unwrap_err();
    assert!(matches!(err, EngineError::DrawingRead { .. }));
    assert_eq!(err.kind(), ErrorKind::DrawingRead);
}

#[test]
fn cancelled_run_writes_nothing() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let output = dir.path().join("out");
    let token = CancellationToken::new();
    let (sink, receiver) = EventSink::bounded(64);
    let converter = Converter::default()
        .with_events(sink)
        .with_cancellation(token.clone());
    token.cancel();
    let err = converter
        .convert(&request("road_parcel.dxf", &output))
        .unwrap_err();
    let EngineError::Cancelled { written } = err else {
        panic!("应为取消错误");
    };
    assert!(written.is_empty());
    assert!(!output.exists());
    assert!(matches!(
        receiver.try_iter().last(),
        Some(ConversionEvent::Failed {
            error_kind: ErrorKind::Cancelled,
            ..
        })
    ));
}

#[test]
fn progress_events_are_monotonic_and_end_with_completed() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let (sink, receiver) = EventSink::bounded(1024);
    let report = Converter::default()
        .with_events(sink)
        .convert(&request("mixed_kinds.dxf", dir.path()))
        .expect("转换失败");

    let events: Vec<ConversionEvent> = receiver.try_iter().collect();
    let mut last = 0;
    for event in &events[..events.len() - 1] {
        let ConversionEvent::Progress {
            entities_processed,
            entities_total,
            ..
        } = event
        else {
            panic!("终止事件之前只应有进度事件: {event:?}");
        };
        assert!(*entities_processed >= last);
        assert!(entities_processed <= entities_total);
        last = *entities_processed;
    }
    assert_eq!(last, 5);
    let Some(ConversionEvent::Completed {
        written_layers,
        diagnostics,
    }) = events.last()
    else {
        panic!("最后一个事件应为 Completed");
    };
    assert_eq!(written_layers, &report.written);
    assert_eq!(diagnostics, &report.diagnostics);
}
