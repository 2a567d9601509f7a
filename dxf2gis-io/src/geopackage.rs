//! OGC GeoPackage 写出：单个 SQLite 文件，每个图层一张要素表。

use std::fs;
use std::path::{Path, PathBuf};

use dxf2gis_core::features::{AttributeValue, FieldType, LayerOutput, SpatialReference};
use rusqlite::{Connection, params, params_from_iter, types::Value};
use tracing::{debug, warn};

use crate::wkb::gpkg_geometry_blob;
use crate::{DatasetWriter, IoError, WrittenLayer};

/// 目录输出时使用的默认文件名。
pub const BUNDLE_FILE_NAME: &str = "bundle.gpkg";

const APPLICATION_ID: i32 = 0x4750_4B47; // "GPKG"
const USER_VERSION: i32 = 10300;
const GEOMETRY_COLUMN: &str = "geom";

const WGS84_WKT: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AXIS[\"Latitude\",NORTH],AXIS[\"Longitude\",EAST],AUTHORITY[\"EPSG\",\"4326\"]]";

const METADATA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER,
    CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
    CONSTRAINT uk_gc_table_name UNIQUE (table_name),
    CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
"#;

pub struct GeoPackageWriter {
    path: PathBuf,
    /// 目标文件原已存在且未启用覆盖时为 `None`：文件保持原样，每个图层都以 `AlreadyExists` 失败。
    conn: Option<Connection>,
}

impl GeoPackageWriter {
    /// 创建 GeoPackage。`location` 是目录（或没有扩展名）时写入其中的 `bundle.gpkg`。
    ///
    /// 失败表示整个输出位置不可用。
    pub fn create(location: &Path, overwrite: bool) -> Result<Self, IoError> {
        let path = resolve_location(location);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IoError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if path.exists() {
            if !overwrite {
                warn!(path = %path.display(), "GeoPackage 已存在且未启用覆盖，不写入");
                return Ok(Self { path, conn: None });
            }
            fs::remove_file(&path).map_err(|source| IoError::WriteError {
                path: path.clone(),
                source,
            })?;
        }

        let sqlite = |source| IoError::Sqlite {
            path: path.clone(),
            source,
        };
        let conn = Connection::open(&path).map_err(sqlite)?;
        initialize(&conn).map_err(sqlite)?;
        debug!(path = %path.display(), "GeoPackage 已创建");
        Ok(Self {
            path,
            conn: Some(conn),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "application_id", APPLICATION_ID)?;
    conn.pragma_update(None, "user_version", USER_VERSION)?;
    conn.execute_batch(METADATA_SQL)?;
    let mut insert = conn.prepare(
        "INSERT OR IGNORE INTO gpkg_spatial_ref_sys \
         (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    insert.execute(params![
        "Undefined cartesian SRS",
        -1,
        "NONE",
        -1,
        "undefined",
        "undefined cartesian coordinate reference system"
    ])?;
    insert.execute(params![
        "Undefined geographic SRS",
        0,
        "NONE",
        0,
        "undefined",
        "undefined geographic coordinate reference system"
    ])?;
    insert.execute(params![
        "WGS 84 geodetic",
        4326,
        "EPSG",
        4326,
        WGS84_WKT,
        "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
    ])?;
    Ok(())
}

/// 单个图层在一个事务中写出，失败时整体回滚，不留下半张表。
fn write_transaction(
    conn: &mut Connection,
    path: &Path,
    layer: &LayerOutput,
    srs: &SpatialReference,
) -> Result<(), IoError> {
    let sqlite = |source: rusqlite::Error| IoError::Sqlite {
        path: path.to_path_buf(),
        source,
    };
    let srs_id = srs.epsg as i32;
    let table = quote_identifier(&layer.name);

    let columns: Vec<&str> = layer
        .schema
        .fields()
        .iter()
        .map(|field| field.name.as_str())
        .collect();
    let column_defs: Vec<String> = layer
        .schema
        .fields()
        .iter()
        .skip(1)
        .map(|field| {
            let sql_type = match field.field_type {
                FieldType::Integer { .. } => "INTEGER",
                FieldType::Text { .. } => "TEXT",
            };
            let constraint = if field.nullable { "" } else { " NOT NULL" };
            format!("{} {sql_type}{constraint}", quote_identifier(&field.name))
        })
        .collect();

    let tx = conn.transaction().map_err(sqlite)?;
    tx.execute(
        "INSERT OR IGNORE INTO gpkg_spatial_ref_sys \
         (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
         VALUES (?1, ?2, 'EPSG', ?2, ?3, NULL)",
        params![srs.name, srs_id, srs.wkt],
    )
    .map_err(sqlite)?;

    tx.execute_batch(&format!(
        "CREATE TABLE {table} ({} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, {GEOMETRY_COLUMN} {}, {});",
        quote_identifier(columns[0]),
        layer.kind.ogc_name(),
        column_defs.join(", ")
    ))
    .map_err(sqlite)?;

    let column_list: Vec<String> = std::iter::once(quote_identifier(columns[0]))
        .chain(std::iter::once(GEOMETRY_COLUMN.to_string()))
        .chain(columns[1..].iter().map(|name| quote_identifier(name)))
        .collect();
    let placeholders: Vec<String> = (1..=column_list.len()).map(|i| format!("?{i}")).collect();
    {
        let mut insert = tx
            .prepare(&format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                column_list.join(", "),
                placeholders.join(", ")
            ))
            .map_err(sqlite)?;
        for (index, feature) in layer.features.iter().enumerate() {
            let blob = gpkg_geometry_blob(&feature.geometry, srs_id).map_err(|source| {
                IoError::WriteError {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            let mut values: Vec<Value> = layer
                .attributes(index)
                .into_iter()
                .map(|value| match value {
                    AttributeValue::Integer(number) => Value::Integer(number),
                    AttributeValue::Text(text) => Value::Text(text),
                    AttributeValue::Null => Value::Null,
                })
                .collect();
            values.insert(1, Value::Blob(blob));
            insert.execute(params_from_iter(values)).map_err(sqlite)?;
        }
    }

    let envelope = layer.envelope();
    let (min_x, min_y, max_x, max_y) = if envelope.is_empty() {
        (None, None, None, None)
    } else {
        (
            Some(envelope.min().x()),
            Some(envelope.min().y()),
            Some(envelope.max().x()),
            Some(envelope.max().y()),
        )
    };
    tx.execute(
        "INSERT INTO gpkg_contents \
         (table_name, data_type, identifier, description, min_x, min_y, max_x, max_y, srs_id) \
         VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![layer.name, layer.source_layer, min_x, min_y, max_x, max_y, srs_id],
    )
    .map_err(sqlite)?;
    tx.execute(
        "INSERT INTO gpkg_geometry_columns \
         (table_name, column_name, geometry_type_name, srs_id, z, m) \
         VALUES (?1, ?2, ?3, ?4, 0, 0)",
        params![layer.name, GEOMETRY_COLUMN, layer.kind.ogc_name(), srs_id],
    )
    .map_err(sqlite)?;
    tx.commit().map_err(sqlite)
}

impl DatasetWriter for GeoPackageWriter {
    fn write_layer(
        &mut self,
        layer: &LayerOutput,
        srs: &SpatialReference,
    ) -> Result<WrittenLayer, IoError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(IoError::AlreadyExists(self.path.clone()));
        };
        write_transaction(conn, &self.path, layer, srs)?;
        debug!(
            layer = %layer.name,
            features = layer.feature_count(),
            path = %self.path.display(),
            "GeoPackage 图层写出完成"
        );
        Ok(WrittenLayer {
            name: layer.name.clone(),
            source_layer: layer.source_layer.clone(),
            kind: layer.kind,
            feature_count: layer.feature_count(),
            path: self.path.clone(),
        })
    }
}

fn resolve_location(location: &Path) -> PathBuf {
    if location.is_dir() || location.extension().is_none() {
        location.join(BUNDLE_FILE_NAME)
    } else {
        location.to_path_buf()
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
