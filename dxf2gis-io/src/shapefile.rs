//! ESRI Shapefile 写出：`.shp`/`.shx` 几何、`.dbf` 属性（dBASE III）、`.prj` 与 `.cpg`。
//!
//! 一个 `LayerOutput` 对应一组同名文件。输出内容只由输入决定（DBF 日期字段写 0），
//! 相同输入重复写出得到逐字节相同的文件。

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use dxf2gis_core::features::{
    AttributeValue, FieldType, Geometry, GeometryFamily, LayerOutput, SpatialReference,
};
use dxf2gis_core::geometry::{Bounds2D, Point2};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::prj::esri_wkt;
use crate::{DatasetWriter, IoError, WrittenLayer};

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_BYTES: usize = 100;
const SIDE_CAR_EXTENSIONS: &[&str] = &["shp", "shx", "dbf", "prj", "cpg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum ShapeType {
    Point = 1,
    PolyLine = 3,
    Polygon = 5,
}

impl ShapeType {
    fn for_family(family: GeometryFamily) -> Self {
        match family {
            GeometryFamily::Point => ShapeType::Point,
            GeometryFamily::Line => ShapeType::PolyLine,
            GeometryFamily::Polygon => ShapeType::Polygon,
        }
    }
}

/// 目录形式的 Shapefile 输出。
#[derive(Debug, Clone)]
pub struct ShapefileWriter {
    directory: PathBuf,
    overwrite: bool,
}

impl ShapefileWriter {
    /// 创建（必要时新建）输出目录。目录不可用时失败，调用方视为整体失败。
    pub fn create(directory: impl Into<PathBuf>, overwrite: bool) -> Result<Self, IoError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| IoError::WriteError {
            path: directory.clone(),
            source,
        })?;
        Ok(Self {
            directory,
            overwrite,
        })
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn sidecar(&self, name: &str, extension: &str) -> PathBuf {
        self.directory.join(format!("{name}.{extension}"))
    }

    /// 先把整组文件写进同目录的临时文件，全部成功后再逐个改名；
    /// 中途失败时删除已改名的文件，不留下不完整的文件组。
    fn write_sidecars(&self, name: &str, outputs: &[(&str, &[u8])]) -> Result<(), IoError> {
        let mut staged = Vec::with_capacity(outputs.len());
        for (extension, bytes) in outputs {
            let path = self.sidecar(name, extension);
            let file = NamedTempFile::new_in(&self.directory).and_then(|mut file| {
                file.write_all(bytes)?;
                Ok(file)
            });
            match file {
                Ok(file) => staged.push((file, path)),
                Err(source) => return Err(IoError::WriteError { path, source }),
            }
        }

        let mut persisted: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (file, path) in staged {
            if let Err(err) = file.persist(&path) {
                for done in &persisted {
                    if let Err(cleanup) = fs::remove_file(done) {
                        warn!(path = %done.display(), error = %cleanup, "清理不完整的 Shapefile 失败");
                    }
                }
                return Err(IoError::WriteError {
                    path,
                    source: err.error,
                });
            }
            persisted.push(path);
        }
        Ok(())
    }

    fn prepare_target(&self, name: &str) -> Result<(), IoError> {
        for extension in SIDE_CAR_EXTENSIONS {
            let path = self.sidecar(name, extension);
            if !path.exists() {
                continue;
            }
            if !self.overwrite {
                return Err(IoError::AlreadyExists(path));
            }
            fs::remove_file(&path).map_err(|source| IoError::WriteError {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl DatasetWriter for ShapefileWriter {
    fn write_layer(
        &mut self,
        layer: &LayerOutput,
        srs: &SpatialReference,
    ) -> Result<WrittenLayer, IoError> {
        self.prepare_target(&layer.name)?;

        let shape_type = ShapeType::for_family(layer.kind.family());
        let (shp, shx) = encode_geometry(layer, shape_type).map_err(|source| IoError::WriteError {
            path: self.sidecar(&layer.name, "shp"),
            source,
        })?;
        let dbf = encode_dbf(layer).map_err(|source| IoError::WriteError {
            path: self.sidecar(&layer.name, "dbf"),
            source,
        })?;

        let prj = esri_wkt(&srs.wkt);
        let outputs: [(&str, &[u8]); 5] = [
            ("shp", &shp),
            ("shx", &shx),
            ("dbf", &dbf),
            ("prj", prj.as_bytes()),
            ("cpg", b"UTF-8"),
        ];
        self.write_sidecars(&layer.name, &outputs)?;

        let path = self.sidecar(&layer.name, "shp");
        debug!(
            layer = %layer.name,
            features = layer.feature_count(),
            path = %path.display(),
            "Shapefile 写出完成"
        );
        Ok(WrittenLayer {
            name: layer.name.clone(),
            source_layer: layer.source_layer.clone(),
            kind: layer.kind,
            feature_count: layer.feature_count(),
            path,
        })
    }
}

/// 面环按 Shapefile 约定调整方向：外环顺时针，洞逆时针。
fn shape_parts(geometry: &Geometry) -> Vec<Vec<Point2>> {
    fn oriented(ring: &[Point2], clockwise: bool) -> Vec<Point2> {
        let mut ring = ring.to_vec();
        let is_clockwise = signed_area(&ring) < 0.0;
        if is_clockwise != clockwise {
            ring.reverse();
        }
        ring
    }

    fn polygon_parts(rings: &[Vec<Point2>], parts: &mut Vec<Vec<Point2>>) {
        for (index, ring) in rings.iter().enumerate() {
            parts.push(oriented(ring, index == 0));
        }
    }

    let mut parts = Vec::new();
    match geometry {
        Geometry::Point(point) => parts.push(vec![*point]),
        Geometry::LineString(points) => parts.push(points.clone()),
        Geometry::MultiLineString(lines) => parts.extend(lines.iter().cloned()),
        Geometry::Polygon(rings) => polygon_parts(rings, &mut parts),
        Geometry::MultiPolygon(polygons) => {
            for rings in polygons {
                polygon_parts(rings, &mut parts);
            }
        }
    }
    parts
}

/// 鞋带公式求有向面积，逆时针为正。
pub fn signed_area(ring: &[Point2]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x() * b.y() - b.x() * a.y();
    }
    sum * 0.5
}

fn encode_geometry(layer: &LayerOutput, shape_type: ShapeType) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut records: Vec<Vec<u8>> = Vec::with_capacity(layer.features.len());
    let mut extent = Bounds2D::empty();
    for feature in &layer.features {
        let bounds = feature.geometry.envelope();
        extent.include_bounds(&bounds);
        let mut content = Vec::new();
        content.write_i32::<LittleEndian>(shape_type as i32)?;
        match shape_type {
            ShapeType::Point => {
                let point = bounds.min();
                content.write_f64::<LittleEndian>(point.x())?;
                content.write_f64::<LittleEndian>(point.y())?;
            }
            ShapeType::PolyLine | ShapeType::Polygon => {
                let parts = shape_parts(&feature.geometry);
                write_bounds(&mut content, &bounds)?;
                let point_count: usize = parts.iter().map(Vec::len).sum();
                content.write_i32::<LittleEndian>(parts.len() as i32)?;
                content.write_i32::<LittleEndian>(point_count as i32)?;
                let mut offset = 0;
                for part in &parts {
                    content.write_i32::<LittleEndian>(offset as i32)?;
                    offset += part.len();
                }
                for point in parts.iter().flatten() {
                    content.write_f64::<LittleEndian>(point.x())?;
                    content.write_f64::<LittleEndian>(point.y())?;
                }
            }
        }
        records.push(content);
    }

    let shp_bytes = HEADER_BYTES + records.iter().map(|record| 8 + record.len()).sum::<usize>();
    let shx_bytes = HEADER_BYTES + records.len() * 8;

    let mut shp = Vec::with_capacity(shp_bytes);
    let mut shx = Vec::with_capacity(shx_bytes);
    write_header(&mut shp, shp_bytes, shape_type, &extent)?;
    write_header(&mut shx, shx_bytes, shape_type, &extent)?;

    let mut offset = HEADER_BYTES;
    for (index, content) in records.iter().enumerate() {
        let words = (content.len() / 2) as i32;
        shx.write_i32::<BigEndian>((offset / 2) as i32)?;
        shx.write_i32::<BigEndian>(words)?;
        shp.write_i32::<BigEndian>(index as i32 + 1)?;
        shp.write_i32::<BigEndian>(words)?;
        shp.write_all(content)?;
        offset += 8 + content.len();
    }
    Ok((shp, shx))
}

fn write_header<W: Write>(
    out: &mut W,
    total_bytes: usize,
    shape_type: ShapeType,
    extent: &Bounds2D,
) -> io::Result<()> {
    out.write_i32::<BigEndian>(FILE_CODE)?;
    for _ in 0..5 {
        out.write_i32::<BigEndian>(0)?;
    }
    out.write_i32::<BigEndian>((total_bytes / 2) as i32)?;
    out.write_i32::<LittleEndian>(VERSION)?;
    out.write_i32::<LittleEndian>(shape_type as i32)?;
    write_bounds(out, extent)?;
    // Z、M 范围
    for _ in 0..4 {
        out.write_f64::<LittleEndian>(0.0)?;
    }
    Ok(())
}

fn write_bounds<W: Write>(out: &mut W, bounds: &Bounds2D) -> io::Result<()> {
    let (min, max) = if bounds.is_empty() {
        (Point2::new(0.0, 0.0), Point2::new(0.0, 0.0))
    } else {
        (bounds.min(), bounds.max())
    };
    out.write_f64::<LittleEndian>(min.x())?;
    out.write_f64::<LittleEndian>(min.y())?;
    out.write_f64::<LittleEndian>(max.x())?;
    out.write_f64::<LittleEndian>(max.y())
}

fn encode_dbf(layer: &LayerOutput) -> io::Result<Vec<u8>> {
    let fields = layer.schema.fields();
    let widths: Vec<usize> = fields
        .iter()
        .map(|field| match field.field_type {
            FieldType::Integer { width } | FieldType::Text { width } => width as usize,
        })
        .collect();
    let header_len = 32 + 32 * fields.len() + 1;
    let record_len = 1 + widths.iter().sum::<usize>();

    let mut out = Vec::with_capacity(header_len + record_len * layer.features.len() + 1);
    out.write_u8(0x03)?;
    // 修改日期 YY MM DD 固定为 0
    out.write_all(&[0, 0, 0])?;
    out.write_u32::<LittleEndian>(layer.features.len() as u32)?;
    out.write_u16::<LittleEndian>(header_len as u16)?;
    out.write_u16::<LittleEndian>(record_len as u16)?;
    out.write_all(&[0u8; 20])?;

    for (field, width) in fields.iter().zip(&widths) {
        let mut name = [0u8; 11];
        let upper = field.name.to_ascii_uppercase();
        for (slot, byte) in name.iter_mut().zip(upper.bytes().take(10)) {
            *slot = byte;
        }
        out.write_all(&name)?;
        out.write_u8(match field.field_type {
            FieldType::Integer { .. } => b'N',
            FieldType::Text { .. } => b'C',
        })?;
        out.write_all(&[0u8; 4])?;
        out.write_u8(*width as u8)?;
        out.write_u8(0)?;
        out.write_all(&[0u8; 14])?;
    }
    out.write_u8(0x0D)?;

    for index in 0..layer.features.len() {
        out.write_u8(b' ')?;
        for (value, width) in layer.attributes(index).iter().zip(&widths) {
            out.write_all(&dbf_cell(value, *width))?;
        }
    }
    out.write_u8(0x1A)?;
    Ok(out)
}

/// 数值右对齐、文本左对齐，均以空格补足宽度；文本按字符边界截断。
fn dbf_cell(value: &AttributeValue, width: usize) -> Vec<u8> {
    let mut cell = match value {
        AttributeValue::Integer(number) => {
            let text = number.to_string();
            if text.len() > width {
                vec![b'*'; width]
            } else {
                let mut padded = vec![b' '; width - text.len()];
                padded.extend_from_slice(text.as_bytes());
                padded
            }
        }
        AttributeValue::Text(text) => {
            let mut end = text.len().min(width);
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.as_bytes()[..end].to_vec()
        }
        AttributeValue::Null => Vec::new(),
    };
    cell.resize(width, b' ');
    cell
}
