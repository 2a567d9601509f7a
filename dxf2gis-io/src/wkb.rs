//! 小端 WKB 编码与 GeoPackage 几何二进制头。

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use dxf2gis_core::features::{Geometry, GeometryKind};
use dxf2gis_core::geometry::Point2;

const WKB_LITTLE_ENDIAN: u8 = 1;

pub fn wkb_type_code(kind: GeometryKind) -> u32 {
    match kind {
        GeometryKind::Point => 1,
        GeometryKind::LineString => 2,
        GeometryKind::Polygon => 3,
        GeometryKind::MultiLineString => 5,
        GeometryKind::MultiPolygon => 6,
    }
}

pub fn write_wkb<W: Write>(out: &mut W, geometry: &Geometry) -> io::Result<()> {
    out.write_u8(WKB_LITTLE_ENDIAN)?;
    out.write_u32::<LittleEndian>(wkb_type_code(geometry.kind()))?;
    match geometry {
        Geometry::Point(point) => write_point(out, *point),
        Geometry::LineString(points) => write_points(out, points),
        Geometry::Polygon(rings) => write_rings(out, rings),
        Geometry::MultiLineString(lines) => {
            out.write_u32::<LittleEndian>(lines.len() as u32)?;
            for line in lines {
                out.write_u8(WKB_LITTLE_ENDIAN)?;
                out.write_u32::<LittleEndian>(wkb_type_code(GeometryKind::LineString))?;
                write_points(out, line)?;
            }
            Ok(())
        }
        Geometry::MultiPolygon(polygons) => {
            out.write_u32::<LittleEndian>(polygons.len() as u32)?;
            for rings in polygons {
                out.write_u8(WKB_LITTLE_ENDIAN)?;
                out.write_u32::<LittleEndian>(wkb_type_code(GeometryKind::Polygon))?;
                write_rings(out, rings)?;
            }
            Ok(())
        }
    }
}

fn write_point<W: Write>(out: &mut W, point: Point2) -> io::Result<()> {
    out.write_f64::<LittleEndian>(point.x())?;
    out.write_f64::<LittleEndian>(point.y())
}

fn write_points<W: Write>(out: &mut W, points: &[Point2]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(points.len() as u32)?;
    for point in points {
        write_point(out, *point)?;
    }
    Ok(())
}

fn write_rings<W: Write>(out: &mut W, rings: &[Vec<Point2>]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(rings.len() as u32)?;
    for ring in rings {
        write_points(out, ring)?;
    }
    Ok(())
}

/// GeoPackage 几何 BLOB：`GP` 魔数、版本 0、小端标志，非点几何附带 XY 包络。
pub fn gpkg_geometry_blob(geometry: &Geometry, srs_id: i32) -> io::Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(64);
    blob.write_all(b"GP")?;
    blob.write_u8(0)?;
    let with_envelope = !matches!(geometry, Geometry::Point(_));
    // bit0：小端；bit1-3：包络类型（1 = minx, maxx, miny, maxy）
    let flags: u8 = if with_envelope { 0b0000_0011 } else { 0b0000_0001 };
    blob.write_u8(flags)?;
    blob.write_i32::<LittleEndian>(srs_id)?;
    if with_envelope {
        let envelope = geometry.envelope();
        blob.write_f64::<LittleEndian>(envelope.min().x())?;
        blob.write_f64::<LittleEndian>(envelope.max().x())?;
        blob.write_f64::<LittleEndian>(envelope.min().y())?;
        blob.write_f64::<LittleEndian>(envelope.max().y())?;
    }
    write_wkb(&mut blob, geometry)?;
    Ok(blob)
}
