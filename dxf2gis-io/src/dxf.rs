use std::fs;
use std::path::Path;

use dxf2gis_core::{
    document::{
        Arc, BlockDefinition, BlockInsert, Circle, DEFAULT_LAYER, Drawing, Ellipse, Entity, Face,
        Hatch, HatchEdge, HatchLoop, Line, Point, Polyline, PolylineVertex, Unsupported,
    },
    geometry::{Flattening, Placement, Point2, Vector2},
};
use tracing::debug;

use crate::code_page::decode_dxf_bytes;
use crate::{DrawingLoader, IoError};

const BINARY_DXF_SENTINEL: &[u8] = b"AutoCAD Binary DXF";

/// ASCII DXF 读取入口。
#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    /// 解析内存中的 DXF 文本。
    pub fn parse_str(&self, source: &str) -> Result<Drawing, IoError> {
        DxfParser::new(source).parse().map_err(IoError::from)
    }
}

impl DrawingLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Drawing, IoError> {
        let bytes = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.starts_with(BINARY_DXF_SENTINEL) {
            return Err(IoError::UnsupportedFeature(format!(
                "{} 是二进制 DXF，目前只支持 ASCII DXF",
                path.display()
            )));
        }
        let text = decode_dxf_bytes(&bytes);
        let drawing = self.parse_str(&text)?;
        debug!(
            path = %path.display(),
            layers = drawing.layer_names().count(),
            entities = drawing.entity_count(),
            "DXF 读取完成"
        );
        Ok(drawing)
    }
}

/// 解析失败一律视为文档无效。
#[derive(Debug)]
struct DxfError {
    message: String,
}

impl DxfError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        IoError::InvalidDocument(err.message)
    }
}

/// 组码与其原始值行。
#[derive(Debug, Clone)]
struct CodePair {
    code: i32,
    value: String,
}

impl CodePair {
    fn is_marker(&self, name: &str) -> bool {
        self.code == 0 && self.value.trim() == name
    }

    fn to_f64(&self, kind: &str) -> Result<f64, DxfError> {
        self.value.trim().parse::<f64>().map_err(|_| {
            DxfError::invalid(format!(
                "{kind} 组码 {} 的值 \"{}\" 不是数值",
                self.code, self.value
            ))
        })
    }

    fn to_i32(&self, kind: &str) -> Result<i32, DxfError> {
        self.value.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "{kind} 组码 {} 的值 \"{}\" 不是整数",
                self.code, self.value
            ))
        })
    }
}

/// 一个对象从类型标记到下一个 0 组码之间的全部组码，顺序与文件一致。
struct EntityRecord {
    kind: String,
    pairs: Vec<CodePair>,
}

impl EntityRecord {
    fn fields(&self) -> Fields<'_> {
        Fields::new(&self.kind, &self.pairs)
    }
}

/// 按组码查询字段；重复出现的组码取第一次的值。
#[derive(Clone, Copy)]
struct Fields<'p> {
    kind: &'p str,
    pairs: &'p [CodePair],
}

impl<'p> Fields<'p> {
    fn new(kind: &'p str, pairs: &'p [CodePair]) -> Self {
        Self { kind, pairs }
    }

    fn get(&self, code: i32) -> Option<&'p CodePair> {
        self.pairs.iter().find(|pair| pair.code == code)
    }

    fn text(&self, code: i32) -> Option<String> {
        self.get(code).map(|pair| pair.value.trim().to_string())
    }

    fn real(&self, code: i32) -> Result<Option<f64>, DxfError> {
        self.get(code).map(|pair| pair.to_f64(self.kind)).transpose()
    }

    fn real_or(&self, code: i32, default: f64) -> Result<f64, DxfError> {
        Ok(self.real(code)?.unwrap_or(default))
    }

    fn required(&self, code: i32, what: &str) -> Result<f64, DxfError> {
        self.real(code)?.ok_or_else(|| {
            DxfError::invalid(format!("{} 缺少{what}（组码 {code}）", self.kind))
        })
    }

    fn int_or(&self, code: i32, default: i32) -> Result<i32, DxfError> {
        match self.get(code) {
            Some(pair) => pair.to_i32(self.kind),
            None => Ok(default),
        }
    }

    /// X 位于 `x_code`，Y 位于 `x_code + 10`。
    fn point(&self, x_code: i32, what: &str) -> Result<Point2, DxfError> {
        let x = self.required(x_code, &format!("{what} X"))?;
        let y = self.required(x_code + 10, &format!("{what} Y"))?;
        Ok(Point2::new(x, y))
    }

    fn layer(&self) -> String {
        match self.text(8) {
            Some(layer) if !layer.is_empty() => layer,
            _ => DEFAULT_LAYER.to_string(),
        }
    }

    fn extrusion_z(&self) -> Result<f64, DxfError> {
        self.real_or(230, 1.0)
    }
}

/// 按出现顺序收集 10/20 顶点，42 为前一顶点的 bulge。
fn collect_vertices(kind: &str, pairs: &[CodePair]) -> Result<Vec<PolylineVertex>, DxfError> {
    let mut vertices: Vec<PolylineVertex> = Vec::new();
    let mut pending_x = None;
    for pair in pairs {
        match pair.code {
            10 => {
                if pending_x.replace(pair.to_f64(kind)?).is_some() {
                    return Err(DxfError::invalid(format!(
                        "{kind} 顶点缺少对应的 Y（组码 20）"
                    )));
                }
            }
            20 => {
                let x = pending_x.take().ok_or_else(|| {
                    DxfError::invalid(format!("{kind} 顶点缺少对应的 X（组码 10）"))
                })?;
                let y = pair.to_f64(kind)?;
                vertices.push(PolylineVertex::new(Point2::new(x, y)));
            }
            42 => {
                if let Some(last) = vertices.last_mut() {
                    last.bulge = pair.to_f64(kind)?;
                }
            }
            _ => {}
        }
    }
    if pending_x.is_some() {
        return Err(DxfError::invalid(format!("{kind} 最后一个顶点不完整")));
    }
    Ok(vertices)
}

/// 以 `marker` 组码切分；第一次出现之前的组码不属于任何分段。
fn split_at_code(pairs: &[CodePair], marker: i32) -> Vec<&[CodePair]> {
    let starts: Vec<usize> = pairs
        .iter()
        .enumerate()
        .filter(|(_, pair)| pair.code == marker)
        .map(|(index, _)| index)
        .collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(pairs.len());
            &pairs[start..end]
        })
        .collect()
}

/// OCS 法向为 -Z 时，平面坐标相当于绕 Y 轴镜像。
fn ocs_mirror() -> Placement {
    let origin = Point2::new(0.0, 0.0);
    Placement::for_insert(origin, Vector2::new(-1.0, 1.0), 0.0, origin)
}

fn apply_ocs(entity: Entity, extrusion_z: f64) -> Entity {
    if extrusion_z < 0.0 {
        entity.transformed(&ocs_mirror(), &Flattening::default())
    } else {
        entity
    }
}

fn is_layout_block(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("*model_space") || lower.starts_with("*paper_space")
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<Drawing, DxfError> {
        let mut drawing = Drawing::new();
        while let Some(pair) = self.reader.next_pair()? {
            if pair.code == 999 {
                continue;
            }
            if pair.code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {}（期望 0 表示 SECTION/EOF）",
                    pair.code
                )));
            }
            match pair.value.trim() {
                "SECTION" => {
                    let header = self.read_record("SECTION")?;
                    let name = header
                        .fields()
                        .text(2)
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    match name.as_str() {
                        "ENTITIES" => self.parse_entities(&mut drawing)?,
                        "BLOCKS" => self.parse_blocks(&mut drawing)?,
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(drawing)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        while let Some(pair) = self.reader.next_pair()? {
            if pair.is_marker("ENDSEC") {
                return Ok(());
            }
        }
        Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"))
    }

    /// 读取到下一个 0 组码为止，该组码留给下一次读取。
    fn read_record(&mut self, kind: &str) -> Result<EntityRecord, DxfError> {
        let mut pairs = Vec::new();
        while let Some(pair) = self.reader.next_pair()? {
            if pair.code == 0 {
                self.reader.put_back(pair);
                break;
            }
            pairs.push(pair);
        }
        Ok(EntityRecord {
            kind: kind.to_string(),
            pairs,
        })
    }

    fn next_record(&mut self, context: &str) -> Result<EntityRecord, DxfError> {
        let pair = self
            .reader
            .next_pair()?
            .ok_or_else(|| DxfError::invalid(format!("{context} 提前结束")))?;
        if pair.code != 0 {
            return Err(DxfError::invalid(format!(
                "{context} 遇到组码 {}（期望 0 表示对象起始）",
                pair.code
            )));
        }
        self.read_record(pair.value.trim())
    }

    fn parse_entities(&mut self, drawing: &mut Drawing) -> Result<(), DxfError> {
        loop {
            let record = self.next_record("ENTITIES 段")?;
            match record.kind.as_str() {
                "ENDSEC" => return Ok(()),
                "SEQEND" | "ATTRIB" | "VERTEX" => {}
                _ => {
                    // 67 = 1：图纸空间（图框、视口），不属于模型
                    if record.fields().int_or(67, 0)? == 1 {
                        debug!(kind = %record.kind, "跳过图纸空间实体");
                        continue;
                    }
                    drawing.add_entity(self.build_entity(record)?);
                }
            }
        }
    }

    fn parse_blocks(&mut self, drawing: &mut Drawing) -> Result<(), DxfError> {
        loop {
            let record = self.next_record("BLOCKS 段")?;
            match record.kind.as_str() {
                "ENDSEC" => return Ok(()),
                "BLOCK" => {
                    if let Some(definition) = self.parse_block_definition(&record)? {
                        drawing.add_block_definition(definition);
                    }
                }
                _ => {}
            }
        }
    }

    fn parse_block_definition(
        &mut self,
        header: &EntityRecord,
    ) -> Result<Option<BlockDefinition>, DxfError> {
        let fields = header.fields();
        let name = fields
            .text(2)
            .ok_or_else(|| DxfError::invalid("BLOCK 缺少名称（组码 2）"))?;
        let base_point = Point2::new(fields.real_or(10, 0.0)?, fields.real_or(20, 0.0)?);

        let mut entities = Vec::new();
        loop {
            let record = self.next_record("BLOCK 定义")?;
            match record.kind.as_str() {
                "ENDBLK" => break,
                "SEQEND" | "ATTDEF" | "ATTRIB" | "VERTEX" => {}
                _ => entities.push(self.build_entity(record)?),
            }
        }

        if is_layout_block(&name) {
            return Ok(None);
        }
        Ok(Some(BlockDefinition {
            name,
            base_point,
            entities,
        }))
    }

    fn build_entity(&mut self, record: EntityRecord) -> Result<Entity, DxfError> {
        match record.kind.as_str() {
            "LINE" => parse_line(&record),
            "POINT" => parse_point(&record),
            "CIRCLE" => parse_circle(&record),
            "ARC" => parse_arc(&record),
            "ELLIPSE" => parse_ellipse(&record),
            "LWPOLYLINE" => parse_lwpolyline(&record),
            "POLYLINE" => self.parse_polyline(&record),
            "INSERT" => parse_insert(&record),
            "HATCH" => parse_hatch(&record),
            "SOLID" | "3DFACE" => parse_face(&record),
            _ => {
                debug!(kind = %record.kind, "保留暂不转换的实体类型");
                let layer = record.fields().layer();
                Ok(Entity::Unsupported(Unsupported {
                    kind: record.kind,
                    layer,
                }))
            }
        }
    }

    /// 旧式 POLYLINE 之后紧跟 VERTEX 序列与 SEQEND。网格与多面网格保留为不支持的实体。
    fn parse_polyline(&mut self, header: &EntityRecord) -> Result<Entity, DxfError> {
        let fields = header.fields();
        let flags = fields.int_or(70, 0)?;
        let layer = fields.layer();
        let sequence = self.read_vertex_sequence()?;

        if flags & (0x10 | 0x40) != 0 {
            return Ok(Entity::Unsupported(Unsupported {
                kind: header.kind.clone(),
                layer,
            }));
        }

        let is_3d = flags & 0x08 != 0;
        let mut vertices = Vec::with_capacity(sequence.len());
        for record in &sequence {
            let vertex = record.fields();
            // 样条控制点
            if vertex.int_or(70, 0)? & 0x10 != 0 {
                continue;
            }
            let bulge = if is_3d { 0.0 } else { vertex.real_or(42, 0.0)? };
            vertices.push(PolylineVertex::with_bulge(vertex.point(10, "位置")?, bulge));
        }
        if vertices.is_empty() {
            return Err(DxfError::invalid("POLYLINE 未解析到任何顶点"));
        }

        let polyline = Entity::Polyline(Polyline {
            vertices,
            is_closed: flags & 0x01 != 0,
            layer,
        });
        // 三维多段线顶点为世界坐标。
        if is_3d {
            Ok(polyline)
        } else {
            Ok(apply_ocs(polyline, fields.extrusion_z()?))
        }
    }

    fn read_vertex_sequence(&mut self) -> Result<Vec<EntityRecord>, DxfError> {
        let mut vertices = Vec::new();
        while let Some(pair) = self.reader.next_pair()? {
            if pair.is_marker("VERTEX") {
                vertices.push(self.read_record("VERTEX")?);
            } else if pair.is_marker("SEQEND") {
                self.read_record("SEQEND")?;
                break;
            } else {
                self.reader.put_back(pair);
                break;
            }
        }
        Ok(vertices)
    }
}

fn parse_line(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    Ok(Entity::Line(Line {
        start: fields.point(10, "起点")?,
        end: fields.point(11, "终点")?,
        layer: fields.layer(),
    }))
}

fn parse_point(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    Ok(Entity::Point(Point {
        location: fields.point(10, "位置")?,
        layer: fields.layer(),
    }))
}

fn parse_circle(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let circle = Entity::Circle(Circle {
        center: fields.point(10, "圆心")?,
        radius: fields.required(40, "半径")?,
        layer: fields.layer(),
    });
    Ok(apply_ocs(circle, fields.extrusion_z()?))
}

fn parse_arc(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let arc = Entity::Arc(Arc {
        center: fields.point(10, "圆心")?,
        radius: fields.required(40, "半径")?,
        start_angle: fields.required(50, "起始角")?.to_radians(),
        end_angle: fields.required(51, "终止角")?.to_radians(),
        layer: fields.layer(),
    });
    Ok(apply_ocs(arc, fields.extrusion_z()?))
}

fn parse_ellipse(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let center = fields.point(10, "圆心")?;
    let major = fields.point(11, "主轴向量")?;
    if major.x().abs() < f64::EPSILON && major.y().abs() < f64::EPSILON {
        return Err(DxfError::invalid("ELLIPSE 主轴向量长度为 0"));
    }
    let ratio = fields.real_or(40, 1.0)?;
    if ratio <= 0.0 {
        return Err(DxfError::invalid(format!(
            "ELLIPSE 半径比必须为正数，实际为 {ratio}"
        )));
    }
    let mut start_parameter = fields.real_or(41, 0.0)?;
    let mut end_parameter = fields.real_or(42, std::f64::consts::TAU)?;
    // 圆心与主轴为世界坐标，法向反向只影响参数走向。
    if fields.extrusion_z()? < 0.0 {
        (start_parameter, end_parameter) = (-end_parameter, -start_parameter);
    }
    Ok(Entity::Ellipse(Ellipse {
        center,
        major_axis: Vector2::new(major.x(), major.y()),
        ratio,
        start_parameter,
        end_parameter,
        layer: fields.layer(),
    }))
}

fn parse_lwpolyline(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let vertices = collect_vertices(&record.kind, &record.pairs)?;
    if vertices.is_empty() {
        return Err(DxfError::invalid("LWPOLYLINE 未解析到任何顶点"));
    }
    let polyline = Entity::Polyline(Polyline {
        vertices,
        is_closed: fields.int_or(70, 0)? & 0x01 != 0,
        layer: fields.layer(),
    });
    Ok(apply_ocs(polyline, fields.extrusion_z()?))
}

/// 属性（ATTRIB）只携带文字，由外层循环跳过。
fn parse_insert(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let block_name = fields
        .text(2)
        .ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?;
    let insert = Entity::BlockInsert(BlockInsert {
        block_name,
        insert: fields.point(10, "插入点")?,
        scale: Vector2::new(fields.real_or(41, 1.0)?, fields.real_or(42, 1.0)?),
        rotation: fields.real_or(50, 0.0)?.to_radians(),
        layer: fields.layer(),
    });
    Ok(apply_ocs(insert, fields.extrusion_z()?))
}

/// SOLID 的第 3、4 点与环顺序相反，读取时调整为环顺序。缺省的第 4 点与第 3 点重合。
fn parse_face(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let is_solid = record.kind == "SOLID";
    let first = fields.point(10, "第 1 个顶点")?;
    let second = fields.point(11, "第 2 个顶点")?;
    let third = fields.point(12, "第 3 个顶点")?;
    let fourth = match (fields.real(13)?, fields.real(23)?) {
        (Some(x), Some(y)) => Point2::new(x, y),
        _ => third,
    };
    let vertices = if is_solid {
        [first, second, fourth, third]
    } else {
        [first, second, third, fourth]
    };
    let face = Entity::Face(Face {
        vertices,
        is_solid,
        layer: fields.layer(),
    });
    // 3DFACE 顶点为世界坐标，只有 SOLID 位于 OCS。
    if is_solid {
        Ok(apply_ocs(face, fields.extrusion_z()?))
    } else {
        Ok(face)
    }
}

/// 边界数据位于组码 75（填充样式）之前，每个环以组码 92 开始。
fn parse_hatch(record: &EntityRecord) -> Result<Entity, DxfError> {
    let fields = record.fields();
    let boundary_end = record
        .pairs
        .iter()
        .position(|pair| pair.code == 75)
        .unwrap_or(record.pairs.len());
    let loops = split_at_code(&record.pairs[..boundary_end], 92)
        .into_iter()
        .map(hatch_loop)
        .collect::<Result<Vec<_>, _>>()?;
    if loops.is_empty() {
        return Err(DxfError::invalid("HATCH 缺少边界定义"));
    }
    let hatch = Entity::Hatch(Hatch {
        loops,
        layer: fields.layer(),
    });
    Ok(apply_ocs(hatch, fields.extrusion_z()?))
}

fn hatch_loop(pairs: &[CodePair]) -> Result<HatchLoop, DxfError> {
    let fields = Fields::new("HATCH", pairs);
    if fields.int_or(92, 0)? & 0x02 != 0 {
        return polyline_hatch_loop(fields);
    }
    let mut edges = Vec::new();
    for edge in split_at_code(pairs, 72) {
        edges.extend(hatch_edges(Fields::new("HATCH", edge))?);
    }
    Ok(HatchLoop { edges })
}

/// 多段线环：72 为是否带 bulge，73 为是否闭合。
fn polyline_hatch_loop(fields: Fields<'_>) -> Result<HatchLoop, DxfError> {
    let has_bulge = fields.int_or(72, 0)? != 0;
    let is_closed = fields.int_or(73, 1)? != 0;
    let vertices = collect_vertices(fields.kind, fields.pairs)?;
    let segment = |from: &PolylineVertex, to: &PolylineVertex| HatchEdge::PolylineSegment {
        start: from.position,
        end: to.position,
        bulge: if has_bulge { from.bulge } else { 0.0 },
    };
    let mut edges: Vec<HatchEdge> = vertices
        .windows(2)
        .map(|pair| segment(&pair[0], &pair[1]))
        .collect();
    if let (true, [first, .., last]) = (is_closed, vertices.as_slice()) {
        edges.push(segment(last, first));
    }
    Ok(HatchLoop { edges })
}

/// 顺时针边在 DXF 中以取反的角度存储，这里换算回几何角度（弧度）。
fn hatch_angle(degrees: f64, is_counter_clockwise: bool) -> f64 {
    if is_counter_clockwise {
        degrees.to_radians()
    } else {
        -degrees.to_radians()
    }
}

fn hatch_edges(fields: Fields<'_>) -> Result<Vec<HatchEdge>, DxfError> {
    match fields.int_or(72, 0)? {
        1 => Ok(vec![HatchEdge::Line {
            start: fields.point(10, "直线边起点")?,
            end: fields.point(11, "直线边终点")?,
        }]),
        2 => {
            let is_counter_clockwise = fields.int_or(73, 1)? != 0;
            Ok(vec![HatchEdge::Arc {
                center: fields.point(10, "圆弧边圆心")?,
                radius: fields.required(40, "圆弧边半径")?,
                start_angle: hatch_angle(fields.required(50, "圆弧边起始角")?, is_counter_clockwise),
                end_angle: hatch_angle(fields.required(51, "圆弧边终止角")?, is_counter_clockwise),
                is_counter_clockwise,
            }])
        }
        3 => {
            let is_counter_clockwise = fields.int_or(73, 1)? != 0;
            let major = fields.point(11, "椭圆边主轴向量")?;
            Ok(vec![HatchEdge::Ellipse {
                center: fields.point(10, "椭圆边圆心")?,
                major_axis: Vector2::new(major.x(), major.y()),
                minor_ratio: fields.required(40, "椭圆边轴比")?,
                start_angle: hatch_angle(fields.required(50, "椭圆边起始角")?, is_counter_clockwise),
                end_angle: hatch_angle(fields.required(51, "椭圆边终止角")?, is_counter_clockwise),
                is_counter_clockwise,
            }])
        }
        // 样条边不做拟合，以控制多边形近似。
        4 => {
            let control = collect_vertices(fields.kind, fields.pairs)?;
            if control.len() < 2 {
                return Err(DxfError::invalid("HATCH 样条边至少需要两个控制点"));
            }
            Ok(control
                .windows(2)
                .map(|pair| HatchEdge::Line {
                    start: pair[0].position,
                    end: pair[1].position,
                })
                .collect())
        }
        other => Err(DxfError::invalid(format!("HATCH 未知的边界类型 {other}"))),
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    pending: Option<CodePair>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            pending: None,
            line_number: 0,
        }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.next()?;
        self.line_number += 1;
        Some(line)
    }

    fn next_pair(&mut self) -> Result<Option<CodePair>, DxfError> {
        if let Some(pair) = self.pending.take() {
            return Ok(Some(pair));
        }

        // 容忍组码行之间的空行
        let code_line = loop {
            match self.next_line() {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line.trim(),
                None => return Ok(None),
            }
        };
        let code = code_line.parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{code_line}\" 不是整数",
                self.line_number
            ))
        })?;
        let value = self.next_line().ok_or_else(|| {
            DxfError::invalid(format!(
                "第 {} 行的组码 {code} 缺少值行",
                self.line_number
            ))
        })?;
        Ok(Some(CodePair {
            code,
            value: value.trim_end_matches('\r').to_string(),
        }))
    }

    fn put_back(&mut self, pair: CodePair) {
        debug_assert!(self.pending.is_none(), "只允许回退一个组码");
        self.pending = Some(pair);
    }
}
