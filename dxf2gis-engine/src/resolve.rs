//! 块参照展开：显式栈 + 当前路径集合，支持 explode 与 keep-merge 两种模式。

use std::collections::HashSet;
use std::fmt;

use dxf2gis_core::document::{BlockDefinition, BlockInsert, Drawing, Entity, EntityId};
use dxf2gis_core::features::{Geometry, SourceRef};
use dxf2gis_core::geometry::{Flattening, Placement};
use tracing::{debug, warn};

use crate::errors::{Diagnostic, EngineError};
use crate::merge::merge_instance;
use crate::normalize::{NormalizeError, entity_geometries};
use crate::progress::CancellationToken;

pub const DEFAULT_LINE_MERGE_TOLERANCE: f64 = 0.2;
pub const DEFAULT_KEEP_MERGE_EXPLODE_LIMIT: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    Explode,
    #[default]
    KeepMerge,
}

impl BlockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockMode::Explode => "explode",
            BlockMode::KeepMerge => "keep-merge",
        }
    }
}

impl fmt::Display for BlockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub mode: BlockMode,
    pub flattening: Flattening,
    pub line_merge_tolerance: f64,
    pub keep_merge_explode_limit: usize,
    /// 参与转换的图层；`None` 表示全部。explode 时用于过滤展开出的叶子。
    pub selected_layers: Option<HashSet<String>>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            mode: BlockMode::default(),
            flattening: Flattening::default(),
            line_merge_tolerance: DEFAULT_LINE_MERGE_TOLERANCE,
            keep_merge_explode_limit: DEFAULT_KEEP_MERGE_EXPLODE_LIMIT,
            selected_layers: None,
        }
    }
}

impl ResolveOptions {
    fn is_selected(&self, layer: &str) -> bool {
        self.selected_layers
            .as_ref()
            .is_none_or(|selected| selected.contains(layer))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// 已变换到世界坐标的单个实体。
    Entity(Entity),
    /// keep-merge 预先组装好的几何。
    Composite(Vec<Geometry>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub layer: String,
    pub shape: Shape,
    pub source: SourceRef,
}

#[derive(Debug, Clone, Default)]
pub struct LayerResolution {
    pub layer: String,
    pub entities: Vec<ResolvedEntity>,
    pub diagnostics: Vec<Diagnostic>,
}

/// 块展开得到的叶子实体（块内坐标）及其到世界坐标的变换。
#[derive(Debug, Clone, Copy)]
pub(crate) struct Leaf<'a> {
    pub entity: &'a Entity,
    pub placement: Placement,
    /// 图层 "0" 上的子实体继承放置它的实例图层。
    pub layer: &'a str,
    pub block_name: &'a str,
}

struct Frame<'a> {
    block: &'a BlockDefinition,
    next_child: usize,
    placement: Placement,
    layer: &'a str,
}

/// 深度优先展开一个顶层块参照，对每个叶子调用 `visit`，返回叶子数量。
///
/// 块定义缺失时返回 0；嵌套参照的块缺失时，该参照本身作为叶子交给调用方。
pub(crate) fn walk_insert<'a>(
    drawing: &'a Drawing,
    insert: &'a BlockInsert,
    mut visit: impl FnMut(Leaf<'a>),
) -> Result<usize, EngineError> {
    let Some(root) = drawing.block(&insert.block_name) else {
        return Ok(0);
    };
    let mut stack = vec![Frame {
        block: root,
        next_child: 0,
        placement: insert.placement(root.base_point),
        layer: &insert.layer,
    }];
    let mut path: Vec<&'a str> = vec![root.name.as_str()];
    let mut active: HashSet<&'a str> = HashSet::from([root.name.as_str()]);
    let mut leaves = 0;

    while let Some(frame) = stack.last_mut() {
        let block = frame.block;
        let Some(child) = block.entities.get(frame.next_child) else {
            stack.pop();
            if let Some(name) = path.pop() {
                active.remove(name);
            }
            continue;
        };
        frame.next_child += 1;
        let placement = frame.placement;
        let layer = if child.inherits_layer() {
            frame.layer
        } else {
            child.layer_name()
        };

        if let Entity::BlockInsert(nested) = child {
            if let Some(definition) = drawing.block(&nested.block_name) {
                if active.contains(definition.name.as_str()) {
                    let mut cycle: Vec<String> = path.iter().map(|name| name.to_string()).collect();
                    cycle.push(definition.name.clone());
                    return Err(EngineError::CyclicBlockReference {
                        block: definition.name.clone(),
                        path: cycle,
                    });
                }
                stack.push(Frame {
                    block: definition,
                    next_child: 0,
                    placement: placement.then(&nested.placement(definition.base_point)),
                    layer,
                });
                path.push(definition.name.as_str());
                active.insert(definition.name.as_str());
                continue;
            }
            warn!(block = %nested.block_name, parent = %block.name, "嵌套块定义缺失，以插入点代替");
        }

        leaves += 1;
        visit(Leaf {
            entity: child,
            placement,
            layer,
            block_name: &block.name,
        });
    }
    Ok(leaves)
}

/// 展开一个图层上的全部顶层实体。每个顶层实体前检查取消标记。
pub fn resolve_layer(
    drawing: &Drawing,
    layer: &str,
    options: &ResolveOptions,
    cancel: &CancellationToken,
) -> Result<LayerResolution, EngineError> {
    let mut resolution = LayerResolution {
        layer: layer.to_string(),
        ..LayerResolution::default()
    };
    for (id, entity) in drawing.layer_entities(layer) {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                written: Vec::new(),
            });
        }
        match entity {
            Entity::BlockInsert(insert) => match options.mode {
                BlockMode::Explode => explode_insert(drawing, *id, insert, options, &mut resolution)?,
                BlockMode::KeepMerge => merge_insert(drawing, *id, insert, options, &mut resolution)?,
            },
            other => resolution.entities.push(ResolvedEntity {
                layer: layer.to_string(),
                shape: Shape::Entity(other.clone()),
                source: SourceRef {
                    entity_id: *id,
                    entity_type: other.dxf_type().to_string(),
                    block_name: None,
                },
            }),
        }
    }
    debug!(
        layer,
        mode = %options.mode,
        resolved = resolution.entities.len(),
        "图层块参照展开完成"
    );
    Ok(resolution)
}

fn insertion_point_fallback(id: EntityId, insert: &BlockInsert) -> ResolvedEntity {
    ResolvedEntity {
        layer: insert.layer.clone(),
        shape: Shape::Composite(vec![Geometry::Point(insert.insert)]),
        source: SourceRef {
            entity_id: id,
            entity_type: "INSERT".to_string(),
            block_name: Some(insert.block_name.clone()),
        },
    }
}

fn explode_insert(
    drawing: &Drawing,
    id: EntityId,
    insert: &BlockInsert,
    options: &ResolveOptions,
    resolution: &mut LayerResolution,
) -> Result<(), EngineError> {
    let mut exploded = Vec::new();
    let leaves = walk_insert(drawing, insert, |leaf| {
        if !options.is_selected(leaf.layer) {
            return;
        }
        let mut entity = leaf.entity.transformed(&leaf.placement, &options.flattening);
        entity.set_layer(leaf.layer);
        exploded.push(ResolvedEntity {
            layer: leaf.layer.to_string(),
            shape: Shape::Entity(entity),
            source: SourceRef {
                entity_id: id,
                entity_type: leaf.entity.dxf_type().to_string(),
                block_name: Some(leaf.block_name.to_string()),
            },
        });
    })?;
    if leaves == 0 {
        warn!(block = %insert.block_name, layer = %insert.layer, "块定义缺失或为空，以插入点代替");
        resolution.entities.push(insertion_point_fallback(id, insert));
    } else {
        resolution.entities.extend(exploded);
    }
    Ok(())
}

fn merge_insert(
    drawing: &Drawing,
    id: EntityId,
    insert: &BlockInsert,
    options: &ResolveOptions,
    resolution: &mut LayerResolution,
) -> Result<(), EngineError> {
    let mut geometries = Vec::new();
    let mut diagnostics = Vec::new();
    // 合并结果归属实例图层，叶子自身的图层不参与选择
    walk_insert(drawing, insert, |leaf| {
        let entity = leaf.entity.transformed(&leaf.placement, &options.flattening);
        match entity_geometries(&entity, &options.flattening) {
            Ok(mapped) => geometries.extend(mapped),
            Err(NormalizeError::Unsupported(kind)) => diagnostics.push(Diagnostic::UnsupportedEntity {
                layer: insert.layer.clone(),
                entity_type: kind,
                entity_id: id,
            }),
            Err(err) => diagnostics.push(Diagnostic::Geometry {
                layer: insert.layer.clone(),
                message: format!("块 {} 内实体: {err}", leaf.block_name),
            }),
        }
    })?;
    resolution.diagnostics.extend(diagnostics);

    let merged = merge_instance(
        geometries,
        options.line_merge_tolerance,
        options.keep_merge_explode_limit,
    );
    if merged.is_empty() {
        warn!(block = %insert.block_name, layer = %insert.layer, "块参照没有可合并的几何，以插入点代替");
        resolution.entities.push(insertion_point_fallback(id, insert));
        return Ok(());
    }
    resolution.entities.push(ResolvedEntity {
        layer: insert.layer.clone(),
        shape: Shape::Composite(merged),
        source: SourceRef {
            entity_id: id,
            entity_type: "INSERT".to_string(),
            block_name: Some(insert.block_name.clone()),
        },
    });
    Ok(())
}
