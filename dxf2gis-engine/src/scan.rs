use std::path::Path;

use dxf2gis_core::document::{Drawing, Entity};
use dxf2gis_io::DrawingLoader;
use indexmap::IndexMap;
use tracing::info;

use crate::errors::EngineError;
use crate::resolve::{BlockMode, walk_insert};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: String,
    pub entity_count: usize,
}

/// 统计每个有效图层上的可见实体数，按首次出现的顺序返回。
///
/// explode 模式下块参照按放置展开：叶子计入其有效图层，块缺失或为空时参照本身计一次。
/// keep-merge 模式下每个参照合并为一个要素，只计入参照所在图层。
/// 只定义而从未放置的块内容不计入。
pub fn scan_layers(drawing: &Drawing, mode: BlockMode) -> Result<Vec<LayerSummary>, EngineError> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for (_, entity) in drawing.entities() {
        match (entity, mode) {
            (Entity::BlockInsert(insert), BlockMode::Explode) => {
                let leaves = walk_insert(drawing, insert, |leaf| {
                    *counts.entry(leaf.layer).or_default() += 1;
                })?;
                if leaves == 0 {
                    *counts.entry(insert.layer.as_str()).or_default() += 1;
                }
            }
            (Entity::BlockInsert(insert), BlockMode::KeepMerge) => {
                // 仍需遍历一次以发现循环引用
                walk_insert(drawing, insert, |_| {})?;
                *counts.entry(insert.layer.as_str()).or_default() += 1;
            }
            (other, _) => *counts.entry(other.layer_name()).or_default() += 1,
        }
    }
    Ok(counts
        .into_iter()
        .map(|(name, entity_count)| LayerSummary {
            name: name.to_string(),
            entity_count,
        })
        .collect())
}

/// 读取图纸并扫描图层。读取失败返回 `DrawingRead`，不会返回部分结果。
pub fn scan_path(
    loader: &dyn DrawingLoader,
    path: &Path,
    mode: BlockMode,
) -> Result<(Drawing, Vec<LayerSummary>), EngineError> {
    let drawing = loader.load(path).map_err(|source| EngineError::DrawingRead {
        path: path.to_path_buf(),
        source,
    })?;
    let layers = scan_layers(&drawing, mode)?;
    info!(path = %path.display(), layers = layers.len(), %mode, "图层扫描完成");
    Ok((drawing, layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dxf2gis_core::document::{BlockDefinition, BlockInsert, Point};
    use dxf2gis_core::geometry::{Point2, Vector2};

    fn point(layer: &str) -> Entity {
        Entity::Point(Point {
            location: Point2::new(0.0, 0.0),
            layer: layer.to_string(),
        })
    }

    #[test]
    fn placed_block_content_counts_toward_effective_layers() {
        let mut drawing = Drawing::new();
        drawing.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), "ROAD");
        drawing.add_block_definition(BlockDefinition {
            name: "POLE".to_string(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![point("0"), point("0"), point("LABEL")],
        });
        drawing.add_block_definition(BlockDefinition {
            name: "UNUSED".to_string(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![point("HIDDEN")],
        });
        drawing.add_block_insert("POLE", Point2::new(5.0, 5.0), Vector2::new(1.0, 1.0), 0.0, "POLE");
        drawing.add_block_insert("MISSING", Point2::new(5.0, 5.0), Vector2::new(1.0, 1.0), 0.0, "GHOST");

        let layers = scan_layers(&drawing, BlockMode::Explode).expect("扫描失败");
        let summary: Vec<(&str, usize)> = layers
            .iter()
            .map(|layer| (layer.name.as_str(), layer.entity_count))
            .collect();
        assert_eq!(summary, vec![("ROAD", 1), ("POLE", 2), ("LABEL", 1), ("GHOST", 1)]);
        assert_eq!(
            scan_layers(&drawing, BlockMode::Explode).expect("重复扫描失败"),
            layers
        );
    }

    #[test]
    fn keep_merge_counts_each_instance_on_its_own_layer() {
        let mut drawing = Drawing::new();
        drawing.add_block_definition(BlockDefinition {
            name: "SIGN".to_string(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![point("LABEL"), point("0")],
        });
        drawing.add_block_insert("SIGN", Point2::new(1.0, 1.0), Vector2::new(1.0, 1.0), 0.0, "POLE");
        drawing.add_block_insert("SIGN", Point2::new(2.0, 2.0), Vector2::new(1.0, 1.0), 0.0, "POLE");

        let layers = scan_layers(&drawing, BlockMode::KeepMerge).expect("扫描失败");
        assert_eq!(
            layers,
            vec![LayerSummary {
                name: "POLE".to_string(),
                entity_count: 2,
            }]
        );
    }

    #[test]
    fn cyclic_blocks_fail_the_scan() {
        let mut drawing = Drawing::new();
        let insert = |name: &str| {
            Entity::BlockInsert(BlockInsert {
                block_name: name.to_string(),
                insert: Point2::new(0.0, 0.0),
                scale: Vector2::new(1.0, 1.0),
                rotation: 0.0,
                layer: "0".to_string(),
            })
        };
        drawing.add_block_definition(BlockDefinition {
            name: "A".to_string(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![insert("B")],
        });
        drawing.add_block_definition(BlockDefinition {
            name: "B".to_string(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![insert("A")],
        });
        drawing.add_block_insert("A", Point2::new(0.0, 0.0), Vector2::new(1.0, 1.0), 0.0, "LOOP");
        for mode in [BlockMode::Explode, BlockMode::KeepMerge] {
            let err = scan_layers(&drawing, mode).unwrap_err();
            assert!(matches!(err, EngineError::CyclicBlockReference { .. }));
        }
    }
}
