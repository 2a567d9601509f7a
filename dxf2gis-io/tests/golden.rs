use serde_json::{Map, Value, json};
use dxf2gis_core::document::Drawing;

/// 以图层与块为单位的结构摘要，只记录实体类型，坐标由各测试单独断言。
pub fn structure_summary(drawing: &Drawing) -> Value {
    let mut layers = Map::new();
    for name in drawing.layer_names() {
        let kinds: Vec<Value> = drawing
            .layer_entities(name)
            .iter()
            .map(|(_, entity)| Value::String(entity.dxf_type().to_string()))
            .collect();
        layers.insert(name.to_string(), Value::Array(kinds));
    }
    let mut blocks = Map::new();
    for block in drawing.blocks() {
        let kinds: Vec<Value> = block
            .entities
            .iter()
            .map(|entity| json!([entity.dxf_type(), entity.layer_name()]))
            .collect();
        blocks.insert(block.name.clone(), Value::Array(kinds));
    }
    json!({ "layers": layers, "blocks": blocks })
}

pub fn assert_structure(drawing: &Drawing, expected: Value) {
    let actual = structure_summary(drawing);
    if actual != expected {
        panic!(
            "图纸结构与期望不一致\n期望: {}\n实际: {}",
            serde_json::to_string_pretty(&expected).unwrap_or_default(),
            serde_json::to_string_pretty(&actual).unwrap_or_default()
        );
    }
}
