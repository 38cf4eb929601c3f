use schemars::schema::{RootSchema, Schema};
use schemars::schema_for;
use serde_json::json;

use crate::NovaIndexConfig;

/// JSON schema for the index engine's TOML config.
///
/// This schema is intended for editor tooling (TOML JSON schema integration) and CI validation.
#[must_use]
pub fn json_schema() -> RootSchema {
    let mut schema = schema_for!(NovaIndexConfig);
    allow_human_byte_sizes(&mut schema);
    schema
}

fn allow_human_byte_sizes(schema: &mut RootSchema) {
    // `ByteSize` derives a plain integer schema; the deserializer also accepts strings like
    // "512MB".
    for property in [
        "total_bytes",
        "inverted_index_bytes",
        "forward_index_bytes",
        "other_bytes",
    ] {
        replace_property(
            schema,
            "MemoryConfig",
            property,
            schema_from_json(json!({
                "default": null,
                "anyOf": [
                    { "type": "integer", "minimum": 0 },
                    { "type": "string", "pattern": "^\\s*[0-9]+\\s*([kKmMgG]([iI]?[bB])?|[bB])?\\s*$" },
                    { "type": "null" }
                ]
            })),
        );
    }
}

fn schema_from_json(value: serde_json::Value) -> Schema {
    serde_json::from_value(value).unwrap_or(Schema::Bool(true))
}

fn replace_property(
    schema: &mut RootSchema,
    definition_name: &str,
    property_name: &str,
    property_schema: Schema,
) {
    let Some(definition) = schema.definitions.get_mut(definition_name) else {
        return;
    };

    let Schema::Object(obj) = definition else {
        return;
    };

    obj.object()
        .properties
        .insert(property_name.to_string(), property_schema);
}
