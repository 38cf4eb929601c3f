use nova_config::json_schema;

#[test]
fn schema_accepts_string_byte_sizes() {
    let schema = serde_json::to_value(json_schema()).expect("serialize schema");
    let total = &schema["definitions"]["MemoryConfig"]["properties"]["total_bytes"];
    let variants = total["anyOf"].as_array().expect("anyOf");
    assert!(variants.iter().any(|variant| variant["type"] == "string"));
}

#[test]
fn schema_lists_top_level_sections() {
    let schema = serde_json::to_value(json_schema()).expect("serialize schema");
    let properties = schema["properties"].as_object().expect("properties");
    for section in ["index", "memory", "logging"] {
        assert!(properties.contains_key(section), "missing {section}");
    }
}
