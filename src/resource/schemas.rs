//! Custom schema functions.
use schemars::{gen::SchemaGenerator, schema::Schema};
use serde_json::{from_value, json};

// v1alpha1 encodes weights as decimal strings, v1alpha2 as integers.
pub fn weight(_: &mut SchemaGenerator) -> Schema {
    from_value(json!({
        "anyOf": [
            { "type": "integer", "minimum": 0 },
            { "type": "string", "pattern": "^[0-9]+$" }
        ]
    }))
    .unwrap()
}
