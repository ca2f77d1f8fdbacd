//! JSON Schema helpers shared by the model router and the retrieval protocol.

use schemars::JsonSchema;
use serde_json::Value;

/// Validate a JSON value against a JSON Schema.
///
/// Returns every violation found, not just the first. A schema that cannot
/// be compiled is reported as a single violation.
pub fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| vec![format!("invalid schema: {e}")])?;
    if validator.is_valid(value) {
        return Ok(());
    }
    Err(validator.iter_errors(value).map(|e| e.to_string()).collect())
}

/// Generate a JSON Schema `Value` for `T`, without the `$schema` key.
pub fn schema_for<T: JsonSchema>() -> Value {
    let mut v = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = v.as_object_mut() {
        obj.remove("$schema");
    }
    v
}

/// Human/model readable rendering of a schema for prompts.
pub fn describe_schema(schema: &Value) -> String {
    serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Decision {
        approve: bool,
        reason: String,
    }

    #[test]
    fn valid_value_passes() {
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        });
        assert!(validate_against_schema(&schema, &json!({"name": "Ada"})).is_ok());
    }

    #[test]
    fn all_violations_are_reported() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer" }
            },
            "required": ["name", "age"]
        });
        let violations = validate_against_schema(&schema, &json!({})).unwrap_err();
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let violations =
            validate_against_schema(&json!({"type": "string"}), &json!(42)).unwrap_err();
        assert!(!violations.is_empty());
    }

    #[test]
    fn derived_schema_validates_its_own_shape() {
        let schema = schema_for::<Decision>();
        assert!(schema.get("$schema").is_none());
        let valid = json!({"approve": true, "reason": "ok"});
        assert!(validate_against_schema(&schema, &valid).is_ok());
        assert!(validate_against_schema(&schema, &json!({"approve": "yes"})).is_err());
    }
}
