use serde_json::Value;

use ordis_core::error::{OrdisError, Result};

/// Validate `args` against a tool's JSON schema, applying flat-param
/// recovery: when a required wrapper object is absent but every required
/// leaf field of that wrapper is present at the top level, the wrapper is
/// assembled and validation proceeds. (Models sometimes omit the outer
/// object.)
///
/// Returns the possibly-rewritten argument object, or `InvalidArgs` without
/// the tool ever being invoked.
pub fn validate_args(schema: &Value, args: Value) -> Result<Value> {
    let mut args = match args {
        Value::Object(_) => args,
        Value::Null => Value::Object(Default::default()),
        other => {
            return Err(OrdisError::InvalidArgs(format!(
                "expected an object, got {}",
                type_name(&other)
            )))
        }
    };

    let properties = schema.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for field in &required {
        if args.get(field).is_some() {
            continue;
        }
        let field_schema = properties.and_then(|p| p.get(*field));
        if let Some(recovered) = recover_wrapper(field_schema, &args) {
            args.as_object_mut()
                .expect("args is an object")
                .insert(field.to_string(), recovered);
        } else {
            return Err(OrdisError::InvalidArgs(format!(
                "missing required field '{}'",
                field
            )));
        }
    }

    if let Some(properties) = properties {
        for (key, prop_schema) in properties {
            if let Some(value) = args.get(key) {
                check_type(key, prop_schema, value)?;
            }
        }
    }

    Ok(args)
}

/// Flat-param recovery: build the missing wrapper from top-level leaves if
/// the wrapper's required fields are all present there.
fn recover_wrapper(field_schema: Option<&Value>, args: &Value) -> Option<Value> {
    let field_schema = field_schema?;
    if field_schema.get("type").and_then(Value::as_str) != Some("object") {
        return None;
    }
    let leaf_props = field_schema.get("properties")?.as_object()?;
    let leaf_required: Vec<&str> = field_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if leaf_required.is_empty() {
        return None;
    }
    for leaf in &leaf_required {
        args.get(leaf)?;
    }

    let mut wrapper = serde_json::Map::new();
    for key in leaf_props.keys() {
        if let Some(value) = args.get(key) {
            wrapper.insert(key.clone(), value.clone());
        }
    }
    Some(Value::Object(wrapper))
}

fn check_type(key: &str, prop_schema: &Value, value: &Value) -> Result<()> {
    let declared = match prop_schema.get("type").and_then(Value::as_str) {
        Some(t) => t,
        None => return Ok(()),
    };
    let ok = match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(OrdisError::InvalidArgs(format!(
            "field '{}' should be {}, got {}",
            key,
            declared,
            type_name(value)
        )))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
