/// Initial state construction from the typed schema.

use crate::schema::snapshot::StateSnapshot;
use crate::schema::state::{SchemaError, StateSchema, Value, VariableDecl};
use crate::schema::story::DefaultOverride;

/// Build the unique starting snapshot for `schema`.
///
/// Integer variables resolve to their declared default, then to the
/// document-level override when they are its target, then to `min`.
/// Booleans start `false`; enums start at their default or first value.
pub fn build_initial_state(
    schema: &StateSchema,
    default_override: Option<&DefaultOverride>,
) -> Result<StateSnapshot, SchemaError> {
    schema.validate()?;
    if let Some(ov) = default_override {
        check_override(schema, ov)?;
    }

    let mut state = Vec::with_capacity(schema.len());
    for (name, decl) in schema.iter() {
        let value = match decl {
            VariableDecl::Int { min, default, .. } => {
                let from_override = default_override
                    .filter(|ov| ov.variable == *name)
                    .map(|ov| ov.value);
                Value::Int(default.or(from_override).unwrap_or(*min))
            }
            VariableDecl::Bool => Value::Bool(false),
            VariableDecl::Enum { values, default } => {
                let first = values
                    .first()
                    .ok_or_else(|| SchemaError::EmptyEnum(name.clone()))?;
                Value::Str(default.as_ref().unwrap_or(first).clone())
            }
        };
        state.push((name.clone(), value));
    }
    Ok(state.into_iter().collect())
}

/// The override must name a declared integer variable. Its value is
/// range-checked only when it is used, i.e. the variable has no default.
pub fn check_override(schema: &StateSchema, ov: &DefaultOverride) -> Result<(), SchemaError> {
    match schema.get(&ov.variable) {
        Some(VariableDecl::Int { default: Some(_), .. }) => Ok(()),
        Some(VariableDecl::Int { min, max, default: None }) => {
            if ov.value < *min || ov.value > *max {
                return Err(SchemaError::DefaultOutOfRange {
                    variable: ov.variable.clone(),
                    default: ov.value,
                    min: *min,
                    max: *max,
                });
            }
            Ok(())
        }
        _ => Err(SchemaError::InvalidOverrideTarget(ov.variable.clone())),
    }
}
