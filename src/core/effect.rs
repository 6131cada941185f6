/// Effect application — typed, bounds-checked snapshot mutation.

use thiserror::Error;

use crate::schema::snapshot::StateSnapshot;
use crate::schema::state::{StateSchema, Value, VariableDecl};
use crate::schema::story::{Effect, EffectOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("effect references unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("value {value} is out of bounds [{min}, {max}] for '{variable}'")]
    OutOfBounds {
        variable: String,
        value: i128,
        min: i64,
        max: i64,
    },
    #[error("variable '{variable}': {reason}")]
    TypeMismatch { variable: String, reason: String },
    #[error("enum variable '{variable}' has no value '{value}'")]
    InvalidEnumValue { variable: String, value: String },
}

fn mismatch(variable: &str, reason: String) -> EffectError {
    EffectError::TypeMismatch {
        variable: variable.to_string(),
        reason,
    }
}

/// Check an effect's operator and value against its declaration, without
/// a snapshot. Assignments to integers are also range-checked here.
pub fn check_effect(schema: &StateSchema, effect: &Effect) -> Result<(), EffectError> {
    let decl = schema
        .get(&effect.variable)
        .ok_or_else(|| EffectError::UnknownVariable(effect.variable.clone()))?;
    check_shape(decl, effect)?;
    if let (VariableDecl::Int { min, max, .. }, EffectOp::Assign, Value::Int(n)) =
        (decl, effect.op, &effect.value)
    {
        check_bounds(&effect.variable, i128::from(*n), *min, *max)?;
    }
    Ok(())
}

fn check_shape(decl: &VariableDecl, effect: &Effect) -> Result<(), EffectError> {
    let var = effect.variable.as_str();
    let kind = decl.kind_name();
    let value_fits = match decl {
        VariableDecl::Int { .. } => effect.value.as_int().is_some(),
        VariableDecl::Bool => effect.value.as_bool().is_some(),
        VariableDecl::Enum { .. } => effect.value.as_str().is_some(),
    };
    if !value_fits {
        return Err(mismatch(
            var,
            format!("{} variable cannot take a {} value", kind, effect.value.type_name()),
        ));
    }
    if effect.op != EffectOp::Assign && !matches!(decl, VariableDecl::Int { .. }) {
        return Err(mismatch(var, format!("{} variable only supports '=', got '{}'", kind, effect.op)));
    }
    if let (VariableDecl::Enum { .. }, Value::Str(s)) = (decl, &effect.value) {
        if !decl.admits(&effect.value) {
            return Err(EffectError::InvalidEnumValue {
                variable: var.to_string(),
                value: s.clone(),
            });
        }
    }
    Ok(())
}

fn check_bounds(variable: &str, value: i128, min: i64, max: i64) -> Result<i64, EffectError> {
    if value < i128::from(min) || value > i128::from(max) {
        return Err(EffectError::OutOfBounds {
            variable: variable.to_string(),
            value,
            min,
            max,
        });
    }
    // in [min, max], so it fits
    Ok(value as i64)
}

/// Applies ordered effect lists against a schema.
///
/// Each effect sees the result of the ones before it. A failed call
/// returns no snapshot at all; the input snapshot is never modified.
#[derive(Debug, Clone, Copy)]
pub struct EffectApplier<'a> {
    schema: &'a StateSchema,
}

impl<'a> EffectApplier<'a> {
    pub fn new(schema: &'a StateSchema) -> Self {
        Self { schema }
    }

    pub fn apply(&self, effects: &[Effect], snapshot: &StateSnapshot) -> Result<StateSnapshot, EffectError> {
        let mut next = snapshot.clone();
        for effect in effects {
            let value = self.apply_one(effect, &next)?;
            next = next.with(&effect.variable, value);
        }
        Ok(next)
    }

    fn apply_one(&self, effect: &Effect, current: &StateSnapshot) -> Result<Value, EffectError> {
        let var = effect.variable.as_str();
        let decl = self
            .schema
            .get(var)
            .ok_or_else(|| EffectError::UnknownVariable(var.to_string()))?;
        check_shape(decl, effect)?;

        match decl {
            VariableDecl::Int { min, max, .. } => {
                let operand = i128::from(effect.value.as_int().unwrap_or_default());
                let held = current
                    .get(var)
                    .ok_or_else(|| EffectError::UnknownVariable(var.to_string()))?;
                let held = held.as_int().ok_or_else(|| {
                    mismatch(var, format!("snapshot holds {} for an int variable", held.type_name()))
                })?;
                let result = match effect.op {
                    EffectOp::Assign => operand,
                    EffectOp::Increment => i128::from(held) + operand,
                    EffectOp::Decrement => i128::from(held) - operand,
                };
                Ok(Value::Int(check_bounds(var, result, *min, *max)?))
            }
            VariableDecl::Bool | VariableDecl::Enum { .. } => {
                if !current.contains(var) {
                    return Err(EffectError::UnknownVariable(var.to_string()));
                }
                Ok(effect.value.clone())
            }
        }
    }
}
