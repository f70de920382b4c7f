//! State Diffs
//!
//! Diffs are the only way game state changes. A diff addresses a field of the
//! serialized `GameState` with a dot path (`units.u1.models.0.wounds`);
//! numeric segments index arrays, everything else is an object key.
//!
//! Application works on the JSON form of the state and decodes the result back
//! into a `GameState`, so a diff that would produce an ill-typed state fails
//! instead of corrupting anything.

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

use super::state::{GameState, PlayerId};

// =============================================================================
// DIFF
// =============================================================================

/// Diff operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    /// Replace (or create) the value at the path.
    Set,
    /// Push the value onto the array at the path.
    Append,
    /// Remove matching elements from the array at the path, or the path itself
    /// when no value is given.
    Remove,
}

/// A single addressed mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Operation.
    pub op: DiffOp,
    /// Dot path into the serialized state.
    pub path: String,
    /// Operand (`null` for a plain remove).
    #[serde(default)]
    pub value: Value,
}

impl Diff {
    /// Set a value.
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { op: DiffOp::Set, path: path.into(), value: value.into() }
    }

    /// Append a value to an array.
    pub fn append(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { op: DiffOp::Append, path: path.into(), value: value.into() }
    }

    /// Remove every element equal to `value` from an array.
    pub fn remove_value(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { op: DiffOp::Remove, path: path.into(), value: value.into() }
    }

    /// Remove the key or index at the path.
    pub fn remove(path: impl Into<String>) -> Self {
        Self { op: DiffOp::Remove, path: path.into(), value: Value::Null }
    }

    /// Add a flag to a unit.
    pub fn add_flag(unit_id: &str, flag: &str) -> Self {
        Self::append(unit_field(unit_id, "flags"), flag)
    }

    /// Clear a flag from a unit.
    pub fn clear_flag(unit_id: &str, flag: &str) -> Self {
        Self::remove_value(unit_field(unit_id, "flags"), flag)
    }

    /// Set a serializable value.
    pub fn set_serialized<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, DiffError> {
        let value = serde_json::to_value(value).map_err(|e| DiffError::Encode(e.to_string()))?;
        Ok(Self::set(path, value))
    }
}

/// Path to a unit field.
pub fn unit_field(unit_id: &str, field: &str) -> String {
    format!("units.{}.{}", unit_id, field)
}

/// Path to a model field.
pub fn model_field(unit_id: &str, model_index: usize, field: &str) -> String {
    format!("units.{}.models.{}.{}", unit_id, model_index, field)
}

/// Path to a player field.
pub fn player_field(player: PlayerId, field: &str) -> String {
    format!("players.{}.{}", player.0, field)
}

/// A committed, numbered list of diffs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffBatch {
    /// Strictly increasing batch number (first batch is 1).
    pub batch_seq: u64,
    /// Diffs, applied in order.
    pub diffs: Vec<Diff>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Diff application errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// Empty path or empty segment.
    #[error("malformed path '{0}'")]
    MalformedPath(String),

    /// An intermediate segment does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Array index past the end.
    #[error("index {index} out of range at {path}")]
    IndexOutOfRange {
        /// Full path.
        path: String,
        /// Offending index.
        index: usize,
    },

    /// Tried to descend into a scalar.
    #[error("not a container at {0}")]
    NotAContainer(String),

    /// Append or value-remove on something other than an array.
    #[error("not an array at {0}")]
    NotAnArray(String),

    /// State could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Resulting state is not a valid `GameState`.
    #[error("resulting state is invalid: {0}")]
    Decode(String),
}

// =============================================================================
// APPLICATION
// =============================================================================

/// Apply diffs to a state, returning the new state. The input is untouched.
pub fn apply_diffs(state: &GameState, diffs: &[Diff]) -> Result<GameState, DiffError> {
    let mut root = serde_json::to_value(state).map_err(|e| DiffError::Encode(e.to_string()))?;
    for diff in diffs {
        apply_to_value(&mut root, diff)?;
    }
    serde_json::from_value(root).map_err(|e| DiffError::Decode(e.to_string()))
}

/// Apply a single diff to a JSON tree.
pub fn apply_to_value(root: &mut Value, diff: &Diff) -> Result<(), DiffError> {
    let segments: Vec<&str> = diff.path.split('.').collect();
    if diff.path.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(DiffError::MalformedPath(diff.path.clone()));
    }

    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(DiffError::MalformedPath(diff.path.clone())),
    };

    let mut node = root;
    for segment in parents {
        node = descend(node, segment, &diff.path)?;
    }

    match diff.op {
        DiffOp::Set => set_child(node, last, diff.value.clone(), &diff.path),
        DiffOp::Append => {
            let target = descend(node, last, &diff.path)?;
            match target {
                Value::Array(items) => {
                    items.push(diff.value.clone());
                    Ok(())
                }
                _ => Err(DiffError::NotAnArray(diff.path.clone())),
            }
        }
        DiffOp::Remove if !diff.value.is_null() => {
            let target = descend(node, last, &diff.path)?;
            match target {
                Value::Array(items) => {
                    items.retain(|item| item != &diff.value);
                    Ok(())
                }
                _ => Err(DiffError::NotAnArray(diff.path.clone())),
            }
        }
        DiffOp::Remove => remove_child(node, last, &diff.path),
    }
}

fn descend<'a>(node: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value, DiffError> {
    match node {
        Value::Object(map) => map
            .get_mut(segment)
            .ok_or_else(|| DiffError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let index = parse_index(segment, path)?;
            items
                .get_mut(index)
                .ok_or_else(|| DiffError::IndexOutOfRange { path: path.to_string(), index })
        }
        _ => Err(DiffError::NotAContainer(path.to_string())),
    }
}

fn set_child(node: &mut Value, segment: &str, value: Value, path: &str) -> Result<(), DiffError> {
    match node {
        Value::Object(map) => {
            map.insert(segment.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(segment, path)?;
            if index < items.len() {
                items[index] = value;
                Ok(())
            } else if index == items.len() {
                items.push(value);
                Ok(())
            } else {
                Err(DiffError::IndexOutOfRange { path: path.to_string(), index })
            }
        }
        _ => Err(DiffError::NotAContainer(path.to_string())),
    }
}

fn remove_child(node: &mut Value, segment: &str, path: &str) -> Result<(), DiffError> {
    match node {
        Value::Object(map) => map
            .remove(segment)
            .map(|_| ())
            .ok_or_else(|| DiffError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let index = parse_index(segment, path)?;
            if index < items.len() {
                items.remove(index);
                Ok(())
            } else {
                Err(DiffError::IndexOutOfRange { path: path.to_string(), index })
            }
        }
        _ => Err(DiffError::NotAContainer(path.to_string())),
    }
}

fn parse_index(segment: &str, path: &str) -> Result<usize, DiffError> {
    segment
        .parse::<usize>()
        .map_err(|_| DiffError::PathNotFound(path.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::game::setup::demo_state;
    use crate::game::state::flags;

    fn first_unit_id(state: &GameState) -> String {
        state.units.keys().next().unwrap().clone()
    }

    #[test]
    fn test_set_model_wounds() {
        let state = demo_state();
        let id = first_unit_id(&state);
        let next = apply_diffs(&state, &[Diff::set(model_field(&id, 0, "wounds"), 0)]).unwrap();
        assert_eq!(next.units[&id].models[0].wounds, 0);
        assert_eq!(state.units[&id].models[0].wounds, state.units[&id].models[0].max_wounds);
    }

    #[test]
    fn test_flag_append_and_remove() {
        let state = demo_state();
        let id = first_unit_id(&state);

        let flagged = apply_diffs(&state, &[Diff::add_flag(&id, flags::MOVED)]).unwrap();
        assert!(flagged.units[&id].has_flag(flags::MOVED));

        let cleared = apply_diffs(&flagged, &[Diff::clear_flag(&id, flags::MOVED)]).unwrap();
        assert!(!cleared.units[&id].has_flag(flags::MOVED));

        // Clearing an absent flag is a no-op
        let again = apply_diffs(&cleared, &[Diff::clear_flag(&id, flags::MOVED)]).unwrap();
        assert_eq!(again, cleared);
    }

    #[test]
    fn test_set_player_field_and_optional() {
        let state = demo_state();
        let next = apply_diffs(&state, &[
            Diff::set(player_field(PlayerId::TWO, "victory_points"), 7),
            Diff::set("selecting_player", 2),
        ]).unwrap();
        assert_eq!(next.players[&PlayerId::TWO].victory_points, 7);
        assert_eq!(next.selecting_player, Some(PlayerId::TWO));

        let cleared = apply_diffs(&next, &[Diff::set("selecting_player", Value::Null)]).unwrap();
        assert_eq!(cleared.selecting_player, None);
    }

    #[test]
    fn test_missing_path_fails() {
        let state = demo_state();
        let err = apply_diffs(&state, &[Diff::set("units.nope.name", "x")]).unwrap_err();
        assert!(matches!(err, DiffError::PathNotFound(_)));
    }

    #[test]
    fn test_malformed_path_fails() {
        let state = demo_state();
        assert!(matches!(
            apply_diffs(&state, &[Diff::set("units..name", "x")]),
            Err(DiffError::MalformedPath(_))
        ));
        assert!(matches!(
            apply_diffs(&state, &[Diff::set("", 1)]),
            Err(DiffError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_ill_typed_result_fails() {
        let state = demo_state();
        let err = apply_diffs(&state, &[Diff::set("turn_number", "three")]).unwrap_err();
        assert!(matches!(err, DiffError::Decode(_)));
    }

    #[test]
    fn test_append_to_scalar_fails() {
        let state = demo_state();
        assert!(matches!(
            apply_diffs(&state, &[Diff::append("turn_number", 1)]),
            Err(DiffError::NotAnArray(_))
        ));
    }

    #[test]
    fn test_array_index_bounds() {
        let mut root = json!({"items": [1, 2]});
        apply_to_value(&mut root, &Diff::set("items.2", 3)).unwrap();
        assert_eq!(root, json!({"items": [1, 2, 3]}));

        let err = apply_to_value(&mut root, &Diff::set("items.9", 3)).unwrap_err();
        assert!(matches!(err, DiffError::IndexOutOfRange { index: 9, .. }));

        apply_to_value(&mut root, &Diff::remove("items.0")).unwrap();
        assert_eq!(root, json!({"items": [2, 3]}));
    }

    #[test]
    fn test_diff_json_shape() {
        let diff = Diff::set("units.u1.models.0.wounds", 1);
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json, json!({"op": "set", "path": "units.u1.models.0.wounds", "value": 1}));

        let parsed: Diff = serde_json::from_value(json!({"op": "remove", "path": "a.b"})).unwrap();
        assert_eq!(parsed, Diff::remove("a.b"));
    }
}
