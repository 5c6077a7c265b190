//! Value checks producing [`Error::Assertion`].

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Fail unless `actual == expected`.
///
/// # Errors
///
/// Returns `Error::Assertion` naming `what` and both values.
pub fn assert_equal<T: PartialEq + Debug + ?Sized>(what: &str, actual: &T, expected: &T) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Assertion(format!(
            "{what}: {actual:?}, expected: {expected:?}"
        )))
    }
}

/// Check every object in `objects` whose fields equal `to_match` against the
/// fields in `expected`. At least one object must match.
///
/// # Errors
///
/// Returns `Error::Assertion` for a matching object with a wrong field, or if
/// nothing matched.
pub fn check_array_result(
    objects: &[Value],
    to_match: &Map<String, Value>,
    expected: &Map<String, Value>,
) -> Result<()> {
    let mut matched = 0usize;
    for item in objects {
        let selected = to_match.iter().all(|(k, v)| item.get(k) == Some(v));
        if !selected {
            continue;
        }
        for (key, value) in expected {
            if item.get(key) != Some(value) {
                return Err(Error::Assertion(format!(
                    "{item} : expected {key}={value}"
                )));
            }
        }
        matched += 1;
    }
    if matched == 0 {
        return Err(Error::Assertion(format!(
            "no objects matched {}",
            Value::Object(to_match.clone())
        )));
    }
    Ok(())
}
