//! Built-in native functions.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{NativeFn, Value};

/// Natives every VM starts with: name, arity, implementation.
pub(super) const NATIVES: &[(&str, Option<usize>, NativeFn)] = &[("clock", Some(0), clock)];

/// Seconds since the UNIX epoch.
pub fn clock(_args: &[Value]) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Value::Number(seconds)
}
