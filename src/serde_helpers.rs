//! Serde helpers for diagnostic deserialization of wire frames.
//!
//! Unknown fields are tolerated but logged so that protocol drift on the server
//! side shows up in the logs, and failures carry the JSON path that broke.

use std::any::type_name;

use serde::de::DeserializeOwned;

/// A deserialization failure together with the JSON path where it happened.
///
/// The path is empty when the failure is not tied to a field, e.g. a syntax
/// error before the first key or trailing characters after the document.
#[derive(Debug)]
pub(crate) struct PathError {
    pub path: String,
    pub inner: serde_json::Error,
}

/// Deserialize `text` into `T`, logging a warning for every field that `T` does
/// not know about.
///
/// # Example
///
/// ```ignore
/// let envelope: RawEnvelope = from_str_with_warnings(r#"{"type":"typing","extra":1}"#)?;
/// // Logs: WARN unknown field in frame field="extra"
/// ```
pub(crate) fn from_str_with_warnings<T: DeserializeOwned>(text: &str) -> Result<T, PathError> {
    tracing::trace!(type_name = %type_name::<T>(), %text, "deserializing frame");

    let (value, unknown_paths) = from_str_with_unknown::<T>(text)?;
    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            "unknown field in frame"
        );
    }

    Ok(value)
}

/// Deserialize `text` into `T` and return the paths of the fields `T` ignored.
fn from_str_with_unknown<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), PathError> {
    let mut unknown_paths: Vec<String> = Vec::new();
    let mut record = |path: serde_ignored::Path<'_>| unknown_paths.push(path.to_string());
    let jd = &mut serde_json::Deserializer::from_str(text);

    let result: Result<T, _> = {
        let ignored = serde_ignored::Deserializer::new(&mut *jd, &mut record);
        serde_path_to_error::deserialize(ignored)
    };

    let value = result.map_err(|e| {
        // The root path renders as "."
        let path = e.path().to_string();
        PathError {
            path: if path == "." { String::new() } else { path },
            inner: e.into_inner(),
        }
    })?;

    jd.end().map_err(|inner| PathError {
        path: String::new(),
        inner,
    })?;

    Ok((value, unknown_paths))
}
