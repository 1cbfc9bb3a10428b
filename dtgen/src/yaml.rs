//! Reading configuration and schema documents that may be empty.

use serde::de::DeserializeOwned;

/// Deserialize a YAML document, reading an empty one as `T::default()`.
///
/// Empty covers whitespace, comments and a bare `---`/`...` document, as well as an explicit null.
pub(crate) fn from_str<T>(text: &str) -> Result<T, serde_yaml::Error>
where
    T: DeserializeOwned + Default,
{
    // No document at all is an error for serde_yaml.
    if is_blank(text) {
        return Ok(T::default());
    }

    Ok(serde_yaml::from_str::<Option<T>>(text)?.unwrap_or_default())
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}
