//! Typed parameter decoding.
//!
//! Each task kind declares its parameter schema as a plain serde struct with
//! `deny_unknown_fields`. The untyped `params` block from the task list is
//! re-materialized through `serde_yaml` into that shape; any missing field,
//! unknown field, or type mismatch surfaces as a validation error carrying
//! the task label.

use serde::de::DeserializeOwned;

use crate::error::EngineError;

/// Decode a task's untyped parameter block into its typed shape.
///
/// A null/absent block decodes as an empty mapping, so tasks whose
/// parameters are all optional still validate.
pub fn decode<T: DeserializeOwned>(
    task: &str,
    params: &serde_yaml::Value,
) -> Result<T, EngineError> {
    let value = if params.is_null() {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    } else {
        params.clone()
    };

    serde_yaml::from_value(value)
        .map_err(|err| EngineError::validation(task, format!("invalid parameters: {err}")))
}

/// Serde adapter for duration strings of the form `<number><unit>` with
/// units `ns`, `us`, `ms`, `s`, `m`, `h`, parsed greedily and summed
/// (`1h30m`). Backed by `humantime`.
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct DemoParams {
        name: String,
        #[serde(default)]
        count: usize,
        #[serde(default, with = "duration")]
        timeout: Duration,
    }

    fn yaml(doc: &str) -> serde_yaml::Value {
        serde_yaml::from_str(doc).expect("yaml")
    }

    #[test]
    fn test_decode_with_defaults() {
        let params: DemoParams = decode("Demo/a", &yaml("name: x")).expect("decode");
        assert_eq!(
            params,
            DemoParams {
                name: "x".to_string(),
                count: 0,
                timeout: Duration::ZERO,
            }
        );
    }

    #[test]
    fn test_decode_duration_grammar() {
        let params: DemoParams =
            decode("Demo/a", &yaml("name: x\ntimeout: 1h30m")).expect("decode");
        assert_eq!(params.timeout, Duration::from_secs(90 * 60));

        let params: DemoParams =
            decode("Demo/a", &yaml("name: x\ntimeout: 250ms")).expect("decode");
        assert_eq!(params.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_decode_rejects_unknown_field() {
        let err = decode::<DemoParams>("Demo/a", &yaml("name: x\nbogus: 1")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation { ref task, .. } if task == "Demo/a"
        ));
    }

    #[test]
    fn test_decode_rejects_missing_required_field() {
        let err = decode::<DemoParams>("Demo/a", &yaml("count: 3")).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn test_decode_rejects_type_mismatch() {
        let err = decode::<DemoParams>("Demo/a", &yaml("name: x\ncount: lots")).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn test_decode_null_params_as_empty() {
        #[derive(Debug, Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Empty {}

        decode::<Empty>("Demo/a", &serde_yaml::Value::Null).expect("decode");
    }

    #[test]
    fn test_decode_rejects_malformed_duration() {
        let err = decode::<DemoParams>("Demo/a", &yaml("name: x\ntimeout: fast")).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }
}
