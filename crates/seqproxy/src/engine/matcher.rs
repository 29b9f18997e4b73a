//! Assertion checks against an inbound request.

use crate::config::Assertion;
use crate::error::HarnessError;
use hyper::header::HeaderName;
use hyper::HeaderMap;
use std::borrow::Cow;

/// Check the path first, then every required header.
pub fn verify(
    index: usize,
    assertion: &Assertion,
    path: &str,
    headers: &HeaderMap,
) -> Result<(), HarnessError> {
    if let Some(expected) = assertion.path_constraint() {
        let actual = decode_path(path);
        if actual != expected {
            return Err(HarnessError::PathMismatch {
                index,
                expected: expected.to_string(),
                actual: actual.into_owned(),
            });
        }
    }

    for (name, expected) in &assertion.required_headers {
        let actual = header_values(headers, name).ok_or_else(|| HarnessError::HeaderMissing {
            index,
            name: name.clone(),
        })?;
        if actual != *expected {
            return Err(HarnessError::HeaderMismatch {
                index,
                name: name.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    Ok(())
}

/// Percent-decoded path; falls back to the raw path if decoding fails.
fn decode_path(path: &str) -> Cow<'_, str> {
    urlencoding::decode(path).unwrap_or(Cow::Borrowed(path))
}

/// All values of `name` in arrival order, or `None` if the header is absent.
fn header_values(headers: &HeaderMap, name: &str) -> Option<Vec<String>> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let values: Vec<String> = headers
        .get_all(&name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use std::collections::BTreeMap;

    fn assertion(path: Option<&str>, headers: &[(&str, &[&str])]) -> Assertion {
        Assertion {
            required_headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
            expected_path: path.map(str::to_string),
            body_filter: None,
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_matching_request_passes() {
        let a = assertion(Some("/health"), &[("X-Token", &["abc"])]);
        assert!(verify(0, &a, "/health", &headers(&[("x-token", "abc")])).is_ok());
    }

    #[test]
    fn test_unchecked_path_and_no_headers_pass_anything() {
        let a = assertion(None, &[]);
        assert!(verify(0, &a, "/anything", &HeaderMap::new()).is_ok());
        let a = assertion(Some(""), &[]);
        assert!(verify(0, &a, "/anything", &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_path_mismatch_reported_before_headers() {
        let a = assertion(Some("/a"), &[("X-Token", &["abc"])]);
        let err = verify(2, &a, "/b", &HeaderMap::new()).unwrap_err();
        match err {
            HarnessError::PathMismatch {
                index,
                expected,
                actual,
            } => {
                assert_eq!(index, 2);
                assert_eq!(expected, "/a");
                assert_eq!(actual, "/b");
            }
            other => panic!("expected PathMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_path_compared_decoded() {
        let a = assertion(Some("/a b"), &[]);
        assert!(verify(0, &a, "/a%20b", &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_missing_header() {
        let a = assertion(None, &[("X-Token", &["abc"])]);
        let err = verify(0, &a, "/", &headers(&[("accept", "*/*")])).unwrap_err();
        assert!(matches!(err, HarnessError::HeaderMissing { ref name, .. } if name == "X-Token"));
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let a = assertion(None, &[("x-TOKEN", &["abc"])]);
        assert!(verify(0, &a, "/", &headers(&[("x-token", "abc")])).is_ok());
    }

    #[test]
    fn test_header_value_mismatch() {
        let a = assertion(None, &[("X-Token", &["abc"])]);
        let err = verify(0, &a, "/", &headers(&[("x-token", "xyz")])).unwrap_err();
        match err {
            HarnessError::HeaderMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, vec!["abc"]);
                assert_eq!(actual, vec!["xyz"]);
            }
            other => panic!("expected HeaderMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_multi_value_order_and_length_matter() {
        let a = assertion(None, &[("Accept", &["a", "b"])]);
        let ok = headers(&[("accept", "a"), ("accept", "b")]);
        assert!(verify(0, &a, "/", &ok).is_ok());

        let reversed = headers(&[("accept", "b"), ("accept", "a")]);
        assert!(matches!(
            verify(0, &a, "/", &reversed),
            Err(HarnessError::HeaderMismatch { .. })
        ));

        let short = headers(&[("accept", "a")]);
        assert!(matches!(
            verify(0, &a, "/", &short),
            Err(HarnessError::HeaderMismatch { .. })
        ));

        // One comma-joined line is a single value.
        let joined = headers(&[("accept", "a, b")]);
        assert!(matches!(
            verify(0, &a, "/", &joined),
            Err(HarnessError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_header_name_is_missing() {
        let a = assertion(None, &[("Bad Header", &["x"])]);
        assert!(matches!(
            verify(0, &a, "/", &HeaderMap::new()),
            Err(HarnessError::HeaderMissing { .. })
        ));
    }
}
