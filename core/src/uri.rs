//! Endpoint URIs of the form `scheme:path?key=value&key=value`.

use crate::error::UriError;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    pub scheme: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl EndpointUri {
    /// Parses `uri`. `scheme://path` is accepted as an alias of `scheme:path`.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let (scheme, rest) = uri
            .split_once(':')
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| UriError::MissingScheme(uri.to_string()))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(UriError::EmptyPath(uri.to_string()));
        }

        let mut params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| UriError::MalformedParameter {
                    uri: uri.to_string(),
                    param: pair.to_string(),
                })?;
            params.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            path: path.to_string(),
            params,
        })
    }

    /// `scheme:path` without parameters.
    pub fn base(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

/// `uri` without its query part and with `scheme://` folded to `scheme:`.
/// Registry key for endpoints.
pub fn base_uri(uri: &str) -> String {
    let base = uri.split_once('?').map_or(uri, |(base, _)| base);
    match base.split_once("://") {
        Some((scheme, path)) => format!("{scheme}:{path}"),
        None => base.to_string(),
    }
}
