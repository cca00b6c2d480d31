use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid URL '{input}': {reason}")]
    Unparseable { input: String, reason: String },

    #[error("URL has no host: {input}")]
    MissingHost { input: String },

    #[error("URL has no scheme: {input}")]
    MissingScheme { input: String },
}

// an absolute URL with a scheme and a host. `raw` is the line as given and
// is what gets displayed, split into parameters and reported; `url` is only
// the parsed form handed to the HTTP client, which percent-encodes characters
// such as ' < > " and spaces on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProbeTarget {
    raw: String,
    url: reqwest::Url,
}

impl ProbeTarget {
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let input = input.trim();
        let url = reqwest::Url::parse(input).map_err(|e| TargetError::Unparseable {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        check_url(&url, input)?;
        Ok(Self {
            raw: input.to_string(),
            url,
        })
    }

    pub fn from_url(url: reqwest::Url) -> Result<Self, TargetError> {
        let raw = url.to_string();
        check_url(&url, &raw)?;
        Ok(Self { raw, url })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The query exactly as it appeared in the input, without the `?`.
    pub fn raw_query(&self) -> Option<&str> {
        let (before_fragment, _) = split_fragment(&self.raw);
        before_fragment.split_once('?').map(|(_, query)| query)
    }

    /// Returns a copy of this target with its raw query replaced.
    ///
    /// Everything outside the query keeps its original text. An empty
    /// `raw_query` removes the query.
    pub fn with_raw_query(&self, raw_query: &str) -> Self {
        let (before_fragment, fragment) = split_fragment(&self.raw);
        let base = before_fragment
            .split_once('?')
            .map_or(before_fragment, |(base, _)| base);

        let mut raw = base.to_string();
        let mut url = self.url.clone();
        if raw_query.is_empty() {
            url.set_query(None);
        } else {
            raw.push('?');
            raw.push_str(raw_query);
            url.set_query(Some(raw_query));
        }
        if let Some(fragment) = fragment {
            raw.push('#');
            raw.push_str(fragment);
        }
        Self { raw, url }
    }
}

fn check_url(url: &reqwest::Url, input: &str) -> Result<(), TargetError> {
    if url.scheme().is_empty() {
        return Err(TargetError::MissingScheme {
            input: input.to_string(),
        });
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(TargetError::MissingHost {
            input: input.to_string(),
        }),
    }
}

fn split_fragment(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (raw, None),
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
