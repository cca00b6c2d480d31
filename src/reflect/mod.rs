use std::collections::BTreeSet;

use crate::probe::ProbeTarget;

/// Returns the keys whose value occurs verbatim in `body`.
///
/// Containment is case-sensitive and byte exact. Nothing is normalized and
/// no minimum length applies, so an empty value always matches; callers that
/// want a length policy apply it before calling.
pub fn find_reflected<K, V, I>(body: &str, values: I) -> BTreeSet<K>
where
    K: Ord,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    values
        .into_iter()
        .filter(|(_, value)| body.contains(value.as_ref()))
        .map(|(key, _)| key)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    pub raw_value: String,
    pub value: String,
}

impl QueryParam {
    // the forms a server might echo back: as sent, and decoded
    fn candidate_forms(&self) -> impl Iterator<Item = &str> {
        let decoded = (self.value != self.raw_value).then_some(self.value.as_str());
        std::iter::once(self.raw_value.as_str()).chain(decoded)
    }
}

fn form_decode(raw: &str) -> String {
    let plus_as_space = raw.replace('+', " ");
    match urlencoding::decode(&plus_as_space) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(plus_as_space.as_bytes()))
            .into_owned(),
    }
}

pub fn query_params(target: &ProbeTarget) -> Vec<QueryParam> {
    let raw = match target.raw_query() {
        Some(raw) => raw,
        None => return Vec::new(),
    };
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (raw_name, raw_value) = segment.split_once('=').unwrap_or((segment, ""));
            QueryParam {
                name: form_decode(raw_name),
                raw_value: raw_value.to_string(),
                value: form_decode(raw_value),
            }
        })
        .collect()
}

/// Names of the query parameters on `target` whose value is reflected in
/// `body`, each reported once.
pub fn reflected_params(target: &ProbeTarget, body: &str) -> BTreeSet<String> {
    let params = query_params(target);
    let candidates = params.iter().flat_map(|p| {
        p.candidate_forms()
            .map(move |form| (p.name.clone(), form))
    });
    find_reflected(body, candidates)
}

/// Rebuilds `target` with `suffix` appended to the first value of `param`.
///
/// Other occurrences of `param` are dropped, every other segment keeps its
/// original encoding. `suffix` is given unencoded. A missing parameter is
/// added with the suffix as its value.
pub fn with_suffix(target: &ProbeTarget, param: &str, suffix: &str) -> ProbeTarget {
    let encoded_suffix = urlencoding::encode(suffix);
    let mut replaced = false;
    let mut segments: Vec<String> = Vec::new();

    for segment in target.raw_query().unwrap_or_default().split('&') {
        if segment.is_empty() {
            continue;
        }
        let (raw_name, raw_value) = segment.split_once('=').unwrap_or((segment, ""));
        if form_decode(raw_name) != param {
            segments.push(segment.to_string());
            continue;
        }
        if replaced {
            continue;
        }
        segments.push(format!("{raw_name}={raw_value}{encoded_suffix}"));
        replaced = true;
    }

    if !replaced {
        segments.push(format!("{}={}", urlencoding::encode(param), encoded_suffix));
    }

    target.with_raw_query(&segments.join("&"))
}
