use async_trait::async_trait;
use tracing::{debug, info};

use super::{Finding, ParamCandidate, DEFAULT_PAYLOAD_PREFIX, DEFAULT_PAYLOAD_SUFFIX, DEFAULT_PROBE_CHARS};
use crate::pipeline::Transform;
use crate::probe::{ProbeClient, SkipReason};
use crate::reflect;

/// Tests each probe character with its own request, wrapped in a fixed prefix
/// and suffix so a match can only come from that exact probe.
#[derive(Clone, Debug)]
pub struct CharProber {
    client: ProbeClient,
    chars: Vec<char>,
    prefix: String,
    suffix: String,
}

impl CharProber {
    pub fn new(client: ProbeClient) -> Self {
        Self {
            client,
            chars: DEFAULT_PROBE_CHARS.to_vec(),
            prefix: DEFAULT_PAYLOAD_PREFIX.to_string(),
            suffix: DEFAULT_PAYLOAD_SUFFIX.to_string(),
        }
    }

    pub fn with_chars(mut self, chars: &[char]) -> Self {
        self.chars = chars.to_vec();
        self
    }

    pub fn with_affixes(mut self, prefix: &str, suffix: &str) -> Self {
        self.prefix = prefix.to_string();
        self.suffix = suffix.to_string();
        self
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn payload(&self, ch: char) -> String {
        format!("{}{}{}", self.prefix, ch, self.suffix)
    }

    pub async fn probe_char(
        &self,
        candidate: &ParamCandidate,
        ch: char,
    ) -> Result<Option<Finding>, SkipReason> {
        let payload = self.payload(ch);
        let probe_url = reflect::with_suffix(&candidate.url, &candidate.param, &payload);
        let page = self.client.probe(&probe_url).await.into_page()?;
        let hit = reflect::find_reflected(&page.body, [(ch, payload.as_str())]);
        Ok((!hit.is_empty()).then(|| Finding {
            url: candidate.url.to_string(),
            param: candidate.param.clone(),
            character: ch,
        }))
    }
}

#[async_trait]
impl Transform<ParamCandidate, Finding> for CharProber {
    async fn apply(&self, candidate: ParamCandidate) -> Vec<Finding> {
        let mut findings = Vec::new();
        for &ch in self.chars.iter() {
            match self.probe_char(&candidate, ch).await {
                Ok(Some(finding)) => {
                    info!(url = %candidate.url, param = %candidate.param, character = %ch, "unescaped character");
                    findings.push(finding);
                }
                Ok(None) => {}
                Err(reason) => debug!(
                    url = %candidate.url,
                    param = %candidate.param,
                    character = %ch,
                    reason = reason.label(),
                    "character probe skipped: {reason}"
                ),
            }
        }
        findings
    }
}
