use async_trait::async_trait;
use tracing::debug;

use super::{ParamCandidate, DEFAULT_MARKER};
use crate::pipeline::Transform;
use crate::probe::{ProbeClient, SkipReason};
use crate::reflect;

/// Re-probes a discovered parameter with an improbable marker appended to its
/// value and keeps the candidate only if that parameter is still reported as
/// reflected. Drops parameters whose original value merely matched unrelated
/// page content.
#[derive(Clone, Debug)]
pub struct Confirmer {
    client: ProbeClient,
    marker: String,
}

impl Confirmer {
    pub fn new(client: ProbeClient) -> Self {
        Self::with_marker(client, DEFAULT_MARKER)
    }

    pub fn with_marker(client: ProbeClient, marker: &str) -> Self {
        Self {
            client,
            marker: marker.to_string(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub async fn confirm(&self, candidate: &ParamCandidate) -> Result<bool, SkipReason> {
        let probe_url = reflect::with_suffix(&candidate.url, &candidate.param, &self.marker);
        let page = self.client.probe(&probe_url).await.into_page()?;
        Ok(reflect::reflected_params(&probe_url, &page.body).contains(&candidate.param))
    }
}

#[async_trait]
impl Transform<ParamCandidate, ParamCandidate> for Confirmer {
    async fn apply(&self, candidate: ParamCandidate) -> Vec<ParamCandidate> {
        match self.confirm(&candidate).await {
            Ok(true) => vec![candidate],
            Ok(false) => {
                debug!(url = %candidate.url, param = %candidate.param, "marker not reflected");
                Vec::new()
            }
            Err(reason) => {
                debug!(
                    url = %candidate.url,
                    param = %candidate.param,
                    reason = reason.label(),
                    "confirmation skipped: {reason}"
                );
                Vec::new()
            }
        }
    }
}
