use async_trait::async_trait;
use tracing::debug;

use super::ParamCandidate;
use crate::pipeline::Transform;
use crate::probe::{ProbeClient, ProbeTarget, SkipReason};
use crate::reflect;

// probes the URL as given and keeps the parameters whose value shows up in
// the body. cheap first cut before any modified request is sent.
#[derive(Clone, Debug)]
pub struct Discoverer {
    client: ProbeClient,
}

impl Discoverer {
    pub fn new(client: ProbeClient) -> Self {
        Self { client }
    }

    pub async fn discover(&self, target: &ProbeTarget) -> Result<Vec<ParamCandidate>, SkipReason> {
        let page = self.client.probe(target).await.into_page()?;
        Ok(reflect::reflected_params(target, &page.body)
            .into_iter()
            .map(|param| ParamCandidate {
                url: target.clone(),
                param,
            })
            .collect())
    }
}

#[async_trait]
impl Transform<ProbeTarget, ParamCandidate> for Discoverer {
    async fn apply(&self, target: ProbeTarget) -> Vec<ParamCandidate> {
        match self.discover(&target).await {
            Ok(candidates) => {
                if !candidates.is_empty() {
                    debug!(url = %target, params = candidates.len(), "reflected parameters");
                }
                candidates
            }
            Err(reason) => {
                debug!(url = %target, reason = reason.label(), "discovery skipped: {reason}");
                Vec::new()
            }
        }
    }
}
