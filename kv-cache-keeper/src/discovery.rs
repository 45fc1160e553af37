//! Finds the slots that currently hold state worth saving.
//!
//! The bulk `GET /slots` listing is preferred. When it is unavailable, slot
//! ids `0..max_slots_to_check` are probed one by one. Either way a slot only
//! counts when the server reports nonzero used context or prompt tokens; a
//! failed or ambiguous check means "no state".
//!
//! The counters are a heuristic: after a restore the server may still report
//! stale values. They are used exactly as reported.

use crate::client::{LlamaClient, SlotStatus};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

pub struct SlotDiscovery<'a> {
    client: &'a LlamaClient,
    max_slots_to_check: u32,
}

impl<'a> SlotDiscovery<'a> {
    pub fn new(client: &'a LlamaClient, max_slots_to_check: u32) -> Self {
        Self {
            client,
            max_slots_to_check,
        }
    }

    /// Ascending set of slot ids holding state. Empty means nothing to save.
    pub async fn discover(&self) -> BTreeSet<u32> {
        match self.client.list_slots().await {
            Ok(listing) => self.from_listing(listing).await,
            Err(e) => {
                info!(
                    "Slot listing unavailable ({}), probing slots 0..{}",
                    e, self.max_slots_to_check
                );
                self.probe().await
            }
        }
    }

    async fn from_listing(&self, listing: Vec<SlotStatus>) -> BTreeSet<u32> {
        let mut slots = BTreeSet::new();
        for status in listing {
            let valid = if status.reports_usage() {
                status.has_context()
            } else {
                self.check(status.id).await
            };
            if valid {
                slots.insert(status.id);
            }
        }
        debug!("Slots with context: {:?}", slots);
        slots
    }

    async fn probe(&self) -> BTreeSet<u32> {
        let mut slots = BTreeSet::new();
        for id in 0..self.max_slots_to_check {
            if self.check(id).await {
                slots.insert(id);
            }
        }
        debug!("Probed slots with context: {:?}", slots);
        slots
    }

    /// Per-slot status query; any failure counts as "no state".
    async fn check(&self, id: u32) -> bool {
        match self.client.slot_status(id).await {
            Ok(status) => status.has_context(),
            Err(e) => {
                warn!(slot = id, "Slot status check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlamaClient {
        LlamaClient::new(&ServerConfig {
            url: server.uri(),
            ..ServerConfig::default()
        })
        .unwrap()
    }

    async fn mount_status(server: &MockServer, id: u32, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/slots/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_listing_with_counters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 2, "n_ctx_used": 50},
                {"id": 0, "n_ctx_used": 10},
                {"id": 1, "n_ctx_used": 0, "n_prompt_tokens": 0}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let slots = SlotDiscovery::new(&client, 8).discover().await;
        assert_eq!(slots.into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_listing_without_counters_checks_each_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 0}, {"id": 1}, {"id": 2}
            ])))
            .mount(&server)
            .await;
        mount_status(&server, 0, serde_json::json!({"id": 0, "n_past": 3})).await;
        mount_status(&server, 1, serde_json::json!({"id": 1, "n_past": 0})).await;
        // slot 2 status is not mounted: the 404 counts as no state

        let client = client_for(&server);
        let slots = SlotDiscovery::new(&client, 8).discover().await;
        assert_eq!(slots.into_iter().collect::<Vec<_>>(), vec![0]);
    }

    #[tokio::test]
    async fn test_fallback_probe_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slots"))
            .respond_with(ResponseTemplate::new(501))
            .mount(&server)
            .await;
        mount_status(&server, 1, serde_json::json!({"id": 1, "n_prompt_tokens": 9})).await;
        mount_status(&server, 3, serde_json::json!({"id": 3, "n_prompt_tokens": 9})).await;

        let client = client_for(&server);
        let slots = SlotDiscovery::new(&client, 3).discover().await;
        assert_eq!(slots.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_empty_listing_is_empty_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(SlotDiscovery::new(&client, 4).discover().await.is_empty());
    }
}
