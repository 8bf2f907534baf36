//! Mirror node REST client.

use crate::chunk::reassemble;
use crate::error::MirrorResult;
use crate::types::{MirrorMessagesPage, MirrorRecord, TopicMessage};
use log::debug;

pub const DEFAULT_MIRROR_BASE_URL: &str = "https://testnet.mirrornode.hedera.com";

const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct MirrorClient {
    http: reqwest::Client,
    base_url: String,
}

impl MirrorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn testnet() -> Self {
        Self::new(DEFAULT_MIRROR_BASE_URL)
    }

    /// Raw page fetch, error-surfacing. Records with sequence number
    /// strictly greater than `after` (all records when `None`).
    pub async fn topic_messages_page(
        &self,
        topic_id: &str,
        after: Option<u64>,
    ) -> MirrorResult<Vec<MirrorRecord>> {
        let mut url = format!(
            "{}/api/v1/topics/{}/messages?limit={}",
            self.base_url, topic_id, PAGE_LIMIT
        );
        if let Some(after) = after.filter(|n| *n > 0) {
            url.push_str(&format!("&sequencenumber=gt:{}", after));
        }

        let page: MirrorMessagesPage = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.messages)
    }

    /// Fetches and reassembles one page of logical messages, sorted
    /// ascending by sequence number. Any transport failure yields an empty
    /// page: in a polling context "fetch failed" and "no new messages" are
    /// handled the same way, and the next poll retries.
    pub async fn topic_messages(&self, topic_id: &str, after: Option<u64>) -> Vec<TopicMessage> {
        match self.topic_messages_page(topic_id, after).await {
            Ok(records) => reassemble(&records),
            Err(e) => {
                debug!(
                    "mirror fetch failed, treating as empty: topic={}, error={}",
                    topic_id, e
                );
                Vec::new()
            }
        }
    }
}

impl Default for MirrorClient {
    fn default() -> Self {
        Self::testnet()
    }
}
