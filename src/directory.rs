use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::debug;
use url::Url;

use crate::error::DirectoryError;
use crate::models::CandidateEndpoint;

/// Source of candidate measurement endpoints for a location.
#[async_trait]
pub(crate) trait EndpointDirectory: Send + Sync {
    async fn lookup(&self, location_name: &str) -> Result<Vec<CandidateEndpoint>, DirectoryError>;
}

/// Looks endpoints up through the public speedtest.net server search.
pub(crate) struct SpeedtestDirectory {
    client: Client,
    base_url: Url,
    limit: usize,
}

impl SpeedtestDirectory {
    pub(crate) fn new(client: Client, base_url: &str, limit: usize) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            limit,
        })
    }

    fn search_url(&self, location_name: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("engine", "js")
            .append_pair("https_functional", "true")
            .append_pair("limit", &self.limit.to_string())
            .append_pair("search", location_name);
        url
    }
}

#[async_trait]
impl EndpointDirectory for SpeedtestDirectory {
    async fn lookup(&self, location_name: &str) -> Result<Vec<CandidateEndpoint>, DirectoryError> {
        let url = self.search_url(location_name);
        debug!(%url, "querying endpoint directory");
        let endpoints = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<CandidateEndpoint>>()
            .await?;
        Ok(endpoints)
    }
}
