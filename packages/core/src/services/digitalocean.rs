use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Thin client for the DigitalOcean droplet endpoints.
#[derive(Clone)]
pub struct DigitalOceanClient {
    base_url: String,
    token: String,
    http: Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub networks: Networks,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub size_slug: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub slug: String,
}

impl Droplet {
    /// First public IPv4 address, once the droplet has one.
    pub fn public_ipv4(&self) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|net| net.kind == "public")
            .map(|net| net.ip_address.as_str())
    }

    pub fn region_slug(&self) -> &str {
        self.region.as_ref().map_or("", |region| region.slug.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub user_data: String,
    pub monitoring: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct DropletList {
    #[serde(default)]
    droplets: Vec<Droplet>,
}

impl DigitalOceanClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: Client::new(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Provision(format!(
            "DigitalOcean returned HTTP {}: {}",
            status,
            body.trim()
        )))
    }

    pub async fn list_droplets_by_tag(&self, tag: &str) -> Result<Vec<Droplet>, AppError> {
        let url = format!("{}/v2/droplets", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("tag_name", tag), ("per_page", "200")])
            .send()
            .await?;

        let list = Self::check(response).await?.json::<DropletList>().await?;
        // The API filters by tag already; keep only exact tag holders anyway.
        Ok(list
            .droplets
            .into_iter()
            .filter(|droplet| droplet.tags.iter().any(|t| t == tag))
            .collect())
    }

    pub async fn create_droplet(&self, request: &CreateDropletRequest) -> Result<Droplet, AppError> {
        let url = format!("{}/v2/droplets", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let envelope = Self::check(response).await?.json::<DropletEnvelope>().await?;
        Ok(envelope.droplet)
    }

    pub async fn get_droplet(&self, id: u64) -> Result<Droplet, AppError> {
        let url = format!("{}/v2/droplets/{}", self.base_url, id);
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;

        let envelope = Self::check(response).await?.json::<DropletEnvelope>().await?;
        Ok(envelope.droplet)
    }

    pub async fn delete_droplet(&self, id: u64) -> Result<(), AppError> {
        let url = format!("{}/v2/droplets/{}", self.base_url, id);
        let response = self.http.delete(&url).bearer_auth(&self.token).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
