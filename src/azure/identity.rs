use super::errors::AdoError;
use moka::future::Cache;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Memoizing email -> platform user id lookup.
///
/// The cache lifetime is scoped to the resolver instance, which is
/// constructed once per run and passed by reference into the clients that
/// need it; there is no process-wide implicit state. Identities that cannot
/// be resolved are warned about and reported as `None` so that pull request
/// creation can continue without them.
#[derive(Debug)]
pub struct IdentityResolver {
    organization_url: Url,
    token: String,
    http: reqwest::Client,
    cache: Cache<String, String>,
    guid: Regex,
}

#[derive(Debug, Deserialize)]
struct IdentityList {
    #[serde(default)]
    value: Vec<Identity>,
}

#[derive(Debug, Deserialize)]
struct Identity {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionData {
    #[serde(rename = "authenticatedUser")]
    authenticated_user: Option<AuthenticatedUser>,
}

#[derive(Debug, Deserialize)]
struct AuthenticatedUser {
    id: String,
}

const AUTHENTICATED_USER_KEY: &str = "\0authenticated-user";

impl IdentityResolver {
    pub fn new(organization_url: Url, token: String) -> Self {
        let cache = Cache::builder()
            .max_capacity(256)
            .time_to_live(Duration::from_secs(3600))
            .build();
        Self {
            organization_url,
            token,
            http: reqwest::Client::new(),
            cache,
            guid: Regex::new(
                r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
            )
            .expect("guid pattern is valid"),
        }
    }

    /// Resolve an email address (or GUID, passed through as-is) to a user id.
    pub async fn resolve(&self, identity: &str) -> Option<String> {
        if self.guid.is_match(identity) {
            return Some(identity.to_string());
        }
        if let Some(cached) = self.cache.get(identity).await {
            debug!(identity, "identity resolved from cache");
            return Some(cached);
        }
        match self.lookup(identity).await {
            Ok(Some(id)) => {
                self.cache.insert(identity.to_string(), id.clone()).await;
                Some(id)
            }
            Ok(None) => {
                warn!(identity, "unable to resolve identity");
                None
            }
            Err(e) => {
                warn!(identity, error = %e, "identity lookup failed");
                None
            }
        }
    }

    /// The id of the user the access token authenticates as.
    pub async fn authenticated_user_id(&self) -> Result<String, AdoError> {
        if let Some(cached) = self.cache.get(AUTHENTICATED_USER_KEY).await {
            return Ok(cached);
        }
        let url = format!(
            "{}_apis/connectionData?api-version=7.1-preview.1",
            self.organization_url
        );
        let response = self
            .http
            .get(&url)
            .basic_auth("", Some(&self.token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AdoError::Api {
                status: response.status().as_u16(),
                url,
                message: "failed to read connection data".to_string(),
            });
        }
        let data: ConnectionData = response.json().await?;
        let id = data
            .authenticated_user
            .map(|u| u.id)
            .ok_or_else(|| AdoError::NotFound("authenticated user identity".to_string()))?;
        self.cache
            .insert(AUTHENTICATED_USER_KEY.to_string(), id.clone())
            .await;
        Ok(id)
    }

    async fn lookup(&self, email: &str) -> Result<Option<String>, AdoError> {
        let url = format!(
            "{}_apis/identities?searchFilter=MailAddress&filterValue={}&api-version=7.1",
            self.organization_url,
            encode_query_value(email)
        );
        let response = self
            .http
            .get(&url)
            .basic_auth("", Some(&self.token))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AdoError::Api {
                status: response.status().as_u16(),
                url,
                message: "identity search failed".to_string(),
            });
        }
        let identities: IdentityList = response.json().await?;
        Ok(identities.value.into_iter().next().map(|i| i.id))
    }
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
