use crate::app::ports::HierarchicalStore;
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Firebase Realtime Database accessed through its REST API
pub struct FirebaseRestStore {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl FirebaseRestStore {
    pub fn new(database_url: &str, auth_token: Option<String>, timeout_secs: u64) -> Result<Self> {
        if database_url.trim().is_empty() {
            return Err(ArchiveError::Config(
                "store.database_url is required for the firebase backend".to_string(),
            ));
        }
        let base_url = Url::parse(database_url.trim()).map_err(|e| {
            ArchiveError::Config(format!("Invalid store.database_url '{}': {}", database_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ArchiveError::Config(format!(
                "store.database_url '{}' cannot carry a path",
                database_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// `{base}/{path}.json` with every key segment percent-encoded.
    ///
    /// Keys may hold `?`, `%`, `#` or spaces, which must not leak into the query.
    fn url(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        let mut segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        match segments.last_mut() {
            Some(last) => last.push_str(".json"),
            None => segments.push(".json".to_string()),
        }
        url.path_segments_mut()
            .map_err(|_| ArchiveError::store(path, "database url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments.iter());
        Ok(url)
    }

    fn auth_query(&self) -> Vec<(&'static str, String)> {
        match &self.auth_token {
            Some(token) => vec![("auth", token.clone())],
            None => Vec::new(),
        }
    }

    async fn read_json(path: &str, resp: Response) -> Result<Option<Value>> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::store(
                path,
                format!("status {}: {}", status.as_u16(), body),
            ));
        }
        let value: Value = resp.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[async_trait]
impl HierarchicalStore for FirebaseRestStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        debug!("firebase GET {}", path);
        let resp = self
            .client
            .get(self.url(path)?)
            .query(&self.auth_query())
            .send()
            .await?;
        Self::read_json(path, resp).await
    }

    async fn get_range(
        &self,
        path: &str,
        order_field: &str,
        start_value: &Value,
    ) -> Result<Option<Value>> {
        // Query parameters are JSON literals; `$key` ranges only accept strings
        let start = if order_field == "$key" {
            match start_value {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            }
        } else {
            start_value.clone()
        };
        let mut query = self.auth_query();
        query.push(("orderBy", Value::String(order_field.to_string()).to_string()));
        query.push(("startAt", start.to_string()));

        debug!("firebase GET {} orderBy={} startAt={}", path, order_field, start);
        let resp = self.client.get(self.url(path)?).query(&query).send().await?;
        Self::read_json(path, resp).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        debug!("firebase DELETE {}", path);
        let resp = self
            .client
            .delete(self.url(path)?)
            .query(&self.auth_query())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::store(
                path,
                format!("delete failed with status {}: {}", status.as_u16(), body),
            ));
        }
        Ok(())
    }

    async fn child_keys(&self, path: &str) -> Result<Vec<String>> {
        let mut query = self.auth_query();
        query.push(("shallow", "true".to_string()));
        let resp = self.client.get(self.url(path)?).query(&query).send().await?;
        match Self::read_json(path, resp).await? {
            Some(Value::Object(keys)) => Ok(keys.keys().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }
}
