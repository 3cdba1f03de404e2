//! REST data service client.
//!
//! Reads and writes rows through the platform's `/rest/v1/<table>` endpoint.
//! Filters travel as `column=op.value` query parameters, ordering as
//! `order=column.asc|desc`, and exact counts come back in the
//! `Content-Range` header (`0-4/23`).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;

use super::{AuthService, DataService, Filter, Query, Rows};
use crate::error::ServiceError;

pub struct RestClient {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
    auth: Arc<dyn AuthService>,
}

impl RestClient {
    pub fn new(base_url: &str, anon_key: &str, auth: Arc<dyn AuthService>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http: reqwest::Client::new(),
            auth,
        }
    }

    /// Full URL for a read, including filters, order and range.
    fn build_select_url(&self, query: &Query) -> String {
        let mut params = vec!["select=*".to_string()];
        params.extend(filter_params(&query.filters));
        if let Some(order) = query.order {
            params.push(format!(
                "order={}.{}",
                order.column,
                if order.ascending { "asc" } else { "desc" }
            ));
        }
        if let Some((offset, limit)) = query.range {
            params.push(format!("offset={}", offset));
            params.push(format!("limit={}", limit));
        }
        format!("{}?{}", self.table_url(&query.table), params.join("&"))
    }

    fn build_filtered_url(&self, table: &str, filters: &[Filter]) -> String {
        let params = filter_params(filters);
        if params.is_empty() {
            self.table_url(table)
        } else {
            format!("{}?{}", self.table_url(table), params.join("&"))
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach the api key and the best available bearer token.
    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = match self.auth.session().await {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        };
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = self.authorize(request).await.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn rows(response: Response) -> Result<Vec<Value>, ServiceError> {
        let body: Value = response.json().await?;
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl DataService for RestClient {
    async fn select(&self, query: &Query) -> Result<Rows, ServiceError> {
        let url = self.build_select_url(query);
        tracing::debug!(table = %query.table, "select");

        let mut request = self.http.get(&url);
        if query.count {
            request = request.header("Prefer", "count=exact");
        }
        let response = self.send(request).await?;

        let total = if query.count {
            response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
        } else {
            None
        };
        let rows = Self::rows(response).await?;
        Ok(Rows { rows, total })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, ServiceError> {
        tracing::debug!(table, "insert");
        let request = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request).await?;
        Self::rows(response).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, ServiceError> {
        tracing::debug!(table, "update");
        let request = self
            .http
            .patch(self.build_filtered_url(table, filters))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(request).await?;
        Self::rows(response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), ServiceError> {
        tracing::debug!(table, "delete");
        let request = self.http.delete(self.build_filtered_url(table, filters));
        self.send(request).await?;
        Ok(())
    }
}

fn filter_params(filters: &[Filter]) -> Vec<String> {
    filters
        .iter()
        .map(|f| {
            format!(
                "{}={}",
                urlencoding::encode(&f.column),
                urlencoding::encode(&f.expression())
            )
        })
        .collect()
}

/// Total from a `Content-Range` header such as `0-4/23` or `*/0`.
fn parse_content_range(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.parse().ok()
}

/// Build a [`ServiceError`] from a failed response, preferring the
/// service's own `message` field.
async fn error_from_response(response: Response) -> ServiceError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            body.get("message")
                .or_else(|| body.get("error_description"))
                .or_else(|| body.get("msg"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("Server returned status {}", status)
            } else {
                text
            }
        });
    ServiceError::with_status(message, status)
}
