//! Vectorize (v2) index over the Cloudflare REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cloudflare;

use super::index::{IndexError, IndexMatch, IndexRecord, NoteIndex, QueryOptions};

pub struct VectorizeIndex {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    index_name: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for VectorizeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorizeIndex")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("index_name", &self.index_name)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    vector: &'a [f32],
    top_k: usize,
    return_metadata: &'static str,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    matches: Vec<IndexMatch>,
}

/// Encode records as newline-delimited JSON, one record per line.
fn to_ndjson(records: &[IndexRecord]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

impl VectorizeIndex {
    pub fn new(
        base_url: String,
        account_id: String,
        index_name: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            account_id,
            index_name,
            api_key,
        }
    }

    fn endpoint(&self, action: &str) -> String {
        cloudflare::account_url(
            &self.base_url,
            &self.account_id,
            &format!("vectorize/v2/indexes/{}/{action}", self.index_name),
        )
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }
}

#[async_trait]
impl NoteIndex for VectorizeIndex {
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        let body = to_ndjson(&records)?;
        let rb = self
            .http
            .post(self.endpoint("upsert"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);

        // The result only carries a mutation id.
        let _: serde_json::Value = cloudflare::read_result(self.authorize(rb).send().await?).await?;
        tracing::debug!(
            index = %self.index_name,
            records = records.len(),
            "Vectorize upsert accepted"
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        options: QueryOptions,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        let body = QueryBody {
            vector,
            top_k: options.top_k,
            return_metadata: if options.return_metadata { "all" } else { "none" },
        };
        let rb = self.http.post(self.endpoint("query")).json(&body);

        let result: QueryResult =
            cloudflare::read_result(self.authorize(rb).send().await?).await?;
        Ok(result.matches)
    }

    fn name(&self) -> &'static str {
        "vectorize"
    }
}
