use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use super::{Translation, Translator};
use crate::error::{HarvestError, TranslateError};

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Client for the public `translate_a/single` endpoint with source-language
/// auto-detection.
#[derive(Debug, Clone)]
pub struct GoogleTranslateClient {
    endpoint: String,
    target_lang: String,
    http: Client,
}

impl GoogleTranslateClient {
    pub fn new(endpoint: &str, target_lang: &str, timeout: Duration) -> Result<Self, HarvestError> {
        url::Url::parse(endpoint)
            .map_err(|e| HarvestError::Config(format!("translate endpoint {endpoint:?}: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Config(format!("http client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            target_lang: target_lang.to_string(),
            http,
        })
    }

    /// Payload shape: `[[["<translated>", "<source>", ..], ..], null, "<src lang>", ..]`.
    /// Long inputs come back split into several segments.
    fn parse(&self, text: &str, body: &Value) -> Result<Translation, TranslateError> {
        let segments = body
            .get(0)
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::Malformed("missing segment list".into()))?;
        let translated: String = segments
            .iter()
            .filter_map(|seg| seg.get(0).and_then(Value::as_str))
            .collect();
        if translated.is_empty() {
            return Err(TranslateError::Malformed("no translated segments".into()));
        }
        let src_lang = body
            .get(2)
            .and_then(Value::as_str)
            .unwrap_or("auto")
            .to_string();
        Ok(Translation {
            source: text.to_string(),
            src_lang,
            translated,
            target_lang: self.target_lang.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Translator for GoogleTranslateClient {
    async fn translate(&self, text: &str) -> Result<Translation, TranslateError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", self.target_lang.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 200);
            tracing::debug!(%status, %body, "translate request rejected");
            return Err(TranslateError::NonSuccess(status));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| TranslateError::Malformed(e.to_string()))?;
        self.parse(text, &body)
    }
}
