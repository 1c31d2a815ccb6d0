use reqwest::Client;
use serde_json::Value;
use tokio::time::sleep;
use tracing::debug;

use crate::config::FetcherConfig;
use crate::error::{FetchError, HarvestError};
use crate::normalization::profile::ProfileRecord;

/// Resolves one key to a profile. The harvest loop only depends on this seam.
#[async_trait::async_trait]
pub trait ProfileLookup: Send + Sync + 'static {
    async fn fetch(&self, key: &str) -> Result<ProfileRecord, FetchError>;
}

/// Lookup against the remote profile API.
///
/// Each call sleeps `request_delay` before its request, so N concurrent
/// callers each pace themselves. There is no retry; a failed key is simply
/// absent from the store and gets offered again while its batch is pending.
#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    http: Client,
    cfg: FetcherConfig,
}

impl RateLimitedFetcher {
    pub fn new(cfg: FetcherConfig) -> Result<Self, HarvestError> {
        url::Url::parse(&cfg.base_url)
            .map_err(|e| HarvestError::Config(format!("base url {:?}: {e}", cfg.base_url)))?;
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.session_timeout)
            .build()
            .map_err(|e| HarvestError::Config(format!("http client: {e}")))?;
        Ok(Self { http, cfg })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}{}", self.cfg.base_url, urlencoding::encode(key))
    }
}

#[async_trait::async_trait]
impl ProfileLookup for RateLimitedFetcher {
    async fn fetch(&self, key: &str) -> Result<ProfileRecord, FetchError> {
        if !self.cfg.request_delay.is_zero() {
            sleep(self.cfg.request_delay).await;
        }

        let url = self.url_for(key);
        debug!(%url, "requesting profile");
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::NonSuccess(status));
        }

        let body = resp.bytes().await?;
        let payload: Value = serde_json::from_slice(&body)?;
        ProfileRecord::from_payload(key, &payload)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn fetcher(origin: &str) -> RateLimitedFetcher {
        RateLimitedFetcher::new(FetcherConfig {
            base_url: format!("{origin}/api/ig/userInfoByUsername/"),
            request_delay: Duration::ZERO,
            session_timeout: Duration::from_secs(5),
            ..FetcherConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn parses_success_and_reports_status() {
        let mut routes = HashMap::new();
        routes.insert(
            "/api/ig/userInfoByUsername/alice".to_string(),
            (
                200,
                r#"{"result":{"user":{"username":"alice","follower_count":10,"following_count":5,"media_count":3}}}"#
                    .to_string(),
            ),
        );
        routes.insert(
            "/api/ig/userInfoByUsername/garbled".to_string(),
            (200, "<html>rate limited</html>".to_string()),
        );
        let origin = test_server::spawn(routes).await;
        let f = fetcher(&origin);

        let rec = f.fetch("alice").await.unwrap();
        assert_eq!((rec.followers, rec.following, rec.media_count), (10, 5, 3));

        match f.fetch("bob").await {
            Err(FetchError::NonSuccess(status)) => assert_eq!(status.as_u16(), 404),
            other => panic!("expected NonSuccess, got {other:?}"),
        }

        assert!(matches!(
            f.fetch("garbled").await,
            Err(FetchError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let f = fetcher(&format!("http://127.0.0.1:{port}"));
        assert!(matches!(f.fetch("x").await, Err(FetchError::Transport(_))));
    }

    #[tokio::test]
    async fn session_timeout_is_transport_error() {
        let mut routes = HashMap::new();
        routes.insert(
            "/api/ig/userInfoByUsername/slow".to_string(),
            (0, String::new()),
        );
        let origin = test_server::spawn(routes).await;
        let f = RateLimitedFetcher::new(FetcherConfig {
            base_url: format!("{origin}/api/ig/userInfoByUsername/"),
            request_delay: Duration::ZERO,
            session_timeout: Duration::from_millis(200),
            ..FetcherConfig::default()
        })
        .unwrap();

        let started = std::time::Instant::now();
        assert!(matches!(f.fetch("slow").await, Err(FetchError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn each_call_waits_the_request_delay() {
        let f = RateLimitedFetcher::new(FetcherConfig {
            base_url: "http://127.0.0.1:9/".into(),
            request_delay: Duration::from_secs(5),
            ..FetcherConfig::default()
        })
        .unwrap();
        let started = tokio::time::Instant::now();
        let res = tokio::time::timeout(Duration::from_secs(4), f.fetch("x")).await;
        assert!(res.is_err(), "fetch finished before its delay elapsed");
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = RateLimitedFetcher::new(FetcherConfig {
            base_url: "not a url".into(),
            ..FetcherConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }
}
