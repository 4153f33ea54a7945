use std::time::Duration;

use async_trait::async_trait;
use prom_api::{
    ApiResponse, InstantQueryParams, QueryData, RangeQueryParams, TopQueries, TopQueriesParams,
    TsdbStatus, TsdbStatusParams,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::backend::{QueryBackend, StatsDate};
use crate::error::{ExplorerError, Result};

/// [`QueryBackend`] speaking the Prometheus HTTP API, plus the
/// VictoriaMetrics status endpoints
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend pointing at the given base URL, e.g.
    /// `http://localhost:8428` or `http://vmselect:8481/select/0/prometheus`
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<P: Serialize + ?Sized>(&self, path: &str, params: &P) -> Result<(u16, String)> {
        let url = format!("{}{path}", self.base_url);
        log::debug!("GET {url}");

        let resp = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok((status, body))
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> ExplorerError {
    if err.is_connect() {
        ExplorerError::BackendUnavailable(format!("{url}: {err}"))
    } else {
        ExplorerError::Http(err)
    }
}

/// Unwrap an `ApiResponse` envelope. Error bodies carry the reason in the
/// envelope, other bodies are passed through as the message.
fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
            .ok()
            .and_then(|resp| resp.into_result().err())
            .map(|e| e.to_string())
            .unwrap_or_else(|| body.to_string());
        return Err(ExplorerError::Api { status, message });
    }

    let resp: ApiResponse<T> = serde_json::from_str(body)?;
    for warning in &resp.warnings {
        log::warn!("Backend warning: {warning}");
    }
    resp.into_result().map_err(|e| ExplorerError::Api {
        status,
        message: e.to_string(),
    })
}

fn parse_plain<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    if !(200..300).contains(&status) {
        return Err(ExplorerError::Api {
            status,
            message: body.to_string(),
        });
    }
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn query(&self, query: &str, eval_time: f64) -> Result<QueryData> {
        let params = InstantQueryParams {
            query: query.to_string(),
            time: Some(eval_time),
        };
        let (status, body) = self.get("/api/v1/query", &params).await?;
        parse_envelope(status, &body)
    }

    async fn query_range(
        &self,
        query: &str,
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<QueryData> {
        let params = RangeQueryParams {
            query: query.to_string(),
            start,
            end,
            step,
        };
        let (status, body) = self.get("/api/v1/query_range", &params).await?;
        parse_envelope(status, &body)
    }

    async fn series_cardinality_stats(
        &self,
        selector: Option<&str>,
        focus_label: &str,
        top_n: usize,
        date: StatsDate,
    ) -> Result<TsdbStatus> {
        let params = TsdbStatusParams {
            top_n,
            date: date.as_param(),
            focus_label: Some(focus_label.to_string()),
            selector: selector.map(str::to_string),
        };
        let (status, body) = self.get("/api/v1/status/tsdb", &params).await?;
        parse_envelope(status, &body)
    }

    async fn top_queries(&self, top_n: usize, max_lifetime: Duration) -> Result<TopQueries> {
        let params = TopQueriesParams {
            top_n,
            max_lifetime: format!("{}s", max_lifetime.as_secs()),
        };
        let (status, body) = self.get("/api/v1/status/top_queries", &params).await?;
        parse_plain(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let backend = HttpBackend::new("http://localhost:8428/");
        assert_eq!(backend.base_url(), "http://localhost:8428");
    }

    #[test]
    fn test_parse_envelope_success() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[1,"2"]}}"#;
        let data: QueryData = parse_envelope(200, body).unwrap();
        assert_eq!(data.result_type, prom_api::ResultType::Scalar);
    }

    #[test]
    fn test_parse_envelope_error_status() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 4"}"#;
        let err = parse_envelope::<QueryData>(422, body).unwrap_err();

        match err {
            ExplorerError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad_data: parse error at char 4");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_envelope_non_json_error() {
        let err = parse_envelope::<QueryData>(502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, ExplorerError::Api { status: 502, ref message } if message == "Bad Gateway"));
    }

    #[test]
    fn test_parse_envelope_garbage() {
        let err = parse_envelope::<QueryData>(200, "<html>").unwrap_err();
        assert!(matches!(err, ExplorerError::Deserialize(_)));
    }

    #[test]
    fn test_parse_plain_top_queries() {
        let body = r#"{"topN":"1","maxLifetime":"3600s","topByAvgDuration":[{"query":"up","timeRangeSeconds":300,"avgDurationSeconds":0.5,"count":3}]}"#;
        let top: TopQueries = parse_plain(200, body).unwrap();
        assert_eq!(top.top_by_avg_duration[0].query, "up");
    }

    #[tokio::test]
    async fn test_refused_connection_is_backend_unavailable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let backend = HttpBackend::new(&format!("http://127.0.0.1:{port}"));

        let err = backend.query("up", 0.0).await.unwrap_err();

        assert!(matches!(err, ExplorerError::BackendUnavailable(_)));
        assert!(!err.is_task_local());
    }
}
