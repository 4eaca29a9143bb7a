//! KMA open API client (data.go.kr).
//!
//! Two endpoints are used:
//! - `WthrWrnInfoService/getPwnStatus`: the advisories-in-effect bulletin
//! - `VilageFcstInfoService_2.0/getUltraSrtNcst`: nowcast observations per grid cell

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, Timelike, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use crate::retry::{with_retry, RetryPolicy};
use crate::types::{Bulletin, GridPoint, Observation, WeatherError};

pub const KMA_API_BASE: &str = "https://apis.data.go.kr/1360000";

const BULLETIN_PATH: &str = "/WthrWrnInfoService/getPwnStatus";
const NOWCAST_PATH: &str = "/VilageFcstInfoService_2.0/getUltraSrtNcst";

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Nowcast values for hour H are published around H:40.
const NOWCAST_PUBLISH_MINUTE: u32 = 40;

const RESULT_OK: &str = "00";
const RESULT_NO_DATA: &str = "03";
const RESULT_KEY_NOT_REGISTERED: &str = "30";

/// Air temperature category of the nowcast response
const CATEGORY_TEMPERATURE: &str = "T1H";

#[derive(Debug, Deserialize)]
struct KmaEnvelope {
    response: KmaResponse,
}

#[derive(Debug, Deserialize)]
struct KmaResponse {
    header: KmaHeader,
    body: Option<KmaBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KmaHeader {
    result_code: String,
    result_msg: String,
}

#[derive(Debug, Deserialize)]
struct KmaBody {
    // `{"item": [...]}`, or `""` when a query matches nothing
    #[serde(default)]
    items: serde_json::Value,
}

impl KmaBody {
    fn into_items<T: DeserializeOwned>(self) -> Result<Vec<T>, WeatherError> {
        let item = match self.items {
            serde_json::Value::Object(mut map) => map.remove("item"),
            _ => None,
        };

        match item {
            Some(serde_json::Value::Array(values)) => values
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<T>, _>>()
                .map_err(|e| WeatherError::Parse(format!("KMA item: {}", e))),
            Some(single @ serde_json::Value::Object(_)) => serde_json::from_value(single)
                .map(|one| vec![one])
                .map_err(|e| WeatherError::Parse(format!("KMA item: {}", e))),
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulletinItem {
    #[serde(default)]
    tm_fc: Option<serde_json::Value>,
    #[serde(default)]
    t6: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NowcastItem {
    category: String,
    obsr_value: serde_json::Value,
}

/// Parse a KMA `YYYYMMDDHHMM` timestamp given as a string or number.
fn parse_kma_time(value: &serde_json::Value) -> Option<NaiveDateTime> {
    let raw = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    NaiveDateTime::parse_from_str(&raw, "%Y%m%d%H%M").ok()
}

fn parse_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Korea Standard Time, UTC+9
#[allow(clippy::unwrap_used)]
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

/// Latest nowcast base time (KST, on the hour) available at `now`.
pub fn nowcast_base_time(now: DateTime<Utc>) -> NaiveDateTime {
    let local = now.with_timezone(&kst()).naive_local();
    let hour_start = local
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local);

    if local.minute() < NOWCAST_PUBLISH_MINUTE {
        hour_start - ChronoDuration::hours(1)
    } else {
        hour_start
    }
}

/// Pull the `<returnAuthMsg>` out of a data.go.kr XML gateway error.
fn gateway_error_message(body: &str) -> Option<&str> {
    let start = body.find("<returnAuthMsg>")? + "<returnAuthMsg>".len();
    let end = body[start..].find("</returnAuthMsg>")? + start;
    Some(body[start..end].trim())
}

#[derive(Debug, Clone)]
pub struct KmaClient {
    client: Client,
    base_url: String,
    service_key: String,
    retry: RetryPolicy,
}

impl KmaClient {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("sitewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the advisories-in-effect bulletin.
    ///
    /// "No data" from KMA means nothing is in effect and yields an empty bulletin.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_bulletin(&self) -> Result<Bulletin, WeatherError> {
        let params = [
            ("numOfRows", "10".to_string()),
            ("pageNo", "1".to_string()),
        ];
        let items: Vec<BulletinItem> = self.get_items(BULLETIN_PATH, &params).await?;

        let Some(item) = items.into_iter().next() else {
            tracing::info!("No advisories in effect");
            return Ok(Bulletin::default());
        };

        let bulletin = Bulletin {
            issued_at: item.tm_fc.as_ref().and_then(parse_kma_time),
            text: item.t6.unwrap_or_default().trim().to_string(),
        };

        tracing::info!(
            "Fetched bulletin issued {:?} ({} chars)",
            bulletin.issued_at,
            bulletin.text.chars().count()
        );
        Ok(bulletin)
    }

    /// Fetch the current air temperature for one grid cell.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch_temperature(
        &self,
        grid: GridPoint,
        now: DateTime<Utc>,
    ) -> Result<Observation, WeatherError> {
        let base = nowcast_base_time(now);
        let params = [
            ("numOfRows", "100".to_string()),
            ("pageNo", "1".to_string()),
            ("base_date", base.format("%Y%m%d").to_string()),
            ("base_time", base.format("%H%M").to_string()),
            ("nx", grid.nx.to_string()),
            ("ny", grid.ny.to_string()),
        ];
        let items: Vec<NowcastItem> = self.get_items(NOWCAST_PATH, &params).await?;

        let item = items
            .iter()
            .find(|i| i.category == CATEGORY_TEMPERATURE)
            .ok_or_else(|| {
                WeatherError::MissingValue(format!("{} for grid {}", CATEGORY_TEMPERATURE, grid))
            })?;

        let temperature_c = parse_number(&item.obsr_value).ok_or_else(|| {
            WeatherError::Parse(format!("obsrValue {} is not a number", item.obsr_value))
        })?;

        Ok(Observation {
            grid,
            temperature_c,
            observed_at: base,
        })
    }

    async fn get_items<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, WeatherError> {
        let url = format!("{}{}", self.base_url, path);

        let response = with_retry(&self.retry, || {
            self.client
                .get(&url)
                .query(&[("serviceKey", self.service_key.as_str()), ("dataType", "JSON")])
                .query(params)
                .send()
        })
        .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(WeatherError::InvalidApiKey);
        }
        if !status.is_success() {
            return Err(WeatherError::Http {
                status: status.as_u16(),
                body,
            });
        }

        // The data.go.kr gateway answers key problems with XML even when JSON was asked for
        if body.trim_start().starts_with('<') {
            return match gateway_error_message(&body) {
                Some(msg) if msg.contains("SERVICE_KEY") => Err(WeatherError::InvalidApiKey),
                Some(msg) => Err(WeatherError::Api {
                    code: "gateway".to_string(),
                    message: msg.to_string(),
                }),
                None => Err(WeatherError::Parse("unexpected XML response".to_string())),
            };
        }

        let envelope: KmaEnvelope = serde_json::from_str(&body)
            .map_err(|e| WeatherError::Parse(format!("KMA response: {}", e)))?;
        let header = envelope.response.header;

        match header.result_code.as_str() {
            RESULT_OK => match envelope.response.body {
                Some(body) => body.into_items(),
                None => Ok(Vec::new()),
            },
            RESULT_NO_DATA => Ok(Vec::new()),
            RESULT_KEY_NOT_REGISTERED => Err(WeatherError::InvalidApiKey),
            code => Err(WeatherError::Api {
                code: code.to_string(),
                message: header.result_msg,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kst_to_utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        kst()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn naive(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn client(server: &MockServer) -> KmaClient {
        KmaClient::new(&server.uri(), "test-key")
            .unwrap()
            .with_retry_policy(RetryPolicy::none())
    }

    fn ok_envelope(items: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "response": {
                "header": {"resultCode": "00", "resultMsg": "NORMAL_SERVICE"},
                "body": {"dataType": "JSON", "items": {"item": items}, "totalCount": 1}
            }
        })
    }

    #[test]
    fn test_base_time_after_publish() {
        let base = nowcast_base_time(kst_to_utc(2024, 1, 22, 10, 45));
        assert_eq!(base, naive(2024, 1, 22, 10));
    }

    #[test]
    fn test_base_time_before_publish_uses_previous_hour() {
        let base = nowcast_base_time(kst_to_utc(2024, 1, 22, 10, 39));
        assert_eq!(base, naive(2024, 1, 22, 9));
    }

    #[test]
    fn test_base_time_rolls_back_over_midnight() {
        let base = nowcast_base_time(kst_to_utc(2024, 3, 1, 0, 10));
        assert_eq!(base, naive(2024, 2, 29, 23));
    }

    #[test]
    fn test_parse_kma_time_string_or_number() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 22)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(parse_kma_time(&serde_json::json!(202401221000u64)), Some(expected));
        assert_eq!(parse_kma_time(&serde_json::json!("202401221000")), Some(expected));
        assert_eq!(parse_kma_time(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_gateway_error_message() {
        let xml = "<OpenAPI_ServiceResponse><cmmMsgHeader><errMsg>SERVICE ERROR</errMsg>\
<returnAuthMsg>SERVICE_KEY_IS_NOT_REGISTERED_ERROR</returnAuthMsg></cmmMsgHeader></OpenAPI_ServiceResponse>";
        assert_eq!(
            gateway_error_message(xml),
            Some("SERVICE_KEY_IS_NOT_REGISTERED_ERROR")
        );
        assert_eq!(gateway_error_message("<x/>"), None);
    }

    #[tokio::test]
    async fn test_fetch_bulletin() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(BULLETIN_PATH))
            .and(query_param("serviceKey", "test-key"))
            .and(query_param("dataType", "JSON"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!([
                {
                    "tmFc": 202401221000u64,
                    "tmSeq": 26,
                    "t6": "o 한파경보 : 강원도(철원군평지)\r\no 한파주의보 : 서울\r\n",
                    "t7": "(1) 강풍 예비특보"
                }
            ]))))
            .mount(&server)
            .await;

        let bulletin = client(&server).fetch_bulletin().await.unwrap();

        assert!(bulletin.text.starts_with("o 한파경보"));
        assert!(bulletin.text.ends_with("서울"));
        assert_eq!(
            bulletin.issued_at,
            NaiveDate::from_ymd_opt(2024, 1, 22).unwrap().and_hms_opt(10, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_fetch_bulletin_no_data_is_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(BULLETIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {"header": {"resultCode": "03", "resultMsg": "NO_DATA"}}
            })))
            .mount(&server)
            .await;

        let bulletin = client(&server).fetch_bulletin().await.unwrap();
        assert!(bulletin.is_empty());
        assert_eq!(bulletin.issued_at, None);
    }

    #[tokio::test]
    async fn test_fetch_bulletin_empty_items_string() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(BULLETIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {
                    "header": {"resultCode": "00", "resultMsg": "NORMAL_SERVICE"},
                    "body": {"items": ""}
                }
            })))
            .mount(&server)
            .await;

        let bulletin = client(&server).fetch_bulletin().await.unwrap();
        assert!(bulletin.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_temperature() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(NOWCAST_PATH))
            .and(query_param("nx", "60"))
            .and(query_param("ny", "127"))
            .and(query_param("base_date", "20240122"))
            .and(query_param("base_time", "0900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!([
                {"baseDate": "20240122", "baseTime": "0900", "category": "PTY", "nx": 60, "ny": 127, "obsrValue": "0"},
                {"baseDate": "20240122", "baseTime": "0900", "category": "T1H", "nx": 60, "ny": 127, "obsrValue": "-13.4"}
            ]))))
            .mount(&server)
            .await;

        let obs = client(&server)
            .fetch_temperature(GridPoint { nx: 60, ny: 127 }, kst_to_utc(2024, 1, 22, 9, 50))
            .await
            .unwrap();

        assert_eq!(obs.temperature_c, -13.4);
        assert_eq!(obs.observed_at, naive(2024, 1, 22, 9));
    }

    #[tokio::test]
    async fn test_fetch_temperature_numeric_value() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(NOWCAST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!([
                {"category": "T1H", "obsrValue": 2.5}
            ]))))
            .mount(&server)
            .await;

        let obs = client(&server)
            .fetch_temperature(GridPoint { nx: 1, ny: 1 }, Utc::now())
            .await
            .unwrap();
        assert_eq!(obs.temperature_c, 2.5);
    }

    #[tokio::test]
    async fn test_fetch_temperature_missing_category() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(NOWCAST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!([
                {"category": "REH", "obsrValue": "40"}
            ]))))
            .mount(&server)
            .await;

        let result = client(&server)
            .fetch_temperature(GridPoint { nx: 1, ny: 1 }, Utc::now())
            .await;
        assert!(matches!(result, Err(WeatherError::MissingValue(_))));
    }

    #[tokio::test]
    async fn test_unregistered_key_xml() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<OpenAPI_ServiceResponse><cmmMsgHeader>\
<returnAuthMsg>SERVICE_KEY_IS_NOT_REGISTERED_ERROR</returnAuthMsg>\
</cmmMsgHeader></OpenAPI_ServiceResponse>",
            ))
            .mount(&server)
            .await;

        let result = client(&server).fetch_bulletin().await;
        assert!(matches!(result, Err(WeatherError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn test_api_error_code() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {"header": {"resultCode": "10", "resultMsg": "INVALID_REQUEST_PARAMETER_ERROR"}}
            })))
            .mount(&server)
            .await;

        let result = client(&server).fetch_bulletin().await;
        match result {
            Err(WeatherError::Api { code, message }) => {
                assert_eq!(code, "10");
                assert!(message.contains("INVALID_REQUEST"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let result = client(&server).fetch_bulletin().await;
        assert!(matches!(result, Err(WeatherError::Http { status: 502, .. })));
    }
}
