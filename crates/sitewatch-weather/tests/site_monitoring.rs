//! End-to-end tests: roster file to poster, with KMA and Nominatim mocked.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use sitewatch_weather::poster::GroupKind;
use sitewatch_weather::{
    load_roster, Geocoder, KmaClient, Monitor, PosterSummary, RetryPolicy, SiteCache, SiteStatus,
    Thresholds,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROSTER: &str = "현장명,주소\n\
철원 교량공사,강원도 철원군 갈말읍 군탄리 123\n\
연천 도로공사,경기도 연천군 전곡읍\n\
부산 신축공사,부산광역시 해운대구 우동 1408\n";

fn kma_items(items: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "response": {
            "header": {"resultCode": "00", "resultMsg": "NORMAL_SERVICE"},
            "body": {"dataType": "JSON", "items": {"item": items}}
        }
    }))
}

fn temperature(value: &str) -> ResponseTemplate {
    kma_items(serde_json::json!([{"category": "T1H", "obsrValue": value}]))
}

fn place(lat: &str, lon: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!([{"lat": lat, "lon": lon}]))
}

async fn mount_geocoder(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "강원도 철원군 갈말읍"))
        .respond_with(place("38.1467", "127.3133"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "경기도 연천군 전곡읍"))
        .respond_with(place("38.0964", "127.0747"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "부산광역시 해운대구 우동 1408"))
        .respond_with(place("35.1631", "129.1636"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_geocode_once_then_cache() {
    let dir = tempfile::tempdir().unwrap();
    let roster_path = dir.path().join("sites.csv");
    let cache_path = dir.path().join("site_cache.csv");
    std::fs::write(&roster_path, ROSTER).unwrap();

    let nominatim = MockServer::start().await;
    mount_geocoder(&nominatim).await;
    let geocoder = Geocoder::new(&nominatim.uri(), "sitewatch-test", Duration::ZERO)
        .unwrap()
        .with_retry_policy(RetryPolicy::none());

    // First run geocodes everything
    let mut sites = load_roster(&roster_path).unwrap();
    let mut cache = SiteCache::load(&cache_path).unwrap();
    assert_eq!(cache.apply(&mut sites), 3);

    let report = geocoder.geocode_missing(&mut sites, &mut cache).await;
    assert_eq!(report.resolved, 3);
    assert!(report.failed.is_empty());
    cache.save(&cache_path).unwrap();

    let first_run_requests = nominatim.received_requests().await.unwrap().len();

    // Second run is served from the cache
    let mut sites = load_roster(&roster_path).unwrap();
    let cache = SiteCache::load(&cache_path).unwrap();
    assert_eq!(cache.apply(&mut sites), 0);
    assert!(sites.iter().all(|s| s.coordinates.is_some()));
    assert_eq!(
        nominatim.received_requests().await.unwrap().len(),
        first_run_requests
    );
}

#[tokio::test]
async fn test_roster_to_poster() {
    let dir = tempfile::tempdir().unwrap();
    let roster_path = dir.path().join("sites.csv");
    std::fs::write(&roster_path, ROSTER).unwrap();

    let nominatim = MockServer::start().await;
    mount_geocoder(&nominatim).await;
    let geocoder = Geocoder::new(&nominatim.uri(), "sitewatch-test", Duration::ZERO)
        .unwrap()
        .with_retry_policy(RetryPolicy::none());

    let mut sites = load_roster(&roster_path).unwrap();
    let mut cache = SiteCache::default();
    geocoder.geocode_missing(&mut sites, &mut cache).await;

    let kma = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/WthrWrnInfoService/getPwnStatus"))
        .and(query_param("serviceKey", "test-key"))
        .respond_with(kma_items(serde_json::json!([{
            "tmFc": "202501080600",
            "t6": "o 한파경보 : 강원도(철원군평지, 화천군평지), 경기도(연천, 포천)\r\n\
                   o 건조주의보 : 부산, 울산, 경상남도(양산, 김해)"
        }])))
        .mount(&kma)
        .await;
    // 철원 (65, 139)
    Mock::given(method("GET"))
        .and(path("/VilageFcstInfoService_2.0/getUltraSrtNcst"))
        .and(query_param("nx", "65"))
        .and(query_param("ny", "139"))
        .respond_with(temperature("-16.1"))
        .mount(&kma)
        .await;
    Mock::given(method("GET"))
        .and(path("/VilageFcstInfoService_2.0/getUltraSrtNcst"))
        .respond_with(temperature("-9.4"))
        .mount(&kma)
        .await;

    let client = KmaClient::new(&kma.uri(), "test-key")
        .unwrap()
        .with_retry_policy(RetryPolicy::none());
    let monitor = Monitor::new(client, sites.clone(), Thresholds::default());

    let now = Utc.with_ymd_and_hms(2025, 1, 8, 22, 50, 0).unwrap();
    let snapshot = monitor.refresh(now).await;

    assert!(snapshot.errors.is_empty(), "{:?}", snapshot.errors);
    assert_eq!(
        snapshot.site("철원 교량공사").unwrap().status,
        SiteStatus::SevereCold
    );
    assert_eq!(
        snapshot.site("연천 도로공사").unwrap().status,
        SiteStatus::Advisory
    );
    // A dry-air advisory still counts as an advisory
    assert_eq!(
        snapshot.site("부산 신축공사").unwrap().status,
        SiteStatus::Advisory
    );

    let poster = PosterSummary::build(&snapshot.summary, &sites, now.naive_utc());
    assert_eq!(
        poster.group(GroupKind::ColdWarning),
        ["연천 도로공사", "철원 교량공사"]
    );
    assert!(poster.group(GroupKind::ColdAdvisory).is_empty());
    // Dry-air advisories are not pinned
    assert_eq!(poster.pins.len(), 2);
    assert_eq!(poster.safety.len(), 1);
}

#[tokio::test]
async fn test_no_advisories_in_effect() {
    let kma = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/WthrWrnInfoService/getPwnStatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": {"header": {"resultCode": "03", "resultMsg": "NO_DATA"}}
        })))
        .mount(&kma)
        .await;
    Mock::given(method("GET"))
        .and(path("/VilageFcstInfoService_2.0/getUltraSrtNcst"))
        .respond_with(temperature("2.0"))
        .mount(&kma)
        .await;

    let sites = vec![sitewatch_weather::Site::new("서울현장", "서울특별시 중구")
        .with_coordinates(sitewatch_weather::Coordinates::new(37.5665, 126.978))];
    let client = KmaClient::new(&kma.uri(), "test-key")
        .unwrap()
        .with_retry_policy(RetryPolicy::none());
    let monitor = Monitor::new(client, sites.clone(), Thresholds::default());

    let now = Utc.with_ymd_and_hms(2025, 7, 1, 3, 0, 0).unwrap();
    let snapshot = monitor.refresh(now).await;

    assert!(snapshot.errors.is_empty());
    assert!(snapshot.summary.is_empty());
    assert_eq!(snapshot.sites[0].status, SiteStatus::Normal);

    let poster = PosterSummary::build(&snapshot.summary, &sites, now.naive_utc());
    assert!(poster.is_all_clear());
}
