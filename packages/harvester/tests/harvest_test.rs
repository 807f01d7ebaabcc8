//! End-to-end harvest runs against a mock CSW catalogue.
//!
//! The catalogue serves three records over two pages: two datasets and one
//! WFS service operating on the first dataset. The service's capabilities
//! document is served by the same mock server.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use geoharvest_csw::HttpMethod;
use geoharvest_harvester::index::BulkFileIndex;
use geoharvest_harvester::settings::{HarvestSettings, PublishSettings};
use geoharvest_harvester::{HarvestOrchestrator, LocalStore, Storage};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Load fixture file content.
fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {}: {}", path.display(), e))
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/xml")
}

fn settings(server: &MockServer, method: HttpMethod) -> HarvestSettings {
    let mut settings = HarvestSettings::new("geo", format!("{}/csw", server.uri()));
    settings.http_method = method;
    settings.max_records = 2;
    settings.max_concurrent = 2;
    settings.http.max_retries = 1;
    settings.http.timeout_secs = 5;
    settings
}

fn second_page(server: &MockServer) -> String {
    load_fixture("page_2.xml").replace("{{WFS_URL}}", &format!("{}/wfs", server.uri()))
}

/// Mount the catalogue over GET, each page expected exactly `runs` times.
async fn mount_get_catalogue(server: &MockServer, runs: u64) {
    Mock::given(method("GET"))
        .and(path("/csw"))
        .and(query_param("resultType", "hits"))
        .respond_with(xml(load_fixture("hits.xml")))
        .expect(runs)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/csw"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "1"))
        .respond_with(xml(load_fixture("page_1.xml")))
        .expect(runs)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/csw"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "3"))
        .respond_with(xml(second_page(server)))
        .expect(runs)
        .mount(server)
        .await;
}

async fn mount_capabilities(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/wfs"))
        .and(query_param("REQUEST", "GetCapabilities"))
        .respond_with(xml(load_fixture("wfs_capabilities.xml")))
        .mount(server)
        .await;
}

fn brief_response(ids: &[&str]) -> String {
    let records: String = ids
        .iter()
        .map(|id| format!("<csw:BriefRecord><dc:identifier>{id}</dc:identifier></csw:BriefRecord>"))
        .collect();
    format!(
        r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:dc="http://purl.org/dc/elements/1.1/">
<csw:SearchResults numberOfRecordsMatched="{n}" numberOfRecordsReturned="{n}" nextRecord="0">{records}</csw:SearchResults>
</csw:GetRecordsResponse>"#,
        n = ids.len()
    )
}

fn transaction_response(inserted: u64, updated: u64, deleted: u64) -> String {
    format!(
        r#"<csw:TransactionResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2">
<csw:TransactionSummary><csw:totalInserted>{inserted}</csw:totalInserted><csw:totalUpdated>{updated}</csw:totalUpdated><csw:totalDeleted>{deleted}</csw:totalDeleted></csw:TransactionSummary>
</csw:TransactionResponse>"#
    )
}

/// Mount a CSW-T target that already holds `existing` and answers every
/// `action` with `response`, expected `times` times.
async fn mount_target(
    target: &MockServer,
    existing: &[&str],
    action: &str,
    response: String,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(body_string_contains("<csw:GetRecords"))
        .respond_with(xml(brief_response(existing)))
        .expect(1)
        .mount(target)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(action))
        .respond_with(xml(response))
        .expect(times)
        .mount(target)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("<csw:Delete"))
        .and(body_string_contains("%source:geo%"))
        .and(body_string_contains("<ogc:Not>"))
        .respond_with(xml(transaction_response(0, 0, 1)))
        .expect(1)
        .mount(target)
        .await;
}

async fn sorted_ids(store: &LocalStore) -> Vec<String> {
    let mut ids: Vec<String> = store
        .get_datasets("geo")
        .await
        .unwrap()
        .into_iter()
        .chain(store.get_services("geo").await.unwrap())
        .map(|r| r.identifier)
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_harvest_commits_records_couplings_and_index() {
    let server = MockServer::start().await;
    mount_get_catalogue(&server, 1).await;
    mount_capabilities(&server).await;

    let store_dir = tempdir().unwrap();
    let index_dir = tempdir().unwrap();
    let store = Arc::new(LocalStore::open(store_dir.path()).await.unwrap());

    let outcome = HarvestOrchestrator::for_csw(settings(&server, HttpMethod::Get), Arc::clone(&store))
        .unwrap()
        .with_index(Arc::new(BulkFileIndex::new(index_dir.path())))
        .run()
        .await;

    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(outcome.summary.num_docs, 3);
    assert_eq!(outcome.summary.couplings, 1);
    assert!(outcome.summary.app_errors.is_empty());
    assert_eq!(sorted_ids(&store).await, vec!["ds-1", "ds-2", "svc-1"]);

    let couplings = store.get_couplings("geo").await.unwrap();
    assert_eq!(couplings.len(), 1);
    assert_eq!(couplings[0].dataset_identifier, "ds-1");
    assert_eq!(couplings[0].distribution.resolved_names, vec!["app:ZoningPlan"]);

    assert!(store_dir.path().join("geo/records/ds-1.yaml").exists());
    let bulk = fs::read_to_string(index_dir.path().join("geo.ndjson")).unwrap();
    assert_eq!(bulk.lines().count(), 8);
}

#[tokio::test]
async fn test_rerun_is_idempotent_across_reopen() {
    let server = MockServer::start().await;
    mount_get_catalogue(&server, 2).await;
    mount_capabilities(&server).await;
    let store_dir = tempdir().unwrap();

    for _ in 0..2 {
        let store = Arc::new(LocalStore::open(store_dir.path()).await.unwrap());
        let outcome = HarvestOrchestrator::for_csw(settings(&server, HttpMethod::Get), store)
            .unwrap()
            .run()
            .await;
        assert!(outcome.success, "{:?}", outcome.message);
        assert_eq!(outcome.summary.deleted, 0);
    }

    let reopened = LocalStore::open(store_dir.path()).await.unwrap();
    assert_eq!(sorted_ids(&reopened).await, vec!["ds-1", "ds-2", "svc-1"]);
    assert_eq!(reopened.get_couplings("geo").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failing_page_rolls_back_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "hits"))
        .respond_with(xml(load_fixture("hits.xml")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("startPosition", "1"))
        .and(query_param("resultType", "results"))
        .respond_with(xml(load_fixture("page_1.xml")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("startPosition", "3"))
        .and(query_param("resultType", "results"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(LocalStore::new());
    let outcome = HarvestOrchestrator::for_csw(settings(&server, HttpMethod::Get), Arc::clone(&store))
        .unwrap()
        .run()
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.summary.num_docs, 2);
    assert!(outcome.message.unwrap().contains("position 3"));
    assert!(sorted_ids(&store).await.is_empty());
}

#[tokio::test]
async fn test_incremental_run_over_post_filters_on_modified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("PropertyIsGreaterThanOrEqualTo"))
        .and(body_string_contains(r#"resultType="hits""#))
        .respond_with(xml(load_fixture("hits.xml").replace(
            r#"numberOfRecordsMatched="3""#,
            r#"numberOfRecordsMatched="0""#,
        )))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(r#"resultType="hits""#))
        .respond_with(xml(load_fixture("hits.xml")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(r#"resultType="results""#))
        .and(body_string_contains(r#"startPosition="1""#))
        .respond_with(xml(load_fixture("page_1.xml")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(r#"resultType="results""#))
        .and(body_string_contains(r#"startPosition="3""#))
        .respond_with(xml(second_page(&server)))
        .mount(&server)
        .await;
    mount_capabilities(&server).await;

    let store = Arc::new(LocalStore::new());
    let job = settings(&server, HttpMethod::Post).with_incremental(true);

    let first = HarvestOrchestrator::for_csw(job.clone(), Arc::clone(&store))
        .unwrap()
        .run()
        .await;
    assert!(first.success, "{:?}", first.message);
    assert!(!first.summary.incremental);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = HarvestOrchestrator::for_csw(job, Arc::clone(&store))
        .unwrap()
        .run()
        .await;
    assert!(second.success, "{:?}", second.message);
    assert!(second.summary.incremental);
    assert_eq!(second.summary.num_docs, 0);
    assert_eq!(sorted_ids(&store).await, vec!["ds-1", "ds-2", "svc-1"]);
}

#[tokio::test]
async fn test_publish_inserts_then_updates_only_this_runs_records() {
    let source = MockServer::start().await;
    let target = MockServer::start().await;
    mount_get_catalogue(&source, 1).await;
    mount_capabilities(&source).await;
    mount_target(&target, &[], "<csw:Insert>", transaction_response(1, 0, 0), 3).await;

    let mut job = settings(&source, HttpMethod::Get);
    job.thresholds.cancel_percent = 50.0;
    job.publish = Some(PublishSettings {
        url: format!("{}/csw", target.uri()),
        username: None,
        password: None,
        page_size: 10,
        delete_stale: true,
    });
    let store = Arc::new(LocalStore::new());

    let first = HarvestOrchestrator::for_csw(job.clone(), Arc::clone(&store))
        .unwrap()
        .run()
        .await;
    assert!(first.success, "{:?}", first.message);
    let published = first.summary.publish.unwrap();
    assert_eq!((published.inserted, published.updated, published.deleted), (3, 0, 1));
    source.verify().await;
    target.verify().await;

    // The service disappears from the source; the datasets are unchanged.
    source.reset().await;
    target.reset().await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "hits"))
        .respond_with(xml(load_fixture("hits.xml").replace(
            r#"numberOfRecordsMatched="3""#,
            r#"numberOfRecordsMatched="2""#,
        )))
        .mount(&source)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "1"))
        .respond_with(xml(load_fixture("page_1.xml")))
        .expect(1)
        .mount(&source)
        .await;
    mount_capabilities(&source).await;
    mount_target(
        &target,
        &["ds-1", "ds-2", "svc-1"],
        "<csw:Update>",
        transaction_response(0, 1, 0),
        2,
    )
    .await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = HarvestOrchestrator::for_csw(job, Arc::clone(&store))
        .unwrap()
        .run()
        .await;
    assert!(second.success, "{:?}", second.message);
    let published = second.summary.publish.unwrap();
    assert_eq!((published.inserted, published.updated, published.failed), (0, 2, 0));
    assert_eq!(second.summary.deleted, 1);
    assert_eq!(sorted_ids(&store).await, vec!["ds-1", "ds-2"]);

    // The stale delete spares exactly the records tagged by this run.
    let harvested_at = store.get_datasets("geo").await.unwrap()[0].dataset.harvested_at;
    let marker = format!("%transaction:{}%", harvested_at.timestamp_millis());
    let requests = target.received_requests().await.unwrap();
    let delete = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .find(|body| body.contains("<csw:Delete"))
        .unwrap();
    assert!(delete.contains(&marker), "{delete}");
}
