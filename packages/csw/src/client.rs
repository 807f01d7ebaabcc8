//! High-level client for one CSW endpoint.

use std::collections::HashSet;

use reqwest::Client;
use url::Url;

use crate::error::Result;
use crate::http::{create_client, send_text, HttpOptions};
use crate::records::{parse_brief_page, parse_hits, BriefPage};
use crate::request::{CswRequestBuilder, GetRecordsQuery, HttpMethod, RequestSpec};
use crate::transaction::{build_transaction, parse_transaction_response, TransactionAction, TransactionSummary};

/// A CSW endpoint together with its transport settings.
#[derive(Debug, Clone)]
pub struct CswClient {
    http: Client,
    builder: CswRequestBuilder,
    options: HttpOptions,
}

impl CswClient {
    pub fn new(endpoint: &str, method: HttpMethod, options: HttpOptions) -> Result<Self> {
        Ok(Self {
            http: create_client(&options)?,
            builder: CswRequestBuilder::new(endpoint, method)?,
            options,
        })
    }

    pub fn builder(&self) -> &CswRequestBuilder {
        &self.builder
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Send a prepared request and return the body.
    pub async fn send(&self, request: &RequestSpec) -> Result<String> {
        send_text(&self.http, request, &self.options).await
    }

    /// `GET` an arbitrary URL with this client's transport settings.
    pub async fn get_url(&self, url: Url) -> Result<String> {
        let request = RequestSpec {
            method: HttpMethod::Get,
            url,
            body: None,
        };
        self.send(&request).await
    }

    /// Number of records matching a query (`resultType=hits`).
    pub async fn hits(&self, query: &GetRecordsQuery) -> Result<u64> {
        let body = self.send(&self.builder.hits(query)).await?;
        parse_hits(&body)
    }

    /// One page of brief records starting at `start_position`.
    pub async fn brief_page(&self, start_position: u64, page_size: u32) -> Result<BriefPage> {
        let query = GetRecordsQuery::brief(page_size).with_start_position(start_position);
        let body = self.send(&self.builder.get_records(&query)).await?;
        parse_brief_page(&body)
    }

    /// Collect every `dc:identifier` in the catalogue.
    ///
    /// Pages while `startPosition <= numberOfRecordsMatched` and the server
    /// keeps returning records.
    pub async fn discover_identifiers(&self, page_size: u32) -> Result<HashSet<String>> {
        let mut identifiers = HashSet::new();
        let mut start: u64 = 1;

        loop {
            let page = self.brief_page(start, page_size).await?;
            let returned = page.results.returned.max(page.identifiers.len() as u64);
            identifiers.extend(page.identifiers);

            tracing::debug!(
                start,
                matched = page.results.matched,
                returned,
                "Brief page received"
            );

            if returned == 0 {
                break;
            }
            start += returned;
            if start > page.results.matched {
                break;
            }
        }

        Ok(identifiers)
    }

    /// Post a transaction and parse its summary.
    pub async fn transaction(&self, actions: &[TransactionAction]) -> Result<TransactionSummary> {
        let request = self.builder.transaction(build_transaction(actions));
        let body = self.send(&request).await?;
        parse_transaction_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn brief_response(matched: u64, ids: &[&str]) -> String {
        let records: String = ids
            .iter()
            .map(|id| format!("<csw:BriefRecord><dc:identifier>{id}</dc:identifier></csw:BriefRecord>"))
            .collect();
        format!(
            r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:dc="http://purl.org/dc/elements/1.1/">
<csw:SearchResults numberOfRecordsMatched="{matched}" numberOfRecordsReturned="{}" nextRecord="0">{records}</csw:SearchResults>
</csw:GetRecordsResponse>"#,
            ids.len()
        )
    }

    #[tokio::test]
    async fn test_discover_identifiers_pages_until_matched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("startPosition", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(brief_response(3, &["a", "b"])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startPosition", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(brief_response(3, &["c"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = CswClient::new(&server.uri(), HttpMethod::Get, HttpOptions::default()).unwrap();
        let ids = client.discover_identifiers(2).await.unwrap();

        let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_discover_identifiers_stops_on_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(brief_response(50, &[])))
            .expect(1)
            .mount(&server)
            .await;

        let client = CswClient::new(&server.uri(), HttpMethod::Get, HttpOptions::default()).unwrap();
        assert!(client.discover_identifiers(10).await.unwrap().is_empty());
    }
}
