use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use ulid::Ulid;

use crate::limits::MAX_CATALOG_BODY_BYTES;

use super::{CatalogResource, CatalogSource, LookupFailure};

/// Catalog over HTTP: `GET {base_url}/api/resources/{uuid}`.
pub struct HttpCatalog {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// The catalog keys resources by UUID; ULIDs share the same 128 bits.
    fn resource_url(&self, resource_id: Ulid) -> String {
        format!(
            "{}/api/resources/{}",
            self.base_url,
            uuid::Uuid::from(resource_id)
        )
    }
}

fn transport_failure(e: reqwest::Error) -> LookupFailure {
    if e.is_timeout() {
        LookupFailure::Timeout
    } else {
        LookupFailure::Transport(e.to_string())
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn get_resource(&self, resource_id: Ulid) -> Result<CatalogResource, LookupFailure> {
        let response = self
            .client
            .get(self.resource_url(resource_id))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LookupFailure::NotFound);
        }
        if !status.is_success() {
            return Err(LookupFailure::Status(status.as_u16()));
        }

        let body = read_capped(response).await?;
        serde_json::from_slice(&body).map_err(|e| LookupFailure::Malformed(e.to_string()))
    }
}

fn oversized(len: u64) -> LookupFailure {
    LookupFailure::Malformed(format!(
        "body of at least {len} bytes exceeds {MAX_CATALOG_BODY_BYTES}"
    ))
}

/// Reads the body chunk by chunk, never buffering past the cap.
async fn read_capped(mut response: reqwest::Response) -> Result<Vec<u8>, LookupFailure> {
    let limit = MAX_CATALOG_BODY_BYTES as u64;
    if let Some(declared) = response.content_length() {
        if declared > limit {
            return Err(oversized(declared));
        }
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(transport_failure)? {
        let len = (body.len() + chunk.len()) as u64;
        if len > limit {
            return Err(oversized(len));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resource_path(id: Ulid) -> String {
        format!("/api/resources/{}", uuid::Uuid::from(id))
    }

    async fn catalog(server: &MockServer) -> HttpCatalog {
        HttpCatalog::new(server.uri(), Duration::from_millis(300)).unwrap()
    }

    #[tokio::test]
    async fn fetches_resource() {
        let server = MockServer::start().await;
        let id = Ulid::new();
        Mock::given(method("GET"))
            .and(path(resource_path(id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": uuid::Uuid::from(id).to_string(),
                "name": "Consultation",
                "price": 80,
                "durationInMinutes": 30,
                "active": true,
                "unavailablePeriods": [
                    {"startTime": "2025-06-01T09:00:00", "endTime": "2025-06-01T10:00:00"}
                ]
            })))
            .mount(&server)
            .await;

        let resource = catalog(&server).await.get_resource(id).await.unwrap();
        assert!(resource.active);
        assert_eq!(resource.unavailable_periods.map(|p| p.len()), Some(1));
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let server = MockServer::start().await;
        let id = Ulid::new();
        Mock::given(method("GET"))
            .and(path(resource_path(id)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = catalog(&server).await.get_resource(id).await.unwrap_err();
        assert_eq!(err, LookupFailure::NotFound);
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;
        let id = Ulid::new();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = catalog(&server).await.get_resource(id).await.unwrap_err();
        assert_eq!(err, LookupFailure::Status(503));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = catalog(&server).await.get_resource(Ulid::new()).await.unwrap_err();
        assert!(matches!(err, LookupFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_catalog_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"active": true}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = catalog(&server).await.get_resource(Ulid::new()).await.unwrap_err();
        assert_eq!(err, LookupFailure::Timeout);
    }

    #[tokio::test]
    async fn unreachable_catalog_is_transport_failure() {
        let c = HttpCatalog::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let err = c.get_resource(Ulid::new()).await.unwrap_err();
        assert!(matches!(
            err,
            LookupFailure::Transport(_) | LookupFailure::Timeout
        ));
    }

    #[tokio::test]
    async fn oversized_body_is_malformed() {
        let server = MockServer::start().await;
        let padding = " ".repeat(MAX_CATALOG_BODY_BYTES);
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("{{\"active\": true}}{padding}")),
            )
            .mount(&server)
            .await;

        let err = catalog(&server).await.get_resource(Ulid::new()).await.unwrap_err();
        match err {
            LookupFailure::Malformed(msg) => assert!(msg.contains("exceeds"), "{msg}"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_at_the_limit_is_read() {
        let server = MockServer::start().await;
        let json = "{\"active\": true}";
        let padding = " ".repeat(MAX_CATALOG_BODY_BYTES - json.len());
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{json}{padding}")))
            .mount(&server)
            .await;

        let resource = catalog(&server).await.get_resource(Ulid::new()).await.unwrap();
        assert!(resource.active);
    }
}
