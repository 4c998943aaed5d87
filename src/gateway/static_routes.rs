//! Static route table: exact paths answered locally with a fixed JSON body.

use std::collections::{BTreeMap, HashMap};

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;

/// Pre-serialized JSON bodies keyed by exact path.
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    bodies: HashMap<String, Bytes>,
}

impl StaticRoutes {
    pub fn new(routes: &BTreeMap<String, serde_json::Value>) -> Self {
        let bodies = routes
            .iter()
            .map(|(path, value)| (path.clone(), Bytes::from(value.to_string())))
            .collect();
        Self { bodies }
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// 200 with the configured JSON for `path`, whatever the method.
    pub fn respond(&self, path: &str) -> Option<axum::response::Response> {
        let body = self.bodies.get(path)?;
        let mut response = axum::response::Response::new(Body::from(body.clone()));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn exact_path_only() {
        let mut table = BTreeMap::new();
        table.insert("/health".to_string(), serde_json::json!({"status": "ok"}));
        let routes = StaticRoutes::new(&table);

        assert!(routes.respond("/health/").is_none());
        assert!(routes.respond("/other").is_none());

        let response = routes.respond("/health").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
    }
}
