//! Cloud Map (Route53 auto-naming) backend. Service registration semantics
//! follow the AWS contract and live behind the same substrate DNS KECS
//! namespaces provide, so the control plane only needs to acknowledge the
//! calls clients make while wiring service connect.

use axum::extract::Request;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub async fn handle(op: &str, _req: Request) -> Response {
    tracing::debug!(op, "service discovery call");
    let body = match op {
        "CreatePrivateDnsNamespace" | "CreateHttpNamespace" | "DeleteNamespace" => {
            json!({ "OperationId": uuid::Uuid::new_v4().to_string() })
        }
        "GetOperation" => json!({ "Operation": { "Status": "SUCCESS" } }),
        "ListNamespaces" => json!({ "Namespaces": [] }),
        "ListServices" => json!({ "Services": [] }),
        "ListInstances" => json!({ "Instances": [] }),
        "DiscoverInstances" => json!({ "Instances": [] }),
        _ => json!({}),
    };
    (
        [(header::CONTENT_TYPE, "application/x-amz-json-1.1")],
        body.to_string(),
    )
        .into_response()
}
