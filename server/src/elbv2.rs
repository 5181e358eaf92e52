//! Form-encoded backend for the ELBv2 family of APIs (and EC2/RDS kin).
//!
//! Routing is the contract here; the responses are minimal well-formed XML
//! documents that keep Terraform and the AWS CLI handshaking. Anything
//! stateful about load balancers lives outside the control-plane core.

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn handle(req: Request) -> Response {
    let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read form body: {err}"))
                .into_response();
        }
    };
    let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(&body).unwrap_or_default();
    let action = fields
        .iter()
        .find(|(key, _)| key == "Action")
        .map(|(_, value)| value.as_str())
        .unwrap_or("");

    if action.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing Action parameter").into_response();
    }
    tracing::debug!(action, "form-encoded API call");

    let result = match action {
        "DescribeLoadBalancers" => "<LoadBalancers/>",
        "DescribeTargetGroups" => "<TargetGroups/>",
        "DescribeListeners" => "<Listeners/>",
        "DescribeRules" => "<Rules/>",
        "DescribeTargetHealth" => "<TargetHealthDescriptions/>",
        _ => "",
    };
    xml_response(action, result)
}

fn xml_response(action: &str, result: &str) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<{action}Response xmlns="http://elasticloadbalancing.amazonaws.com/doc/2015-12-01/">
  <{action}Result>{result}</{action}Result>
  <ResponseMetadata><RequestId>{request_id}</RequestId></ResponseMetadata>
</{action}Response>"#
    );
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[tokio::test]
    async fn test_known_action_gets_an_empty_result_set() {
        let req = Request::post("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("Action=DescribeLoadBalancers&Version=2015-12-01"))
            .unwrap();
        let res = handle(req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("<DescribeLoadBalancersResponse"));
        assert!(text.contains("<LoadBalancers/>"));
        assert!(text.contains("<RequestId>"));
    }

    #[tokio::test]
    async fn test_missing_action_is_a_bad_request() {
        let req = Request::post("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("Version=2015-12-01"))
            .unwrap();
        let res = handle(req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
