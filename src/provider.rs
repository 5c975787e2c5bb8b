use std::time::Duration;

use reqwest::{Client, Url, header};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::{config::Config, error::ProviderError};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound calls to the payment provider. Every business call authenticates
/// afresh; tokens are never cached.
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.provider_base_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            timeout: TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[tracing::instrument(skip_all)]
    pub async fn fetch_access_token(&self) -> Result<String, ProviderError> {
        let res = self
            .client
            .post(self.endpoint(&["v1", "oauth2", "token"])?)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&[("grant_type", "client_credentials")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Authentication(e.to_string()))?;

        tracing::debug!(pp_token_status = ?res.status());

        let body: Value = res
            .json()
            .await
            .map_err(|e| ProviderError::Authentication(e.to_string()))?;

        body.get("access_token")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::Authentication("response has no access_token".into()))
    }

    /// Submits a payment for approval. The provider's reply is returned as is,
    /// whatever its status code.
    #[tracing::instrument(skip_all)]
    pub async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<Value, ProviderError> {
        let url = self.endpoint(&["v1", "payments", "payment"])?;
        let token = self.fetch_access_token().await?;

        self.post_json(url, &token, request).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn execute_payment(
        &self,
        payment_id: &str,
        payer_id: &str,
    ) -> Result<Value, ProviderError> {
        if !is_payment_id(payment_id) {
            return Err(ProviderError::InvalidPaymentId(payment_id.to_string()));
        }

        let url = self.endpoint(&["v1", "payments", "payment", payment_id, "execute"])?;
        let token = self.fetch_access_token().await?;

        let body = ExecutePaymentRequest { payer_id };

        self.post_json(url, &token, &body).await
    }

    /// Appends `segments` to the base URL, each as a single encoded path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| ProviderError::Endpoint(e.to_string()))?;

        url.path_segments_mut()
            .map_err(|_| ProviderError::Endpoint(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        token: &str,
        body: &B,
    ) -> Result<Value, ProviderError> {
        let res = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = res.status();

        tracing::debug!(pp_payments_status = ?status);

        if !status.is_success() {
            tracing::warn!(%status, "pp_payments_rejected");
        }

        res.json().await.map_err(ProviderError::from_transport)
    }
}

/// Provider payment ids are opaque tokens like `PAYID-L2X3Y4Z`. Anything else
/// could walk the path or smuggle a query, so it never reaches the provider.
fn is_payment_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 100
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// First `href` in the reply's `links` whose `rel` is `approval_url`.
pub fn approval_url(response: &Value) -> Option<&str> {
    response
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("approval_url"))?
        .get("href")?
        .as_str()
}

pub fn is_approved(response: &Value) -> bool {
    response.get("state").and_then(Value::as_str) == Some("approved")
}

#[derive(Debug, serde::Serialize)]
pub struct CreatePaymentRequest {
    pub intent: &'static str,
    pub payer: Payer,
    pub transactions: Vec<Transaction>,
    pub redirect_urls: RedirectUrls,
}

impl CreatePaymentRequest {
    /// A single-transaction sale paid through the provider's own wallet.
    pub fn sale(
        amount: Decimal,
        currency: String,
        description: String,
        redirect_urls: RedirectUrls,
    ) -> Self {
        Self {
            intent: "sale",
            payer: Payer {
                payment_method: "paypal",
            },
            transactions: vec![Transaction {
                amount: Amount {
                    total: amount,
                    currency,
                },
                description,
            }],
            redirect_urls,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct Payer {
    pub payment_method: &'static str,
}

#[derive(Debug, serde::Serialize)]
pub struct Transaction {
    pub amount: Amount,
    pub description: String,
}

#[derive(Debug, serde::Serialize)]
pub struct Amount {
    pub total: Decimal,
    pub currency: String,
}

#[derive(Debug, serde::Serialize)]
pub struct RedirectUrls {
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(serde::Serialize)]
struct ExecutePaymentRequest<'a> {
    payer_id: &'a str,
}

#[cfg(test)]
pub(crate) mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{
            basic_auth, bearer_token, body_json, body_string, header, method, path, path_regex,
        },
    };

    use super::*;

    pub(crate) const TOKEN: &str = "mock_access_token";

    pub(crate) fn config(base_url: &str) -> Config {
        Config {
            client_id: "mock_client_id".into(),
            client_secret: "mock_client_secret".into(),
            database_url: ":memory:".into(),
            provider_base_url: base_url.into(),
            public_url: None,
        }
    }

    pub(crate) async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .and(basic_auth("mock_client_id", "mock_client_secret"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": TOKEN,
                "token_type": "Bearer",
                "expires_in": 32400
            })))
            .mount(server)
            .await;
    }

    fn sample_request() -> CreatePaymentRequest {
        CreatePaymentRequest::sale(
            dec!(30.00),
            "USD".into(),
            "Payment transaction description".into(),
            RedirectUrls {
                return_url: "http://localhost/payments/execute".into(),
                cancel_url: "http://localhost/payments/cancel".into(),
            },
        )
    }

    #[tokio::test]
    async fn fetches_token_with_client_credentials() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        let token = client.fetch_access_token().await.expect("token");

        assert_eq!(token, TOKEN);
    }

    #[tokio::test]
    async fn token_without_access_token_is_authentication_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "Client Authentication failed"
            })))
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        let err = client.fetch_access_token().await.expect_err("no token");

        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_authentication_error() {
        // nothing listens on the discard port
        let client = ProviderClient::new(Client::new(), &config("http://127.0.0.1:9"));

        let err = client.fetch_access_token().await.expect_err("unreachable");

        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn create_payment_posts_sale_with_bearer_token() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1/payments/payment"))
            .and(bearer_token(TOKEN))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "intent": "sale",
                "payer": { "payment_method": "paypal" },
                "transactions": [{
                    "amount": { "total": "30.00", "currency": "USD" },
                    "description": "Payment transaction description"
                }],
                "redirect_urls": {
                    "return_url": "http://localhost/payments/execute",
                    "cancel_url": "http://localhost/payments/cancel"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "mock_payment_id" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        let res = client.create_payment(&sample_request()).await.expect("created");

        assert_eq!(res, json!({ "id": "mock_payment_id" }));
    }

    #[tokio::test]
    async fn create_payment_returns_error_bodies_unchanged() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        let body = json!({ "name": "VALIDATION_ERROR", "message": "Invalid request" });

        Mock::given(method("POST"))
            .and(path("/v1/payments/payment"))
            .respond_with(ResponseTemplate::new(400).set_body_json(body.clone()))
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        let res = client.create_payment(&sample_request()).await.expect("parsed");

        assert_eq!(res, body);
    }

    #[tokio::test]
    async fn create_payment_rejects_non_json_body() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1/payments/payment"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        let err = client.create_payment(&sample_request()).await.expect_err("html");

        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn execute_payment_sends_payer_id() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1/payments/payment/mock_payment_id/execute"))
            .and(bearer_token(TOKEN))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "payer_id": "mock_payer_id" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "approved" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        let res = client
            .execute_payment("mock_payment_id", "mock_payer_id")
            .await
            .expect("executed");

        assert_eq!(res, json!({ "state": "approved" }));
        assert!(is_approved(&res));
    }

    #[tokio::test]
    async fn each_call_fetches_its_own_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": TOKEN })))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/payments/payment/PAY-1/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "approved" })))
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        client.execute_payment("PAY-1", "PAYER-1").await.expect("first");
        client.execute_payment("PAY-1", "PAYER-1").await.expect("second");
    }

    #[tokio::test]
    async fn execute_payment_rejects_path_walking_ids() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": TOKEN,
                "state": "approved"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()));

        for id in ["x/../../other", "..", "%2e%2e", "PAY-1?x=1", "PAY-1#frag", ""] {
            let err = client
                .execute_payment(id, "PAYER-1")
                .await
                .expect_err("rejected");

            assert!(matches!(err, ProviderError::InvalidPaymentId(_)), "{id}");
        }
    }

    #[test]
    fn endpoint_keeps_base_path_and_encodes_segments() {
        let client = ProviderClient::new(Client::new(), &config("http://localhost:8080/paypal/"));

        let url = client
            .endpoint(&["v1", "payments", "payment", "a b", "execute"])
            .expect("url");

        assert_eq!(
            url.as_str(),
            "http://localhost:8080/paypal/v1/payments/payment/a%20b/execute"
        );
    }

    #[test]
    fn accepts_provider_issued_ids() {
        assert!(is_payment_id("PAYID-L2X3Y4Z5A6B7C8D9"));
        assert!(is_payment_id("PAY-1AB23456CD789012EF34GHIJ"));
        assert!(!is_payment_id("PAY 1"));
        assert!(!is_payment_id(&"A".repeat(101)));
    }

    #[tokio::test]
    async fn slow_business_call_times_out() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1/payments/payment/PAY-1/execute"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "state": "approved" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()))
            .with_timeout(Duration::from_millis(100));

        let err = client
            .execute_payment("PAY-1", "PAYER-1")
            .await
            .expect_err("timed out");

        assert!(matches!(err, ProviderError::Timeout));
    }

    #[tokio::test]
    async fn slow_token_fetch_is_authentication_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": TOKEN }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ProviderClient::new(Client::new(), &config(&server.uri()))
            .with_timeout(Duration::from_millis(100));

        let err = client.fetch_access_token().await.expect_err("timed out");

        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[test]
    fn default_timeout_is_ten_seconds() {
        let client = ProviderClient::new(Client::new(), &config("http://localhost"));

        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn approval_url_picks_matching_rel() {
        let res = json!({
            "links": [
                { "rel": "self", "href": "https://api/self" },
                { "rel": "approval_url", "href": "https://approve/me" },
                { "rel": "execute", "href": "https://api/execute" }
            ]
        });

        assert_eq!(approval_url(&res), Some("https://approve/me"));
    }

    #[test]
    fn approval_url_absent_without_links() {
        assert_eq!(approval_url(&json!({ "name": "INTERNAL_SERVICE_ERROR" })), None);
        assert_eq!(approval_url(&json!({ "links": [{ "rel": "self", "href": "x" }] })), None);
    }

    #[test]
    fn only_approved_state_counts() {
        assert!(is_approved(&json!({ "state": "approved" })));
        assert!(!is_approved(&json!({ "state": "failed" })));
        assert!(!is_approved(&json!({})));
    }
}
