//! ZDX API client.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};
use zscaler_sdk_auth::Authenticator;
use zscaler_sdk_client::{
    Context, PostDecode, QueryParams, RequestBuilder, RequestMethod, Response, ResponseMeta,
    Result, ZsHttpClient,
};

use crate::config::Configuration;

/// A decoded response value together with the response it came from.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub response: ResponseMeta,
}

impl<T> Decoded<T> {
    /// Drop the response metadata.
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Client for the ZDX API.
///
/// Cheap to clone; clones share the token cache, rate limiter and
/// connection pool.
#[derive(Debug, Clone)]
pub struct ZdxClient {
    http: ZsHttpClient,
    auth: Arc<Authenticator>,
    config: Arc<Configuration>,
}

impl ZdxClient {
    /// Create a client. The first request fetches the token.
    pub fn new(config: Configuration) -> Result<Self> {
        let http = ZsHttpClient::new(&config.base_url, config.client.clone())?;
        let auth = Authenticator::with_http_client(
            &config.base_url,
            config.credentials.clone(),
            config.auth.clone(),
            config.client.build_http_client()?,
        )?;

        Ok(Self {
            http,
            auth: Arc::new(auth),
            config: Arc::new(config),
        })
    }

    /// Create a client and authenticate immediately, so bad credentials
    /// surface here rather than on the first call.
    pub async fn connect(ctx: &Context, config: Configuration) -> Result<Self> {
        let client = Self::new(config)?;
        client.auth.authenticate(ctx).await?;
        debug!(base_url = %client.config.base_url, "Connected to ZDX");
        Ok(client)
    }

    /// Connect using environment variables and the default config file.
    pub async fn from_env(ctx: &Context) -> Result<Self> {
        let config = Configuration::builder().load_environment()?.build()?;
        Self::connect(ctx, config).await
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The authenticator holding the token cache.
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// The underlying HTTP pipeline.
    pub fn http(&self) -> &ZsHttpClient {
        &self.http
    }

    /// Send a request and decode the JSON response into `T`.
    ///
    /// `path` is relative to the base URL (a leading `/` is optional).
    /// `query` may be any [`QueryParams`]: `()`, pairs, a map, a
    /// [`QueryBuilder`](zscaler_sdk_client::QueryBuilder) or a
    /// [`Serialized`](zscaler_sdk_client::Serialized) options struct. Empty
    /// response bodies decode as JSON `null`.
    #[instrument(skip(self, ctx, method, query, body), fields(method = %method))]
    pub async fn new_request_do<T, Q, B>(
        &self,
        ctx: &Context,
        method: RequestMethod,
        path: &str,
        query: &Q,
        body: Option<&B>,
    ) -> Result<Decoded<T>>
    where
        T: DeserializeOwned + PostDecode,
        Q: QueryParams + ?Sized,
        B: Serialize + ?Sized,
    {
        let response = self.new_request_raw(ctx, method, path, query, body).await?;
        let value = response.decode()?;
        Ok(Decoded {
            value,
            response: response.meta(),
        })
    }

    /// Send a request and return the buffered response without decoding.
    #[instrument(skip(self, ctx, method, query, body), fields(method = %method))]
    pub async fn new_request_raw<Q, B>(
        &self,
        ctx: &Context,
        method: RequestMethod,
        path: &str,
        query: &Q,
        body: Option<&B>,
    ) -> Result<Response>
    where
        Q: QueryParams + ?Sized,
        B: Serialize + ?Sized,
    {
        let mut request = RequestBuilder::new(method, path).query_params(query)?;
        if let Some(body) = body {
            request = request.json(body)?;
        }
        self.http.execute(ctx, &request, &*self.auth).await
    }

    /// GET `path` and decode the response.
    pub async fn get<T, Q>(&self, ctx: &Context, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned + PostDecode,
        Q: QueryParams + ?Sized,
    {
        self.new_request_do::<T, Q, ()>(ctx, RequestMethod::Get, path, query, None)
            .await
            .map(Decoded::into_inner)
    }

    /// POST `body` to `path` and decode the response.
    pub async fn post<T, B>(&self, ctx: &Context, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned + PostDecode,
        B: Serialize + ?Sized,
    {
        self.new_request_do(ctx, RequestMethod::Post, path, &(), Some(body))
            .await
            .map(Decoded::into_inner)
    }

    /// PUT `body` to `path` and decode the response.
    pub async fn put<T, B>(&self, ctx: &Context, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned + PostDecode,
        B: Serialize + ?Sized,
    {
        self.new_request_do(ctx, RequestMethod::Put, path, &(), Some(body))
            .await
            .map(Decoded::into_inner)
    }

    /// DELETE `path`, ignoring any response body.
    pub async fn delete(&self, ctx: &Context, path: &str) -> Result<ResponseMeta> {
        self.new_request_raw::<(), ()>(ctx, RequestMethod::Delete, path, &(), None)
            .await
            .map(|response| response.meta())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zscaler_sdk_client::{unescape_html_twice, ErrorKind, QueryBuilder, Serialized};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Device {
        id: u64,
        name: String,
    }

    impl PostDecode for Device {
        fn post_decode(&mut self) {
            unescape_html_twice(&mut self.name);
        }
    }

    #[derive(Serialize)]
    struct Window {
        from: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<i64>,
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "token": "tok-1",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn config(server: &MockServer) -> Configuration {
        Configuration::builder()
            .with_credentials("key-1", "secret")
            .with_base_url(server.uri())
            .with_max_retries(2)
            .with_min_wait(Duration::from_millis(10))
            .with_max_wait(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_decodes_and_runs_hook() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/devices/7"))
            .and(header("Authorization", "Bearer tok-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 7, "name": "Bob&amp;#39;s laptop"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let decoded: Decoded<Device> = client
            .new_request_do::<_, _, ()>(
                &Context::new(),
                RequestMethod::Get,
                "v1/devices/7",
                &(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(decoded.response.status, 200);
        assert_eq!(
            decoded.into_inner(),
            Device {
                id: 7,
                name: "Bob's laptop".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_query_options() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/apps"))
            .and(query_param("from", "100"))
            .and(query_param("loc", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/alerts"))
            .and(query_param("from", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let ctx = Context::new();

        let query = QueryBuilder::new()
            .push("from", 100)
            .push_opt("to", None::<i64>)
            .push("loc", 5);
        let apps: Vec<serde_json::Value> = client.get(&ctx, "/v1/apps", &query).await.unwrap();
        assert!(apps.is_empty());

        let window = Window { from: 1, to: None };
        let alerts: Vec<serde_json::Value> = client
            .get(&ctx, "/v1/alerts", &Serialized(&window))
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_token_shared_across_requests() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(3)
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let clone = client.clone();
        let ctx = Context::new();
        for c in [&client, &clone, &client] {
            let _: Vec<serde_json::Value> = c.get(&ctx, "/v1/users", &()).await.unwrap();
        }
        assert_eq!(client.authenticator().fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_fails_on_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = ZdxClient::connect(&Context::new(), config(&server))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::AuthenticationFailed { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/v1/deeptraces"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(serde_json::json!({"session_name": "trace-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"trace_id": "t1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let created: serde_json::Value = client
            .post(
                &Context::new(),
                "/v1/deeptraces",
                &serde_json::json!({"session_name": "trace-1"}),
            )
            .await
            .unwrap();
        assert_eq!(created["trace_id"], "t1");
    }

    #[tokio::test]
    async fn test_delete_with_empty_body() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("DELETE"))
            .and(path("/v1/deeptraces/t1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let meta = client.delete(&Context::new(), "/v1/deeptraces/t1").await.unwrap();
        assert_eq!(meta.status, 204);
    }

    #[tokio::test]
    async fn test_not_found_carries_response() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/devices/404"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"message": "device not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let err = client
            .get::<Device, _>(&Context::new(), "/v1/devices/404", &())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(err.to_string().contains("device not found"));
        assert_eq!(err.response.as_ref().map(|r| r.status), Some(404));
    }

    #[tokio::test]
    async fn test_foreign_absolute_url_never_receives_token() {
        let server = MockServer::start().await;
        let foreign = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(0)
            .mount(&foreign)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let err = client
            .get::<serde_json::Value, _>(
                &Context::new(),
                &format!("{}/steal", foreign.uri()),
                &(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.kind, ErrorKind::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/devices/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ZdxClient::new(config(&server)).unwrap();
        let err = client
            .get::<Device, _>(&Context::new(), "/v1/devices/1", &())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Decode(_)));
        assert_eq!(err.response.as_ref().map(|r| r.status), Some(200));
    }
}
