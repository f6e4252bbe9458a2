//! HTTPS client for one KME.
//!
//! Each [`KmeClient`] is bound to a single KME endpoint and a single SAE
//! identity. The three ETSI-014 calls used by the exchange live here; the
//! ordering between them is enforced by [`crate::exchange::Exchange`].

use std::time::Duration;

use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    StatusCode,
};
use safelog::sensitive;
use serde::de::DeserializeOwned;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::types::{
    CorrelationWarning, DecryptionKey, DecryptionKeyRequest, EncryptionKey, KeyContainer,
    KeyRecord, KeyRequest, KeyStatus,
};
use crate::{Credentials, Error, Result};

/// Path prefix of every key delivery call.
const API_PREFIX: [&str; 3] = ["api", "v1", "keys"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const JSON: &str = "application/json";

#[derive(Clone, Debug)]
pub struct KmeClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl KmeClient {
    /// Build a client that authenticates to `endpoint` with `credentials`.
    ///
    /// `endpoint` may be a full origin (`https://kme-1.example:443`) or a
    /// bare `host[:port]`, in which case `https` is assumed.
    pub fn new(endpoint: &str, credentials: &Credentials) -> Result<Self> {
        credentials.validate()?;
        let (ca, identity) = credentials.load()?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .identity(identity)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build TLS client: {e}")))?;

        Self::with_http_client(endpoint, http)
    }

    /// Build a client around an existing reqwest client (plain HTTP mock
    /// servers in tests, custom TLS settings).
    #[doc(hidden)]
    pub fn with_http_client(endpoint: &str, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: parse_endpoint(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `GET {endpoint}/api/v1/keys/{peer_sae_id}/status`
    pub async fn get_status(&self, peer_sae_id: &str) -> Result<KeyStatus> {
        let url = self.keys_url(peer_sae_id, "status", &KeyRequest::default())?;
        debug!(kme = %sensitive(&self.endpoint), sae = peer_sae_id, "querying key status");

        let (code, body) = self.send(self.http.get(url).header(ACCEPT, JSON)).await?;
        if code != StatusCode::OK {
            let e = Error::StatusQuery {
                endpoint: self.endpoint.to_string(),
                sae_id: peer_sae_id.to_string(),
                code: code.as_u16(),
                body,
            };
            error!(kme = %sensitive(&self.endpoint), sae = peer_sae_id, code = code.as_u16(), "status query rejected");
            return Err(e);
        }

        let status: KeyStatus = self.parse(&body, "status")?;
        debug!(
            stored = status.stored_key_count,
            max = status.max_key_count,
            key_size = status.key_size,
            "key pool status"
        );
        Ok(status)
    }

    /// `GET {endpoint}/api/v1/keys/{peer_sae_id}/enc_keys`, keeping the first
    /// key of the returned list.
    pub async fn get_enc_keys(&self, peer_sae_id: &str) -> Result<EncryptionKey> {
        self.get_enc_keys_with(peer_sae_id, KeyRequest::default()).await
    }

    /// Like [`KmeClient::get_enc_keys`] with explicit `number` / `size`
    /// query parameters.
    pub async fn get_enc_keys_with(
        &self,
        peer_sae_id: &str,
        request: KeyRequest,
    ) -> Result<EncryptionKey> {
        let url = self.keys_url(peer_sae_id, "enc_keys", &request)?;
        debug!(kme = %sensitive(&self.endpoint), sae = peer_sae_id, "requesting encryption key");

        let (code, body) = self.send(self.http.get(url).header(ACCEPT, JSON)).await?;
        if code != StatusCode::OK {
            error!(kme = %sensitive(&self.endpoint), sae = peer_sae_id, code = code.as_u16(), "enc_keys rejected");
            return Err(self.retrieval_error(peer_sae_id, code, body));
        }

        let key = self.first_key(&body, peer_sae_id, "enc_keys")?;
        debug!(key_id = key.id(), bits = key.bits(), "received encryption key");
        Ok(key)
    }

    /// `POST {endpoint}/api/v1/keys/{sae_id}/dec_keys` asking for `key_id`
    /// issued to `master_sae_id`.
    ///
    /// A returned key whose ID differs from `key_id` is still handed back,
    /// with [`DecryptionKey::correlation`] set.
    pub async fn get_dec_keys(
        &self,
        sae_id: &str,
        key_id: &str,
        master_sae_id: &str,
    ) -> Result<DecryptionKey> {
        let url = self.keys_url(sae_id, "dec_keys", &KeyRequest::default())?;
        let request = DecryptionKeyRequest::single(key_id, master_sae_id);
        debug!(kme = %sensitive(&self.endpoint), sae = sae_id, key_id, "requesting decryption key");

        let builder = self
            .http
            .post(url)
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON)
            .json(&request);
        let (code, body) = self.send(builder).await?;
        if code != StatusCode::OK {
            error!(kme = %sensitive(&self.endpoint), sae = sae_id, code = code.as_u16(), "dec_keys rejected");
            return Err(self.retrieval_error(sae_id, code, body));
        }

        let key = self.first_key(&body, sae_id, "dec_keys")?;
        let correlation = if key.id() != key_id {
            let w = CorrelationWarning {
                requested: key_id.to_string(),
                returned: key.id().to_string(),
            };
            warn!(kme = %sensitive(&self.endpoint), sae = sae_id, "{w}");
            Some(w)
        } else {
            None
        };

        Ok(DecryptionKey { key, correlation })
    }

    fn keys_url(&self, sae_id: &str, op: &str, request: &KeyRequest) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Configuration(format!("KME endpoint {} cannot be a base", self.endpoint))
            })?
            .pop_if_empty()
            .extend(API_PREFIX)
            .push(sae_id)
            .push(op);

        let pairs = request.query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let resp = request.send().await.map_err(|e| self.transport_error(e))?;
        let code = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        trace!(code = code.as_u16(), len = body.len(), "response received");
        Ok((code, body))
    }

    fn parse<T: DeserializeOwned>(&self, body: &str, what: &str) -> Result<T> {
        serde_json::from_str(body)
            .map_err(|e| Error::malformed(&self.endpoint, format!("{what} body: {e}")))
    }

    fn first_key(&self, body: &str, sae_id: &str, what: &str) -> Result<KeyRecord> {
        let container: KeyContainer = self.parse(body, what)?;
        let keys = container
            .keys
            .ok_or_else(|| Error::malformed(&self.endpoint, format!("{what} body has no keys list")))?;

        // Only one key is needed per exchange: always the first one returned.
        let first = keys.into_iter().next().ok_or_else(|| Error::EmptyKeyList {
            endpoint: self.endpoint.to_string(),
            sae_id: sae_id.to_string(),
        })?;

        first.into_record().map_err(|reason| {
            error!(kme = %sensitive(&self.endpoint), sae = sae_id, "{what}: {reason}");
            Error::malformed(&self.endpoint, reason)
        })
    }

    fn retrieval_error(&self, sae_id: &str, code: StatusCode, body: String) -> Error {
        Error::KeyRetrieval {
            endpoint: self.endpoint.to_string(),
            sae_id: sae_id.to_string(),
            code: code.as_u16(),
            body,
        }
    }

    fn transport_error(&self, source: reqwest::Error) -> Error {
        error!(kme = %sensitive(&self.endpoint), "request failed: {source}");
        Error::Transport {
            endpoint: self.endpoint.to_string(),
            source,
        }
    }
}

/// Accept a full origin or a bare `host[:port]`.
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::Configuration("empty KME endpoint".into()));
    }

    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| Error::Configuration(format!("invalid KME endpoint \"{endpoint}\": {e}")))?;

    if !matches!(url.scheme(), "https" | "http") {
        return Err(Error::Configuration(format!(
            "KME endpoint has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host().is_none() {
        return Err(Error::Configuration(format!("KME endpoint \"{endpoint}\" has no host")));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::Configuration(format!(
            "KME endpoint \"{endpoint}\" must not carry a query or fragment"
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockKme;

    const STATUS: &str = r#"{"stored_key_count":10,"max_key_count":100,"key_size":256}"#;
    const ONE_KEY: &str = r#"{"keys":[{"key_ID":"test-key-id-1","key":"SGVsbG8gV29ybGQ="}]}"#;

    fn client(kme: &MockKme) -> KmeClient {
        KmeClient::with_http_client(&kme.base_url, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            parse_endpoint("localhost:8080").unwrap().as_str(),
            "https://localhost:8080/"
        );
        assert_eq!(
            parse_endpoint("https://kme-1.acct-2509.etsi-qkd-api.qukaydee.com")
                .unwrap()
                .host_str(),
            Some("kme-1.acct-2509.etsi-qkd-api.qukaydee.com")
        );

        for bad in ["", "  ", "invalid://url", "https://host/?a=b", "https://host/#frag"] {
            assert!(
                matches!(parse_endpoint(bad), Err(Error::Configuration(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn url_layout() {
        let c = KmeClient::with_http_client("https://kme:443/base/", reqwest::Client::new()).unwrap();
        let url = c.keys_url("sae-2", "status", &KeyRequest::default()).unwrap();
        assert_eq!(url.as_str(), "https://kme/base/api/v1/keys/sae-2/status");

        let url = c
            .keys_url(
                "sae 2",
                "enc_keys",
                &KeyRequest {
                    number: Some(1),
                    size: None,
                },
            )
            .unwrap();
        assert_eq!(url.as_str(), "https://kme/base/api/v1/keys/sae%202/enc_keys?number=1");
    }

    #[tokio::test]
    async fn status_ok() -> Result<()> {
        let kme = MockKme::start(vec![(200, STATUS.into())]).await;
        let status = client(&kme).get_status("sae-2").await?;
        assert_eq!(status, KeyStatus::new(10, 100, 256));

        let reqs = kme.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "GET");
        assert_eq!(reqs[0].path, "/api/v1/keys/sae-2/status");
        assert_eq!(reqs[0].header("accept"), Some("application/json"));
        Ok(())
    }

    #[tokio::test]
    async fn status_rejected_keeps_code_and_body() {
        let kme = MockKme::start(vec![(401, r#"{"message":"unauthorized SAE"}"#.into())]).await;
        let err = client(&kme).get_status("sae-2").await.unwrap_err();
        assert!(matches!(err, Error::StatusQuery { code: 401, .. }), "{err:?}");
        assert_eq!(err.http_code(), Some(401));
        assert_eq!(err.raw_body(), Some(r#"{"message":"unauthorized SAE"}"#));
    }

    #[tokio::test]
    async fn status_bad_json_is_malformed() {
        let kme = MockKme::start(vec![(200, "<html>".into())]).await;
        let err = client(&kme).get_status("sae-2").await.unwrap_err();
        assert!(err.is_protocol_fault(), "{err:?}");
    }

    #[tokio::test]
    async fn enc_keys_first_key_wins() -> Result<()> {
        let kme = MockKme::start(vec![(
            200,
            r#"{"keys":[{"key_ID":"a","key":"YWFhYQ=="},{"key_ID":"b","key":"YmJiYg=="}]}"#.into(),
        )])
        .await;
        let key = client(&kme).get_enc_keys("sae-2").await?;
        assert_eq!(key.id(), "a");
        assert_eq!(key.material(), b"aaaa");
        Ok(())
    }

    #[tokio::test]
    async fn enc_keys_with_parameters() -> Result<()> {
        let kme = MockKme::start(vec![(200, ONE_KEY.into())]).await;
        let req = KeyRequest {
            number: Some(1),
            size: Some(256),
        };
        client(&kme).get_enc_keys_with("sae-2", req).await?;
        assert_eq!(
            kme.requests()[0].path,
            "/api/v1/keys/sae-2/enc_keys?number=1&size=256"
        );
        Ok(())
    }

    fn kind(e: &Error) -> &'static str {
        match e {
            Error::KeyRetrieval { .. } => "retrieval",
            Error::EmptyKeyList { .. } => "empty",
            Error::MalformedResponse { .. } => "malformed",
            _ => "other",
        }
    }

    #[tokio::test]
    async fn enc_keys_failures() {
        let cases = [
            (503, r#"{"message":"no keys"}"#, "retrieval"),
            (200, r#"{"keys":[]}"#, "empty"),
            (200, r#"{"message":"ok"}"#, "malformed"),
            (200, r#"{"keys":[{"key_ID":null,"key":"YQ=="}]}"#, "malformed"),
            (200, r#"{"keys":[{"key_ID":"null","key":"YQ=="}]}"#, "malformed"),
            (200, r#"{"keys":[{"key":"YQ=="}]}"#, "malformed"),
        ];

        for (code, body, expected) in cases {
            let kme = MockKme::start(vec![(code, body.into())]).await;
            let err = client(&kme).get_enc_keys("sae-2").await.unwrap_err();
            assert_eq!(kind(&err), expected, "{code} {body} -> {err:?}");
        }
    }

    #[tokio::test]
    async fn dec_keys_request_shape() -> Result<()> {
        let kme = MockKme::start(vec![(200, ONE_KEY.into())]).await;
        let dec = client(&kme)
            .get_dec_keys("sae-1", "test-key-id-1", "sae-1")
            .await?;
        assert!(dec.is_correlated());

        let req = &kme.requests()[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/keys/sae-1/dec_keys");
        assert_eq!(req.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"key_IDs":[{"key_ID":"test-key-id-1","master_SAE_ID":"sae-1"}]})
        );
        Ok(())
    }

    #[tokio::test]
    async fn dec_keys_mismatch_warns_but_returns_key() -> Result<()> {
        let kme = MockKme::start(vec![(200, ONE_KEY.into())]).await;
        let dec = client(&kme).get_dec_keys("sae-1", "other-id", "sae-1").await?;
        assert_eq!(dec.key.id(), "test-key-id-1");
        assert_eq!(
            dec.correlation,
            Some(CorrelationWarning {
                requested: "other-id".into(),
                returned: "test-key-id-1".into(),
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn dec_keys_rejected() {
        let kme = MockKme::start(vec![(400, r#"{"message":"key not found"}"#.into())]).await;
        let err = client(&kme)
            .get_dec_keys("sae-1", "K1", "sae-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyRetrieval { code: 400, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_kme_is_transport_error() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let c = KmeClient::with_http_client(&format!("http://{addr}"), reqwest::Client::new())
            .unwrap();
        let err = c.get_status("sae-2").await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }), "{err:?}");
    }
}
