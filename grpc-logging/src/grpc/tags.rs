//! Request tagging
//!
//! Tagging runs ahead of the logging interceptors and attaches a [`Tags`] map
//! to the request extensions. The logging stage never writes to that map; it
//! reads it through a [`TagReader`] and copies the fields into its records.
//!
//! Two ways to install the tagging stage are provided:
//! - [`TaggingLayer`], a tower layer wrapping the whole tonic server
//!   (`Server::builder().layer(..)`), which sees the raw HTTP request and the
//!   peer connection info.
//! - [`TaggingInterceptor`], a tonic interceptor for
//!   `FooServer::with_interceptor`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use http::{HeaderName, HeaderValue};
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::config::TagsConfig;
use crate::error::{Error, Result};
use crate::logging::Fields;

/// Field names written by the tagging stage
pub mod tag_keys {
    /// Request correlation id
    pub const REQUEST_ID: &str = "grpc.request.id";
    /// RFC 3339 time the request was tagged
    pub const START_TIME: &str = "grpc.start_time";
    /// RFC 3339 deadline from `grpc-timeout`
    pub const DEADLINE: &str = "grpc.request.deadline";
    /// Remote socket address
    pub const PEER_ADDRESS: &str = "peer.address";
    /// Prefix for copied metadata headers
    pub const METADATA_PREFIX: &str = "grpc.metadata.";
}

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Fields attached to a request by the tagging stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags(Fields);

impl Tags {
    /// Wrap a field map
    pub fn new(fields: Fields) -> Self {
        Self(fields)
    }

    /// The tagged fields
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Request id, if one was tagged
    pub fn request_id(&self) -> Option<&str> {
        self.0.get_str(tag_keys::REQUEST_ID)
    }
}

/// Capability to read inherited tags off a request
///
/// The logging interceptors require one at construction, which keeps the
/// "tagging before logging" ordering visible in the code that builds the
/// server.
pub trait TagReader: Send + Sync + 'static {
    /// Fields to inherit for this request
    fn read(&self, extensions: &tonic::Extensions) -> Fields;
}

/// Reads the [`Tags`] left by [`TaggingLayer`] or [`TaggingInterceptor`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionTags;

impl TagReader for ExtensionTags {
    fn read(&self, extensions: &tonic::Extensions) -> Fields {
        match extensions.get::<Tags>() {
            Some(tags) => tags.fields().clone(),
            None => {
                tracing::debug!("request carries no tags, is the tagging stage installed?");
                Fields::new()
            }
        }
    }
}

/// Inherit nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTags;

impl TagReader for NoTags {
    fn read(&self, _extensions: &tonic::Extensions) -> Fields {
        Fields::new()
    }
}

/// Parse a `grpc-timeout` header value
///
/// The wire format is up to eight ASCII digits followed by one unit:
/// `H` hours, `M` minutes, `S` seconds, `m` millis, `u` micros, `n` nanos.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 60 * 60)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Settings shared by the layer and the interceptor
#[derive(Debug, Clone)]
struct TagSettings {
    request_id_header: HeaderName,
    metadata_headers: Vec<HeaderName>,
}

impl TagSettings {
    fn from_config(config: &TagsConfig) -> Result<Self> {
        let parse = |name: &str| {
            HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                .map_err(|_| Error::InvalidConfig(format!("invalid header name: {name:?}")))
        };

        Ok(Self {
            request_id_header: parse(&config.request_id_header)?,
            metadata_headers: config
                .metadata_headers
                .iter()
                .map(|name| parse(name))
                .collect::<Result<_>>()?,
        })
    }

    /// Build the tag map; returns the request id when it had to be generated
    fn collect(
        &self,
        header: impl Fn(&str) -> Option<String>,
        peer: Option<SocketAddr>,
    ) -> (Fields, Option<String>) {
        let now = Utc::now();
        let mut fields = Fields::new().with(tag_keys::START_TIME, now.to_rfc3339());

        let (request_id, generated) = match header(self.request_id_header.as_str()) {
            Some(id) => (id, None),
            None => {
                let id = Uuid::new_v4().to_string();
                (id.clone(), Some(id))
            }
        };
        fields.insert(tag_keys::REQUEST_ID, request_id);

        if let Some(deadline) = header(GRPC_TIMEOUT_HEADER)
            .and_then(|v| parse_grpc_timeout(&v))
            .and_then(|timeout| chrono::Duration::from_std(timeout).ok())
            .and_then(|timeout| now.checked_add_signed(timeout))
        {
            fields.insert(tag_keys::DEADLINE, deadline.to_rfc3339());
        }

        if let Some(peer) = peer {
            fields.insert(tag_keys::PEER_ADDRESS, peer.to_string());
        }

        for name in &self.metadata_headers {
            if let Some(value) = header(name.as_str()) {
                fields.insert(format!("{}{}", tag_keys::METADATA_PREFIX, name), value);
            }
        }

        (fields, generated)
    }
}

/// Tower layer tagging every request before it reaches the gRPC services
#[derive(Debug, Clone)]
pub struct TaggingLayer {
    settings: Arc<TagSettings>,
}

impl TaggingLayer {
    /// Create a tagging layer from configuration
    pub fn new(config: &TagsConfig) -> Result<Self> {
        Ok(Self {
            settings: Arc::new(TagSettings::from_config(config)?),
        })
    }
}

impl Default for TaggingLayer {
    fn default() -> Self {
        Self {
            settings: Arc::new(TagSettings {
                request_id_header: HeaderName::from_static("x-request-id"),
                metadata_headers: Vec::new(),
            }),
        }
    }
}

impl<S> Layer<S> for TaggingLayer {
    type Service = TaggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TaggingService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

/// Tagging service implementation
#[derive(Debug, Clone)]
pub struct TaggingService<S> {
    inner: S,
    settings: Arc<TagSettings>,
}

impl<S, B> Service<http::Request<B>> for TaggingService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let peer = req
            .extensions()
            .get::<tonic::transport::server::TcpConnectInfo>()
            .and_then(|info| info.remote_addr());

        let headers = req.headers();
        let (fields, generated) = self.settings.collect(
            |name| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string),
            peer,
        );

        if let Some(id) = generated.and_then(|id| HeaderValue::from_str(&id).ok()) {
            req.headers_mut()
                .insert(self.settings.request_id_header.clone(), id);
        }

        req.extensions_mut().insert(Tags(fields));
        self.inner.call(req)
    }
}

/// Tonic interceptor tagging requests of a single service
#[derive(Debug, Clone)]
pub struct TaggingInterceptor {
    settings: Arc<TagSettings>,
}

impl TaggingInterceptor {
    /// Create a tagging interceptor from configuration
    pub fn new(config: &TagsConfig) -> Result<Self> {
        Ok(Self {
            settings: Arc::new(TagSettings::from_config(config)?),
        })
    }
}

impl Default for TaggingInterceptor {
    fn default() -> Self {
        Self {
            settings: TaggingLayer::default().settings,
        }
    }
}

impl Interceptor for TaggingInterceptor {
    fn call(&mut self, mut req: Request<()>) -> std::result::Result<Request<()>, Status> {
        let metadata = req.metadata();
        let (fields, generated) = self.settings.collect(
            |name| {
                metadata
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            },
            req.remote_addr(),
        );

        if let Some(id) = generated {
            let key = AsciiMetadataKey::from_bytes(self.settings.request_id_header.as_str().as_bytes())
                .map_err(|_| Status::internal("Invalid request ID header"))?;
            let value: AsciiMetadataValue = id
                .parse()
                .map_err(|_| Status::internal("Failed to parse request ID"))?;
            req.metadata_mut().insert(key, value);
        }

        req.extensions_mut().insert(Tags(fields));
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tonic::metadata::MetadataValue;
    use tower::ServiceExt;

    #[test]
    fn test_parse_grpc_timeout() {
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("30S"), Some(Duration::from_secs(30)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_grpc_timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));
        assert_eq!(parse_grpc_timeout("123456789S"), None);
        assert_eq!(parse_grpc_timeout("5x"), None);
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
    }

    #[tokio::test]
    async fn test_layer_tags_request() {
        let config = TagsConfig {
            metadata_headers: vec!["User-Agent".to_string()],
            ..TagsConfig::default()
        };
        let layer = TaggingLayer::new(&config).unwrap();
        let service = layer.layer(tower::service_fn(|req: http::Request<()>| async move {
            Ok::<_, Infallible>(req)
        }));

        let req = http::Request::builder()
            .uri("/pkg.Service/Method")
            .header("x-request-id", "req-123")
            .header("grpc-timeout", "5S")
            .header("user-agent", "grpc-rust")
            .body(())
            .unwrap();

        let seen = service.oneshot(req).await.unwrap();
        let tags = seen.extensions().get::<Tags>().expect("tags attached");
        assert_eq!(tags.request_id(), Some("req-123"));
        assert!(tags.fields().contains_key(tag_keys::START_TIME));
        assert!(tags.fields().contains_key(tag_keys::DEADLINE));
        assert_eq!(
            tags.fields().get_str("grpc.metadata.user-agent"),
            Some("grpc-rust")
        );
        assert!(!tags.fields().contains_key(tag_keys::PEER_ADDRESS));
    }

    #[tokio::test]
    async fn test_layer_generates_request_id() {
        let service = TaggingLayer::default().layer(tower::service_fn(
            |req: http::Request<()>| async move { Ok::<_, Infallible>(req) },
        ));

        let seen = service.oneshot(http::Request::new(())).await.unwrap();
        let tags = seen.extensions().get::<Tags>().unwrap();
        let id = tags.request_id().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(seen.headers().get("x-request-id").unwrap(), id.as_str());
    }

    #[test]
    fn test_interceptor_tags_request() {
        let mut interceptor = TaggingInterceptor::default();

        let mut req = Request::new(());
        req.metadata_mut()
            .insert("x-request-id", MetadataValue::from_static("hello"));
        let req = interceptor.call(req).unwrap();
        let tags = req.extensions().get::<Tags>().unwrap();
        assert_eq!(tags.request_id(), Some("hello"));

        let req = interceptor.call(Request::new(())).unwrap();
        assert!(req.metadata().get("x-request-id").is_some());
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let config = TagsConfig {
            request_id_header: "bad header".to_string(),
            ..TagsConfig::default()
        };
        assert!(matches!(TaggingLayer::new(&config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_extension_tags_reader() {
        let mut req = Request::new(());
        assert!(ExtensionTags.read(req.extensions()).is_empty());

        req.extensions_mut()
            .insert(Tags::new(Fields::new().with("tenant", "acme")));
        assert_eq!(ExtensionTags.read(req.extensions()).get_str("tenant"), Some("acme"));
        assert!(NoTags.read(req.extensions()).is_empty());
    }
}
