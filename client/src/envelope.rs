//! Endpoint resolution, channel construction and the per-call metadata
//! contract described by the connection envelope.

use std::time::Duration;

use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};

use crate::error::{Error, Result};

const DEFAULT_GRPC_PORT: u16 = 50001;
const DEFAULT_HTTP_HEALTH_PORT: u16 = 50003;
const DEFAULT_HOST: &str = "127.0.0.1";

/// The transport scheme selected for a target, derived once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Plaintext,
    Tls,
    DnsLoadBalanced,
    Unix,
}

/// A fully resolved connection target.
#[derive(Debug, Clone)]
pub struct Endpoint2 {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub authority: Option<String>,
}

/// Parses a target of the form `scheme://host:port?authority=X` or a plain
/// `host:port`, per the connection envelope's endpoint format.
pub fn parse_target(target: &str) -> Result<Endpoint2> {
    let (scheme_str, rest) = match target.split_once("://") {
        Some((s, r)) => (Some(s), r),
        None => (None, target),
    };

    let (hostport, query) = match rest.split_once('?') {
        Some((h, q)) => (h, Some(q)),
        None => (rest, None),
    };

    let authority = query.and_then(|q| {
        q.split('&').find_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            (k == "authority").then(|| v.to_owned())
        })
    });

    let scheme = match scheme_str {
        None | Some("http") | Some("dns") => {
            if scheme_str == Some("dns") {
                Scheme::DnsLoadBalanced
            } else {
                Scheme::Plaintext
            }
        }
        Some("https") | Some("grpcs") => Scheme::Tls,
        Some("unix") => Scheme::Unix,
        Some(other) => {
            return Err(Error::argument_invalid(format!(
                "unrecognized endpoint scheme {other:?}"
            )));
        }
    };

    if scheme == Scheme::Unix {
        return Ok(Endpoint2 {
            scheme,
            host: hostport.to_owned(),
            port: 0,
            authority,
        });
    }

    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| Error::argument_invalid(format!("invalid port in {target:?}")))?;
            (h.to_owned(), port)
        }
        None => (hostport.to_owned(), DEFAULT_GRPC_PORT),
    };

    Ok(Endpoint2 {
        scheme,
        host,
        port,
        authority,
    })
}

/// The per-call metadata and channel configuration bundle shared by every
/// request the client makes.
#[derive(Clone)]
pub struct Envelope {
    pub endpoint: Endpoint2,
    pub api_token: Option<String>,
    pub user_agent: String,
    pub default_timeout: Option<Duration>,
    pub retry_on_unimplemented_fallback_allowed: bool,
    pub health_port: u16,
}

impl Envelope {
    /// Builds an envelope from explicit fields, falling back to the
    /// documented environment contract only for values left unset.
    pub fn from_env_or(
        target: Option<String>,
        api_token: Option<String>,
        user_agent: Option<String>,
    ) -> Result<Self> {
        let target = target
            .or_else(|| std::env::var("DAPR_GRPC_ENDPOINT").ok())
            .unwrap_or_else(|| format!("{DEFAULT_HOST}:{DEFAULT_GRPC_PORT}"));
        let endpoint = parse_target(&target)?;

        let api_token = api_token.or_else(|| std::env::var("DAPR_API_TOKEN").ok());

        let user_agent = user_agent.unwrap_or_else(|| {
            format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )
        });

        let health_port = std::env::var("DAPR_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HTTP_HEALTH_PORT);

        Ok(Self {
            endpoint,
            api_token,
            user_agent,
            default_timeout: None,
            retry_on_unimplemented_fallback_allowed: false,
            health_port,
        })
    }

    /// Builds the URI tonic's `Endpoint` expects for this envelope's target.
    fn uri(&self) -> Result<Uri> {
        let uri_string = match self.endpoint.scheme {
            Scheme::Plaintext => format!("http://{}:{}", self.endpoint.host, self.endpoint.port),
            Scheme::Tls => format!("https://{}:{}", self.endpoint.host, self.endpoint.port),
            Scheme::DnsLoadBalanced => {
                format!("dns://{}:{}", self.endpoint.host, self.endpoint.port)
            }
            Scheme::Unix => format!("http://{}", self.endpoint.host),
        };
        uri_string
            .parse()
            .map_err(|e| Error::argument_invalid(format!("invalid endpoint uri: {e}")))
    }

    /// Opens (eagerly connects) the shared gRPC channel for this envelope.
    pub async fn connect(&self) -> Result<Channel> {
        if self.endpoint.scheme == Scheme::Unix {
            return self.connect_unix().await;
        }

        let mut builder = Endpoint::from(self.uri()?);
        if let Some(authority) = &self.endpoint.authority {
            builder = builder
                .origin(authority.parse().map_err(|e| {
                    Error::argument_invalid(format!("invalid authority override: {e}"))
                })?);
        }
        if self.endpoint.scheme == Scheme::Tls {
            builder = builder
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(Error::from)?;
        }
        if let Some(timeout) = self.default_timeout {
            builder = builder.timeout(timeout);
        }

        builder.connect().await.map_err(Error::from)
    }

    #[cfg(unix)]
    async fn connect_unix(&self) -> Result<Channel> {
        use tokio::net::UnixStream;
        use tonic::transport::Endpoint as TonicEndpoint;
        use tower::service_fn;

        let path = self.endpoint.host.clone();
        // The target URI is ignored by the connector below; tonic requires a
        // well-formed one regardless.
        TonicEndpoint::try_from("http://[::]:50051")
            .map_err(Error::from)?
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = path.clone();
                async move {
                    let stream = UnixStream::connect(path).await?;
                    Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
                }
            }))
            .await
            .map_err(Error::from)
    }

    #[cfg(not(unix))]
    async fn connect_unix(&self) -> Result<Channel> {
        Err(Error::argument_invalid(
            "unix-domain socket endpoints are only supported on unix platforms",
        ))
    }

    /// Applies this envelope's ambient metadata (api token, user agent) and
    /// timeout policy to an outgoing request.
    pub fn apply<T>(&self, mut request: tonic::Request<T>) -> Result<tonic::Request<T>> {
        if let Some(token) = &self.api_token {
            let value = MetadataValue::try_from(token.as_str())
                .map_err(|e| Error::argument_invalid(format!("invalid api token: {e}")))?;
            request.metadata_mut().insert("dapr-api-token", value);
        }
        let ua = MetadataValue::try_from(self.user_agent.as_str())
            .map_err(|e| Error::argument_invalid(format!("invalid user agent: {e}")))?;
        request.metadata_mut().insert("user-agent", ua);

        if let Some(timeout) = self.default_timeout
            && request.metadata().get("grpc-timeout").is_none()
        {
            request.set_timeout(timeout);
        }
        Ok(request)
    }

    /// The base URL of the sidecar's HTTP health endpoint.
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/v1.0/healthz/outbound", self.endpoint.host, self.health_port)
    }
}
