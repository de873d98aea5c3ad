//! [`Runtime`] implementation backed by the Docker Engine HTTP API.
//!
//! Talks HTTP/1.1 over the daemon's unix socket or a TCP endpoint, optionally
//! secured with client-certificate TLS.
use std::collections::VecDeque;
use std::path::PathBuf;
use std::str::FromStr;

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::runtime::{ContainerSummary, Cursor, Event, EventStream, Inspection, Runtime};

mod connector;
mod decoder;
mod models;
mod tls;

pub use tls::TlsConfig;

use connector::Connector;
use decoder::JsonStreamDecoder;

/// Oldest API version providing `Action` and `Actor` on events.
const API_VERSION: &str = "v1.22";

/// Default endpoint when `DOCKER_HOST` is unset.
pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

const DEFAULT_TCP_PORT: u16 = 2375;

/// `{"type":["container"]}`, percent-encoded.
const CONTAINER_EVENTS_FILTER: &str = "%7B%22type%22%3A%5B%22container%22%5D%7D";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid docker host `{0}`")]
    InvalidHost(String),
    #[error("failed to open file `{path}`: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read PEM file `{path}`: {source}")]
    PemRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in `{path}`")]
    NoCertificates { path: PathBuf },
    #[error("no private key found in `{path}`")]
    NoPrivateKey { path: PathBuf },
    #[error("invalid CA certificate in `{path}`: {source}")]
    TlsCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
    #[error("failed to build TLS client configuration: {0}")]
    TlsSetup(#[source] rustls::Error),
    #[error("invalid request uri: {0}")]
    Uri(#[source] hyper::http::uri::InvalidUri),
    #[error("failed to build request: {0}")]
    Request(#[source] hyper::http::Error),
    #[error("request to `{path}` failed: {source}")]
    Http {
        path: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),
    #[error("request to `{path}` returned {status}: {message}")]
    Status {
        path: String,
        status: StatusCode,
        message: String,
    },
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("event stream ended with {len} unparsed bytes")]
    UnparsedData { len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Address of a Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl FromStr for Host {
    type Err = Error;

    /// Parses `unix:///path`, `tcp://host[:port]`, `http://host[:port]` and
    /// `https://host[:port]`.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::InvalidHost(s.to_owned()));
            }
            return Ok(Host::Unix(PathBuf::from(path)));
        }

        let addr = ["tcp://", "http://", "https://"]
            .iter()
            .find_map(|scheme| s.strip_prefix(scheme))
            .ok_or_else(|| Error::InvalidHost(s.to_owned()))?;
        let addr = addr.trim_end_matches('/');

        let (host, port) = match addr.rsplit_once(':') {
            // A bare IPv6 address has colons but no port.
            Some((host, port)) if !host.ends_with(':') && !port.contains(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidHost(s.to_owned()))?;
                (host, port)
            }
            _ => (addr, DEFAULT_TCP_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidHost(s.to_owned()));
        }

        Ok(Host::Tcp {
            host: host.to_owned(),
            port,
        })
    }
}

/// Docker Engine API client.
#[derive(Clone)]
pub struct DockerClient {
    client: Client<Connector, Empty<Bytes>>,
}

impl DockerClient {
    /// Creates a client for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be parsed or the TLS material cannot
    /// be loaded. No connection is made until the first request.
    pub fn new(host: &str, tls: Option<&TlsConfig>) -> Result<Self> {
        let host = Host::from_str(host)?;
        let tls = tls.map(TlsConfig::load).transpose()?;
        if tls.is_some() && matches!(host, Host::Unix(_)) {
            log::warn!("TLS settings are ignored for unix socket hosts");
        }
        log::debug!("Using docker host {host:?}");

        let client = Client::builder(TokioExecutor::new()).build(Connector::new(host, tls));
        Ok(Self { client })
    }

    async fn get(&self, path: &str) -> Result<Response<Incoming>> {
        let uri = format!("http://localhost/{API_VERSION}{path}")
            .parse::<Uri>()
            .map_err(Error::Uri)?;
        let request = Request::get(uri)
            .body(Empty::new())
            .map_err(Error::Request)?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|source| Error::Http {
                path: path.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(Error::Body)?
                .to_bytes();
            return Err(Error::Status {
                path: path.to_owned(),
                status,
                message: String::from_utf8_lossy(&body).trim().to_owned(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self
            .get(path)
            .await?
            .into_body()
            .collect()
            .await
            .map_err(Error::Body)?
            .to_bytes();
        serde_json::from_slice(&body).map_err(Error::Decode)
    }
}

impl Runtime for DockerClient {
    type Error = Error;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let entries: Vec<models::ListEntry> = self.get_json("/containers/json").await?;
        Ok(entries.into_iter().map(ContainerSummary::from).collect())
    }

    async fn inspect(&self, id: &str) -> Result<Inspection> {
        let response: models::InspectResponse =
            self.get_json(&format!("/containers/{id}/json")).await?;
        Ok(response.into())
    }

    async fn subscribe_events(&self, since: Cursor) -> Result<EventStream<Error>> {
        let path = format!("/events?since={since}&filters={CONTAINER_EVENTS_FILTER}");
        log::debug!("Subscribing to docker events: since={since}");
        let body = self.get(&path).await?.into_body().into_data_stream();

        let state = EventReader {
            body,
            decoder: JsonStreamDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        };
        Ok(futures::stream::unfold(state, EventReader::next).boxed())
    }
}

struct EventReader<B> {
    body: B,
    decoder: JsonStreamDecoder<models::EventMessage>,
    ready: VecDeque<Result<Event>>,
    done: bool,
}

impl<B> EventReader<B>
where
    B: futures::Stream<Item = std::result::Result<Bytes, hyper::Error>> + Unpin,
{
    async fn next(mut self) -> Option<(Result<Event>, Self)> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some((item, self));
            }
            if self.done {
                return None;
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    let decoded = self.decoder.process_next_chunk(&chunk);
                    self.ready.extend(
                        decoded
                            .into_iter()
                            .map(|message| message.map(Event::from).map_err(Error::Decode)),
                    );
                }
                Some(Err(source)) => {
                    self.done = true;
                    self.ready.push_back(Err(Error::Body(source)));
                }
                None => {
                    self.done = true;
                    let decoder = std::mem::replace(&mut self.decoder, JsonStreamDecoder::new());
                    if let Err(data) = decoder.finish() {
                        self.ready
                            .push_back(Err(Error::UnparsedData { len: data.len() }));
                    }
                }
            }
        }
    }
}
