use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::Host;

/// A connected byte stream to the Docker daemon.
pub(crate) enum Transport {
    Unix(TokioIo<UnixStream>),
    Tcp(TokioIo<TcpStream>),
    Tls(Box<TokioIo<TlsStream<TcpStream>>>),
}

impl Read for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl Write for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Unix(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl Connection for Transport {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// Opens connections to the configured daemon endpoint, ignoring the request URI.
#[derive(Clone)]
pub(crate) struct Connector {
    host: Host,
    tls: Option<TlsConnector>,
}

impl Connector {
    pub(crate) fn new(host: Host, tls: Option<Arc<rustls::ClientConfig>>) -> Self {
        Self {
            host,
            tls: tls.map(TlsConnector::from),
        }
    }
}

impl tower::Service<hyper::Uri> for Connector {
    type Response = Transport;

    type Error = io::Error;

    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: hyper::Uri) -> Self::Future {
        let host = self.host.clone();
        let tls = self.tls.clone();
        Box::pin(async move {
            match host {
                Host::Unix(path) => connect_unix(path).await,
                Host::Tcp { host, port } => {
                    log::trace!("Connecting to {host}:{port}...");
                    let stream = TcpStream::connect((host.as_str(), port)).await?;
                    match tls {
                        None => Ok(Transport::Tcp(TokioIo::new(stream))),
                        Some(tls) => {
                            let server_name = ServerName::try_from(host)
                                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
                            let stream = tls.connect(server_name, stream).await?;
                            Ok(Transport::Tls(Box::new(TokioIo::new(stream))))
                        }
                    }
                }
            }
        })
    }
}

async fn connect_unix(path: PathBuf) -> io::Result<Transport> {
    log::trace!("Connecting to {}...", path.display());
    let stream = UnixStream::connect(path).await?;
    Ok(Transport::Unix(TokioIo::new(stream)))
}
