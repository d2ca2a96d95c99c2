//! Test helpers: local upstreams, service runners, and clients.

use http::{HeaderMap, Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::{Service, service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use url::Url;

/// A request recorded by [`EchoUpstream`].
#[derive(Clone)]
pub struct CapturedRequest {
    pub method: String,
    /// Path including the query string, as received.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Local upstream accepting both HTTP/1.1 and cleartext HTTP/2. Records
/// every request and echoes the body back.
pub struct EchoUpstream {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    close_tx: watch::Sender<u64>,
}

impl EchoUpstream {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (close_tx, close_rx) = watch::channel(0u64);

        let accept_connections = connections.clone();
        let accept_requests = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let io = TokioIo::new(stream);
                let requests = accept_requests.clone();
                let mut close_rx = close_rx.clone();
                let _ = close_rx.borrow_and_update();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let requests = requests.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_default();
                            requests.lock().push(CapturedRequest {
                                method: parts.method.to_string(),
                                path: parts
                                    .uri
                                    .path_and_query()
                                    .map(|pq| pq.as_str().to_string())
                                    .unwrap_or_default(),
                                headers: parts.headers,
                                body: body.to_vec(),
                            });
                            let mut response = Response::new(Full::new(body));
                            response
                                .headers_mut()
                                .insert("x-upstream", "echo".parse().unwrap());
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let builder =
                        hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                    let conn = builder.serve_connection(io, service);
                    tokio::select! {
                        _ = conn => {}
                        // dropping the in-flight connection simulates a
                        // peer-initiated reset
                        _ = close_rx.changed() => {}
                    }
                });
            }
        });

        EchoUpstream {
            port,
            connections,
            requests,
            close_tx,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}", self.port)).unwrap()
    }

    /// Total connections accepted since spawn.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    /// Forcibly drops every open connection.
    pub fn close_connections(&self) {
        self.close_tx.send_modify(|n| *n += 1);
    }
}

/// Serves `service` on an ephemeral port with h1/h2 auto-detection and
/// returns the port.
pub async fn serve_auto<S, E>(service: S) -> u16
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind service");
    let port = listener.local_addr().unwrap().port();
    let service = Arc::new(service);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let io = TokioIo::new(stream);
            let svc = service.clone();
            tokio::spawn(async move {
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    port
}

/// Serves `service` on an ephemeral port, HTTP/2 only, and returns the port.
pub async fn serve_h2<S, E>(service: S) -> u16
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind service");
    let port = listener.local_addr().unwrap().port();
    let service = Arc::new(service);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let io = TokioIo::new(stream);
            let svc = service.clone();
            tokio::spawn(async move {
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    port
}

/// Sends one request to a local port through a fresh HTTP/1.1 client and
/// collects the response body.
pub async fn send_http(port: u16, request: Request<Full<Bytes>>) -> Response<Bytes> {
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;

    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    let (mut parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    parts.uri = format!("http://127.0.0.1:{port}{path}").parse().unwrap();
    let request = Request::from_parts(parts, body);

    let response = client.request(request).await.expect("request failed");
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("read body").to_bytes();
    Response::from_parts(parts, bytes)
}

/// Opens a cleartext HTTP/2 client connection to a local port.
pub async fn h2_connect(port: u16) -> hyper::client::conn::http2::SendRequest<Full<Bytes>> {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect");
    let io = TokioIo::new(stream);
    let (sender, connection) = hyper::client::conn::http2::Builder::new(TokioExecutor::new())
        .handshake::<_, Full<Bytes>>(io)
        .await
        .expect("h2 handshake");
    tokio::spawn(async move {
        let _ = connection.await;
    });
    sender
}

/// Sends one stream on an open HTTP/2 connection and collects the response.
pub async fn send_h2(
    sender: &mut hyper::client::conn::http2::SendRequest<Full<Bytes>>,
    request: Request<Full<Bytes>>,
) -> Response<Bytes> {
    let response = sender.send_request(request).await.expect("stream failed");
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("read body").to_bytes();
    Response::from_parts(parts, bytes)
}
