// External crates
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::CONTENT_TYPE,
    http::{Method, Request, Response, StatusCode},
    service::service_fn,
};
use hyper_util::{rt::TokioExecutor, server::conn::auto::Builder as HyperServerBuilder};
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

fn respond(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

#[instrument(
    name = "metrics_server::handler",
    target = "metrics::http",
    skip_all,
    level = "debug"
)]
async fn metrics_handler(_req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    tracing::debug!("Collecting all registered prometheus metrics");
    let metrics_families = prometheus::gather();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return Ok(respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            e.to_string().into_bytes(),
        ));
    }
    tracing::debug!(
        writer_buffer = %buffer.len(),
        "Encoded collected metrics into prometheus text format"
    );

    Ok(respond(StatusCode::OK, encoder.format_type(), buffer))
}

/// Serve `GET /metrics` on an already bound listener until `cancel` fires.
#[instrument(
    name = "metrics_server::serve_metrics",
    target = "metrics::http",
    skip_all,
    level = "debug"
)]
pub async fn serve_metrics(listener: TcpListener, cancel: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(
            metrics_endpoint = %addr,
            "Event logger metrics available at http://{addr}/metrics"
        );
    }

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept metrics connection");
                    continue;
                }
            },
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let service = service_fn(|req: Request<Incoming>| async move {
            match (req.method(), req.uri().path()) {
                (&Method::GET, "/metrics") => metrics_handler(req).await,
                _ => Ok(respond(
                    StatusCode::NOT_FOUND,
                    "text/plain",
                    b"Not Found".to_vec(),
                )),
            }
        });

        tokio::spawn(async move {
            if let Err(err) = HyperServerBuilder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(error = %err, "Metrics connection closed with error");
            }
        });
    }

    tracing::debug!("Metrics server stopped");
}
