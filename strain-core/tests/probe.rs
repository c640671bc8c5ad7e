use std::time::Duration;

use anyhow::Context as _;
use strain_core::strain_metrics::{MetricKind, Registry};
use strain_core::{HttpClient, ProbeErrorKind, ProbeRequest};
use strain_testserver::TestServer;

#[tokio::test]
async fn connection_refused_is_a_status_zero_result() -> anyhow::Result<()> {
    // Bind and release a port so nothing is listening on it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = HttpClient::new(Duration::from_secs(2));
    let res = client
        .probe(ProbeRequest::get(format!("http://{addr}/api/cpu?ms=1")))
        .await;

    anyhow::ensure!(res.status == 0, "status {}", res.status);
    anyhow::ensure!(res.error == Some(ProbeErrorKind::Connect), "error {:?}", res.error);
    anyhow::ensure!(res.is_failed());
    anyhow::ensure!(res.body.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_response_times_out() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let client = HttpClient::default();

    let res = client
        .probe(
            ProbeRequest::get(format!("{}/api/cpu?ms=1000", server.base_url()))
                .with_timeout(Duration::from_millis(100)),
        )
        .await;

    server.shutdown().await;

    anyhow::ensure!(res.status == 0);
    anyhow::ensure!(res.error == Some(ProbeErrorKind::Timeout), "error {:?}", res.error);
    anyhow::ensure!(
        res.duration < Duration::from_millis(900),
        "timeout not enforced: {:?}",
        res.duration
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_range_cpu_burn_is_a_client_error() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let client = HttpClient::default();

    let res = client
        .probe(ProbeRequest::get(format!("{}/api/cpu?ms=20000", server.base_url())))
        .await;
    let db = client
        .probe(ProbeRequest::get(format!("{}/api/db/search", server.base_url())))
        .await;

    server.shutdown().await;

    anyhow::ensure!(res.status == 400);
    anyhow::ensure!(res.error.is_none());
    anyhow::ensure!(res.is_failed());
    anyhow::ensure!(db.status == 200);
    anyhow::ensure!(db.body_contains("resultCount"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cpu_latency_median_tracks_requested_burn() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let client = HttpClient::default();
    let registry = Registry::default();
    let url = format!("{}/api/cpu?ms=100", server.base_url());

    for _ in 0..50 {
        let res = client.probe(ProbeRequest::get(url.clone())).await;
        anyhow::ensure!(res.status == 200, "status {} ({:?})", res.status, res.error);
        registry.record("cpu_latency", MetricKind::Trend, res.duration_ms(), &[])?;
    }

    server.shutdown().await;

    let agg = registry
        .snapshot()
        .aggregate("cpu_latency", &[])
        .context("cpu_latency missing")?;
    let p50 = agg.percentile(50.0).context("empty trend")?;
    anyhow::ensure!(agg.count() == 50);
    anyhow::ensure!(
        (95.0..=150.0).contains(&p50),
        "p50 {p50}ms is too far from 100ms"
    );
    Ok(())
}
