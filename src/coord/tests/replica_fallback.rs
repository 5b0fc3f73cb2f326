mod harness;

use anyhow::Result;
use reqwest::StatusCode;
use std::time::{Duration, Instant};

use harness::{TestCoordinator, get_file, payload, put_file, start_volumes};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_survives_offline_replicas() -> Result<()> {
    let coord = TestCoordinator::start().await?;
    let mut vols = start_volumes(coord.url(), 3).await?;

    let data = payload(150 * 1024);
    put_file(&coord, "movie.mkv", "alice", data.clone()).await?.error_for_status()?;

    vols[1].kill().await?;
    drop(vols.remove(2));

    let resp = get_file(&coord, "movie.mkv", "alice").await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await?.as_ref(), data.as_slice());

    vols[0].kill().await?;
    let resp = get_file(&coord, "movie.mkv", "alice").await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.text().await?.contains("chunk 0"));

    vols[0].reset().await?;
    let resp = get_file(&coord, "movie.mkv", "alice").await?;
    assert_eq!(resp.bytes().await?.as_ref(), data.as_slice());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_fetch_failures_fall_through_to_next_replica() -> Result<()> {
    let coord = TestCoordinator::start().await?;
    let vols = start_volumes(coord.url(), 3).await?;

    let data = payload(200 * 1024);
    put_file(&coord, "data.bin", "", data.clone()).await?.error_for_status()?;

    // At most two replicas of any chunk can fail, the third always answers.
    vols[0].fail_fetch_once().await?;
    vols[1].fail_fetch_once().await?;

    let body = get_file(&coord, "data.bin", "").await?.bytes().await?;
    assert_eq!(body.as_ref(), data.as_slice());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_replica_is_skipped_after_timeout() -> Result<()> {
    let coord =
        TestCoordinator::start_with(|c| c.transfer_timeout = Duration::from_millis(500)).await?;
    let vols = start_volumes(coord.url(), 2).await?;

    let data = payload(150 * 1024);
    put_file(&coord, "slow.bin", "", data.clone()).await?.error_for_status()?;

    vols[0].inject_latency(5_000).await?;

    let started = Instant::now();
    let resp = get_file(&coord, "slow.bin", "").await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await?.as_ref(), data.as_slice());
    assert!(started.elapsed() < Duration::from_secs(4));
    Ok(())
}
