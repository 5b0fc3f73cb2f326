mod harness;

use anyhow::Result;
use reqwest::StatusCode;

use common::constants::CHUNK_ID_HEADER;
use common::schemas::{ChunkHead, ChunkListResponse, StoreAck};
use harness::{TestVolume, http};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn store_fetch_delete_over_http() -> Result<()> {
    let vol = TestVolume::start().await?;
    let client = http();
    let id = "clip%2Emp4.chunk0.0123456789abcdef";

    let resp = client.put(vol.chunk_url(id)).body("chunk-bytes").send().await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let acks = resp
        .text()
        .await?
        .lines()
        .map(serde_json::from_str::<StoreAck>)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0].message, "received 11 bytes");

    let resp = client.get(vol.chunk_url(id)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CHUNK_ID_HEADER], id);
    assert_eq!(resp.bytes().await?.as_ref(), b"chunk-bytes");

    let head: ChunkHead = client
        .get(format!("{}/admin/chunk", vol.server.url))
        .query(&[("id", id)])
        .send()
        .await?
        .json()
        .await?;
    assert!(head.exists);
    assert_eq!(head.size, 11);

    for _ in 0..2 {
        let resp = client.delete(vol.chunk_url(id)).send().await?;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
    let resp = client.get(vol.chunk_url(id)).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_store_of_same_id_conflicts() -> Result<()> {
    let vol = TestVolume::start().await?;
    let client = http();
    let id = "dup.chunk0.aa";

    let first = client.put(vol.chunk_url(id)).body("one").send().await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let second = client.put(vol.chunk_url(id)).body("two").send().await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let body = client.get(vol.chunk_url(id)).send().await?.bytes().await?;
    assert_eq!(body.as_ref(), b"one");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_bad_ids_and_empty_bodies() -> Result<()> {
    let vol = TestVolume::start().await?;
    let client = http();

    let resp = client.put(vol.chunk_url(".hidden")).body("x").send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.put(vol.chunk_url("empty.chunk0.bb")).body("").send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admin_listing_pages_through_all_chunks() -> Result<()> {
    let vol = TestVolume::start().await?;
    let client = http();
    for i in 0..5 {
        let id = format!("list.chunk{i}.cc");
        client.put(vol.chunk_url(&id)).body("data").send().await?;
    }

    let mut seen = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let mut req = client
            .get(format!("{}/admin/chunks", vol.server.url))
            .query(&[("limit", "2")]);
        if let Some(a) = &after {
            req = req.query(&[("after", a.as_str())]);
        }
        let page: ChunkListResponse = req.send().await?.json().await?;
        seen.extend(page.chunk_ids);
        match page.next_after {
            Some(next) => after = Some(next),
            None => break,
        }
    }

    let expected = (0..5).map(|i| format!("list.chunk{i}.cc")).collect::<Vec<_>>();
    assert_eq!(seen, expected);
    Ok(())
}
