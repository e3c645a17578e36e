//! Heart-beat liveness: inbound silence tears the link down, outbound idle
//! emits heart-beat frames.

mod common;

use common::{accept_connect, broker_end, send_heartbeat};
use futures::StreamExt;
use osmium_stomp::{options, Conn, StompError, StompItem};
use std::time::Duration;
use tokio::time::timeout;

const BUF: usize = 4096;

#[tokio::test]
async fn missing_inbound_heartbeats_are_fatal_without_connector() {
    let (client, server) = tokio::io::duplex(BUF);
    let mut broker = broker_end(server);

    // Client wants incoming beats every 40ms; the server claims it can send
    // every 40ms, then goes silent while keeping the stream open.
    let connect =
        tokio::spawn(
            async move { Conn::connect(client, vec![options::heartbeat(0, 40)]).await },
        );
    accept_connect(&mut broker, "40,0").await;
    let conn = connect.await.expect("join").expect("connect");

    timeout(Duration::from_secs(2), async {
        while !conn.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("heartbeat timeout never fired");

    match conn.last_error() {
        Some(err) => assert!(
            matches!(&*err, StompError::HeartbeatTimeout(_)),
            "expected heartbeat timeout, got {:?}",
            err
        ),
        None => panic!("terminal error not latched"),
    }
    drop(broker);
}

#[tokio::test]
async fn inbound_heartbeats_keep_the_link_alive() {
    let (client, server) = tokio::io::duplex(BUF);
    let mut broker = broker_end(server);

    let connect =
        tokio::spawn(
            async move { Conn::connect(client, vec![options::heartbeat(0, 40)]).await },
        );
    accept_connect(&mut broker, "40,0").await;
    let conn = connect.await.expect("join").expect("connect");

    // Beat well within the 80ms deadline for a while.
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        send_heartbeat(&mut broker).await;
    }
    assert!(!conn.is_closed(), "live link must stay open");
}

#[tokio::test]
async fn idle_write_worker_emits_heartbeats() {
    let (client, server) = tokio::io::duplex(BUF);
    let mut broker = broker_end(server);

    // Client can send every 30ms, the server wants incoming beats: outbound
    // interval negotiates to 30ms.
    let connect =
        tokio::spawn(
            async move { Conn::connect(client, vec![options::heartbeat(30, 0)]).await },
        );
    accept_connect(&mut broker, "0,30").await;
    let _conn = connect.await.expect("join").expect("connect");

    // With the application idle, a heart-beat arrives within 2x the interval.
    let item = timeout(Duration::from_millis(200), broker.next())
        .await
        .expect("no heartbeat within the deadline")
        .expect("stream ended")
        .expect("decode");
    assert_eq!(item, StompItem::Heartbeat);

    // And they keep coming while the producer stays idle.
    let item = timeout(Duration::from_millis(200), broker.next())
        .await
        .expect("no second heartbeat")
        .expect("stream ended")
        .expect("decode");
    assert_eq!(item, StompItem::Heartbeat);
}
