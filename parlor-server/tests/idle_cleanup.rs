mod support;

use parlor_server::rooms::{RoomError, RoomStore};
use serde_json::json;
use std::time::Duration;
use support::{spawn_server, WsClient};

#[tokio::test]
async fn empty_room_is_reaped_after_the_grace_period() {
    let server = spawn_server(Duration::from_millis(150)).await;
    let code = server.create_room().await;

    let mut client = WsClient::connect(&server, &code).await;
    client.expect_frame("welcome").await;
    client.close().await;

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(matches!(
        server.rooms.get(&code).await,
        Err(RoomError::NotFound)
    ));
    assert_eq!(WsClient::connect_err(&server, &code).await, 404);
}

#[tokio::test]
async fn rejoin_within_grace_keeps_the_room() {
    let server = spawn_server(Duration::from_millis(400)).await;
    let code = server.create_room().await;

    let mut first = WsClient::connect(&server, &code).await;
    first.expect_frame("welcome").await;
    first.close().await;

    // Come back well inside the grace period, as a page reload would.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut second = WsClient::connect(&server, &code).await;
    second.expect_frame("welcome").await;

    tokio::time::sleep(Duration::from_millis(700)).await;

    assert!(server.rooms.get(&code).await.is_ok());
    second
        .send_json(json!({"type": "broadcast", "enabled": true}))
        .await;
    second.expect_frame("broadcast-state").await;
}

#[tokio::test]
async fn occupied_room_is_never_reaped() {
    let server = spawn_server(Duration::from_millis(150)).await;
    let code = server.create_room().await;

    let mut stays = WsClient::connect(&server, &code).await;
    stays.expect_frame("welcome").await;

    let mut leaves = WsClient::connect(&server, &code).await;
    leaves.expect_frame("welcome").await;
    stays.expect_frame("peer-joined").await;
    leaves.close().await;
    stays.expect_frame("peer-left").await;

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(server.rooms.get(&code).await.is_ok());
}
