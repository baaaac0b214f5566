use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use wirebridge_client::{BridgeClient, ClientError};
use wirebridge_core::{
    Args, ChannelSender, Command, CommandError, ErrorCode, RecordDef, Registry, SocketHandler,
    SocketSender,
};
use wirebridge_server::{BridgeConfig, BridgeContext, router};

#[derive(Debug, Deserialize, PartialEq)]
struct Profile {
    user_id: i64,
    display_name: String,
}

fn registry() -> Registry {
    Registry::builder()
        .command(
            Command::unary("get_profile")
                .param::<i64>("user_id")
                .returns_with(
                    RecordDef::new("Profile")
                        .field::<i64>("user_id")
                        .field::<String>("display_name")
                        .into(),
                )
                .handler(|args: Args| async move {
                    let user_id: i64 = args.get("user_id")?;
                    if user_id == 0 {
                        return Err(CommandError::new("no such user").with_code("NOT_FOUND"));
                    }
                    Ok(json!({ "userId": user_id, "displayName": "Ada" }))
                }),
        )
        .command(
            Command::stream("countdown")
                .param::<u32>("from")
                .yields::<u32>()
                .stream_handler(|args: Args, tx: ChannelSender| async move {
                    let from: u32 = args.get("from")?;
                    for n in (0..=from).rev() {
                        tx.send(n).await?;
                    }
                    Ok(())
                }),
        )
        .command(
            Command::stream("broken")
                .yields::<u32>()
                .stream_handler(|_, tx: ChannelSender| async move {
                    tx.send(1).await?;
                    Err(CommandError::new("sensor offline"))
                }),
        )
        .socket(
            SocketHandler::new("echo")
                .server_event::<String>("reply")
                .client_event::<String>("say")
                .on("say", |tx: SocketSender, text: String| async move {
                    tx.send("reply", text.to_uppercase()).await?;
                    Ok(())
                }),
        )
        .build()
        .unwrap()
}

async fn start() -> BridgeClient {
    let ctx = BridgeContext::new(registry(), BridgeConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(ctx)).await.unwrap();
    });
    BridgeClient::new(format!("http://{addr}/"))
}

#[tokio::test]
async fn unary_call_roundtrip() {
    let client = start().await;

    let profile: Profile = client
        .request("get_profile", json!({ "userId": 7 }))
        .await
        .unwrap();
    assert_eq!(
        profile,
        Profile {
            user_id: 7,
            display_name: "Ada".to_string()
        }
    );

    let err = client
        .call("get_profile", json!({ "user_id": 0 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&ErrorCode::Custom("NOT_FOUND".into())));

    let err = client.call("missing", json!({})).await.unwrap_err();
    assert_eq!(err.code(), Some(&ErrorCode::UnknownCommand));
}

#[tokio::test]
async fn channel_roundtrip() {
    let client = start().await;

    let channel = client
        .open_channel::<u32>("countdown", json!({ "from": 3 }))
        .await
        .unwrap();
    let values: Vec<u32> = channel.map(Result::unwrap).collect().await;
    assert_eq!(values, [3, 2, 1, 0]);

    let mut channel = client
        .open_channel::<u32>("broken", json!({}))
        .await
        .unwrap();
    assert_eq!(channel.next().await.unwrap().unwrap(), 1);
    let err = channel.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some(&ErrorCode::ChannelError));
    assert!(channel.next().await.is_none());
}

#[tokio::test]
async fn channel_create_errors() {
    let client = start().await;
    let err = client
        .open_channel::<u32>("countdown", json!({ "from": "three" }))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::Remote(ref e) if e.code == ErrorCode::InvalidArgument));
}

#[tokio::test]
async fn socket_roundtrip() {
    let client = start().await;

    let mut socket = client.connect_socket("echo").await.unwrap();
    socket.send("say", "hello").await.unwrap();
    let frame = socket.recv().await.unwrap().unwrap();
    assert_eq!(frame.event, "reply");
    assert_eq!(frame.data, json!("HELLO"));

    socket.send("say", 42).await.unwrap();
    let frame = socket.recv().await.unwrap().unwrap();
    assert_eq!(frame.event, "error");
    assert_eq!(frame.data["code"], "INVALID_ARGUMENT");

    socket.close().await.unwrap();
}
