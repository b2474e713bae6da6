//! Subscribe to an address and print everything published there.
//!
//! Run against a bridge server listening on localhost:8765, then publish
//! something to `news.sports` from any other client.

use std::time::Duration;

use eventbus_bridge::{Bridge, ConnectOptions, Result, message_handler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let bridge = Bridge::connect(
        "ws://localhost:8765/eventbus".into(),
        |eb| {
            eb.register_handler(
                "news.sports",
                message_handler(|msg| {
                    println!("news.sports: {}", msg.body());
                }),
            )
            .expect("bridge just opened");
        },
        ConnectOptions::new(),
    )
    .await?;

    bridge.publish("news.sports", "kickoff in five minutes")?;

    tokio::time::sleep(Duration::from_secs(30)).await;
    bridge.close();
    Ok(())
}
