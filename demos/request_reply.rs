//! Request/reply in both roles: serve an echo address and query it.

use std::time::Duration;

use eventbus_bridge::{Bridge, ConnectOptions, Result, message_handler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let bridge = Bridge::connect(
        "ws://localhost:8765/eventbus".into(),
        |eb| {
            // The responder: reply to every request with its own body.
            eb.register_handler(
                "echo",
                message_handler(|msg| {
                    println!("echo request: {}", msg.body());
                    if let Err(err) = msg.reply(msg.body().clone()) {
                        eprintln!("could not reply: {err}");
                    }
                }),
            )
            .expect("bridge just opened");
        },
        ConnectOptions::new(),
    )
    .await?;

    // The requester side of the same connection.
    bridge.send_with_reply(
        "echo",
        "ping over the bus",
        message_handler(|msg| {
            println!("echo reply: {}", msg.body());
        }),
    )?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    bridge.close();
    Ok(())
}
