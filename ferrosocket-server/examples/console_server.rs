//! Console broadcast server
//!
//! Every line typed on stdin is sent to all connected clients; messages from
//! clients are printed. Type `exit` to stop.
//!
//! Run with: cargo run -p ferrosocket-server --example console_server --features logging

use ferrosocket_server::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};

type Clients = Arc<Mutex<Vec<Arc<Connection>>>>;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServerConfig::new("ws://localhost:8181", "null");
    init_logging(&config.log_filter)?;

    let clients: Clients = Arc::new(Mutex::new(Vec::new()));
    let mut server = Server::new(config);

    let registry = Arc::clone(&clients);
    server.on_connect(move |connection| {
        println!("Client connected from {}", connection.remote_addr());
        registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(connection));

        connection.on_receive(|connection, message| match message.to_text() {
            Ok(text) => println!("{}: {}", connection.remote_addr(), text),
            Err(_) => println!("{}: <{} bytes>", connection.remote_addr(), message.len()),
        });

        let registry = Arc::clone(&registry);
        connection.on_disconnect(move |connection| {
            println!("Client {} disconnected", connection.remote_addr());
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|c| c.id() != connection.id());
        });
    });

    let addr = server.start().await?;
    println!("Listening on {addr}, type a line to broadcast or `exit` to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "exit" {
            break;
        }

        let targets: Vec<_> = clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for client in targets {
            if let Err(e) = client.send(&line).await {
                eprintln!("send to {} failed: {e}", client.remote_addr());
            }
        }
    }

    server.dispose().await;
    Ok(())
}
