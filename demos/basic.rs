//! Basic CodeSync Example
//!
//! Two participants edit the same room through an embedded coordinator,
//! then the room is saved and a third participant joins.
//!
//! Run with: cargo run --example basic

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use codesync_core::{ConnectionId, DocumentHandle, ParticipantInfo, RoomId, YrsDocument};
use codesync_protocol::{decode_server, encode_line, ClientMessage, ServerMessage};
use codesync_transport::{Coordinator, Outbox};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("CodeSync Basic Example\n");

    // Example 1: Direct API usage (embedded mode)
    println!("=== Embedded Mode ===\n");
    embedded_example().await?;

    // Example 2: TCP client usage
    println!("\n=== TCP Client Mode ===");
    println!("(Start codesyncd first with: cargo run --bin codesyncd)\n");

    // Uncomment to test with running server:
    // tcp_client_example().await?;

    Ok(())
}

fn user(name: &str, color: &str) -> ParticipantInfo {
    ParticipantInfo {
        name: name.into(),
        color: color.into(),
    }
}

/// Apply every document message queued for a replica
fn pump(outbox: &mut Outbox, replica: &mut YrsDocument) -> Result<(), Box<dyn std::error::Error>> {
    while let Ok(message) = outbox.try_recv() {
        match message {
            ServerMessage::SyncUpdate { update, .. } => replica.apply_update(&update)?,
            ServerMessage::RoomState { state, .. } => replica.apply_update(&state)?,
            ServerMessage::ParticipantsChanged { participants, .. } => {
                let names: Vec<_> = participants.iter().map(|p| p.name.as_str()).collect();
                println!("  participants: {}", names.join(", "));
            }
            other => println!("  {:?}", other),
        }
    }
    Ok(())
}

async fn embedded_example() -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = Coordinator::in_memory();
    let room = RoomId::new("abc123")?;

    let (alice, bob) = (ConnectionId::new("local:alice"), ConnectionId::new("local:bob"));
    let mut alice_rx = coordinator.connect(alice.clone());
    let mut bob_rx = coordinator.connect(bob.clone());
    let mut alice_doc = YrsDocument::new();
    let mut bob_doc = YrsDocument::new();

    // Alice opens the room and types
    coordinator.join(&alice, &room, user("alice", "#e06c75")).await;
    pump(&mut alice_rx, &mut alice_doc)?;
    let update = alice_doc.append("fn main() {\n}\n");
    coordinator.relay_update(&alice, &room, Bytes::from(update));

    // Bob joins and receives the live state
    coordinator.join(&bob, &room, user("bob", "#61afef")).await;
    pump(&mut bob_rx, &mut bob_doc)?;
    println!("Bob sees: {:?}", bob_doc.text());

    // Bob edits, Alice receives the delta
    let update = bob_doc.insert(12, "    println!(\"hi\");\n");
    coordinator.relay_update(&bob, &room, Bytes::from(update));
    pump(&mut alice_rx, &mut alice_doc)?;
    println!("Alice sees: {:?}", alice_doc.text());

    // Save, then everyone leaves
    coordinator.save(&room, &alice_doc.text(), "rust").await?;
    coordinator.disconnect(&alice);
    coordinator.disconnect(&bob);

    // Carol joins the empty room and gets the persisted snapshot
    let carol = ConnectionId::new("local:carol");
    let mut carol_rx = coordinator.connect(carol.clone());
    coordinator.join(&carol, &room, user("carol", "#98c379")).await;
    while let Ok(message) = carol_rx.try_recv() {
        if let ServerMessage::RoomSnapshot { content, language, .. } = message {
            println!("Carol loads ({}): {:?}", language, content);
        }
    }

    println!("\nStats: {:?}", coordinator.stats());
    Ok(())
}

#[allow(dead_code)]
async fn tcp_client_example() -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect("127.0.0.1:4380").await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let join = ClientMessage::JoinRoom {
        room_id: RoomId::new("abc123")?,
        user: user("example", "#c678dd"),
    };
    writer.write_all(&encode_line(&join)?).await?;
    writer.write_all(&encode_line(&ClientMessage::Ping)?).await?;

    while let Some(line) = lines.next_line().await? {
        let message = decode_server(line.as_bytes())?;
        println!("< {:?}", message);
        if message == ServerMessage::Pong {
            break;
        }
    }

    Ok(())
}
