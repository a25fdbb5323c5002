//! Terminal wish board: follows one group's wishes and posts each stdin line
//! as a new wish.
//!
//! Usage: `wishboard <group-id> <user-id>`

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use wanderlist_client::{
    init_tracing, BoardSnapshot, ClientConfig, HttpBackend, StoreConfig, StoreNotification,
    WishStore,
};
use wanderlist_shared::{GroupId, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("wanderlist_client=info,warn");

    let mut args = std::env::args().skip(1);
    let (Some(group), Some(user)) = (args.next(), args.next()) else {
        bail!("usage: wishboard <group-id> <user-id>");
    };
    let group_id: GroupId = group.parse().context("group id must be an integer")?;
    let user_id = UserId::parse(&user).context("user id must be a UUID")?;

    let config = ClientConfig::from_env();
    info!(api = %config.api_url, group_id, "connecting");

    let backend = Arc::new(HttpBackend::new(&config)?);
    let (store, mut notifications) =
        WishStore::spawn(backend, group_id, StoreConfig::from(&config)).await?;

    let mut snapshots = store.watch();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            render(&snapshot);
        }
    });

    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                StoreNotification::SendFailed { message, reason, .. } => {
                    eprintln!("! could not send {message:?}: {reason}");
                }
                StoreNotification::LoadFailed { reason } => {
                    eprintln!("! could not load wishes: {reason}");
                }
                StoreNotification::FeedClosed => eprintln!("! live updates stopped"),
                StoreNotification::Loaded { count } => info!(count, "history loaded"),
            }
        }
    });

    if let Err(e) = store.load().await {
        eprintln!("! {e}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if let Err(e) = store.send(user_id, line).await {
                        eprintln!("! {e}");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    store.close().await;
    Ok(())
}

fn render(snapshot: &BoardSnapshot) {
    println!("--- group {} ({:?}) ---", snapshot.group_id, snapshot.status);
    for wish in &snapshot.wishes {
        let marker = if wish.is_optimistic { "…" } else { " " };
        println!(
            "{marker} [{}] {}: {}",
            wish.created_at.format("%H:%M"),
            wish.sender_name,
            wish.message
        );
    }
}
