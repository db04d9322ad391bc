use anyhow::{Result, bail};
use console::style;

use super::{connect_app, flag_value};
use crate::core::telegram::resolver;

pub(crate) async fn list_chats() -> Result<()> {
    let app = connect_app().await?;
    let dialogs = app.client.list_dialogs().await?;

    println!("{}", style(format!("{} chats accessible", dialogs.len())).bold());
    for dialog in dialogs {
        println!(
            "  {:>16}  {:<8} {}",
            dialog.chat_id,
            style(dialog.kind).dim(),
            dialog.title
        );
    }
    Ok(())
}

pub(crate) async fn list_topics(args: &[String]) -> Result<()> {
    let Some(identifier) = flag_value(args, 2, &["--id", "-i"]) else {
        bail!("--id is required");
    };

    let app = connect_app().await?;
    let resolved = resolver::resolve(app.client.as_ref(), &identifier).await?;
    let topics = app.client.list_forum_topics(resolved.chat_id).await?;

    if topics.is_empty() {
        println!("No topics found; is this group a forum?");
        return Ok(());
    }
    println!("{:<8} Topic", "Id");
    for topic in topics {
        println!("{:<8} {}", topic.id, topic.title);
    }
    Ok(())
}

pub(crate) async fn test_resolve(args: &[String]) -> Result<()> {
    let Some(identifier) = flag_value(args, 2, &["--id", "-i"]) else {
        bail!("--id is required");
    };

    // Show what can be learned locally before touching the network.
    let parsed = resolver::parse_identifier(&identifier)?;
    println!("Parsed locally as: {parsed:?}");

    let app = connect_app().await?;
    let resolved = resolver::resolve(app.client.as_ref(), &identifier).await?;
    println!("Canonical chat id: {}", resolved.chat_id);
    if let Some(message_id) = resolved.message_id {
        println!("Message id: {message_id}");
    }

    let info = app.client.get_chat(resolved.chat_id).await?;
    println!(
        "Access confirmed: {} (restricted: {})",
        info.title, info.restricted
    );
    Ok(())
}
