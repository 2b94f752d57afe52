use crate::dates;
use crate::types::{AggregatorError, FetchedChannel, FetchedItem, Result};
use feed_rs::parser;
use std::fmt::Write;
use tracing::debug;

/// Parse an RSS/Atom document into channel metadata and its items, in
/// document order.
pub fn parse_channel(content: &[u8]) -> Result<FetchedChannel> {
    debug!("Parsing feed content ({} bytes)", content.len());

    let feed = parser::Builder::new()
        .timestamp_parser(dates::parse_pub_date)
        .build()
        .parse(content)
        .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

    let items = feed.entries.into_iter().map(parse_entry).collect::<Vec<_>>();
    debug!("Parsed feed with {} entries", items.len());

    Ok(FetchedChannel {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|d| d.content),
        link: feed.links.first().map(|l| l.href.clone()),
        items,
    })
}

fn parse_entry(entry: feed_rs::model::Entry) -> FetchedItem {
    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());
    let link = entry.links.first().map(|l| l.href.clone());
    let description = entry.summary.map(|s| s.content);

    // Decoded through `dates::parse_pub_date`; handed on as RFC 2822 text so
    // every fetcher feeds the same date handling.
    let pub_date = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.to_rfc2822());

    FetchedItem {
        title,
        link,
        description,
        pub_date,
    }
}

/// Human-readable overview of a channel and its first `max_items` items.
pub fn channel_summary(channel: &FetchedChannel, max_items: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Channel: {}", channel.title.as_deref().unwrap_or("(untitled)"));
    let _ = writeln!(out, "Description: {}", channel.description.as_deref().unwrap_or(""));
    let _ = writeln!(out, "Link: {}", channel.link.as_deref().unwrap_or(""));
    let _ = writeln!(out, "Items: {}", channel.items.len());

    for item in channel.items.iter().take(max_items) {
        let _ = writeln!(out);
        let _ = writeln!(out, "- {}", item.title);
        if let Some(link) = &item.link {
            let _ = writeln!(out, "  {}", link);
        }
        if let Some(date) = &item.pub_date {
            let _ = writeln!(out, "  {}", date);
        }
    }
    out
}
