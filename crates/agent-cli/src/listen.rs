//! Line-based command transport over stdio
//!
//! Input: `<requester-id> <command text>` per line. Output: one JSON object
//! per reply, `{"to": <requester-id>, "text": "..."}`.

use agent_core::{Agent, RequesterId};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Why the listen loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenEnd {
    /// Input closed
    Eof,
    /// An update or restart was handed off; the process must exit now
    HandedOff,
}

#[derive(Debug, Serialize)]
struct OutgoingReply<'a> {
    to: Option<RequesterId>,
    text: &'a str,
}

/// Split `<requester-id> <command text>`.
fn parse_line(line: &str) -> Option<(RequesterId, &str)> {
    let (id, text) = line.trim().split_once(char::is_whitespace)?;
    Some((id.parse().ok()?, text.trim()))
}

async fn send<W>(output: &mut W, to: Option<RequesterId>, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(&OutgoingReply { to, text })?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Serve commands until input ends or a handoff happens.
pub async fn listen<R, W>(agent: &Agent, input: R, output: &mut W) -> Result<ListenEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!("Listening for commands on stdin");
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some((requester, text)) = parse_line(&line) else {
            tracing::warn!(line = %line, "Malformed input line");
            send(output, None, "Malformed line, expected `<requester-id> <command>`").await?;
            continue;
        };

        let Some(reply) = agent.handle_text(requester, text).await else {
            continue;
        };
        send(output, Some(requester), &reply.text).await?;

        if reply.terminate {
            return Ok(ListenEnd::HandedOff);
        }
    }

    tracing::info!("Input closed");
    Ok(ListenEnd::Eof)
}
