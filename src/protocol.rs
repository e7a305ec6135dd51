use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Prompt written to a freshly accepted connection. Deliberately carries no
/// trailing newline so it reads as a prompt in netcat-style clients.
pub const NAME_PROMPT: &str = "Enter your username: ";

/// One broadcast line, tagged with what it is and who it is about.
/// [`fmt::Display`] renders the exact wire text, newline excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Chat text relayed verbatim from a named session.
    Chat { from: String, text: String },
    /// A session finished its handshake.
    Joined { name: String },
    /// A session was removed.
    Left { name: String },
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Chat { from, text } => write!(f, "{from} says: {text}"),
            Message::Joined { name } => write!(f, "{name} joined the chat"),
            Message::Left { name } => write!(f, "{name} left the chat"),
        }
    }
}

pub fn welcome_line(name: &str) -> String {
    format!("welcome {name}")
}

/// Reads one line with its line ending removed. Returns `Ok(None)` on a
/// cleanly closed stream. Empty lines come back as empty strings: chat input
/// is relayed verbatim, so nothing is skipped here.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    let trimmed_len = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(trimmed_len);
    Ok(Some(line))
}

/// Writes `line` followed by a newline and flushes so recipients see it
/// promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
