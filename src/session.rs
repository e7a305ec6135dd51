use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
};
use tracing::{debug, info};

use crate::{
    protocol::{NAME_PROMPT, read_line, welcome_line, write_line},
    router::{RouterHandle, SessionEvent, SessionId},
};

/// Per-session outbound buffer. The router drops lines rather than wait when
/// this fills; see `router` for the eviction policy.
const OUTBOUND_CAPACITY: usize = 128;

/// Drives one client connection from accept to teardown.
///
/// The handshake runs before the session is registered, so a connection that
/// dies mid-prompt leaves no trace. Once registered, every exit path funnels
/// into a single `Departed` event: read EOF, read error, write error, and
/// eviction by the router all end here, and the router's idempotent removal
/// absorbs the overlap.
pub async fn run_connection(stream: TcpStream, router: RouterHandle) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let name = request_name(&mut reader, &mut writer).await?;

    let id = router.next_session_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    router
        .send(SessionEvent::Joined {
            id,
            name: name.clone(),
            outbound: outbound_tx,
        })
        .await?;
    info!(?peer, id, name, "session joined");

    // Registered. The welcome goes out before the writer task starts so it
    // is the first line on the wire; a failure here will resurface in the
    // read loop, which owns teardown from now on.
    if let Err(err) = write_line(&mut writer, &welcome_line(&name)).await {
        debug!(id, ?err, "failed to write welcome line");
    }

    let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx));
    let writer_done = tokio::select! {
        _ = read_loop(&mut reader, id, &router) => false,
        _ = &mut writer_task => true,
    };

    let _ = router.send(SessionEvent::Departed { id }).await;
    if !writer_done {
        // Unblocks once the router processes the departure and drops the
        // outbound sender.
        let _ = writer_task.await;
    }
    Ok(())
}

/// Prompts for and reads the display name. The prompt intentionally has no
/// newline; it shows up glued to the next line the server sends.
async fn request_name<R, W>(reader: &mut R, writer: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(NAME_PROMPT.as_bytes()).await?;
    writer.flush().await?;

    let Some(line) = read_line(reader).await? else {
        bail!("connection closed before a username arrived");
    };
    Ok(line.trim().to_string())
}

/// Pumps client lines into the router until the read side ends. Read
/// failures end the session, never the process.
async fn read_loop<R>(reader: &mut R, id: SessionId, router: &RouterHandle)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_line(reader).await {
            Ok(Some(text)) => {
                if router.send(SessionEvent::Line { id, text }).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(id, ?err, "read failed");
                break;
            }
        }
    }
}

/// Drains the outbound queue to the socket. Exits when the router drops the
/// queue's send side, after delivering what was already buffered, or on the
/// first write error.
async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<Arc<str>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(?err, "write failed, dropping session");
            break;
        }
    }
}
