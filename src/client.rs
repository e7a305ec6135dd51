use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{NAME_PROMPT, read_line, write_line},
};

/// Runs the terminal client: join under the configured name, print every
/// relay line to stdout, forward every stdin line to the relay.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    join_chat(&mut reader, &mut writer, &args.name).await?;

    // The relay reader runs as its own task so a half-read line can never be
    // lost to a cancelled `select!` branch.
    let mut printer = tokio::spawn(print_relay_lines(reader));
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            _ = &mut printer => break,
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &mut writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    shutdown_connection(&mut writer).await;
    printer.abort();
    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

/// Sends the display name and waits for the welcome. The relay's name prompt
/// carries no newline, so it arrives glued to the front of the welcome line;
/// strip it before showing the result.
async fn join_chat<R>(reader: &mut R, writer: &mut OwnedWriteHalf, name: &str) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    write_line(writer, name).await?;

    let Some(line) = read_line(reader).await? else {
        bail!("relay closed the connection during the handshake");
    };
    let line = line.strip_prefix(NAME_PROMPT).unwrap_or(&line);
    write_stdout(line).await?;
    Ok(())
}

/// Copies relay lines to stdout until the relay closes the stream.
async fn print_relay_lines<R>(mut reader: R)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_line(&mut reader).await {
            Ok(Some(line)) => {
                if write_stdout(&line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = write_stdout("*** relay closed the connection").await;
                break;
            }
            Err(err) => {
                warn!(?err, "failed to read from relay");
                break;
            }
        }
    }
}

/// Forwards one stdin line. Returns `Ok(false)` when the client should stop:
/// stdin closed, or the user asked to leave.
async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_line(writer, text).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(err) = result {
        warn!(?err, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(err) = writer.shutdown().await {
        warn!(?err, "failed to shut down the connection cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
