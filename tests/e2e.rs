use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line_relay");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&binary).await?;
    let addr = read_listen_addr(&mut relay_stdout).await?;

    // Drain further relay logs in the background so the pipe never fills.
    let relay_log_task = tokio::spawn(async move {
        drain_stdout(relay_stdout).await;
    });

    let mut alice = spawn_client(&binary, "alice", &addr).await?;
    let mut bob = spawn_client(&binary, "bob", &addr).await?;

    // Alice observes Bob's arrival; Bob never sees his own join notice.
    let alice_sees_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice join notice").await?;
    assert_eq!(alice_sees_bob, "bob joined the chat");

    // Alice greets Bob. Only Bob receives it; the relay does not echo lines
    // back to their sender.
    alice
        .send_line("anyone here?")
        .await
        .context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "alice says: anyone here?");

    // Bob replies. The next line on alice's stdout is the reply, proving her
    // own line was not echoed in between.
    bob.send_line("just me").await.context("bob send line")?;
    let alice_hears_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, "bob says: just me");

    // Bob quits; Alice receives the departure notice.
    bob.send_line("/quit").await.context("bob send quit")?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob quit confirmation").await?;
    assert_eq!(bob_quit, "*** leaving chat");
    let alice_sees_departure =
        read_line_expect(&mut alice.stdout, "waiting for alice to see bob leave").await?;
    assert_eq!(alice_sees_departure, "bob left the chat");

    // Alice quits to wrap up the session.
    alice.send_line("/quit").await.context("alice send quit")?;
    let alice_quit =
        read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "*** leaving chat");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The relay keeps serving after clients disconnect; terminate it manually.
    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    let _ = relay_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_relay(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_listen_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("relay did not emit a listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected relay banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("relay banner missing socket address: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, name: &str, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--name")
        .arg(name)
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {name}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    // The first thing the client prints is the relay's welcome line.
    let welcome = read_line_expect(&mut process.stdout, "waiting for welcome line").await?;
    if welcome != format!("welcome {name}") {
        return Err(anyhow!("expected welcome for {name}, got '{welcome}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
