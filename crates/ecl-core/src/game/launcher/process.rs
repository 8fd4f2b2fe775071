/// Game process spawning and output streaming
use crate::game::launcher::types::{
    KeepAlive, LaunchCommand, LaunchError, OutputLine, OutputStream, ProcessOptions,
};
use crate::utils::process::GameCommandExt;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Lines held for the output stream before new ones are dropped
pub const OUTPUT_BUFFER: usize = 4096;

/// Handle to a running game
pub struct GameProcess {
    pid: Option<u32>,
    child: Child,
    output: Option<BoxStream<'static, OutputLine>>,
    keep_alive: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for GameProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameProcess").field("pid", &self.pid).finish()
    }
}

impl GameProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Combined stdout/stderr, one item per line. Only the first call returns
    /// the stream; it ends once both pipes close.
    ///
    /// At most [`OUTPUT_BUFFER`] unread lines are held. Lines arriving while
    /// the buffer is full are dropped from the stream but still reach the log file.
    pub fn output(&mut self) -> Option<BoxStream<'static, OutputLine>> {
        self.output.take()
    }

    /// Wait for exit. `None` when the process was ended by a signal.
    pub async fn wait(&mut self) -> Result<Option<i32>, LaunchError> {
        let status = self.child.wait().await.map_err(LaunchError::Wait)?;
        if let Some(task) = self.keep_alive.take() {
            task.abort();
        }
        log::info!("Game process (PID {:?}) exited: {}", self.pid, status);
        Ok(status.code())
    }

    pub async fn kill(&mut self) -> Result<(), LaunchError> {
        self.child.kill().await.map_err(LaunchError::Wait)
    }
}

/// Start `cmd` in `options.game_dir`. The argument vector is passed to the
/// OS directly, never through a shell.
pub async fn launch(cmd: &LaunchCommand, options: &ProcessOptions) -> Result<GameProcess, LaunchError> {
    ensure_game_dir(&options.game_dir).await?;

    let log_file = match &options.log_file {
        Some(path) => Some(open_log(path).await?),
        None => None,
    };

    let mut command = tokio::process::Command::new(&cmd.executable);
    command
        .args(cmd.arguments())
        .current_dir(&options.game_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if options.keep_alive.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    command.suppress_console();
    if options.detach {
        command.detach();
    }

    let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
        executable: cmd.executable.clone(),
        source,
    })?;
    let pid = child.id();
    log::info!("Game process started with PID: {:?}", pid);

    let (raw_tx, raw_rx) = mpsc::channel(OUTPUT_BUFFER);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, OutputStream::Stdout, raw_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, OutputStream::Stderr, raw_tx.clone()));
    }
    drop(raw_tx);

    let (out_tx, out_rx) = mpsc::channel(OUTPUT_BUFFER);
    tokio::spawn(route(raw_rx, out_tx, log_file));

    let keep_alive = match (&options.keep_alive, child.stdin.take()) {
        (Some(keep_alive), Some(stdin)) => Some(tokio::spawn(send_keep_alive(stdin, keep_alive.clone()))),
        _ => None,
    };

    let output = futures::stream::unfold(out_rx, |mut rx| async move {
        rx.recv().await.map(|line| (line, rx))
    })
    .boxed();

    Ok(GameProcess {
        pid,
        child,
        output: Some(output),
        keep_alive,
    })
}

async fn ensure_game_dir(path: &Path) -> Result<(), LaunchError> {
    let game_dir_error = |source: std::io::Error| LaunchError::GameDir {
        path: path.to_path_buf(),
        source,
    };
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(game_dir_error(std::io::Error::other("not a directory"))),
        Err(_) => tokio::fs::create_dir_all(path).await.map_err(game_dir_error),
    }
}

async fn open_log(path: &Path) -> Result<tokio::fs::File, LaunchError> {
    let log_error = |source: std::io::Error| LaunchError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(log_error)?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(log_error)
}

async fn pump<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = tokio::io::BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(OutputLine { stream, line }).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to read game {}: {}", stream.as_str(), e);
                break;
            }
        }
    }
}

/// Single owner of the log file: tees every line, then forwards it without
/// waiting on the consumer. A slow or dropped consumer does not stop the tee.
async fn route(
    mut rx: mpsc::Receiver<OutputLine>,
    tx: mpsc::Sender<OutputLine>,
    mut log_file: Option<tokio::fs::File>,
) {
    let mut consumer = Some(tx);
    let mut dropped = 0u64;
    while let Some(line) = rx.recv().await {
        if let Some(file) = log_file.as_mut() {
            let written = async {
                file.write_all(line.line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                log::warn!("Failed to write game log, disabling tee: {}", e);
                log_file = None;
            }
        }
        let sent = match &consumer {
            Some(tx) => tx.try_send(line),
            None => continue,
        };
        match sent {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if dropped == 0 {
                    log::warn!("Game output is not being read, dropping lines from the stream");
                }
                dropped += 1;
            }
            Err(TrySendError::Closed(_)) => consumer = None,
        }
    }
    if dropped > 0 {
        log::debug!("{} output lines were not delivered to the stream", dropped);
    }
}

async fn send_keep_alive(mut stdin: ChildStdin, keep_alive: KeepAlive) {
    let mut ticker = tokio::time::interval(keep_alive.interval);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let sent = async {
            stdin.write_all(keep_alive.payload.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = sent {
            log::debug!("Keep-alive stopped: {}", e);
            break;
        }
    }
}
