//! Unix-socket [`ControlSource`].
//!
//! Clients write one JSON [`ControlRequest`] per line and read one JSON
//! [`ControlReply`] line back for each, on the same connection:
//!
//! ```text
//! > "Status"
//! < {"result":"status","state":"disconnected","device_path":"/dev/ttyACM0","baud_rate":9600}
//! > "Toggle"
//! < {"result":"status","state":"connecting","device_path":"/dev/ttyACM0","baud_rate":9600}
//! ```
//!
//! This is what a menu-bar item or a shell script uses to show and flip the
//! connection.

use crate::event::{ChannelInput, ControlReply, ControlRequest, Responder};
use crate::traits::ControlSource;
use log::{debug, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// How long a client waits for the channel to answer a request.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors produced by the Unix socket listener.
#[derive(Debug, thiserror::Error)]
pub enum UnixSocketError {
    #[error("cannot bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A bound control socket.  The socket file is removed on drop.
pub struct UnixSocketListener {
    path: PathBuf,
    listener: UnixListener,
}

/// How a client session ended.
enum Session {
    ClientLeft,
    ChannelGone,
}

impl UnixSocketListener {
    /// Bind `path`, replacing a stale socket file left by an earlier run.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, UnixSocketError> {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).map_err(|source| UnixSocketError::Bind {
            path: path.clone(),
            source,
        })?;
        info!("control socket listening on {}", path.display());
        Ok(Self { path, listener })
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl ControlSource for UnixSocketListener {
    type Error = UnixSocketError;

    /// Serve clients one at a time.  Blocks; returns once the channel's
    /// input queue is gone.
    fn run(&mut self, sink: mpsc::Sender<ChannelInput>) -> Result<(), Self::Error> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("accept on {} failed: {}", self.path.display(), e);
                    continue;
                }
            };
            match serve(stream, &sink) {
                Ok(Session::ClientLeft) => debug!("control client left"),
                Ok(Session::ChannelGone) => {
                    info!("channel stopped, closing control socket");
                    return Ok(());
                }
                Err(e) => warn!("control client dropped: {}", e),
            }
        }
        Ok(())
    }
}

/// Answer every request line of one client.
fn serve(stream: UnixStream, sink: &mpsc::Sender<ChannelInput>) -> io::Result<Session> {
    let mut writer = stream.try_clone()?;
    let (reply_tx, reply_rx) = mpsc::channel();
    let responder = Responder::new(reply_tx);

    for line in BufReader::new(stream).lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ControlRequest>(text) {
            Ok(request) => {
                // A reply that missed its deadline must not answer this request.
                reply_rx.try_iter().for_each(drop);
                if sink
                    .send(ChannelInput::Control(request, Some(responder.clone())))
                    .is_err()
                {
                    return Ok(Session::ChannelGone);
                }
                reply_rx
                    .recv_timeout(REPLY_TIMEOUT)
                    .unwrap_or_else(|_| ControlReply::Rejected {
                        reason: format!("no answer within {:?}", REPLY_TIMEOUT),
                    })
            }
            Err(e) => ControlReply::Rejected {
                reason: format!("unknown request {}: {}", text, e),
            },
        };
        serde_json::to_writer(&mut writer, &reply)?;
        writer.write_all(b"\n")?;
    }
    Ok(Session::ClientLeft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread::JoinHandle;

    static SOCKET_SEQ: AtomicU32 = AtomicU32::new(0);

    fn socket_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "keycommander-ctl-{}-{}.sock",
            std::process::id(),
            SOCKET_SEQ.fetch_add(1, Ordering::SeqCst)
        ))
    }

    /// Bind a listener and serve it on a background thread.
    fn serve_on(path: &Path) -> mpsc::Receiver<ChannelInput> {
        let mut listener = UnixSocketListener::bind(path).unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || listener.run(tx));
        rx
    }

    /// Stands in for the channel: answers `n` requests with `reply`.
    fn answer(
        inputs: mpsc::Receiver<ChannelInput>,
        n: usize,
        reply: ControlReply,
    ) -> JoinHandle<Vec<ControlRequest>> {
        std::thread::spawn(move || {
            inputs
                .iter()
                .take(n)
                .map(|input| match input {
                    ChannelInput::Control(request, Some(responder)) => {
                        responder.send(reply.clone());
                        request
                    }
                    other => panic!("unexpected input {:?}", other),
                })
                .collect()
        })
    }

    struct Client {
        stream: UnixStream,
        replies: BufReader<UnixStream>,
    }

    impl Client {
        fn connect(path: &Path) -> Self {
            let stream = UnixStream::connect(path).unwrap();
            let replies = BufReader::new(stream.try_clone().unwrap());
            Self { stream, replies }
        }

        fn send(&mut self, line: &str) -> ControlReply {
            writeln!(self.stream, "{}", line).unwrap();
            let mut reply = String::new();
            self.replies.read_line(&mut reply).unwrap();
            serde_json::from_str(&reply).unwrap()
        }
    }

    fn connected() -> ControlReply {
        ControlReply::Status {
            state: crate::connection::ConnectionState::Connected,
            device_path: "/dev/ttyACM0".into(),
            baud_rate: 9600,
        }
    }

    #[test]
    fn each_request_gets_the_channels_reply() {
        let path = socket_path();
        let channel = answer(serve_on(&path), 2, connected());

        let mut client = Client::connect(&path);
        assert_eq!(client.send(r#""Status""#), connected());
        assert_eq!(client.send(r#""Toggle""#), connected());

        assert_eq!(
            channel.join().unwrap(),
            vec![ControlRequest::Status, ControlRequest::Toggle]
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_request_is_rejected_locally() {
        let path = socket_path();
        let channel = answer(serve_on(&path), 1, connected());

        let mut client = Client::connect(&path);
        match client.send("APP:browser") {
            ControlReply::Rejected { reason } => {
                assert!(reason.starts_with("unknown request APP:browser"))
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
        assert_eq!(client.send(r#""Connect""#), connected());

        assert_eq!(channel.join().unwrap(), vec![ControlRequest::Connect]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn later_clients_are_served_after_one_leaves() {
        let path = socket_path();
        let channel = answer(serve_on(&path), 2, connected());

        drop(Client::connect(&path));
        let mut second = Client::connect(&path);
        second.stream.write_all(b"\n").unwrap();
        assert_eq!(second.send(r#""Disconnect""#), connected());
        drop(second);
        assert_eq!(Client::connect(&path).send(r#""Status""#), connected());

        assert_eq!(
            channel.join().unwrap(),
            vec![ControlRequest::Disconnect, ControlRequest::Status]
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn socket_file_is_removed_on_drop() {
        let path = socket_path();
        std::fs::write(&path, b"stale").unwrap();
        let listener = UnixSocketListener::bind(&path).unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
