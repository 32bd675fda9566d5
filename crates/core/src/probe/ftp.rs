//! FTP directory-listing probe over a minimal async control connection.
//!
//! Only what the crawler needs: anonymous login, passive-mode `LIST`, `QUIT`.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use super::listing::parse_ftp_listing;
use super::{EntryKind, ProbeError, ProbeVerdict, RemoteListing};

const ANONYMOUS_PASSWORD: &str = "mirrorcrawl@";

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

#[derive(Debug)]
enum FtpFailure {
    Reply(Reply),
    Io(io::Error),
}

impl From<io::Error> for FtpFailure {
    fn from(e: io::Error) -> Self {
        FtpFailure::Io(e)
    }
}

fn invalid_data(msg: impl Into<String>) -> FtpFailure {
    FtpFailure::Io(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}

struct FtpControl {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl FtpControl {
    async fn connect(host: &str, port: u16) -> Result<Self, FtpFailure> {
        let stream = TcpStream::connect((host, port)).await?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let mut control = Self {
            reader: BufReader::new(reader),
            writer,
            peer,
        };

        let greeting = control.read_reply().await?;
        if greeting.code != 220 {
            return Err(FtpFailure::Reply(greeting));
        }

        let user = control.command("USER anonymous").await?;
        match user.code {
            230 => {}
            331 => {
                let pass = control
                    .command(&format!("PASS {}", ANONYMOUS_PASSWORD))
                    .await?;
                if pass.code != 230 && pass.code != 202 {
                    return Err(FtpFailure::Reply(pass));
                }
            }
            _ => return Err(FtpFailure::Reply(user)),
        }

        let binary = control.command("TYPE I").await?;
        if binary.code >= 400 {
            return Err(FtpFailure::Reply(binary));
        }

        Ok(control)
    }

    async fn read_reply(&mut self) -> Result<Reply, FtpFailure> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(FtpFailure::Io(io::ErrorKind::UnexpectedEof.into()));
        }

        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| invalid_data(format!("malformed FTP reply: {}", line.trim_end())))?;
        let mut text = line.get(4..).unwrap_or("").trim_end().to_string();

        if line.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                line.clear();
                if self.reader.read_line(&mut line).await? == 0 {
                    return Err(FtpFailure::Io(io::ErrorKind::UnexpectedEof.into()));
                }
                text.push('\n');
                text.push_str(line.trim_end());
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }

        Ok(Reply { code, text })
    }

    async fn command(&mut self, command: &str) -> Result<Reply, FtpFailure> {
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await?;
        self.read_reply().await
    }

    /// Open a passive data connection. The advertised address is ignored in favour
    /// of the control peer, which survives NAT.
    async fn open_data(&mut self) -> Result<TcpStream, FtpFailure> {
        let port = if self.peer.is_ipv6() {
            let reply = self.command("EPSV").await?;
            if reply.code != 229 {
                return Err(FtpFailure::Reply(reply));
            }
            parse_epsv_port(&reply.text)
                .ok_or_else(|| invalid_data(format!("malformed EPSV reply: {}", reply.text)))?
        } else {
            let reply = self.command("PASV").await?;
            if reply.code != 227 {
                return Err(FtpFailure::Reply(reply));
            }
            parse_pasv_port(&reply.text)
                .ok_or_else(|| invalid_data(format!("malformed PASV reply: {}", reply.text)))?
        };

        Ok(TcpStream::connect(SocketAddr::new(self.peer.ip(), port)).await?)
    }

    async fn list(&mut self, path: &str) -> Result<String, FtpFailure> {
        let mut data = self.open_data().await?;

        let start = self.command(&format!("LIST {}", path)).await?;
        if start.code != 125 && start.code != 150 {
            return Err(FtpFailure::Reply(start));
        }

        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        drop(data);

        let done = self.read_reply().await?;
        if done.code >= 400 {
            return Err(FtpFailure::Reply(done));
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn quit(mut self) -> Result<(), FtpFailure> {
        self.command("QUIT").await?;
        Ok(())
    }
}

fn parse_pasv_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let numbers: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if numbers.len() != 6 || numbers[4] > 255 || numbers[5] > 255 {
        return None;
    }
    Some(numbers[4] * 256 + numbers[5])
}

fn parse_epsv_port(text: &str) -> Option<u16> {
    let start = text.find("(|||")? + 4;
    let end = text[start..].find('|')? + start;
    text[start..end].parse().ok()
}

struct FtpTarget {
    host: String,
    port: u16,
    path: String,
}

impl FtpTarget {
    fn parse(url: &str) -> Result<Self, ProbeError> {
        let parsed =
            Url::parse(url).map_err(|e| ProbeError::Protocol(format!("invalid url {}: {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProbeError::Protocol(format!("no host in {}", url)))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(21);
        let path = urlencoding::decode(parsed.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| parsed.path().to_string());
        Ok(Self { host, port, path })
    }

    fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// FTP prober keeping one control connection per host:port.
pub struct FtpProbe {
    connections: Mutex<HashMap<String, FtpControl>>,
    timeout: Duration,
}

impl FtpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// List a directory.
    ///
    /// `Ok(None)` means the listing cannot be judged (553 on an unreadable directory).
    /// 550/450 answer an empty listing.
    pub async fn list_dir(
        &self,
        url: &str,
        readable: bool,
    ) -> Result<Option<RemoteListing>, ProbeError> {
        let target = FtpTarget::parse(url)?;
        let key = target.key();
        let mut connections = self.connections.lock().await;
        let mut retry_error = ProbeError::try_later("FTP retry exhausted");

        for attempt in 0..2 {
            let mut control = match connections.remove(&key) {
                Some(control) => control,
                None => match timeout(self.timeout, FtpControl::connect(&target.host, target.port))
                    .await
                {
                    Err(_) => return Err(ProbeError::Timeout { after: self.timeout }),
                    Ok(Ok(control)) => control,
                    Ok(Err(FtpFailure::Reply(reply))) if matches!(reply.code, 421 | 530) => {
                        debug!(host = %key, attempt, code = reply.code, "FTP login refused");
                        retry_error = ProbeError::try_later(format!("{} {}", reply.code, reply.text));
                        continue;
                    }
                    Ok(Err(FtpFailure::Reply(reply))) => {
                        return Err(ProbeError::Protocol(format!(
                            "FTP login failed: {} {}",
                            reply.code, reply.text
                        )))
                    }
                    Ok(Err(FtpFailure::Io(e))) => {
                        debug!(host = %key, attempt, error = %e, "FTP connect failed");
                        retry_error = ProbeError::Connection(e.to_string());
                        continue;
                    }
                },
            };

            match timeout(self.timeout, control.list(&target.path)).await {
                Err(_) => return Err(ProbeError::Timeout { after: self.timeout }),
                Ok(Ok(text)) => {
                    connections.insert(key, control);
                    return Ok(Some(parse_ftp_listing(&text)));
                }
                Ok(Err(FtpFailure::Reply(reply))) => match reply.code {
                    550 | 450 => {
                        connections.insert(key, control);
                        return Ok(Some(RemoteListing::new()));
                    }
                    553 => {
                        connections.insert(key, control);
                        return Ok(readable.then(RemoteListing::new));
                    }
                    530 => {
                        debug!(host = %key, attempt, "FTP session lost its login");
                        retry_error = ProbeError::try_later(format!("530 {}", reply.text));
                        continue;
                    }
                    421 | 425 | 500 => {
                        return Err(ProbeError::try_later(format!(
                            "{} {}",
                            reply.code, reply.text
                        )));
                    }
                    code => {
                        connections.insert(key, control);
                        return Err(ProbeError::Protocol(format!(
                            "unexpected FTP reply {} {}",
                            code, reply.text
                        )));
                    }
                },
                Ok(Err(FtpFailure::Io(e))) => {
                    debug!(host = %key, attempt, error = %e, "FTP control connection broke");
                    retry_error = ProbeError::Connection(e.to_string());
                    continue;
                }
            }
        }

        Err(retry_error)
    }

    /// Single-file check: `LIST` the file itself and compare the size field.
    pub async fn check_file(
        &self,
        url: &str,
        expected_size: Option<u64>,
        readable: bool,
    ) -> Result<ProbeVerdict, ProbeError> {
        let name = url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let Some(listing) = self.list_dir(url, readable).await? else {
            return Ok(ProbeVerdict::Unknown);
        };

        let entry = listing
            .get(name)
            .or_else(|| (listing.len() == 1).then(|| listing.values().next()).flatten());
        let Some(entry) = entry else {
            return Ok(ProbeVerdict::Absent);
        };

        match expected_size {
            None => Ok(ProbeVerdict::Exists),
            Some(_) if entry.kind == EntryKind::Directory => Ok(ProbeVerdict::Absent),
            Some(expected) if entry.size == Some(expected) => Ok(ProbeVerdict::Exists),
            Some(_) => Ok(ProbeVerdict::Absent),
        }
    }

    /// Close every cached control connection, returning the errors met on the way.
    pub async fn close(&self) -> Vec<ProbeError> {
        let mut connections = self.connections.lock().await;
        let mut errors = Vec::new();
        for (key, control) in connections.drain() {
            match timeout(self.timeout, control.quit()).await {
                Ok(Ok(())) => {}
                Ok(Err(FtpFailure::Io(e))) => {
                    errors.push(ProbeError::Connection(format!("{}: {}", key, e)))
                }
                Ok(Err(FtpFailure::Reply(reply))) => errors.push(ProbeError::Protocol(format!(
                    "{}: QUIT answered {}",
                    key, reply.code
                ))),
                Err(_) => errors.push(ProbeError::Timeout { after: self.timeout }),
            }
        }
        errors
    }
}
