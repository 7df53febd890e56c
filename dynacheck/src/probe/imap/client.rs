//! Minimal IMAP4rev1 client covering what a health check needs: greeting, LOGIN, LIST and LOGOUT

use std::{io, sync::Arc};

use log::trace;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};

/// Longest response line accepted from a server
const MAX_LINE: u64 = 64 * 1024;
/// Largest literal accepted inside a response
const MAX_LITERAL: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ImapError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid server name {0}")]
    ServerName(String),
    #[error("server refused the connection : {0}")]
    Refused(String),
    #[error("NO {0}")]
    No(String),
    #[error("BAD {0}")]
    Bad(String),
    #[error("unexpected response `{0}`")]
    Protocol(String),
    #[error("connection closed by server")]
    Closed,
    #[error("response line longer than {0} bytes")]
    LineTooLong(u64),
    #[error("{0} cannot be sent as a quoted string")]
    Unquotable(&'static str),
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub(crate) fn tls_config() -> Result<ClientConfig, ImapError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(config)
}

/// Quote `value` as an IMAP quoted string
fn quoted(field: &'static str, value: &str) -> Result<String, ImapError> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(ImapError::Unquotable(field));
    }
    Ok(format!(
        "\"{}\"",
        value.replace('\\', "\\\\").replace('"', "\\\"")
    ))
}

/// Offset and size of the literal announced at the end of `line`, as in `* LIST () "/" {5}`
fn literal_marker(line: &str) -> Option<(usize, usize)> {
    let open = line.strip_suffix('}')?.rfind('{')?;
    let size = line[open + 1..line.len() - 1].parse().ok()?;
    Some((open, size))
}

pub struct ImapClient {
    reader: BufReader<Box<dyn Stream>>,
    next_tag: u32,
}

impl ImapClient {
    /// Open the connection, upgrade it to TLS when `encrypted` and wait for the server greeting
    pub async fn connect(host: &str, port: u16, encrypted: bool) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((host, port)).await?;

        let stream: Box<dyn Stream> = if encrypted {
            let name = ServerName::try_from(host)
                .map_err(|_| ImapError::ServerName(host.to_string()))?
                .to_owned();
            let connector = TlsConnector::from(Arc::new(tls_config()?));
            Box::new(connector.connect(name, tcp).await?)
        } else {
            Box::new(tcp)
        };

        let mut client = Self {
            reader: BufReader::new(stream),
            next_tag: 0,
        };
        client.greeting().await?;
        Ok(client)
    }

    async fn greeting(&mut self) -> Result<(), ImapError> {
        let line = self.read_response().await?;
        let status = line.strip_prefix("* ").unwrap_or_default();
        let (status, text) = status.split_once(' ').unwrap_or((status, ""));

        match status.to_ascii_uppercase().as_str() {
            "OK" | "PREAUTH" => Ok(()),
            "BYE" => Err(ImapError::Refused(text.to_string())),
            _ => Err(ImapError::Protocol(line)),
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ImapError> {
        let command = format!(
            "LOGIN {} {}",
            quoted("username", username)?,
            quoted("password", password)?
        );
        self.command(&command).await.map(|_| ())
    }

    /// Names of every mailbox visible to the logged in user
    pub async fn list(&mut self) -> Result<Vec<String>, ImapError> {
        let untagged = self.command(r#"LIST "" "*""#).await?;

        Ok(untagged
            .iter()
            .filter_map(|line| {
                let rest = line.strip_prefix("* ")?;
                let (kind, rest) = rest.split_once(' ')?;
                kind.eq_ignore_ascii_case("LIST")
                    .then(|| rest.rsplit(' ').next().unwrap_or_default())
                    .map(|name| name.trim_matches('"').to_string())
            })
            .collect())
    }

    /// End the session and close the connection. A server hanging up right after its BYE is
    /// not an error.
    pub async fn logout(mut self) -> Result<(), ImapError> {
        let outcome = match self.command("LOGOUT").await {
            Ok(_) | Err(ImapError::Closed) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = self.reader.get_mut().shutdown().await {
            trace!("Shutting down imap connection failed : {}", err);
        }
        outcome
    }

    /// Send one tagged command and collect the untagged responses up to its completion
    async fn command(&mut self, command: &str) -> Result<Vec<String>, ImapError> {
        self.next_tag += 1;
        let tag = format!("A{:04}", self.next_tag);

        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{} {}\r\n", tag, command).as_bytes())
            .await?;
        stream.flush().await?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_response().await?;
            let completion = line
                .strip_prefix(tag.as_str())
                .and_then(|rest| rest.strip_prefix(' '));

            let Some(completion) = completion else {
                untagged.push(line);
                continue;
            };

            let (status, text) = completion.split_once(' ').unwrap_or((completion, ""));
            return match status.to_ascii_uppercase().as_str() {
                "OK" => Ok(untagged),
                "NO" => Err(ImapError::No(text.to_string())),
                "BAD" => Err(ImapError::Bad(text.to_string())),
                _ => Err(ImapError::Protocol(line)),
            };
        }
    }

    /// Read one logical response, inlining any literals it carries
    async fn read_response(&mut self) -> Result<String, ImapError> {
        let mut response = self.read_line().await?;

        while let Some((open, size)) = literal_marker(&response) {
            if size > MAX_LITERAL {
                return Err(ImapError::Protocol(response));
            }
            let mut literal = vec![0; size];
            self.reader.read_exact(&mut literal).await?;
            response.truncate(open);
            response.push_str(&String::from_utf8_lossy(&literal));
            response.push_str(&self.read_line().await?);
        }

        trace!("imap < {}", response);
        Ok(response)
    }

    async fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_LINE)
            .read_until(b'\n', &mut buf)
            .await?;

        if read == 0 {
            return Err(ImapError::Closed);
        }
        if buf.last() != Some(&b'\n') {
            return match read as u64 {
                MAX_LINE => Err(ImapError::LineTooLong(MAX_LINE)),
                _ => Err(ImapError::Closed),
            };
        }

        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
