//! WS-Management remote shell client.
//!
//! Speaks the subset of WinRM a check needs: create a cmd shell, start one command in it, poll
//! its output streams until the command is done, then terminate the command and delete the
//! shell. Envelopes are rendered from fixed templates and responses are picked apart with
//! regular expressions, which is enough for the flat documents these operations return.

use std::{sync::LazyLock, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::trace;
use regex::Regex;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

const RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const STATE_DONE: &str = "CommandState/Done";

/// Fault returned when a Receive found no output within the operation timeout
const FAULT_OPERATION_TIMEOUT: u64 = 2150858793;

const MAX_ENVELOPE_SIZE: u32 = 153600;

type Pattern = LazyLock<Result<Regex, regex::Error>>;

/// Any element holding only text, with the namespace prefix of either tag ignored
static TEXT_ELEMENT: Pattern = LazyLock::new(|| {
    Regex::new(r"<(?:\w+:)?([\w.-]+)(?:\s[^>]*)?>([^<]*)</(?:\w+:)?([\w.-]+)>")
});
static FAULT_CODE: Pattern =
    LazyLock::new(|| Regex::new(r#"<(?:\w+:)?WSManFault[^>]*\sCode="(\d+)""#));
static SHELL_SELECTOR: Pattern =
    LazyLock::new(|| Regex::new(r#"<(?:\w+:)?Selector\s+Name="ShellId"[^>]*>([^<]+)<"#));
static STREAM: Pattern = LazyLock::new(|| {
    Regex::new(r"<(?:\w+:)?Stream\s([^>]*?)(?:/>|>([^<]*)</(?:\w+:)?Stream>)")
});
static STREAM_NAME: Pattern = LazyLock::new(|| Regex::new(r#"Name="(\w+)""#));
static COMMAND_STATE: Pattern =
    LazyLock::new(|| Regex::new(r#"<(?:\w+:)?CommandState\s[^>]*State="([^"]*)""#));
static ENTITY: Pattern = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]+)|#x([0-9A-Fa-f]+)|(lt|gt|amp|quot|apos));")
});

fn compiled(pattern: &'static Result<Regex, regex::Error>) -> Result<&'static Regex, WinrmError> {
    pattern.as_ref().map_err(|err| WinrmError::Regex(err.clone()))
}

#[derive(Error, Debug)]
pub enum WinrmError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Regex(#[from] regex::Error),
    #[error("invalid credentials (401 Unauthorized)")]
    Unauthorized,
    #[error("server returned {status} : {reason}")]
    Status { status: StatusCode, reason: String },
    #[error("WS-Management fault {code} : {reason}")]
    Fault { code: u64, reason: String },
    #[error("{0} missing from response")]
    Missing(&'static str),
    #[error("invalid {0} stream : {1}")]
    Stream(String, base64::DecodeError),
}

/// Output stream of a remote command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// One Receive worth of output
#[derive(Debug, Default)]
pub struct Received {
    pub chunks: Vec<(StreamName, Vec<u8>)>,
    pub done: bool,
    pub exit_code: Option<i32>,
}

/// Wrap a script so it runs under `powershell.exe` whatever characters it contains
pub fn powershell(script: &str) -> String {
    let utf16: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    format!("powershell.exe -EncodedCommand {}", STANDARD.encode(utf16))
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Resolve the predefined and numeric character references of XML text
fn xml_unescape(text: &str) -> Result<String, WinrmError> {
    let decoded = compiled(&ENTITY)?.replace_all(text, |captures: &regex::Captures| {
        let code = match (captures.get(1), captures.get(2)) {
            (Some(decimal), _) => decimal.as_str().parse().ok(),
            (_, Some(hex)) => u32::from_str_radix(hex.as_str(), 16).ok(),
            _ => None,
        };
        if let Some(code) = code {
            return char::from_u32(code)
                .map(String::from)
                .unwrap_or_else(|| captures[0].to_string());
        }
        match &captures[3] {
            "lt" => "<",
            "gt" => ">",
            "amp" => "&",
            "quot" => "\"",
            _ => "'",
        }
        .to_string()
    });
    Ok(decoded.into_owned())
}

/// Text content of the first element named `name`, whatever its namespace prefix
fn element(xml: &str, name: &str) -> Result<Option<String>, WinrmError> {
    compiled(&TEXT_ELEMENT)?
        .captures_iter(xml)
        .find(|captures| &captures[1] == name && &captures[3] == name)
        .map(|captures| xml_unescape(captures[2].trim()))
        .transpose()
}

/// The WS-Management fault carried by `xml`, if any
fn fault(xml: &str) -> Result<Option<WinrmError>, WinrmError> {
    let code = compiled(&FAULT_CODE)?
        .captures(xml)
        .and_then(|captures| captures[1].parse::<u64>().ok());

    let Some(code) = code else {
        return Ok(None);
    };
    let reason = match element(xml, "Text")? {
        Some(reason) => reason,
        None => element(xml, "Message")?.unwrap_or_default(),
    };
    Ok(Some(WinrmError::Fault { code, reason }))
}

fn parse_shell_id(xml: &str) -> Result<String, WinrmError> {
    if let Some(id) = element(xml, "ShellId")? {
        return Ok(id);
    }
    compiled(&SHELL_SELECTOR)?
        .captures(xml)
        .map(|captures| xml_unescape(captures[1].trim()))
        .transpose()?
        .ok_or(WinrmError::Missing("ShellId"))
}

fn parse_received(xml: &str) -> Result<Received, WinrmError> {
    let streams = compiled(&STREAM)?;
    let stream_name = compiled(&STREAM_NAME)?;
    let mut received = Received::default();

    for captures in streams.captures_iter(xml) {
        let content = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        if content.is_empty() {
            continue;
        }
        let name = stream_name
            .captures(&captures[1])
            .map(|name| name[1].to_string())
            .unwrap_or_default();
        let stream = match name.as_str() {
            "stdout" => StreamName::Stdout,
            "stderr" => StreamName::Stderr,
            _ => continue,
        };
        let bytes = STANDARD
            .decode(content)
            .map_err(|err| WinrmError::Stream(name.clone(), err))?;
        received.chunks.push((stream, bytes));
    }

    received.done = compiled(&COMMAND_STATE)?
        .captures(xml)
        .map(|captures| captures[1].ends_with(STATE_DONE))
        .unwrap_or(false);
    received.exit_code = element(xml, "ExitCode")?.and_then(|code| code.parse().ok());
    Ok(received)
}

#[derive(Clone)]
pub struct WsmanClient {
    http: reqwest::Client,
    endpoint: Url,
    username: String,
    password: String,
    operation_timeout: Duration,
}

impl WsmanClient {
    /// Prepare a client for `http(s)://host:port/wsman`. Nothing is sent until the first
    /// operation. Server certificates are not verified.
    pub fn new(
        host: &str,
        port: u16,
        encrypted: bool,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, WinrmError> {
        let scheme = if encrypted { "https" } else { "http" };
        let endpoint = Url::parse(&format!("{}://{}:{}/wsman", scheme, host, port))?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
            // Leave the server room to answer a Receive before the HTTP timeout fires
            operation_timeout: timeout
                .saturating_sub(Duration::from_secs(2))
                .max(Duration::from_secs(1)),
        })
    }

    fn envelope(&self, action: &str, shell_id: Option<&str>, options: &str, body: &str) -> String {
        let selector = shell_id
            .map(|id| {
                format!(
                    r#"<w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>"#,
                    xml_escape(id)
                )
            })
            .unwrap_or_default();

        format!(
            concat!(
                r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
                r#"xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
                r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" "#,
                r#"xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">"#,
                r#"<s:Header>"#,
                r#"<a:To>{to}</a:To>"#,
                r#"<a:ReplyTo><a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>"#,
                r#"<w:MaxEnvelopeSize s:mustUnderstand="true">{max}</w:MaxEnvelopeSize>"#,
                r#"<a:MessageID>uuid:{message_id}</a:MessageID>"#,
                r#"<w:Locale xml:lang="en-US" s:mustUnderstand="false"/>"#,
                r#"<w:OperationTimeout>PT{timeout:.3}S</w:OperationTimeout>"#,
                r#"<w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>"#,
                r#"<a:Action s:mustUnderstand="true">{action}</a:Action>"#,
                r#"{selector}{options}"#,
                r#"</s:Header>"#,
                r#"<s:Body>{body}</s:Body>"#,
                r#"</s:Envelope>"#,
            ),
            to = xml_escape(self.endpoint.as_str()),
            max = MAX_ENVELOPE_SIZE,
            message_id = Uuid::new_v4(),
            timeout = self.operation_timeout.as_secs_f64(),
            resource = RESOURCE_URI,
            action = action,
            selector = selector,
            options = options,
            body = body,
        )
    }

    async fn post(&self, envelope: String) -> Result<String, WinrmError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/soap+xml;charset=UTF-8")
            .body(envelope)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        trace!("wsman {} < {}", status, text);

        if status == StatusCode::UNAUTHORIZED {
            return Err(WinrmError::Unauthorized);
        }
        if !status.is_success() {
            return Err(match fault(&text)? {
                Some(fault) => fault,
                None => WinrmError::Status {
                    status,
                    reason: text.chars().take(200).collect(),
                },
            });
        }
        Ok(text)
    }

    /// Open a cmd shell, returning its id
    pub async fn create_shell(&self) -> Result<String, WinrmError> {
        let options = concat!(
            r#"<w:OptionSet>"#,
            r#"<w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>"#,
            r#"<w:Option Name="WINRS_CODEPAGE">65001</w:Option>"#,
            r#"</w:OptionSet>"#,
        );
        let body = concat!(
            r#"<rsp:Shell>"#,
            r#"<rsp:InputStreams>stdin</rsp:InputStreams>"#,
            r#"<rsp:OutputStreams>stdout stderr</rsp:OutputStreams>"#,
            r#"</rsp:Shell>"#,
        );

        let response = self
            .post(self.envelope(ACTION_CREATE, None, options, body))
            .await?;
        parse_shell_id(&response)
    }

    /// Start `command` in the shell, returning the command id
    pub async fn execute(&self, shell_id: &str, command: &str) -> Result<String, WinrmError> {
        let options = concat!(
            r#"<w:OptionSet>"#,
            r#"<w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>"#,
            r#"<w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option>"#,
            r#"</w:OptionSet>"#,
        );
        let body = format!(
            "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
            xml_escape(command)
        );

        let response = self
            .post(self.envelope(ACTION_COMMAND, Some(shell_id), options, &body))
            .await?;
        element(&response, "CommandId")?.ok_or(WinrmError::Missing("CommandId"))
    }

    /// Poll the output of a command once. A poll that found nothing new comes back empty and
    /// not done.
    pub async fn receive(&self, shell_id: &str, command_id: &str) -> Result<Received, WinrmError> {
        let body = format!(
            r#"<rsp:Receive><rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#,
            xml_escape(command_id)
        );

        match self
            .post(self.envelope(ACTION_RECEIVE, Some(shell_id), "", &body))
            .await
        {
            Ok(response) => parse_received(&response),
            Err(WinrmError::Fault { code, .. }) if code == FAULT_OPERATION_TIMEOUT => {
                Ok(Received::default())
            }
            Err(err) => Err(err),
        }
    }

    /// Ask the shell to stop a command that is still running
    pub async fn terminate(&self, shell_id: &str, command_id: &str) -> Result<(), WinrmError> {
        let body = format!(
            r#"<rsp:Signal CommandId="{}"><rsp:Code>{}</rsp:Code></rsp:Signal>"#,
            xml_escape(command_id),
            SIGNAL_TERMINATE
        );
        self.post(self.envelope(ACTION_SIGNAL, Some(shell_id), "", &body))
            .await
            .map(|_| ())
    }

    pub async fn delete_shell(&self, shell_id: &str) -> Result<(), WinrmError> {
        self.post(self.envelope(ACTION_DELETE, Some(shell_id), "", ""))
            .await
            .map(|_| ())
    }
}
