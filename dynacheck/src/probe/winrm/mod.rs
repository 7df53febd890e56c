use std::{fmt, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tokio::sync::mpsc;

use crate::{
    check::{
        parse_definition, require_fields, require_port, Check, CheckConfig, CheckResult,
        RunContext, Stage, StageError, TIMEOUT_MESSAGE,
    },
    error::CheckError,
    probe::content_matcher,
};

mod wsman;

pub use wsman::{powershell, Received, StreamName, WinrmError, WsmanClient};

pub const CHECK_TYPE: &str = "winrm";

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs a PowerShell command through WinRM, optionally matching its output
#[serde_as]
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Definition {
    #[serde(skip)]
    config: CheckConfig,
    #[serde(skip)]
    content: Option<Regex>,
    /// (required) IP or hostname of the WinRM box
    pub host: String,
    /// (required) User to log in as
    pub username: String,
    /// (required) Password for the user
    pub password: String,
    /// (required) Command that will be executed
    pub cmd: String,
    /// (optional, default=true) Use TLS for the connection
    pub encrypted: bool,
    /// (optional, default=false) Match the output of the command against ContentRegex
    pub match_content: bool,
    /// (optional, default=`.*`) Pattern the output must match
    pub content_regex: String,
    /// (optional, default=5986) Port of the WinRM service
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub port: u16,
}

impl Default for Definition {
    fn default() -> Self {
        Self {
            config: CheckConfig::default(),
            content: None,
            host: String::new(),
            username: String::new(),
            password: String::new(),
            cmd: String::new(),
            encrypted: true,
            match_content: false,
            content_regex: ".*".to_string(),
            port: 5986,
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("config", &self.config)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("cmd", &self.cmd)
            .field("encrypted", &self.encrypted)
            .field("match_content", &self.match_content)
            .field("content_regex", &self.content_regex)
            .field("port", &self.port)
            .finish()
    }
}

/// Render a stage failure, counting an expired HTTP request as a timeout
fn describe(err: StageError<WinrmError>) -> String {
    match err {
        StageError::Failed(WinrmError::Http(err)) if err.is_timeout() => {
            format!("{} : {}", TIMEOUT_MESSAGE, err)
        }
        err => err.to_string(),
    }
}

/// Everything a finished command wrote
#[derive(Debug, Default)]
struct Output {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
}

/// Poll the command until it is done while a collector gathers the chunks. Both halves are
/// joined here so no reader outlives the run.
async fn stream_output(
    client: &WsmanClient,
    shell_id: &str,
    command_id: &str,
) -> Result<Output, WinrmError> {
    let (tx, mut rx) = mpsc::channel::<(StreamName, Vec<u8>)>(16);

    let pump = async move {
        loop {
            let received = client.receive(shell_id, command_id).await?;
            for chunk in received.chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            if received.done {
                return Ok::<_, WinrmError>(received.exit_code);
            }
        }
    };

    let collect = async {
        let mut output = Output::default();
        while let Some((stream, bytes)) = rx.recv().await {
            match stream {
                StreamName::Stdout => output.stdout.extend(bytes),
                StreamName::Stderr => output.stderr.extend(bytes),
            }
        }
        output
    };

    let (exit_code, mut output) = tokio::join!(pump, collect);
    output.exit_code = exit_code?;
    Ok(output)
}

impl Definition {
    /// Start the command and wait for it to finish, terminating it when it does not
    async fn execute(
        &self,
        ctx: &RunContext,
        client: &WsmanClient,
        shell_id: &str,
    ) -> Result<Output, String> {
        let command_id = ctx
            .bound(
                Stage::Executing,
                HTTP_TIMEOUT,
                client.execute(shell_id, &powershell(&self.cmd)),
            )
            .await
            .map_err(|err| format!("Executing command {} failed : {}", self.cmd, describe(err)))?;

        let streamed = ctx
            .bound(
                Stage::Executing,
                ctx.remaining(),
                stream_output(client, shell_id, &command_id),
            )
            .await;

        match streamed {
            Ok(output) => Ok(output),
            Err(err) => {
                if let Err(err) = ctx
                    .release(CLOSE_TIMEOUT, client.terminate(shell_id, &command_id))
                    .await
                {
                    debug!(
                        "winrm check {} could not terminate command {} : {}",
                        self.config.id, command_id, err
                    );
                }
                Err(format!(
                    "Executing command {} failed : {}",
                    self.cmd,
                    describe(err)
                ))
            }
        }
    }

    fn judge(&self, output: Output, result: CheckResult) -> CheckResult {
        let result = match output.exit_code {
            Some(code) => result.with_detail("exit_code", code),
            None => result,
        };

        if let Some(code) = output.exit_code.filter(|code| *code != 0) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return result.fail(format!(
                "Executing command {} failed : exit code {} : {}",
                self.cmd,
                code,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match &self.content {
            Some(content) if !content.is_match(&stdout) => {
                result.fail("Matching content not found")
            }
            _ => result.pass(),
        }
    }
}

#[async_trait]
impl Check for Definition {
    fn check_type(&self) -> &'static str {
        CHECK_TYPE
    }

    fn init(&mut self, config: CheckConfig, definition: &[u8]) -> Result<(), CheckError> {
        let mut parsed: Definition = parse_definition(&config, CHECK_TYPE, definition)?;
        parsed.config = config;

        require_fields(
            &parsed.config,
            CHECK_TYPE,
            &[
                ("Host", parsed.host.as_str()),
                ("Username", parsed.username.as_str()),
                ("Password", parsed.password.as_str()),
                ("Cmd", parsed.cmd.as_str()),
            ],
        )?;
        require_port(&parsed.config, CHECK_TYPE, parsed.port)?;
        parsed.content = content_matcher(
            &parsed.config,
            CHECK_TYPE,
            parsed.match_content,
            &parsed.content_regex,
        )?;

        *self = parsed;
        Ok(())
    }

    async fn run(&self, ctx: RunContext, result: CheckResult) -> CheckResult {
        let client = match WsmanClient::new(
            &self.host,
            self.port,
            self.encrypted,
            &self.username,
            &self.password,
            ctx.remaining().min(HTTP_TIMEOUT),
        ) {
            Ok(client) => client,
            Err(err) => {
                return result.fail(format!("Login to WinRM host {} failed : {}", self.host, err))
            }
        };

        let shell_id = match ctx
            .bound(Stage::Connecting, HTTP_TIMEOUT, client.create_shell())
            .await
        {
            Ok(shell_id) => shell_id,
            Err(StageError::Failed(err @ WinrmError::Unauthorized)) => {
                return result.fail(format!("Login to WinRM host {} failed : {}", self.host, err))
            }
            Err(err) => return result.fail(format!("Failed to create shell : {}", describe(err))),
        };

        let outcome = self.execute(&ctx, &client, &shell_id).await;

        if let Err(err) = ctx
            .release(CLOSE_TIMEOUT, client.delete_shell(&shell_id))
            .await
        {
            warn!(
                "winrm check {} failed to close shell {} : {}",
                self.config.id, shell_id, err
            );
        }

        match outcome {
            Ok(output) => self.judge(output, result),
            Err(message) => result.fail(message),
        }
    }

    fn config(&self) -> CheckConfig {
        self.config.clone()
    }
}
