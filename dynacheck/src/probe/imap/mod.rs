use std::{fmt, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::{
    check::{
        parse_definition, require_fields, require_port, Check, CheckConfig, CheckResult,
        RunContext, Stage, StageError,
    },
    error::CheckError,
};

mod client;

pub use client::{ImapClient, ImapError};

pub const CHECK_TYPE: &str = "imap";

const DIAL_TIMEOUT: Duration = Duration::from_secs(20);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(2);

/// Logs in to a mail server and lists the mailboxes of the user
#[serde_as]
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Definition {
    #[serde(skip)]
    config: CheckConfig,
    /// (required) IP or hostname of the mail server
    pub host: String,
    /// (required) Username to log in with
    pub username: String,
    /// (required) Password of the user
    pub password: String,
    /// (optional, default=false) Wrap the connection in TLS
    pub encrypted: bool,
    /// (optional, default=143) Port of the IMAP service
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub port: u16,
}

impl Default for Definition {
    fn default() -> Self {
        Self {
            config: CheckConfig::default(),
            host: String::new(),
            username: String::new(),
            password: String::new(),
            encrypted: false,
            port: 143,
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
            .field("encrypted", &self.encrypted)
            .field("port", &self.port)
            .finish()
    }
}

impl Definition {
    /// Login then list, with the client left open for logout whatever happens
    async fn session(&self, ctx: &RunContext, client: &mut ImapClient) -> Result<usize, String> {
        ctx.bound(
            Stage::Authenticating,
            COMMAND_TIMEOUT,
            client.login(&self.username, &self.password),
        )
        .await
        .map_err(|err| format!("Login with user {} failed : {}", self.username, err))?;

        let mailboxes = ctx
            .bound(Stage::Executing, COMMAND_TIMEOUT, client.list())
            .await
            .map_err(|err| format!("Listing mailboxes failed : {}", err))?;

        debug!(
            "imap check {} listed mailboxes {:?}",
            self.config.id, mailboxes
        );
        Ok(mailboxes.len())
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
            ],
        )?;
        require_port(&parsed.config, CHECK_TYPE, parsed.port)?;

        *self = parsed;
        Ok(())
    }

    async fn run(&self, ctx: RunContext, result: CheckResult) -> CheckResult {
        let connect = ImapClient::connect(&self.host, self.port, self.encrypted);
        let mut client = match ctx.bound(Stage::Connecting, DIAL_TIMEOUT, connect).await {
            Ok(client) => client,
            Err(err) => {
                return result.fail(format!(
                    "Connecting to server {} failed : {}",
                    self.host, err
                ))
            }
        };

        let outcome = self.session(&ctx, &mut client).await;

        if let Err(err) = ctx.release(LOGOUT_TIMEOUT, client.logout()).await {
            match err {
                StageError::Failed(err) => {
                    debug!("imap check {} logout failed : {}", self.config.id, err)
                }
                err => warn!("imap check {} logout : {}", self.config.id, err),
            }
        }

        match outcome {
            Ok(mailboxes) => result.with_detail("mailboxes", mailboxes).pass(),
            Err(message) => result.fail(message),
        }
    }

    fn config(&self) -> CheckConfig {
        self.config.clone()
    }
}
