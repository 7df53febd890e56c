use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tokio::net::TcpStream;

use crate::{
    check::{
        parse_definition, require_fields, require_port, Check, CheckConfig, CheckResult,
        RunContext, Stage,
    },
    error::CheckError,
};

pub const CHECK_TYPE: &str = "tcp";

const DIAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Passes when a TCP connection to the service can be opened
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Definition {
    #[serde(skip)]
    config: CheckConfig,
    /// (required) IP or hostname of the service
    pub host: String,
    /// (optional, default=80) Port of the service
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub port: u16,
}

impl Default for Definition {
    fn default() -> Self {
        Self {
            config: CheckConfig::default(),
            host: String::new(),
            port: 80,
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

        require_fields(&parsed.config, CHECK_TYPE, &[("Host", parsed.host.as_str())])?;
        require_port(&parsed.config, CHECK_TYPE, parsed.port)?;

        *self = parsed;
        Ok(())
    }

    async fn run(&self, ctx: RunContext, result: CheckResult) -> CheckResult {
        let connect = TcpStream::connect((self.host.as_str(), self.port));

        match ctx.bound(Stage::Connecting, DIAL_TIMEOUT, connect).await {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_default();
                drop(stream);
                debug!("tcp check {} reached {}", self.config.id, peer);
                result.with_detail("peer", peer).pass()
            }
            Err(err) => result.fail(format!(
                "Connecting to {}:{} failed : {}",
                self.host, self.port, err
            )),
        }
    }

    fn config(&self) -> CheckConfig {
        self.config.clone()
    }
}
