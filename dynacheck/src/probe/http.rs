use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use url::Url;

use crate::{
    check::{
        parse_definition, require_fields, require_port, Check, CheckConfig, CheckResult,
        RunContext, Stage, StageError, ValidationError,
    },
    error::CheckError,
    probe::content_matcher,
};

pub const CHECK_TYPE: &str = "http";

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

const VERBS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

/// Sends one request to a web service and checks the status and optionally the body
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Definition {
    #[serde(skip)]
    config: CheckConfig,
    #[serde(skip)]
    url: Option<Url>,
    #[serde(skip)]
    method: Method,
    #[serde(skip)]
    content: Option<Regex>,
    /// (required) IP or hostname of the web server
    pub host: String,
    /// (optional, default=80) Port of the web server
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub port: u16,
    /// (optional, default=false) Use https
    pub https: bool,
    /// (optional, default=`/`) Path to request, query string included
    pub path: String,
    /// (optional, default=GET) HTTP verb of the request
    pub verb: String,
    /// (optional, default=true) Compare the status code of the response with Code
    pub code_check: bool,
    /// (optional, default=200) Expected status code
    pub code: u16,
    /// (optional, default=false) Match the body of the response against ContentRegex
    pub match_content: bool,
    /// (optional, default=`.*`) Pattern the body must match
    pub content_regex: String,
    /// (optional, default=false) Reject servers whose certificate does not verify
    pub verify_certificate: bool,
}

impl Default for Definition {
    fn default() -> Self {
        Self {
            config: CheckConfig::default(),
            url: None,
            method: Method::GET,
            content: None,
            host: String::new(),
            port: 80,
            https: false,
            path: "/".to_string(),
            verb: "GET".to_string(),
            code_check: true,
            code: 200,
            match_content: false,
            content_regex: ".*".to_string(),
            verify_certificate: false,
        }
    }
}

impl Definition {
    fn build_url(&self) -> Result<Url, ValidationError> {
        let scheme = if self.https { "https" } else { "http" };
        let mut url = Url::parse(&format!("{}://{}:{}", scheme, self.host, self.port)).map_err(
            |err| ValidationError::invalid(&self.config, CHECK_TYPE, "Host", err.to_string()),
        )?;

        // set_path would escape the `?`
        match self.path.split_once('?') {
            Some((path, query)) => {
                url.set_path(path);
                url.set_query(Some(query));
            }
            None => url.set_path(&self.path),
        }
        Ok(url)
    }

    fn build_method(&self) -> Result<Method, ValidationError> {
        let verb = self.verb.to_ascii_uppercase();
        if !VERBS.contains(&verb.as_str()) {
            return Err(ValidationError::invalid(
                &self.config,
                CHECK_TYPE,
                "Verb",
                format!("unknown HTTP verb {}", self.verb),
            ));
        }
        Method::from_bytes(verb.as_bytes()).map_err(|err| {
            ValidationError::invalid(&self.config, CHECK_TYPE, "Verb", err.to_string())
        })
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
        if StatusCode::from_u16(parsed.code).is_err() {
            return Err(ValidationError::invalid(
                &parsed.config,
                CHECK_TYPE,
                "Code",
                format!("{} is not a status code", parsed.code),
            )
            .into());
        }
        parsed.method = parsed.build_method()?;
        parsed.url = Some(parsed.build_url()?);
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
        let Some(url) = self.url.clone() else {
            return result.fail("Check was run before it was initialised");
        };

        let client = match reqwest::Client::builder()
            .danger_accept_invalid_certs(!self.verify_certificate)
            .timeout(ctx.remaining().min(HTTP_TIMEOUT))
            .build()
        {
            Ok(client) => client,
            Err(err) => return result.fail(format!("Creating http client failed : {}", err)),
        };

        let request = client.request(self.method.clone(), url.clone()).send();
        let response = match ctx.bound(Stage::Connecting, HTTP_TIMEOUT, request).await {
            Ok(response) => response,
            Err(StageError::Failed(err)) if err.is_timeout() => {
                return result.timed_out(format!("{} request to {} : {}", self.method, url, err))
            }
            Err(err) => {
                return result.fail(format!(
                    "{} request to {} failed : {}",
                    self.method, url, err
                ))
            }
        };

        let status = response.status();
        debug!("http check {} got {} from {}", self.config.id, status, url);
        let result = result.with_detail("status", status.as_u16());

        if self.code_check && status.as_u16() != self.code {
            return result.fail(format!(
                "Received status code {}, expected {}",
                status.as_u16(),
                self.code
            ));
        }

        let Some(content) = &self.content else {
            return result.pass();
        };

        match ctx
            .bound(Stage::Executing, HTTP_TIMEOUT, response.text())
            .await
        {
            Ok(body) if content.is_match(&body) => result.pass(),
            Ok(_) => result.fail("Matching content not found"),
            Err(StageError::Failed(err)) if err.is_timeout() => {
                result.timed_out(format!("reading response body : {}", err))
            }
            Err(err) => result.fail(format!("Reading response body failed : {}", err)),
        }
    }

    fn config(&self) -> CheckConfig {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use warp::Filter;

    use super::*;
    use crate::check::Problem;

    fn config() -> CheckConfig {
        CheckConfig::new("team3-web", "Team 3 web", "team3", 1.0)
    }

    fn init(json: &str) -> Result<Definition, CheckError> {
        let mut check = Definition::default();
        check.init(config(), json.as_bytes())?;
        Ok(check)
    }

    fn invalid_field(json: &str) -> String {
        match init(json).unwrap_err() {
            CheckError::Validation(err) => {
                assert!(matches!(err.problem, Problem::Invalid(_)));
                err.field
            }
            other => panic!("unexpected error {}", other),
        }
    }

    async fn web_server() -> u16 {
        let health = warp::get()
            .and(warp::path("health"))
            .map(|| "status: healthy");
        let teapot = warp::path("teapot")
            .map(|| warp::reply::with_status("short and stout", warp::http::StatusCode::IM_A_TEAPOT));
        let search = warp::path("search")
            .and(warp::query::raw())
            .map(|query: String| format!("query: {}", query));
        let slow = warp::path("slow").and_then(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, warp::Rejection>("late")
        });

        let (addr, server) =
            warp::serve(health.or(teapot).or(search).or(slow)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr.port()
    }

    async fn run(check: &Definition, timeout: Duration) -> CheckResult {
        check
            .run(
                RunContext::with_timeout(timeout),
                CheckResult::new(&config(), CHECK_TYPE),
            )
            .await
    }

    #[test]
    fn defaults_apply_when_absent() {
        let check = init(r#"{"Host": "www.team3"}"#).unwrap();

        assert_eq!(check.port, 80);
        assert_eq!(check.path, "/");
        assert_eq!(check.method, Method::GET);
        assert!(check.code_check);
        assert_eq!(check.code, 200);
        assert!(!check.verify_certificate);
        assert_eq!(
            check.url.as_ref().map(Url::as_str),
            Some("http://www.team3/")
        );
    }

    #[test]
    fn query_string_is_kept() {
        let check = init(r#"{"Host": "www.team3", "Path": "/search?q=rust&page=2"}"#).unwrap();

        assert_eq!(
            check.url.as_ref().map(Url::as_str),
            Some("http://www.team3/search?q=rust&page=2")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(invalid_field(r#"{"Host": "www", "Verb": "FETCH"}"#), "Verb");
        assert_eq!(invalid_field(r#"{"Host": "www", "Code": 42}"#), "Code");
        assert_eq!(invalid_field(r#"{"Host": "www", "Port": 0}"#), "Port");
        assert_eq!(
            invalid_field(r#"{"Host": "www", "MatchContent": true, "ContentRegex": "[a-"}"#),
            "ContentRegex"
        );
    }

    #[tokio::test]
    async fn healthy_page_passes() {
        let port = web_server().await;
        let check = init(&format!(
            r#"{{"Host": "127.0.0.1", "Port": {}, "Path": "/health", "MatchContent": true, "ContentRegex": "healthy$"}}"#,
            port
        ))
        .unwrap();

        let result = run(&check, Duration::from_secs(5)).await;

        assert!(result.passed(), "{}", result.message());
        assert_eq!(result.details().unwrap()["status"], "200");
    }

    #[tokio::test]
    async fn query_reaches_server() {
        let port = web_server().await;
        let check = init(&format!(
            r#"{{"Host": "127.0.0.1", "Port": {}, "Path": "/search?team=3&service=web", "MatchContent": true, "ContentRegex": "^query: team=3&service=web$"}}"#,
            port
        ))
        .unwrap();

        let result = run(&check, Duration::from_secs(5)).await;

        assert!(result.passed(), "{}", result.message());
    }

    #[tokio::test]
    async fn unexpected_status_fails() {
        let port = web_server().await;
        let check = init(&format!(
            r#"{{"Host": "127.0.0.1", "Port": {}, "Path": "/teapot"}}"#,
            port
        ))
        .unwrap();

        let result = run(&check, Duration::from_secs(5)).await;
        assert_eq!(result.message(), "Received status code 418, expected 200");

        let relaxed = init(&format!(
            r#"{{"Host": "127.0.0.1", "Port": {}, "Path": "/teapot", "CodeCheck": false}}"#,
            port
        ))
        .unwrap();
        assert!(run(&relaxed, Duration::from_secs(5)).await.passed());
    }

    #[tokio::test]
    async fn body_mismatch_fails() {
        let port = web_server().await;
        let check = init(&format!(
            r#"{{"Host": "127.0.0.1", "Port": {}, "Path": "/health", "MatchContent": true, "ContentRegex": "degraded"}}"#,
            port
        ))
        .unwrap();

        let result = run(&check, Duration::from_secs(5)).await;
        assert_eq!(result.message(), "Matching content not found");
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let port = web_server().await;
        let check = init(&format!(
            r#"{{"Host": "127.0.0.1", "Port": {}, "Path": "/slow"}}"#,
            port
        ))
        .unwrap();

        let result = run(&check, Duration::from_millis(200)).await;
        assert!(result.is_timeout(), "{}", result.message());
    }
}
