use std::{thread::sleep, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use ureq::{Agent, AgentBuilder, Request, Response};

const USER_AGENT: &str = "groceries/0.1 (store importer)";

/// Statuses worth asking again for.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network { .. } => None,
        }
    }
}

/// Blocking HTTP agent that retries GETs on transient failures.
///
/// A request is attempted once, then up to `retries` more times. Before
/// retry `n` the agent sleeps `backoff_factor * 2^(n-1)` seconds. Other
/// methods are sent exactly once.
#[derive(Clone)]
pub struct RetryAgent {
    agent: Agent,
    retries: u32,
    backoff_factor: f64,
}

impl RetryAgent {
    pub fn new(retries: u32, backoff_factor: f64, timeout: Duration) -> Self {
        let agent = AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            retries,
            backoff_factor,
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.send(self.agent.get(url))
    }

    pub fn send(&self, request: Request) -> Result<Response, FetchError> {
        let url = request.url().to_string();
        let retries = if request.method() == "GET" {
            self.retries
        } else {
            0
        };

        let mut attempt = 0;
        loop {
            let error = match request.clone().call() {
                Ok(response) => return Ok(response),
                Err(error) => classify(&url, error),
            };

            let transient = error.status().map_or(true, |x| RETRY_STATUSES.contains(&x));
            if !transient || attempt >= retries {
                return Err(error);
            }

            attempt += 1;
            let delay = backoff_delay(self.backoff_factor, attempt);
            warn!(%url, attempt, ?delay, "{error}; retrying");
            sleep(delay);
        }
    }

    /// Sends `body` once. Writes are never retried.
    pub fn send_json(&self, request: Request, body: impl Serialize) -> Result<Response, FetchError> {
        let url = request.url().to_string();
        request.send_json(body).map_err(|x| classify(&url, x))
    }
}

fn classify(url: &str, error: ureq::Error) -> FetchError {
    match error {
        ureq::Error::Status(status, _) => FetchError::Status {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => FetchError::Network {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

pub fn backoff_delay(backoff_factor: f64, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(backoff_factor.max(0.0) * 2f64.powi(attempt as i32 - 1))
}
