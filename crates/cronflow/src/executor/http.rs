use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::model::{AuthType, HttpJob, Job};

use super::Executor;

pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(&self, http: &HttpJob) -> Result<reqwest::Request> {
        let method = reqwest::Method::from_bytes(http.method.as_bytes())
            .map_err(|_| Error::EmptyHttpJobMethod)?;

        let mut builder = self.client.request(method, normalize_url(&http.url));

        for (name, value) in &http.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = &http.body {
            builder = builder.body(body.clone());
        }

        builder = match http.auth.auth_type {
            AuthType::None => builder,
            AuthType::Basic => builder.basic_auth(
                http.auth.username.as_deref().unwrap_or(""),
                http.auth.password.as_deref(),
            ),
            AuthType::Bearer => {
                builder.bearer_auth(http.auth.bearer_token.as_deref().unwrap_or(""))
            }
        };

        builder
            .build()
            .map_err(|e| Error::Other(anyhow::Error::from(e)))
    }
}

fn normalize_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Empty whitelist means "any 2xx".
fn valid_response_code(code: u16, valid: &[u16]) -> bool {
    if valid.is_empty() {
        (200..300).contains(&code)
    } else {
        valid.contains(&code)
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, ctx: &CancellationToken, job: &Job) -> Result<()> {
        let http = job.http_job.as_ref().ok_or(Error::HttpJobNotDefined)?;
        let request = self.build_request(http)?;

        let response = tokio::select! {
            res = self.client.execute(request) => {
                res.map_err(|e| Error::Other(anyhow::Error::from(e)))?
            }
            _ = ctx.cancelled() => return Err(Error::Canceled),
        };

        let code = response.status().as_u16();

        // Drain the body regardless of the verdict so the connection can be
        // reused.
        let _ = response.bytes().await;

        if !valid_response_code(code, &http.valid_response_codes) {
            return Err(Error::InvalidResponseCode(code));
        }

        Ok(())
    }
}
