use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    None,
    Basic,
    Bearer,
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::None
    }
}

/// Optional credentials are true options: an absent password and an empty
/// password are different things.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl Auth {
    pub fn validate(&self) -> Result<()> {
        match self.auth_type {
            AuthType::None => Ok(()),
            AuthType::Basic => {
                if self.username.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::EmptyUsername);
                }
                if self.password.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::EmptyPassword);
                }
                Ok(())
            }
            AuthType::Bearer => {
                if self.bearer_token.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::EmptyBearerToken);
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpJob {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Empty means "any 2xx is a success".
    #[serde(default)]
    pub valid_response_codes: Vec<u16>,
    #[serde(default)]
    pub auth: Auth,
}

impl HttpJob {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::EmptyHttpJobUrl);
        }
        if self.method.trim().is_empty() {
            return Err(Error::EmptyHttpJobMethod);
        }
        self.auth.validate()
    }

    /// Drop every credential field, keeping the auth type.
    pub fn remove_credentials(&mut self) {
        self.auth.username = None;
        self.auth.password = None;
        self.auth.bearer_token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> HttpJob {
        HttpJob {
            url: "https://example.com".into(),
            method: "GET".into(),
            headers: HashMap::new(),
            body: None,
            valid_response_codes: vec![],
            auth: Auth::default(),
        }
    }

    #[test]
    fn valid_without_auth() {
        assert!(base_job().validate().is_ok());
    }

    #[test]
    fn empty_url_and_method_rejected() {
        let mut job = base_job();
        job.url = " ".into();
        assert!(matches!(job.validate(), Err(Error::EmptyHttpJobUrl)));

        let mut job = base_job();
        job.method = "".into();
        assert!(matches!(job.validate(), Err(Error::EmptyHttpJobMethod)));
    }

    #[test]
    fn basic_auth_needs_both_credentials() {
        let mut job = base_job();
        job.auth = Auth {
            auth_type: AuthType::Basic,
            username: Some("user".into()),
            password: None,
            bearer_token: None,
        };
        assert!(matches!(job.validate(), Err(Error::EmptyPassword)));

        job.auth.username = None;
        assert!(matches!(job.validate(), Err(Error::EmptyUsername)));
    }

    #[test]
    fn bearer_auth_needs_token() {
        let mut job = base_job();
        job.auth = Auth {
            auth_type: AuthType::Bearer,
            username: None,
            password: None,
            bearer_token: Some("".into()),
        };
        assert!(matches!(job.validate(), Err(Error::EmptyBearerToken)));
    }

    #[test]
    fn remove_credentials_blanks_all_secret_fields() {
        let mut job = base_job();
        job.auth = Auth {
            auth_type: AuthType::Bearer,
            username: Some("username123".into()),
            password: Some("password123".into()),
            bearer_token: Some("imabearertoken123".into()),
        };
        job.remove_credentials();
        assert_eq!(job.auth.auth_type, AuthType::Bearer);
        assert_eq!(job.auth.username, None);
        assert_eq!(job.auth.password, None);
        assert_eq!(job.auth.bearer_token, None);
    }
}
