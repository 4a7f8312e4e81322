use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Comma-separated, e.g. `tags=billing,nightly`.
    pub tags: Option<String>,
}

impl ListJobsQuery {
    pub fn tags(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExecutionsQuery {
    pub only_failed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
