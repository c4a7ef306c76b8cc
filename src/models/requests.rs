//! Request DTOs for the RPC API
//!
//! Defines the structure of incoming request bodies and queries.

use serde::Deserialize;

/// Identifies the repository a request targets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RepoBase {
    #[serde(rename = "repoUID")]
    pub repo_uid: String,
}

/// Request body for `POST /v1/blob`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetBlobRequest {
    #[serde(default)]
    pub base: Option<RepoBase>,
    #[serde(default)]
    pub sha: String,
    /// Truncate content to this many bytes when positive
    #[serde(default)]
    pub size_limit: i64,
}

/// Query for `GET /v1/last-commit`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GetLastCommitRequest {
    #[serde(rename = "repoUID", default)]
    pub repo_uid: String,
    /// Branch, tag or commit sha to start from
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    /// Path inside the repository, empty for the root
    #[serde(default)]
    pub path: String,
}

/// Checks a repository UID and returns it.
///
/// The UID becomes a directory name under the repository root, so it must not
/// escape it.
pub fn validate_repo_uid(uid: &str) -> Result<&str, String> {
    if uid.is_empty() {
        return Err("repository uid cannot be empty".to_string());
    }
    if uid.contains(['/', '\\']) || uid == "." || uid == ".." {
        return Err(format!("invalid repository uid '{uid}'"));
    }
    Ok(uid)
}

/// Checks a revision or object name taken from the caller.
///
/// These end up on the `git` command line, so a leading `-` would be read as
/// an option.
pub fn validate_revision<'a>(field: &str, rev: &'a str) -> Result<&'a str, String> {
    if rev.is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if rev.starts_with('-') {
        return Err(format!("invalid {field} '{rev}'"));
    }
    Ok(rev)
}

impl GetBlobRequest {
    /// Validates the request data
    ///
    /// Returns the repository UID if the request is complete.
    pub fn validate(&self) -> Result<&str, String> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| "base cannot be empty".to_string())?;
        let uid = validate_repo_uid(&base.repo_uid)?;
        validate_revision("sha", &self.sha)?;
        Ok(uid)
    }
}

impl GetLastCommitRequest {
    pub fn validate(&self) -> Result<&str, String> {
        let uid = validate_repo_uid(&self.repo_uid)?;
        validate_revision("ref", &self.git_ref)?;
        Ok(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_blob_request_deserialize() {
        let json = r#"{"base": {"repoUID": "abc"}, "sha": "deadbeef", "sizeLimit": 100}"#;
        let req: GetBlobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.base.as_ref().unwrap().repo_uid, "abc");
        assert_eq!(req.sha, "deadbeef");
        assert_eq!(req.size_limit, 100);
        assert_eq!(req.validate(), Ok("abc"));
    }

    #[test]
    fn test_get_blob_request_defaults() {
        let req: GetBlobRequest = serde_json::from_str("{}").unwrap();
        assert!(req.base.is_none());
        assert_eq!(req.size_limit, 0);
    }

    #[test]
    fn test_validate_missing_base() {
        let req = GetBlobRequest {
            base: None,
            sha: "deadbeef".to_string(),
            size_limit: 0,
        };
        assert_eq!(req.validate(), Err("base cannot be empty".to_string()));
    }

    #[test]
    fn test_validate_empty_sha() {
        let req = GetBlobRequest {
            base: Some(RepoBase {
                repo_uid: "abc".to_string(),
            }),
            sha: String::new(),
            size_limit: 0,
        };
        assert_eq!(req.validate(), Err("sha cannot be empty".to_string()));
    }

    #[test]
    fn test_validate_repo_uid() {
        assert!(validate_repo_uid("").is_err());
        assert!(validate_repo_uid("..").is_err());
        assert!(validate_repo_uid("a/../b").is_err());
        assert_eq!(validate_repo_uid("space-repo"), Ok("space-repo"));
    }

    #[test]
    fn test_last_commit_request() {
        let req: GetLastCommitRequest =
            serde_json::from_str(r#"{"repoUID": "abc", "ref": "main"}"#).unwrap();
        assert_eq!(req.path, "");
        assert_eq!(req.validate(), Ok("abc"));

        let req = GetLastCommitRequest {
            git_ref: String::new(),
            ..req
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_option_like_revisions_rejected() {
        let req = GetLastCommitRequest {
            repo_uid: "abc".to_string(),
            git_ref: "--output=/tmp/owned".to_string(),
            path: String::new(),
        };
        assert_eq!(
            req.validate(),
            Err("invalid ref '--output=/tmp/owned'".to_string())
        );

        let req = GetBlobRequest {
            base: Some(RepoBase {
                repo_uid: "abc".to_string(),
            }),
            sha: "-p".to_string(),
            size_limit: 0,
        };
        assert_eq!(req.validate(), Err("invalid sha '-p'".to_string()));

        assert_eq!(validate_revision("ref", "feature/-x"), Ok("feature/-x"));
    }
}
