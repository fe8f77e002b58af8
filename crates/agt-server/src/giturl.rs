//! Derive browsable HTTPS URLs from stored `git_repo` values.
//!
//! Three hosts are recognized (github.com, gitlab.com, bitbucket.org) in
//! both SSH and HTTPS forms; anything else derives to `None`. The commit
//! path segment differs per platform.

/// Hosting platform recognized for URL derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Github,
    Gitlab,
    Bitbucket,
}

impl Platform {
    fn from_host(host: &str) -> Option<Self> {
        match host {
            "github.com" => Some(Platform::Github),
            "gitlab.com" => Some(Platform::Gitlab),
            "bitbucket.org" => Some(Platform::Bitbucket),
            _ => None,
        }
    }

    fn host(&self) -> &'static str {
        match self {
            Platform::Github => "github.com",
            Platform::Gitlab => "gitlab.com",
            Platform::Bitbucket => "bitbucket.org",
        }
    }

    fn commit_segment(&self) -> &'static str {
        match self {
            Platform::Github => "commit",
            Platform::Gitlab => "-/commit",
            Platform::Bitbucket => "commits",
        }
    }
}

/// Parse a repo reference into (platform, owner/name path).
///
/// Accepted forms:
/// - `https://github.com/a/b` (also `http://`, optional `.git`, trailing `/`)
/// - `git@gitlab.com:a/b.git` (scp-like SSH)
/// - `ssh://git@bitbucket.org/a/b.git`
fn parse_repo(repo: &str) -> Option<(Platform, String)> {
    let repo = repo.trim();
    if repo.is_empty() {
        return None;
    }

    let (host, path) = if let Some(rest) = repo
        .strip_prefix("https://")
        .or_else(|| repo.strip_prefix("http://"))
    {
        rest.split_once('/')?
    } else if let Some(rest) = repo.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map(|(_, r)| r).unwrap_or(rest);
        rest.split_once('/')?
    } else if let Some(rest) = repo.split_once('@').and_then(|(user, rest)| {
        // scp-like: user@host:path
        if user.is_empty() || user.contains('/') {
            None
        } else {
            Some(rest)
        }
    }) {
        rest.split_once(':')?
    } else {
        return None;
    };

    let platform = Platform::from_host(host)?;

    let path = path
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .trim_matches('/');
    if path.is_empty() || !path.contains('/') {
        return None;
    }

    Some((platform, path.to_string()))
}

/// Canonical HTTPS URL of the repository, or `None` for unknown hosts.
pub fn repo_url(git_repo: &str) -> Option<String> {
    let (platform, path) = parse_repo(git_repo)?;
    Some(format!("https://{}/{}", platform.host(), path))
}

/// Canonical HTTPS URL of one commit, or `None` for unknown hosts.
pub fn commit_url(git_repo: &str, commit_hash: &str) -> Option<String> {
    if commit_hash.is_empty() {
        return None;
    }
    let (platform, path) = parse_repo(git_repo)?;
    Some(format!(
        "https://{}/{}/{}/{}",
        platform.host(),
        path,
        platform.commit_segment(),
        commit_hash
    ))
}
