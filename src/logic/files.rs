use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::warn;

use crate::model::{
    ChangedRepository, DiffAction, FileDiffElement, GitDiffNamesOnlyRequest,
    GitDiffNamesOnlyResponse, Id,
};

/// Collaborator that answers "which files differ between these two commits"
/// for one repository. Implementations talk to a git agent; tests stub it.
#[async_trait]
pub trait RepositoryDiffClient: Send + Sync {
    async fn diff_names_only(
        &self,
        request: GitDiffNamesOnlyRequest,
    ) -> Result<GitDiffNamesOnlyResponse>;
}

/// File-level changes per branch, plus the repositories whose diff could
/// not be fetched. A skipped repository degrades the report, it does not
/// fail it.
#[derive(Debug, Default)]
pub struct FileDiffReport {
    pub files: HashMap<String, Vec<FileDiffElement>>,
    pub skipped_repositories: Vec<Id>,
}

/// Fans one names-only diff request per changed repository out to the
/// client concurrently and folds the answers into a single report.
pub struct FileDiffer {
    client: Arc<dyn RepositoryDiffClient>,
}

impl FileDiffer {
    pub fn new(client: Arc<dyn RepositoryDiffClient>) -> Self {
        Self { client }
    }

    pub async fn diff_files(&self, repositories: Vec<ChangedRepository>) -> FileDiffReport {
        let mut handles = Vec::with_capacity(repositories.len());
        for repository in repositories {
            let client = Arc::clone(&self.client);
            handles.push(tokio::spawn(async move {
                let request = GitDiffNamesOnlyRequest {
                    repository_id: repository.repository_id.clone(),
                    repository_name: repository.repository_name.clone(),
                    repository_kind: repository.repository_kind.clone(),
                    first_commit: repository.first_commit.clone(),
                    second_commit: repository.second_commit.clone(),
                };
                let response = client.diff_names_only(request).await;
                (repository, response)
            }));
        }

        let mut report = FileDiffReport::default();
        for handle in handles {
            let Ok((repository, response)) = handle.await else {
                continue;
            };
            match response {
                Ok(diff) => fold_repository_diff(&mut report, &repository, diff),
                Err(err) => {
                    warn!(
                        "skipping repository '{}' ({}): diff request failed: {err:#}",
                        repository.repository_name, repository.repository_id
                    );
                    report.skipped_repositories.push(repository.repository_id);
                }
            }
        }
        report
    }
}

fn fold_repository_diff(
    report: &mut FileDiffReport,
    repository: &ChangedRepository,
    diff: GitDiffNamesOnlyResponse,
) {
    let elements = report.files.entry(repository.branch.clone()).or_default();
    for (locations, action) in [
        (diff.files_changed, DiffAction::Updated),
        (diff.files_added, DiffAction::Added),
        (diff.files_removed, DiffAction::Removed),
    ] {
        for location in locations {
            elements.push(FileDiffElement {
                branch: repository.branch.clone(),
                repository: repository.repository_id.clone(),
                location,
                action,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    struct StubClient {
        fail_for: Option<String>,
    }

    #[async_trait]
    impl RepositoryDiffClient for StubClient {
        async fn diff_names_only(
            &self,
            request: GitDiffNamesOnlyRequest,
        ) -> Result<GitDiffNamesOnlyResponse> {
            if self.fail_for.as_deref() == Some(request.repository_id.as_str()) {
                return Err(anyhow!("agent unreachable"));
            }
            Ok(GitDiffNamesOnlyResponse {
                files_changed: vec![format!("{}/config.yml", request.repository_name)],
                files_added: vec![format!("{}/new.yml", request.repository_name)],
                files_removed: vec![],
            })
        }
    }

    fn repository(id: &str, name: &str) -> ChangedRepository {
        ChangedRepository {
            repository_id: id.to_string(),
            repository_name: name.to_string(),
            repository_kind: "CoreRepository".to_string(),
            branch: "branch1".to_string(),
            first_commit: "aaa".to_string(),
            second_commit: "bbb".to_string(),
        }
    }

    #[tokio::test]
    async fn test_file_diff_folds_per_branch() {
        let differ = FileDiffer::new(Arc::new(StubClient { fail_for: None }));
        let report = differ
            .diff_files(vec![repository("r1", "infra"), repository("r2", "tools")])
            .await;

        assert!(report.skipped_repositories.is_empty());
        let elements = &report.files["branch1"];
        assert_eq!(elements.len(), 4);
        assert!(elements
            .iter()
            .any(|e| e.location == "infra/config.yml" && e.action == DiffAction::Updated));
        assert!(elements
            .iter()
            .any(|e| e.location == "tools/new.yml" && e.action == DiffAction::Added));
    }

    #[tokio::test]
    async fn test_failed_repository_is_skipped_not_fatal() {
        let differ = FileDiffer::new(Arc::new(StubClient {
            fail_for: Some("r1".to_string()),
        }));
        let report = differ
            .diff_files(vec![repository("r1", "infra"), repository("r2", "tools")])
            .await;

        assert_eq!(report.skipped_repositories, vec!["r1".to_string()]);
        assert_eq!(report.files["branch1"].len(), 2);
    }
}
