//! FetchJob - claim した job を実行するための descriptor を組み立てる
//!
//! # フロー
//! 1. (site, id) で job レコードを引く
//! 2. build script を取得して base64 エンコード
//! 3. 報告用の credential を発行
//! 4. image を選び、site ごとの報告先 URL を付ける

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, instrument};

use crate::config::JobBoardConfig;
use crate::domain::{FetchJobError, FetchJobRequest, JobDescriptor, JobId, JobScript};
use crate::ports::{
    CredentialIssuer, DefaultImageAssigner, ImageAssigner, JobMetadataSource, JobScriptFetcher,
};

pub const SCRIPT_NAME: &str = "main";
pub const SCRIPT_ENCODING: &str = "base64";

pub struct FetchJob {
    metadata: Arc<dyn JobMetadataSource>,
    scripts: Arc<dyn JobScriptFetcher>,
    credentials: Arc<dyn CredentialIssuer>,
    images: Arc<dyn ImageAssigner>,
    config: JobBoardConfig,
}

impl FetchJob {
    pub fn new(
        metadata: Arc<dyn JobMetadataSource>,
        scripts: Arc<dyn JobScriptFetcher>,
        credentials: Arc<dyn CredentialIssuer>,
        config: JobBoardConfig,
    ) -> Self {
        Self {
            metadata,
            scripts,
            credentials,
            images: Arc::new(DefaultImageAssigner::default()),
            config,
        }
    }

    pub fn with_image_assigner(mut self, images: Arc<dyn ImageAssigner>) -> Self {
        self.images = images;
        self
    }

    /// `Ok(None)` when the request is incomplete or no such job exists.
    #[instrument(skip_all, fields(site = %request.site, job_id = %request.job_id), err)]
    pub async fn fetch(
        &self,
        request: FetchJobRequest,
    ) -> Result<Option<JobDescriptor>, FetchJobError> {
        if request.job_id.is_empty() || request.site.is_empty() {
            return Ok(None);
        }
        let job_id = JobId::new(request.job_id);
        let site = request.site;

        let Some(job) = self.metadata.lookup(&site, &job_id).await? else {
            debug!("no job record");
            return Ok(None);
        };

        let urls = self
            .config
            .site_urls(&site)
            .ok_or_else(|| FetchJobError::MissingSiteConfig { site: site.clone() })?;

        let script = self.scripts.fetch(&job).await?;
        let jwt = self.credentials.issue(&site, &job_id).await?;
        let image_name = self.images.assign(&job);

        Ok(Some(JobDescriptor {
            id: job.id,
            site,
            data: job.data,
            job_script: JobScript {
                name: SCRIPT_NAME.to_string(),
                encoding: SCRIPT_ENCODING.to_string(),
                content: STANDARD.encode(script),
            },
            job_state_url: urls.job_state_url.clone(),
            log_parts_url: urls.log_parts_url.clone(),
            jwt,
            image_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CollaboratorError, JobMetadata};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Records;

    #[async_trait]
    impl JobMetadataSource for Records {
        async fn lookup(
            &self,
            site: &str,
            job_id: &JobId,
        ) -> Result<Option<JobMetadata>, CollaboratorError> {
            if job_id.as_str() == "404" {
                return Ok(None);
            }
            Ok(Some(JobMetadata {
                id: job_id.clone(),
                site: site.to_string(),
                data: json!({ "repo": "owner/name", "number": 7 }),
            }))
        }
    }

    struct Scripts;

    #[async_trait]
    impl JobScriptFetcher for Scripts {
        async fn fetch(&self, job: &JobMetadata) -> Result<String, CollaboratorError> {
            Ok(format!("echo {}", job.id))
        }
    }

    #[derive(Default)]
    struct Tokens {
        issued: AtomicUsize,
        broken: bool,
    }

    #[async_trait]
    impl CredentialIssuer for Tokens {
        async fn issue(&self, site: &str, job_id: &JobId) -> Result<String, CollaboratorError> {
            if self.broken {
                return Err(CollaboratorError::new("credentials", "signing key missing"));
            }
            self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(format!("jwt-{site}-{job_id}"))
        }
    }

    struct Fixed(&'static str);

    impl ImageAssigner for Fixed {
        fn assign(&self, _job: &JobMetadata) -> String {
            self.0.to_string()
        }
    }

    fn config() -> JobBoardConfig {
        JobBoardConfig::default().with_site_urls(
            "org",
            "https://org.example/jobs/state",
            "https://org.example/jobs/logs",
        )
    }

    fn fetcher(tokens: Arc<Tokens>) -> FetchJob {
        FetchJob::new(Arc::new(Records), Arc::new(Scripts), tokens, config())
    }

    #[tokio::test]
    async fn builds_descriptor() {
        let descriptor = fetcher(Arc::new(Tokens::default()))
            .fetch(FetchJobRequest::new("42", "org"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            descriptor,
            JobDescriptor {
                id: JobId::from("42"),
                site: "org".to_string(),
                data: json!({ "repo": "owner/name", "number": 7 }),
                job_script: JobScript {
                    name: "main".to_string(),
                    encoding: "base64".to_string(),
                    content: "ZWNobyA0Mg==".to_string(),
                },
                job_state_url: "https://org.example/jobs/state".to_string(),
                log_parts_url: "https://org.example/jobs/logs".to_string(),
                jwt: "jwt-org-42".to_string(),
                image_name: "default".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn custom_image_assigner_is_used() {
        let descriptor = fetcher(Arc::new(Tokens::default()))
            .with_image_assigner(Arc::new(Fixed("ubuntu-jammy")))
            .fetch(FetchJobRequest::new("1", "org"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.image_name, "ubuntu-jammy");
    }

    #[tokio::test]
    async fn incomplete_requests_yield_nothing() {
        let tokens = Arc::new(Tokens::default());
        let fetch = fetcher(Arc::clone(&tokens));

        assert!(fetch.fetch(FetchJobRequest::new("", "org")).await.unwrap().is_none());
        assert!(fetch.fetch(FetchJobRequest::new("42", "")).await.unwrap().is_none());
        assert_eq!(tokens.issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_job_yields_nothing_and_issues_no_token() {
        let tokens = Arc::new(Tokens::default());
        let descriptor = fetcher(Arc::clone(&tokens))
            .fetch(FetchJobRequest::new("404", "org"))
            .await
            .unwrap();
        assert!(descriptor.is_none());
        assert_eq!(tokens.issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconfigured_site_is_an_error() {
        let err = fetcher(Arc::new(Tokens::default()))
            .fetch(FetchJobRequest::new("42", "com"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchJobError::MissingSiteConfig { site } if site == "com"));
    }

    #[tokio::test]
    async fn collaborator_failure_propagates() {
        let tokens = Arc::new(Tokens {
            broken: true,
            ..Tokens::default()
        });
        let err = fetcher(tokens)
            .fetch(FetchJobRequest::new("42", "org"))
            .await
            .unwrap_err();
        match err {
            FetchJobError::Collaborator(e) => assert_eq!(e.collaborator, "credentials"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
