//! Job endpoints: summary, start and paged image listing.

use async_trait::async_trait;
use labelsync_core::remote::{JobImage, JobSummary, Page, PageRequest};
use labelsync_core::types::JobId;
use labelsync_engine::{JobService, RemoteError};
use reqwest::Method;

use crate::client::{ApiClient, RemoteApiError};

#[derive(Debug, Clone)]
pub struct JobApi {
    api: ApiClient,
}

impl JobApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// `GET /api/jobs/{id}`
    pub async fn job(&self, job_id: JobId) -> Result<JobSummary, RemoteApiError> {
        let response = self
            .api
            .request(Method::GET, &job_path(job_id))
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }

    /// `POST /api/jobs/{id}/start`
    pub async fn start(&self, job_id: JobId) -> Result<(), RemoteApiError> {
        let response = self
            .api
            .request(Method::POST, &format!("{}/start", job_path(job_id)))
            .send()
            .await?;
        ApiClient::check_status(response).await
    }

    /// `GET /api/jobs/{id}/images?page=&page_size=`
    pub async fn images(&self, job_id: JobId, page: PageRequest) -> Result<Page<JobImage>, RemoteApiError> {
        let response = self
            .api
            .request(Method::GET, &format!("{}/images", job_path(job_id)))
            .query(&page)
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }
}

fn job_path(job_id: JobId) -> String {
    format!("/api/jobs/{job_id}")
}

#[async_trait]
impl JobService for JobApi {
    async fn get_job(&self, job_id: JobId) -> Result<JobSummary, RemoteError> {
        Ok(self.job(job_id).await?)
    }

    async fn start_job(&self, job_id: JobId) -> Result<(), RemoteError> {
        Ok(self.start(job_id).await?)
    }

    async fn list_job_images(&self, job_id: JobId, page: PageRequest) -> Result<Page<JobImage>, RemoteError> {
        let listing = self.images(job_id, page).await?;
        tracing::debug!(
            job_id,
            page = page.page,
            items = listing.items.len(),
            next_page = listing.next_page,
            "Fetched job image page",
        );
        Ok(listing)
    }
}
