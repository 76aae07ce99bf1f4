//! Annotation endpoints.
//!
//! Reads go through the job-scoped image routes, one per geometry
//! collection. Writes use the collection routes, addressed by backend id
//! once the server has assigned one.

use async_trait::async_trait;
use labelsync_core::annotation::AnnotationPayload;
use labelsync_core::classifier::SyncOperation;
use labelsync_core::geometry::GeometryKind;
use labelsync_core::remote::{ImageAnnotations, RemoteAnnotation};
use labelsync_core::types::{BackendId, JobId, JobImageId};
use labelsync_engine::{AnnotationSource, RemoteError};
use reqwest::Method;
use serde::Serialize;

use crate::client::{ApiClient, RemoteApiError};

/// Create body: the payload plus the job image it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRequest<'a> {
    pub image_id: JobImageId,
    #[serde(flatten)]
    pub payload: &'a AnnotationPayload,
}

/// Update body, addressed by backend id in bulk requests.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest<'a> {
    pub id: BackendId,
    #[serde(flatten)]
    pub payload: &'a AnnotationPayload,
}

#[derive(Debug, Serialize)]
struct BulkItems<T> {
    items: Vec<T>,
}

#[derive(Debug, Serialize)]
struct BulkDelete {
    ids: Vec<BackendId>,
}

/// What the server returned for one dispatched operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Created(RemoteAnnotation),
    Updated(RemoteAnnotation),
    Deleted,
}

#[derive(Debug, Clone)]
pub struct AnnotationApi {
    api: ApiClient,
}

impl AnnotationApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    // ---- reads ----

    /// `GET /api/jobs/{job}/images/{image}/{collection}`
    pub async fn list(
        &self,
        job_id: JobId,
        image_id: JobImageId,
        kind: GeometryKind,
    ) -> Result<Vec<RemoteAnnotation>, RemoteApiError> {
        let response = self
            .api
            .request(Method::GET, &image_collection_path(job_id, image_id, kind))
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }

    /// Both collections of one image, fetched concurrently.
    pub async fn image(&self, job_id: JobId, image_id: JobImageId) -> Result<ImageAnnotations, RemoteApiError> {
        let (detections, segmentations) = futures::try_join!(
            self.list(job_id, image_id, GeometryKind::Detection),
            self.list(job_id, image_id, GeometryKind::Segmentation),
        )?;
        Ok(ImageAnnotations {
            detections,
            segmentations,
        })
    }

    // ---- single writes ----

    /// `POST /api/jobs/{job}/images/{image}/{collection}`
    pub async fn create(
        &self,
        job_id: JobId,
        image_id: JobImageId,
        payload: &AnnotationPayload,
    ) -> Result<RemoteAnnotation, RemoteApiError> {
        let kind = payload.geometry.kind();
        let response = self
            .api
            .request(Method::POST, &image_collection_path(job_id, image_id, kind))
            .json(&CreateRequest { image_id, payload })
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }

    /// `PATCH /api/{collection}/{id}`
    pub async fn update(
        &self,
        backend_id: BackendId,
        payload: &AnnotationPayload,
    ) -> Result<RemoteAnnotation, RemoteApiError> {
        let path = format!("{}/{backend_id}", collection_path(payload.geometry.kind()));
        let response = self
            .api
            .request(Method::PATCH, &path)
            .json(payload)
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }

    /// `DELETE /api/{collection}/{id}`
    pub async fn delete(&self, backend_id: BackendId, kind: GeometryKind) -> Result<(), RemoteApiError> {
        let path = format!("{}/{backend_id}", collection_path(kind));
        let response = self.api.request(Method::DELETE, &path).send().await?;
        ApiClient::check_status(response).await
    }

    /// Send one classified operation to its endpoint.
    pub async fn apply(&self, job_id: JobId, op: &SyncOperation) -> Result<Applied, RemoteApiError> {
        match op {
            SyncOperation::Create {
                job_image_id,
                payload,
                ..
            } => Ok(Applied::Created(
                self.create(job_id, *job_image_id, payload).await?,
            )),
            SyncOperation::Update {
                backend_id,
                payload,
                ..
            } => Ok(Applied::Updated(self.update(*backend_id, payload).await?)),
            SyncOperation::Delete { backend_id, kind } => {
                self.delete(*backend_id, *kind).await?;
                Ok(Applied::Deleted)
            }
        }
    }

    // ---- bulk writes ----

    /// `POST /api/{collection}/bulk`
    pub async fn bulk_create(
        &self,
        kind: GeometryKind,
        items: &[CreateRequest<'_>],
    ) -> Result<Vec<RemoteAnnotation>, RemoteApiError> {
        let response = self
            .api
            .request(Method::POST, &format!("{}/bulk", collection_path(kind)))
            .json(&BulkItems {
                items: items.to_vec(),
            })
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }

    /// `PATCH /api/{collection}/bulk`
    pub async fn bulk_update(
        &self,
        kind: GeometryKind,
        items: &[UpdateRequest<'_>],
    ) -> Result<Vec<RemoteAnnotation>, RemoteApiError> {
        let response = self
            .api
            .request(Method::PATCH, &format!("{}/bulk", collection_path(kind)))
            .json(&BulkItems {
                items: items.to_vec(),
            })
            .send()
            .await?;
        ApiClient::parse_response(response).await
    }

    /// `POST /api/{collection}/bulk-delete`
    pub async fn bulk_delete(&self, kind: GeometryKind, ids: &[BackendId]) -> Result<(), RemoteApiError> {
        let response = self
            .api
            .request(Method::POST, &format!("{}/bulk-delete", collection_path(kind)))
            .json(&BulkDelete { ids: ids.to_vec() })
            .send()
            .await?;
        ApiClient::check_status(response).await
    }

    /// Send a batch of operations using the bulk endpoints, one request per
    /// collection and verb.
    ///
    /// Requests go out grouped by collection, then creates, updates and
    /// deletes, not in input order. A batch must therefore hold at most one
    /// operation per annotation; coalesce before calling.
    pub async fn apply_batch(&self, ops: &[SyncOperation]) -> Result<BatchResult, RemoteApiError> {
        let plan = BatchPlan::from_operations(ops);
        let mut result = BatchResult::default();
        for kind in [GeometryKind::Detection, GeometryKind::Segmentation] {
            let creates = plan.creates(kind);
            if !creates.is_empty() {
                result.created.extend(self.bulk_create(kind, &creates).await?);
            }
            let updates = plan.updates(kind);
            if !updates.is_empty() {
                result.updated.extend(self.bulk_update(kind, &updates).await?);
            }
            let deletes = plan.deletes(kind);
            if !deletes.is_empty() {
                self.bulk_delete(kind, &deletes).await?;
                result.deleted += deletes.len();
            }
        }
        tracing::debug!(
            created = result.created.len(),
            updated = result.updated.len(),
            deleted = result.deleted,
            "Applied annotation batch",
        );
        Ok(result)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub created: Vec<RemoteAnnotation>,
    pub updated: Vec<RemoteAnnotation>,
    pub deleted: usize,
}

/// Operations of a batch grouped by collection and verb, in input order.
#[derive(Debug, Default)]
pub struct BatchPlan<'a> {
    ops: Vec<&'a SyncOperation>,
}

impl<'a> BatchPlan<'a> {
    pub fn from_operations(ops: &'a [SyncOperation]) -> Self {
        Self {
            ops: ops.iter().collect(),
        }
    }

    pub fn creates(&self, kind: GeometryKind) -> Vec<CreateRequest<'a>> {
        self.ops
            .iter()
            .filter(|op| op.kind() == kind)
            .filter_map(|op| match op {
                SyncOperation::Create {
                    job_image_id,
                    payload,
                    ..
                } => Some(CreateRequest {
                    image_id: *job_image_id,
                    payload,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self, kind: GeometryKind) -> Vec<UpdateRequest<'a>> {
        self.ops
            .iter()
            .filter(|op| op.kind() == kind)
            .filter_map(|op| match op {
                SyncOperation::Update {
                    backend_id,
                    payload,
                    ..
                } => Some(UpdateRequest {
                    id: *backend_id,
                    payload,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self, kind: GeometryKind) -> Vec<BackendId> {
        self.ops
            .iter()
            .filter(|op| op.kind() == kind)
            .filter_map(|op| match op {
                SyncOperation::Delete { backend_id, .. } => Some(*backend_id),
                _ => None,
            })
            .collect()
    }
}

/// `/api/{collection}`
pub fn collection_path(kind: GeometryKind) -> String {
    format!("/api/{}", kind.collection())
}

/// `/api/jobs/{job}/images/{image}/{collection}`
pub fn image_collection_path(job_id: JobId, image_id: JobImageId, kind: GeometryKind) -> String {
    format!("/api/jobs/{job_id}/images/{}/{}", image_id.0, kind.collection())
}

#[async_trait]
impl AnnotationSource for AnnotationApi {
    async fn fetch_annotations(
        &self,
        job_id: JobId,
        image_id: JobImageId,
    ) -> Result<ImageAnnotations, RemoteError> {
        Ok(self.image(job_id, image_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelsync_core::geometry::{BoundingBox, Geometry, Point, Polygon};
    use labelsync_core::types::EphemeralId;
    use serde_json::json;

    fn payload(id: &str, geometry: Geometry) -> AnnotationPayload {
        AnnotationPayload {
            client_annotation_id: EphemeralId::new(id),
            label_id: 3,
            geometry,
            attributes: serde_json::Map::new(),
            image_width: 640,
            image_height: 480,
        }
    }

    fn detection() -> Geometry {
        Geometry::Detection(BoundingBox::new(0.1, 0.2, 0.3, 0.4))
    }

    fn segmentation() -> Geometry {
        Geometry::Segmentation(Polygon {
            points: vec![Point::new(0.1, 0.1), Point::new(0.2, 0.1), Point::new(0.2, 0.2)],
        })
    }

    // -- paths ---------------------------------------------------------------

    #[test]
    fn paths_follow_collection_names() {
        assert_eq!(collection_path(GeometryKind::Detection), "/api/detections");
        assert_eq!(
            image_collection_path(7, JobImageId(12), GeometryKind::Segmentation),
            "/api/jobs/7/images/12/segmentations"
        );
    }

    // -- bodies --------------------------------------------------------------

    #[test]
    fn create_body_flattens_payload() {
        let payload = payload("a1", detection());
        let body = serde_json::to_value(CreateRequest {
            image_id: JobImageId(12),
            payload: &payload,
        })
        .unwrap();

        assert_eq!(body["image_id"], 12);
        assert_eq!(body["client_annotation_id"], "a1");
        assert_eq!(body["label_id"], 3);
        assert_eq!(body["geometry"]["kind"], "detection");
        assert_eq!(body["image_width"], 640);
    }

    #[test]
    fn batch_plan_groups_by_collection_and_verb() {
        let ops = vec![
            SyncOperation::Create {
                ephemeral_id: EphemeralId::new("a1"),
                job_image_id: JobImageId(1),
                payload: payload("a1", detection()),
            },
            SyncOperation::Update {
                backend_id: 40,
                job_image_id: JobImageId(1),
                payload: payload("a2", segmentation()),
            },
            SyncOperation::Delete {
                backend_id: 41,
                kind: GeometryKind::Detection,
            },
            SyncOperation::Create {
                ephemeral_id: EphemeralId::new("a3"),
                job_image_id: JobImageId(2),
                payload: payload("a3", detection()),
            },
        ];
        let plan = BatchPlan::from_operations(&ops);

        let creates = plan.creates(GeometryKind::Detection);
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[1].image_id, JobImageId(2));
        assert!(plan.creates(GeometryKind::Segmentation).is_empty());
        assert_eq!(plan.updates(GeometryKind::Segmentation)[0].id, 40);
        assert_eq!(plan.deletes(GeometryKind::Detection), vec![41]);

        let body = serde_json::to_value(BulkDelete {
            ids: plan.deletes(GeometryKind::Detection),
        })
        .unwrap();
        assert_eq!(body, json!({ "ids": [41] }));
    }

    // -- decoding ------------------------------------------------------------

    #[test]
    fn decodes_server_annotation() {
        let raw = json!({
            "id": 55,
            "image_id": 12,
            "label_id": 3,
            "geometry": { "kind": "detection", "x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4 },
            "client_annotation_id": "a1",
            "created_at": "2026-03-01T10:00:00Z"
        });
        let annotation: RemoteAnnotation = serde_json::from_value(raw).unwrap();

        assert_eq!(annotation.id, 55);
        assert_eq!(annotation.image_id, JobImageId(12));
        assert_eq!(annotation.geometry, detection());
        assert_eq!(annotation.client_annotation_id, Some(EphemeralId::new("a1")));
        assert!(annotation.attributes.is_empty());
        assert!(annotation.updated_at.is_none());
    }
}
