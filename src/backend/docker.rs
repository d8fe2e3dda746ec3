//! Docker Engine backend
//!
//! Each step is an ordinary `docker build` of a one-stage Dockerfile whose
//! `FROM` is the previous step's image id, so every step commits exactly one
//! image on top of its parent and the daemon's own layer cache still applies.

use super::{
    BackendError, ImageBackend, ImageDetails, PullPolicy, ResolvedImage, StepOutput, StepRequest,
};
use crate::context::DOCKERFILE_NAME;
use crate::recipe::ImageRef;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, CreateImageOptions, TagImageOptions};
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info, instrument, warn};

pub const CACHE_KEY_LABEL: &str = "io.boxwright.cache-key";
pub const STAGE_LABEL: &str = "io.boxwright.stage";

pub struct DockerBackend {
    docker: Docker,
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn engine_error(err: DockerError) -> BackendError {
    match err {
        DockerError::DockerResponseServerError { message, .. } => BackendError::Engine(message),
        other => BackendError::Engine(other.to_string()),
    }
}

impl DockerBackend {
    /// Connects using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), BackendError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    async fn pull(&self, reference: &ImageRef) -> Result<(), BackendError> {
        let options = match reference.digest() {
            Some(_) => CreateImageOptions {
                from_image: reference.to_string(),
                ..Default::default()
            },
            None => CreateImageOptions {
                from_image: reference.name(),
                tag: reference.tag_or_default().to_string(),
                ..Default::default()
            },
        };

        info!("Pulling base image {}", reference);
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("{}", status);
                    }
                }
                Err(e) if is_not_found(&e) => {
                    return Err(BackendError::ImageNotFound(reference.to_string()))
                }
                Err(e) => return Err(engine_error(e)),
            }
        }
        Ok(())
    }

    /// Copies `path` out of a throwaway container created from `image`
    async fn copy_out(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let name = format!("boxwright-inspect-{}", uuid::Uuid::new_v4().simple());
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(image.to_string()),
                    cmd: Some(vec!["/bin/true".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .map_err(engine_error)?;

        let mut archive = Vec::new();
        let mut stream = self.docker.download_from_container(
            &container.id,
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );
        let mut result = Ok(true);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) if is_not_found(&e) => {
                    result = Ok(false);
                    break;
                }
                Err(e) => {
                    result = Err(engine_error(e));
                    break;
                }
            }
        }
        drop(stream);

        if let Err(e) = self
            .docker
            .remove_container(
                &container.id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!("Failed to remove helper container {}: {}", name, e);
        }

        Ok(result?.then_some(archive))
    }
}

#[async_trait]
impl ImageBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    #[instrument(skip(self), fields(reference = %reference))]
    async fn resolve(
        &self,
        reference: &ImageRef,
        policy: PullPolicy,
    ) -> Result<ResolvedImage, BackendError> {
        let target = reference.to_string();
        let present = self.image_exists(&target).await?;

        let pulled = match (policy, present) {
            (PullPolicy::Always, _) | (PullPolicy::Missing, false) => {
                self.pull(reference).await?;
                true
            }
            (PullPolicy::Never, false) => {
                return Err(BackendError::ImageNotFound(format!(
                    "{} (not present locally and pull policy is 'never')",
                    target
                )))
            }
            (_, true) => false,
        };

        let details = self.inspect(&target).await?;
        Ok(ResolvedImage {
            reference: target,
            id: details.id,
            pulled,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(engine_error(e)),
        }
    }

    #[instrument(skip(self))]
    async fn read_file(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let archive = match self.copy_out(image, path).await? {
            Some(archive) => archive,
            None => return Ok(None),
        };

        let mut tar = tar::Archive::new(archive.as_slice());
        for entry in tar.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents)?;
                return Ok(Some(contents));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, request), fields(stage = %request.stage, parent = %request.parent))]
    async fn build_step(&self, request: StepRequest) -> Result<StepOutput, BackendError> {
        let mut labels = HashMap::new();
        labels.insert(CACHE_KEY_LABEL.to_string(), request.cache_key.clone());
        labels.insert(STAGE_LABEL.to_string(), request.stage.as_str().to_string());

        let options = BuildImageOptions {
            dockerfile: DOCKERFILE_NAME.to_string(),
            rm: true,
            forcerm: true,
            nocache: request.no_cache,
            labels,
            ..Default::default()
        };

        let context = Bytes::from(request.context);
        debug!(bytes = context.len(), "Sending build context");
        let mut stream = self.docker.build_image(options, None, Some(context));

        let mut log = Vec::new();
        let mut image_id = None;
        let mut used_cache = false;
        let mut executed = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(id) = info.aux.and_then(|aux| aux.id) {
                        image_id = Some(id);
                    }
                    if let Some(line) = info.stream {
                        let line = line.trim_end();
                        if !line.is_empty() {
                            debug!("{}", line);
                            used_cache |= line.contains("Using cache");
                            executed |= line.contains("Running in");
                            log.push(line.to_string());
                        }
                    }
                    let failure = info
                        .error_detail
                        .and_then(|detail| detail.message)
                        .or(info.error);
                    if let Some(message) = failure {
                        return Err(BackendError::StepFailed { message, log });
                    }
                }
                Err(e) => {
                    return Err(BackendError::StepFailed {
                        message: e.to_string(),
                        log,
                    })
                }
            }
        }

        let image_id = image_id.ok_or_else(|| BackendError::StepFailed {
            message: "engine did not report an image id".to_string(),
            log: log.clone(),
        })?;

        Ok(StepOutput {
            image_id,
            cached: used_cache && !executed,
            log,
        })
    }

    #[instrument(skip(self))]
    async fn tag(&self, image: &str, tag: &str) -> Result<(), BackendError> {
        let target = ImageRef::parse(tag).map_err(|e| BackendError::Engine(e.to_string()))?;
        self.docker
            .tag_image(
                image,
                Some(TagImageOptions {
                    repo: target.name(),
                    tag: target.tag_or_default().to_string(),
                }),
            )
            .await
            .map_err(engine_error)
    }

    async fn inspect(&self, image: &str) -> Result<ImageDetails, BackendError> {
        let inspected = match self.docker.inspect_image(image).await {
            Ok(inspected) => inspected,
            Err(e) if is_not_found(&e) => return Err(BackendError::ImageNotFound(image.to_string())),
            Err(e) => return Err(engine_error(e)),
        };

        let config = inspected.config.unwrap_or_default();
        Ok(ImageDetails {
            id: inspected.id.unwrap_or_else(|| image.to_string()),
            user: config.user.filter(|u| !u.is_empty()),
            working_dir: config.working_dir.filter(|w| !w.is_empty()),
            env: config.env.unwrap_or_default(),
            tags: inspected.repo_tags.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn export_dir(&self, image: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        self.copy_out(image, path)
            .await?
            .ok_or_else(|| BackendError::Engine(format!("{} does not exist in {}", path, image)))
    }
}
