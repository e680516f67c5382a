//! Conformance runner.
//!
//! Pushes each dataset to the registry, reads it back, queries tags and
//! referrers, mounts blobs across repositories and deletes everything again,
//! scoring every call in the result tree and the capability matrix.

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use regconform_core::{Capability, CapabilityError, CapabilityMatrix, Dataset, Descriptor, Digest, ResultNode, Status};
use regconform_registry::{Distribution, ManifestUpload, RegistryApi, RegistryClient, RegistryError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::report::Report;

/// Stops a run from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Cancels every in-flight and future call of the run.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Root of the result tree.
    pub root: Arc<ResultNode>,
    /// Report over the tree and the capability matrix.
    pub report: Report,
    /// One line per step that ended in Error.
    pub errors: Vec<String>,
}

impl RunOutcome {
    /// Aggregate status of the run.
    #[must_use]
    pub fn status(&self) -> Status {
        self.root.status()
    }

    /// The collected step errors as one error, if there were any.
    #[must_use]
    pub fn joined_error(&self) -> Option<RunnerError> {
        (!self.errors.is_empty()).then(|| RunnerError::Steps {
            errors: self.errors.clone(),
        })
    }
}

/// Drives datasets through a registry.
pub struct Runner {
    config: RunnerConfig,
    distribution: Distribution,
    matrix: Arc<CapabilityMatrix>,
    cancel: Arc<watch::Sender<bool>>,
    rotation: AtomicUsize,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("registry", &self.config.registry)
            .field("repo1", &self.config.repo1)
            .field("repo2", &self.config.repo2)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner over any [`RegistryApi`].
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] if the configuration is invalid.
    pub fn new(config: RunnerConfig, api: Arc<dyn RegistryApi>) -> Result<Self> {
        config.validate()?;
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            matrix: Arc::new(CapabilityMatrix::new(config.api)),
            distribution: Distribution::new(api),
            config,
            cancel: Arc::new(cancel),
            rotation: AtomicUsize::new(0),
        })
    }

    /// Creates a runner talking HTTP to the configured registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn connect(config: RunnerConfig) -> Result<Self> {
        let client = RegistryClient::new(config.registry_config())?;
        Self::new(config, Arc::new(client))
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The protocol driver.
    #[must_use]
    pub const fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// The capability matrix this runner scores into.
    #[must_use]
    pub const fn matrix(&self) -> &Arc<CapabilityMatrix> {
        &self.matrix
    }

    /// Returns a handle that cancels this runner's calls.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Generates a dataset for every enabled shape.
    ///
    /// With a seed, each shape derives its own seed from it so datasets do
    /// not share random content.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Fixture`] if any dataset cannot be generated.
    pub fn datasets(&self) -> Result<Vec<Dataset>> {
        self.config
            .data
            .shapes()
            .into_iter()
            .map(|shape| {
                let seed = self.config.seed.map(|seed| seed.wrapping_add(shape as u64));
                shape.generate(seed).map_err(RunnerError::from)
            })
            .collect()
    }

    /// Generates the configured datasets and runs them.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Fixture`] before any request is sent if
    /// generation fails. Step errors do not fail the run; they are collected
    /// in [`RunOutcome::errors`].
    pub async fn run(&self) -> Result<RunOutcome> {
        let datasets = self.datasets()?;
        Ok(self.run_datasets(&datasets).await)
    }

    /// Runs the given datasets and builds the report.
    ///
    /// A dataset that fails never stops the ones after it.
    pub async fn run_datasets(&self, datasets: &[Dataset]) -> RunOutcome {
        info!(
            registry = %self.config.registry,
            repo = %self.config.repo1,
            datasets = datasets.len(),
            parallel = self.config.parallel,
            "Starting conformance run"
        );

        let root = ResultNode::root("conformance");
        let errors = Mutex::new(Vec::new());
        let (turn, _) = watch::channel(0usize);
        let plans = plan_cleanup(datasets);

        let runs = datasets.iter().zip(&plans).enumerate().map(|(position, (dataset, plan))| {
            let scope = Scope {
                runner: self,
                dataset,
                plan,
                errors: &errors,
            };
            let root = &root;
            let turn = &turn;
            async move { scope.run(root, position, turn).await }
        });

        if self.config.parallel {
            join_all(runs).await;
        } else {
            for run in runs {
                run.await;
            }
        }

        root.finish();
        let report = Report::build(&root, &self.matrix);
        let errors = errors.into_inner();
        let counts = root.counts();
        info!(
            status = %root.status(),
            passed = counts[Status::Pass],
            failed = counts[Status::Fail],
            errored = counts[Status::Error],
            "Conformance run complete"
        );

        RunOutcome { root, report, errors }
    }

    /// Next upload strategy in the rotation over the enabled ones.
    fn next_strategy(&self) -> Capability {
        let enabled: Vec<Capability> = Capability::UPLOAD_STRATEGIES
            .into_iter()
            .filter(|c| self.matrix.is_enabled(*c))
            .collect();
        let pool = if enabled.is_empty() {
            Capability::UPLOAD_STRATEGIES.to_vec()
        } else {
            enabled
        };
        pool[self.rotation.fetch_add(1, Ordering::Relaxed) % pool.len()]
    }

    /// Bounds `call` by the per-call deadline and the cancellation signal.
    async fn guard<T, F>(&self, operation: &str, call: F) -> std::result::Result<T, RegistryError>
    where
        F: Future<Output = std::result::Result<T, RegistryError>>,
    {
        let mut cancel = self.cancel.subscribe();
        if *cancel.borrow() {
            return Err(RegistryError::Cancelled {
                operation: operation.to_string(),
            });
        }

        let limit = self.config.timeout();
        let bounded = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                    Err(RegistryError::Timeout {
                        operation: operation.to_string(),
                        seconds: limit.as_secs(),
                    })
                }),
                None => call.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            () = cancelled(&mut cancel) => Err(RegistryError::Cancelled {
                operation: operation.to_string(),
            }),
        }
    }

    /// Checks the gate, marking disabled operations in the matrix.
    fn gate(&self, capabilities: &[Capability]) -> std::result::Result<(), CapabilityError> {
        self.matrix.require(capabilities).inspect_err(|err| {
            let CapabilityError::Disabled { operations } = err;
            for op in operations {
                self.matrix.disabled(*op);
            }
        })
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Which of a dataset's blobs it deletes and which it mounts.
#[derive(Debug, Default)]
struct CleanupPlan {
    /// Blobs no later dataset contains.
    delete: HashSet<Digest>,
    /// First blob no other dataset contains.
    mount: Option<Digest>,
}

/// Shared blobs (such as the empty config) are deleted by the last dataset
/// that contains them, after every earlier dataset is done.
fn plan_cleanup(datasets: &[Dataset]) -> Vec<CleanupPlan> {
    let holders = |digest: &Digest| -> Vec<usize> {
        datasets
            .iter()
            .enumerate()
            .filter(|(_, dataset)| dataset.blob(digest).is_some())
            .map(|(position, _)| position)
            .collect()
    };

    datasets
        .iter()
        .enumerate()
        .map(|(position, dataset)| {
            let delete = dataset
                .blob_order()
                .iter()
                .filter(|d| holders(*d).iter().all(|&holder| holder <= position))
                .cloned()
                .collect();
            let mount = dataset
                .blob_order()
                .iter()
                .find(|d| holders(*d) == [position])
                .cloned();
            CleanupPlan { delete, mount }
        })
        .collect()
}

/// One dataset's run.
#[derive(Clone, Copy)]
struct Scope<'a> {
    runner: &'a Runner,
    dataset: &'a Dataset,
    plan: &'a CleanupPlan,
    errors: &'a Mutex<Vec<String>>,
}

impl Scope<'_> {
    fn repo(&self) -> &str {
        &self.runner.config.repo1
    }

    fn registry(&self) -> &Distribution {
        &self.runner.distribution
    }

    fn descriptor(&self, digest: &Digest) -> Option<&Descriptor> {
        self.dataset.descriptor(digest)
    }

    async fn run(self, root: &Arc<ResultNode>, position: usize, turn: &watch::Sender<usize>) {
        let name = self.dataset.name().to_string();
        info!(dataset = %name, "Running dataset");

        let (node, _) = ResultNode::child_run(name.clone(), Some(root), |node| async move {
            self.push_blobs(&node).await;
            self.push_manifests(&node).await;

            let pushed = node.status() == Status::Pass;
            if pushed {
                self.pull(&node).await;
                self.tag_list(&node).await;
                self.referrers(&node).await;
                self.mount(&node).await;
            } else {
                for phase in ["pull", "tag list", "referrers", "blob mount"] {
                    skip_phase(&node, phase).await;
                }
            }

            let mut waiting = turn.subscribe();
            let _ = waiting.wait_for(|current| *current >= position).await;
            if pushed {
                self.delete(&node).await;
            } else {
                skip_phase(&node, "delete").await;
            }
            turn.send_replace(position + 1);
            Ok::<(), Infallible>(())
        })
        .await;

        match node.status() {
            status if status.is_failure() => warn!(dataset = %name, status = %status, "Dataset did not conform"),
            status => info!(dataset = %name, status = %status, "Dataset complete"),
        }
    }

    /// Runs one collaborator call in its own node and scores the outcome.
    ///
    /// Returns the call's value when it passed.
    async fn step<T, F>(&self, parent: &Arc<ResultNode>, name: String, capabilities: &[Capability], call: F) -> Option<T>
    where
        F: Future<Output = std::result::Result<T, RegistryError>>,
    {
        let runner = self.runner;
        let mut value = None;
        let slot = &mut value;
        let label = name.clone();
        let step_name = name.clone();

        let result = parent
            .run_child(name, |node| async move {
                if let Err(disabled) = runner.gate(capabilities) {
                    debug!(step = %label, "{disabled}");
                    node.disabled(disabled);
                    return Ok(());
                }

                debug!(step = %label, "Running step");
                match runner.guard(&label, call).await {
                    Ok(output) => {
                        capabilities.iter().for_each(|c| runner.matrix.pass(*c));
                        node.pass();
                        *slot = Some(output);
                        Ok(())
                    }
                    Err(err) if err.is_protocol_violation() => {
                        capabilities.iter().for_each(|c| runner.matrix.fail(*c));
                        warn!(step = %label, error = %err, "Registry violated the protocol");
                        node.fail(err);
                        Ok(())
                    }
                    Err(err) if err.is_unsupported() => {
                        capabilities.iter().for_each(|c| runner.matrix.skip(*c));
                        debug!(step = %label, error = %err, "Operation unsupported");
                        node.skip(err);
                        Ok(())
                    }
                    Err(err) => {
                        capabilities.iter().for_each(|c| runner.matrix.error(*c));
                        warn!(step = %label, error = %err, "Step errored");
                        Err(err)
                    }
                }
            })
            .await;

        if let Err(err) = result {
            self.errors
                .lock()
                .push(format!("{}/{}/{step_name}: {err}", self.dataset.name(), parent.name()));
        }
        value
    }

    /// Records a step whose precondition was not met.
    async fn skip_step(&self, parent: &Arc<ResultNode>, name: String, capabilities: &[Capability], reason: &str) {
        let runner = self.runner;
        parent
            .run_child(name, |node| async move {
                if let Err(disabled) = runner.gate(capabilities) {
                    node.disabled(disabled);
                } else {
                    capabilities.iter().for_each(|c| runner.matrix.skip(*c));
                    node.skip(reason);
                }
                Ok::<(), Infallible>(())
            })
            .await
            .unwrap_or_else(|never| match never {});
    }

    async fn push_blobs(self, node: &Arc<ResultNode>) {
        let _ = node
            .run_child("push blobs", |phase| async move {
                for digest in self.dataset.blob_order() {
                    let Some(data) = self.dataset.blob(digest) else {
                        continue;
                    };
                    let strategy = self.runner.next_strategy();
                    let registry = self.registry();
                    let repo = self.repo();
                    let call = async move {
                        match strategy {
                            Capability::BlobPostOnly => registry.blob_post_only(repo, digest, data).await,
                            Capability::BlobPostPut => registry.blob_post_put(repo, digest, data).await,
                            Capability::BlobPatchChunked => {
                                registry
                                    .blob_patch_chunked(repo, digest, data, self.runner.config.chunk_size)
                                    .await
                            }
                            _ => registry.blob_patch_stream(repo, digest, data).await,
                        }
                    };
                    self.step(
                        &phase,
                        format!("{strategy} {}", short(digest)),
                        &[Capability::BlobPush, strategy],
                        call,
                    )
                    .await;
                }
                Ok::<(), Infallible>(())
            })
            .await;
    }

    async fn push_manifests(self, node: &Arc<ResultNode>) {
        let _ = node
            .run_child("push manifests", |phase| async move {
                for digest in self.dataset.manifest_order() {
                    let (Some(body), Some(descriptor)) = (self.dataset.manifest(digest), self.descriptor(digest)) else {
                        continue;
                    };
                    let reference = self.dataset.reference_for(digest);
                    let subject = self.dataset.subject(digest);

                    let mut capabilities = vec![if reference == digest.to_string() {
                        Capability::ManifestPutDigest
                    } else {
                        Capability::ManifestPutTag
                    }];
                    if subject.is_some() {
                        capabilities.push(Capability::ManifestPutSubject);
                    }

                    let upload = ManifestUpload {
                        digest,
                        media_type: &descriptor.media_type,
                        body,
                        subject: subject.as_ref(),
                    };
                    self.step(
                        &phase,
                        format!("manifest-put {}", short_reference(&reference)),
                        &capabilities,
                        self.registry().manifest_put(self.repo(), &reference, upload),
                    )
                    .await;
                }
                Ok::<(), Infallible>(())
            })
            .await;
    }

    async fn pull(self, node: &Arc<ResultNode>) {
        let _ = node
            .run_child("pull", |phase| async move {
                let registry = self.registry();
                let repo = self.repo();

                for (digest, data) in self.dataset.blobs() {
                    let size = data.len() as u64;
                    self.step(&phase, format!("blob-head {}", short(digest)), &[Capability::BlobHead], async {
                        expect_present("blob head", digest, registry.blob_head(repo, digest, size).await?)
                    })
                    .await;
                    self.step(
                        &phase,
                        format!("blob-get {}", short(digest)),
                        &[Capability::BlobGetFull],
                        async { registry.blob_get(repo, digest).await.map(drop) },
                    )
                    .await;
                }

                if let Some((digest, data)) = self.dataset.blobs().find(|(_, data)| !data.is_empty()) {
                    let end = (data.len() as u64 - 1) / 2;
                    self.step(
                        &phase,
                        format!("blob-get-range {} 0-{end}", short(digest)),
                        &[Capability::BlobGetRange],
                        async {
                            let extent = registry.blob_get_range(repo, digest, 0, end).await?;
                            if data.starts_with(&extent) {
                                Ok(())
                            } else {
                                Err(RegistryError::ContentMismatch {
                                    operation: "blob get range",
                                    expected: format!("bytes 0-{end} of {digest}"),
                                    actual: "different bytes".to_string(),
                                })
                            }
                        },
                    )
                    .await;
                }

                for digest in self.dataset.manifest_order() {
                    let Some(descriptor) = self.descriptor(digest) else {
                        continue;
                    };
                    let media_type = &descriptor.media_type;
                    let reference = digest.to_string();
                    self.step(
                        &phase,
                        format!("manifest-head {}", short(digest)),
                        &[Capability::ManifestHeadDigest],
                        async {
                            expect_present(
                                "manifest head",
                                digest,
                                registry.manifest_head(repo, &reference, digest, media_type).await?,
                            )
                        },
                    )
                    .await;
                    self.step(
                        &phase,
                        format!("manifest-get {}", short(digest)),
                        &[Capability::ManifestGetDigest],
                        async { registry.manifest_get(repo, &reference, digest, media_type).await.map(drop) },
                    )
                    .await;
                }

                if let (Some(tag), Some(digest)) = (self.dataset.tag(), self.dataset.tagged()) {
                    if let Some(descriptor) = self.descriptor(digest) {
                        let media_type = &descriptor.media_type;
                        self.step(
                            &phase,
                            format!("manifest-head {tag}"),
                            &[Capability::ManifestHeadTag],
                            async {
                                expect_present(
                                    "manifest head",
                                    tag,
                                    registry.manifest_head(repo, tag, digest, media_type).await?,
                                )
                            },
                        )
                        .await;
                        self.step(
                            &phase,
                            format!("manifest-get {tag}"),
                            &[Capability::ManifestGetTag],
                            async { registry.manifest_get(repo, tag, digest, media_type).await.map(drop) },
                        )
                        .await;
                    }
                }
                Ok::<(), Infallible>(())
            })
            .await;
    }

    async fn tag_list(self, node: &Arc<ResultNode>) {
        let Some(tag) = self.dataset.tag() else {
            return;
        };
        let _ = node
            .run_child("tag list", |phase| async move {
                let page_size = self.runner.config.tag_page_size;
                self.step(&phase, format!("tag-list n={page_size}"), &[Capability::TagList], async {
                    let tags = self.registry().tag_list_all(self.repo(), page_size).await?;
                    if tags.iter().any(|t| t == tag) {
                        Ok(())
                    } else {
                        Err(RegistryError::ContentMismatch {
                            operation: "tag list",
                            expected: format!("tag {tag} listed"),
                            actual: format!("{} tags without it", tags.len()),
                        })
                    }
                })
                .await;
                Ok::<(), Infallible>(())
            })
            .await;
    }

    async fn referrers(self, node: &Arc<ResultNode>) {
        let subjects: Vec<&Digest> = self.dataset.subjects().collect();
        if subjects.is_empty() {
            return;
        }
        let _ = node
            .run_child("referrers", |phase| async move {
                let registry = self.registry();
                let repo = self.repo();

                for subject in subjects {
                    let listing = self
                        .step(
                            &phase,
                            format!("referrers {}", short(subject)),
                            &[Capability::Referrers],
                            async {
                                let referrers = registry.referrers(repo, subject, None).await?;
                                self.check_referrers(subject, &referrers.manifests, None)?;
                                Ok::<_, RegistryError>(referrers.manifests.len())
                            },
                        )
                        .await;
                    if let Some(count) = listing {
                        phase.log(format!("{} lists {count} referrer(s)", short(subject)));
                    }

                    let filter = self
                        .dataset
                        .referrers(subject)
                        .iter()
                        .filter(|d| self.dataset.is_pushed_manifest(d))
                        .find_map(|d| self.dataset.artifact_type(d));
                    let Some(artifact_type) = filter else {
                        continue;
                    };
                    self.step(
                        &phase,
                        format!("referrers {} artifactType={artifact_type}", short(subject)),
                        &[Capability::Referrers],
                        async {
                            let referrers = registry.referrers(repo, subject, Some(artifact_type.as_str())).await?;
                            if !referrers.filtered {
                                return self.check_referrers(subject, &referrers.manifests, None);
                            }
                            if let Some(other) = referrers
                                .manifests
                                .iter()
                                .find(|m| m.artifact_type.as_deref() != Some(artifact_type.as_str()))
                            {
                                return Err(RegistryError::ContentMismatch {
                                    operation: "referrers",
                                    expected: format!("only artifactType {artifact_type}"),
                                    actual: format!("{} with {:?}", other.digest, other.artifact_type),
                                });
                            }
                            self.check_referrers(subject, &referrers.manifests, Some(artifact_type.as_str()))
                        },
                    )
                    .await;
                }
                Ok::<(), Infallible>(())
            })
            .await;
    }

    /// Compares a referrers listing with the referrer index.
    ///
    /// For a pushed subject every pushed referrer (of `artifact_type`, when
    /// filtered) must be listed. For a subject that was never pushed the
    /// registry may list nothing, but anything it lists must be a known
    /// referrer. Listed entries must describe the manifest faithfully.
    fn check_referrers(
        &self,
        subject: &Digest,
        listed: &[Descriptor],
        artifact_type: Option<&str>,
    ) -> std::result::Result<(), RegistryError> {
        const OP: &str = "referrers";
        let registered = self.dataset.referrers(subject);

        if self.dataset.is_pushed_manifest(subject) {
            let missing = registered.iter().find(|d| {
                self.dataset.is_pushed_manifest(d)
                    && artifact_type.map_or(true, |t| self.dataset.artifact_type(d).as_deref() == Some(t))
                    && !listed.iter().any(|l| l.digest == **d)
            });
            if let Some(missing) = missing {
                return Err(RegistryError::ContentMismatch {
                    operation: OP,
                    expected: format!("referrer {missing} listed"),
                    actual: format!("{} referrer(s) without it", listed.len()),
                });
            }
        } else if let Some(unknown) = listed.iter().find(|l| !registered.contains(&l.digest)) {
            return Err(RegistryError::ContentMismatch {
                operation: OP,
                expected: format!("a subset of the {} known referrer(s)", registered.len()),
                actual: format!("unknown referrer {}", unknown.digest),
            });
        }

        for entry in listed.iter().filter(|l| registered.contains(&l.digest)) {
            let Some(expected) = self.dataset.descriptor(&entry.digest) else {
                continue;
            };
            if entry.media_type != expected.media_type || entry.size != expected.size {
                return Err(RegistryError::ContentMismatch {
                    operation: OP,
                    expected: format!("{} {} bytes", expected.media_type, expected.size),
                    actual: format!("{} {} bytes", entry.media_type, entry.size),
                });
            }
            let expected_type = self.dataset.artifact_type(&entry.digest);
            if entry.artifact_type != expected_type {
                return Err(RegistryError::ContentMismatch {
                    operation: OP,
                    expected: format!("artifactType {expected_type:?} for {}", entry.digest),
                    actual: format!("{:?}", entry.artifact_type),
                });
            }
        }
        Ok(())
    }

    async fn mount(self, node: &Arc<ResultNode>) {
        let Some(digest) = &self.plan.mount else {
            return;
        };
        let Some(data) = self.dataset.blob(digest) else {
            return;
        };
        let _ = node
            .run_child("blob mount", |phase| async move {
                let registry = self.registry();
                let target = self.runner.config.repo2.as_str();

                let sourced = self
                    .step(
                        &phase,
                        format!("blob-mount-source {}", short(digest)),
                        &[Capability::BlobMountSource],
                        registry.blob_mount(target, digest, Some(self.repo()), data),
                    )
                    .await;
                let anonymous = self
                    .step(
                        &phase,
                        format!("blob-mount-anonymous {}", short(digest)),
                        &[Capability::BlobMountAnonymous],
                        registry.blob_mount(target, digest, None, data),
                    )
                    .await;
                for (kind, outcome) in [("from source", sourced), ("anonymous", anonymous)] {
                    if let Some(outcome) = outcome {
                        phase.log(format!("mount {kind}: {outcome:?}"));
                    }
                }
                Ok::<(), Infallible>(())
            })
            .await;
    }

    async fn delete(self, node: &Arc<ResultNode>) {
        let _ = node
            .run_child("delete", |phase| async move {
                let registry = self.registry();
                let repo = self.repo();

                if let (Some(tag), Some(digest)) = (self.dataset.tag(), self.dataset.tagged()) {
                    if let Some(descriptor) = self.descriptor(digest) {
                        let media_type = &descriptor.media_type;
                        let deleted = self
                            .step(
                                &phase,
                                format!("tag-delete {tag}"),
                                &[Capability::TagDelete],
                                registry.manifest_delete(repo, tag),
                            )
                            .await;
                        let atomic = format!("tag-delete-atomic {tag}");
                        if deleted.is_some() {
                            self.step(&phase, atomic, &[Capability::TagDeleteAtomic], async {
                                expect_absent("tag delete", tag, registry.manifest_head(repo, tag, digest, media_type).await?)
                            })
                            .await;
                        } else {
                            self.skip_step(&phase, atomic, &[Capability::TagDeleteAtomic], "tag delete did not pass")
                                .await;
                        }
                    }
                }

                for digest in self.dataset.manifest_order().iter().rev() {
                    let Some(descriptor) = self.descriptor(digest) else {
                        continue;
                    };
                    let media_type = &descriptor.media_type;
                    let reference = digest.to_string();
                    let deleted = self
                        .step(
                            &phase,
                            format!("manifest-delete {}", short(digest)),
                            &[Capability::ManifestDelete],
                            registry.manifest_delete(repo, &reference),
                        )
                        .await;
                    let atomic = format!("manifest-delete-atomic {}", short(digest));
                    if deleted.is_some() {
                        self.step(&phase, atomic, &[Capability::ManifestDeleteAtomic], async {
                            expect_absent(
                                "manifest delete",
                                digest,
                                registry.manifest_head(repo, &reference, digest, media_type).await?,
                            )
                        })
                        .await;
                    } else {
                        self.skip_step(
                            &phase,
                            atomic,
                            &[Capability::ManifestDeleteAtomic],
                            "manifest delete did not pass",
                        )
                        .await;
                    }
                }

                let owned = self
                    .dataset
                    .blob_order()
                    .iter()
                    .rev()
                    .filter(|d| self.plan.delete.contains(*d));
                for digest in owned {
                    let size = self.dataset.blob(digest).map_or(0, |b| b.len() as u64);
                    let deleted = self
                        .step(
                            &phase,
                            format!("blob-delete {}", short(digest)),
                            &[Capability::BlobDelete],
                            registry.blob_delete(repo, digest),
                        )
                        .await;
                    let atomic = format!("blob-delete-atomic {}", short(digest));
                    if deleted.is_some() {
                        self.step(&phase, atomic, &[Capability::BlobDeleteAtomic], async {
                            expect_absent("blob delete", digest, registry.blob_head(repo, digest, size).await?)
                        })
                        .await;
                    } else {
                        self.skip_step(&phase, atomic, &[Capability::BlobDeleteAtomic], "blob delete did not pass")
                            .await;
                    }
                }

                if let Some(digest) = &self.plan.mount {
                    let target = self.runner.config.repo2.as_str();
                    self.step(
                        &phase,
                        format!("blob-delete {target} {}", short(digest)),
                        &[Capability::BlobDelete],
                        registry.blob_delete(target, digest),
                    )
                    .await;
                }
                Ok::<(), Infallible>(())
            })
            .await;
    }
}

async fn skip_phase(node: &Arc<ResultNode>, phase: &str) {
    let _ = node
        .run_child(phase, |phase| async move {
            phase.skip("push did not pass");
            Ok::<(), Infallible>(())
        })
        .await;
}

fn expect_present(
    operation: &'static str,
    what: impl std::fmt::Display,
    present: bool,
) -> std::result::Result<(), RegistryError> {
    if present {
        Ok(())
    } else {
        Err(RegistryError::ContentMismatch {
            operation,
            expected: format!("{what} present"),
            actual: "404".to_string(),
        })
    }
}

fn expect_absent(
    operation: &'static str,
    what: impl std::fmt::Display,
    present: bool,
) -> std::result::Result<(), RegistryError> {
    if present {
        Err(RegistryError::ContentMismatch {
            operation,
            expected: format!("{what} gone after delete"),
            actual: "still present".to_string(),
        })
    } else {
        Ok(())
    }
}

/// `sha256:0123456789ab` style abbreviation for step names.
fn short(digest: &Digest) -> String {
    let encoded = digest.encoded();
    format!("{}:{}", digest.algorithm().as_str(), encoded.get(..12).unwrap_or(encoded))
}

fn short_reference(reference: &str) -> String {
    reference
        .parse::<Digest>()
        .map_or_else(|_| reference.to_string(), |digest| short(&digest))
}

#[cfg(test)]
mod tests {
    use regconform_core::DataShape;

    use super::*;
    use crate::memory::MemoryRegistry;

    fn runner(config: RunnerConfig) -> Runner {
        Runner::new(config, Arc::new(MemoryRegistry::new())).unwrap()
    }

    #[test]
    fn test_strategy_rotation_skips_disabled() {
        let runner = runner(RunnerConfig::default());
        let picked: Vec<Capability> = (0..5).map(|_| runner.next_strategy()).collect();
        assert_eq!(
            picked,
            vec![
                Capability::BlobPostOnly,
                Capability::BlobPostPut,
                Capability::BlobPatchChunked,
                Capability::BlobPatchStream,
                Capability::BlobPostOnly,
            ]
        );
    }

    #[test]
    fn test_cleanup_plan_for_shared_blobs() {
        let first = DataShape::Artifact.generate(Some(1)).unwrap();
        let second = DataShape::ArtifactWithMissingSubject.generate(Some(2)).unwrap();
        let empty = Digest::canonical(b"{}");
        let plans = plan_cleanup(&[first, second.clone()]);

        assert!(!plans[0].delete.contains(&empty));
        assert!(plans[1].delete.contains(&empty));
        assert_ne!(plans[0].mount.as_ref(), Some(&empty));
        assert!(plans[0].mount.is_some());
        assert_eq!(plans[1].delete.len(), second.blob_order().len());
    }

    #[test]
    fn test_seeded_datasets_are_distinct() {
        let runner = runner(RunnerConfig {
            seed: Some(7),
            ..RunnerConfig::default()
        });
        let datasets = runner.datasets().unwrap();
        assert_eq!(datasets.len(), DataShape::ALL.len());

        let image = &datasets[0];
        let index = &datasets[1];
        assert!(image.blob_order().iter().all(|d| index.blob(d).is_none()));
    }

    #[test]
    fn test_short_names() {
        let digest = Digest::canonical(b"abc");
        assert_eq!(short(&digest), "sha256:ba7816bf8f01");
        assert_eq!(short_reference("latest"), "latest");
        assert_eq!(short_reference(&digest.to_string()), "sha256:ba7816bf8f01");
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let runner = runner(RunnerConfig::default());
        runner.cancel_handle().cancel();
        let err = runner
            .guard("blob head", async { Ok::<_, RegistryError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_error() {
        let runner = runner(RunnerConfig {
            timeout_secs: Some(1),
            ..RunnerConfig::default()
        });
        let err = runner
            .guard("blob get", async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, RegistryError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Timeout { seconds: 1, .. }));
        assert!(!err.is_protocol_violation());
    }
}
