//! Run report.
//!
//! A serializable snapshot of the result tree and the capability matrix,
//! taken once a run has finished.

use chrono::{DateTime, Utc};
use regconform_core::{Capability, CapabilityMatrix, ResultNode, Status, StatusCounts};
use serde::Serialize;
use uuid::Uuid;

/// Complete outcome of a conformance run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Unique, time-ordered run identifier.
    pub run_id: Uuid,
    /// When the run started.
    pub started: DateTime<Utc>,
    /// When the run stopped.
    pub stopped: Option<DateTime<Utc>>,
    /// Worst status anywhere in the run.
    pub status: Status,
    /// Number of outcomes per status.
    pub totals: StatusCounts,
    /// Worst status observed per protocol operation.
    pub capabilities: Vec<CapabilityReport>,
    /// Aggregate status per dataset.
    pub datasets: Vec<DatasetReport>,
    /// The full result tree.
    pub tree: NodeReport,
}

/// Status of one protocol operation.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    /// Operation.
    pub name: Capability,
    /// Worst status observed.
    pub status: Status,
}

/// Status of one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    /// Dataset name.
    pub name: String,
    /// Aggregate status.
    pub status: Status,
    /// Outcomes recorded under the dataset.
    pub counts: StatusCounts,
}

/// One node of the result tree.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Step name.
    pub name: String,
    /// Aggregate status.
    pub status: Status,
    /// Outcomes recorded at or below this node.
    pub counts: StatusCounts,
    /// Failure and error messages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Other messages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    /// Start time.
    pub started: DateTime<Utc>,
    /// Stop time.
    pub stopped: Option<DateTime<Utc>>,
    /// Wall-clock duration.
    pub duration_ms: Option<i64>,
    /// Nested steps.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeReport>,
}

impl NodeReport {
    fn from_node(node: &ResultNode) -> Self {
        Self {
            name: node.name().to_string(),
            status: node.status(),
            counts: node.counts(),
            errors: node.errors(),
            output: node.output(),
            started: node.started(),
            stopped: node.stopped(),
            duration_ms: node.duration().map(|d| d.num_milliseconds()),
            children: node.children().iter().map(|c| Self::from_node(c)).collect(),
        }
    }

    /// Depth-first search for a node by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Self> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

impl Report {
    /// Builds the report over a finished tree and its matrix.
    #[must_use]
    pub fn build(root: &ResultNode, matrix: &CapabilityMatrix) -> Self {
        let tree = NodeReport::from_node(root);
        let datasets = tree
            .children
            .iter()
            .map(|d| DatasetReport {
                name: d.name.clone(),
                status: d.status,
                counts: d.counts,
            })
            .collect();
        let capabilities = matrix
            .snapshot()
            .into_iter()
            .map(|(name, status)| CapabilityReport { name, status })
            .collect();

        Self {
            run_id: Uuid::now_v7(),
            started: tree.started,
            stopped: tree.stopped,
            status: tree.status,
            totals: tree.counts,
            capabilities,
            datasets,
            tree,
        }
    }

    /// Whether nothing failed or errored.
    #[must_use]
    pub const fn passed(&self) -> bool {
        !self.status.is_failure()
    }

    /// Worst status recorded for `capability`.
    #[must_use]
    pub fn capability(&self, capability: Capability) -> Status {
        self.capabilities
            .iter()
            .find(|c| c.name == capability)
            .map_or(Status::Unknown, |c| c.status)
    }

    /// Aggregate status of a dataset.
    #[must_use]
    pub fn dataset(&self, name: &str) -> Option<Status> {
        self.datasets.iter().find(|d| d.name == name).map(|d| d.status)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use regconform_core::ApiToggles;

    use super::*;

    async fn sample() -> (std::sync::Arc<ResultNode>, CapabilityMatrix) {
        let root = ResultNode::root("conformance");
        let matrix = CapabilityMatrix::new(ApiToggles::default());

        root.run_child("image", |image| async move {
            image
                .run_child("push blobs", |push| async move {
                    push.pass();
                    push.pass();
                    Ok::<(), Infallible>(())
                })
                .await?;
            image
                .run_child("pull", |pull| async move {
                    pull.fail("content mismatch");
                    Ok::<(), Infallible>(())
                })
                .await
        })
        .await
        .unwrap();
        root.run_child("artifact", |artifact| async move {
            artifact.skip("push did not pass");
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap();
        root.finish();

        matrix.pass(Capability::BlobPostOnly);
        matrix.fail(Capability::BlobGetFull);
        (root, matrix)
    }

    #[tokio::test]
    async fn test_report_summarizes_tree_and_matrix() {
        let (root, matrix) = sample().await;
        let report = Report::build(&root, &matrix);

        assert_eq!(report.status, Status::Fail);
        assert!(!report.passed());
        assert_eq!(report.totals[Status::Pass], 2);
        assert_eq!(report.totals[Status::Fail], 1);
        assert_eq!(report.dataset("image"), Some(Status::Fail));
        assert_eq!(report.dataset("artifact"), Some(Status::Skip));
        assert_eq!(report.capability(Capability::BlobPostOnly), Status::Pass);
        assert_eq!(report.capability(Capability::BlobGetFull), Status::Fail);

        let pull = report.tree.find("pull").unwrap();
        assert_eq!(pull.errors, vec!["content mismatch".to_string()]);
        assert!(pull.stopped.is_some());
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let (root, matrix) = sample().await;
        let report = Report::build(&root, &matrix);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "fail");
        assert_eq!(json["totals"]["pass"], 2);
        assert_eq!(json["datasets"][1]["name"], "artifact");
        assert!(json["run_id"].is_string());
        assert_eq!(json["tree"]["children"][0]["children"][1]["name"], "pull");
    }
}
