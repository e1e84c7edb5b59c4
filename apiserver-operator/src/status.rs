//! Read-modify-write of the operator resource under optimistic concurrency
//!
//! Both helpers re-read the resource on every attempt, apply a pure mutation and write it back
//! guarded by the resource version just read. Conflicts are retried a bounded number of times;
//! other errors and exhausted retries are returned to the caller, whose reconcile then fails and
//! is retried by its loop. Unchanged values are never written.
use crate::{client::OperatorClient, Result};
use backon::{BackoffBuilder, ConstantBuilder};
use kube_core::ResourceExt;
use operator_core::{DesiredStateDocument, OperatorSpec, OperatorStatus};
use std::time::Duration;

fn conflict_backoff() -> impl Iterator<Item = Duration> {
    ConstantBuilder::default()
        .with_delay(Duration::from_millis(10))
        .with_max_times(5)
        .build()
}

/// Applies `mutate` to the current status and persists the result if it differs
///
/// Returns the status as stored afterwards and whether a write happened.
pub async fn update_status<C, F>(client: &C, mutate: F) -> Result<(OperatorStatus, bool)>
where
    C: OperatorClient + ?Sized,
    F: Fn(&mut OperatorStatus) + Send + Sync,
{
    let mut backoff = conflict_backoff();
    loop {
        let current = client.get().await?;
        let old = current.status.clone().unwrap_or_default();
        let mut new = old.clone();
        mutate(&mut new);
        if new == old {
            return Ok((old, false));
        }

        let resource_version = current.resource_version().unwrap_or_default();
        match client.update_status(&resource_version, new).await {
            Ok(updated) => return Ok((updated.status.unwrap_or_default(), true)),
            Err(err) if err.is_conflict() => match backoff.next() {
                Some(delay) => {
                    tracing::debug!(?delay, "status update conflicted, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err.into()),
            },
            Err(err) => return Err(err.into()),
        }
    }
}

/// Persists `document` as `spec.observedConfig` if it differs from the stored one
///
/// Returns the previously stored document and whether a write happened.
pub async fn update_observed_config<C>(
    client: &C,
    document: &DesiredStateDocument,
) -> Result<(DesiredStateDocument, bool)>
where
    C: OperatorClient + ?Sized,
{
    let mut backoff = conflict_backoff();
    loop {
        let current = client.get().await?;
        let previous = DesiredStateDocument::from_value(current.spec.observed_config.clone())?;
        if &previous == document {
            return Ok((previous, false));
        }

        let spec = OperatorSpec {
            observed_config: document.to_value(),
            ..current.spec.clone()
        };
        let resource_version = current.resource_version().unwrap_or_default();
        match client.update_spec(&resource_version, spec).await {
            Ok(_) => return Ok((previous, true)),
            Err(err) if err.is_conflict() => match backoff.next() {
                Some(delay) => {
                    tracing::debug!(?delay, "observed config update conflicted, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err.into()),
            },
            Err(err) => return Err(err.into()),
        }
    }
}
