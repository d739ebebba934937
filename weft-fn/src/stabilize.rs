//! Requirements stabilization: iterated invocation to a fixed point.
//!
//! Functions may need to observe extra resources before they can decide what
//! further extra resources they need. The runner feeds each response's
//! requirements back as resolved resources and re-invokes until two
//! consecutive responses declare the same requirement set. A fixed iteration
//! cap bounds the loop; the cap is a product contract, not a heuristic.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use weft_api::ResourceSelector;
use weft_proto::{RunFunctionRequest, RunFunctionResponse};

use crate::error::FunctionError;
use crate::fetch::ExtraResourcesFetcher;
use crate::runner::{FunctionEndpoint, FunctionRunner};

/// Hard cap on invocations of a single step within one reconcile.
pub const MAX_REQUIREMENTS_ITERATIONS: usize = 5;

/// Re-invokes one function until its requirements stop changing.
pub struct StabilizingRunner<'a> {
    runner: &'a FunctionRunner,
    fetcher: &'a ExtraResourcesFetcher,
}

impl<'a> StabilizingRunner<'a> {
    pub fn new(runner: &'a FunctionRunner, fetcher: &'a ExtraResourcesFetcher) -> Self {
        Self { runner, fetcher }
    }

    /// Run `function` for pipeline step `step` until its extra-resource
    /// requirements reach a fixed point.
    ///
    /// - A response with no requirements ends the loop immediately, so a
    ///   function that needs nothing is invoked exactly once.
    /// - A response carrying a fatal result is returned as-is; the caller
    ///   owns fatal-result semantics.
    /// - Requirements still changing after [`MAX_REQUIREMENTS_ITERATIONS`]
    ///   invocations surface as a terminal error naming the step.
    pub async fn run(
        &self,
        step: &str,
        function: &str,
        endpoint: &FunctionEndpoint,
        base: RunFunctionRequest,
        deadline: Instant,
    ) -> Result<RunFunctionResponse, FunctionError> {
        let mut request = base;
        let mut previous: Option<BTreeMap<String, ResourceSelector>> = None;

        for iteration in 1..=MAX_REQUIREMENTS_ITERATIONS {
            let remaining = remaining_budget(step, function, deadline)?;
            let response = self
                .runner
                .run_function(function, endpoint, request.clone(), Some(remaining))
                .await?;

            if response.is_fatal() {
                return Ok(response);
            }

            let requirements = declared_requirements(step, &response)?;
            if requirements.is_empty() {
                return Ok(response);
            }
            if previous.as_ref() == Some(&requirements) {
                tracing::debug!(step, function, iteration, "Requirements stabilized");
                return Ok(response);
            }

            request.extra_resources = self.fetcher.fetch_all(function, &requirements).await?;
            previous = Some(requirements);
        }

        Err(FunctionError::RequirementsUnstable {
            step: step.to_string(),
        })
    }
}

fn remaining_budget(step: &str, function: &str, deadline: Instant) -> Result<Duration, FunctionError> {
    let now = Instant::now();
    if now >= deadline {
        return Err(FunctionError::Transient {
            function: function.to_string(),
            message: format!("reconcile deadline reached before step {step} completed"),
        });
    }
    Ok(deadline - now)
}

/// Normalize a response's requirements into selector form. A requirement
/// whose selector has no match arm is a malformed response.
fn declared_requirements(
    step: &str,
    response: &RunFunctionResponse,
) -> Result<BTreeMap<String, ResourceSelector>, FunctionError> {
    let mut requirements = BTreeMap::new();
    if let Some(wire) = &response.requirements {
        for (name, selector) in &wire.extra_resources {
            let selector = selector.to_api().ok_or_else(|| FunctionError::Terminal {
                function: step.to_string(),
                message: format!("step {step}: requirement {name} carries no match"),
            })?;
            requirements.insert(name.clone(), selector);
        }
    }
    Ok(requirements)
}
