//! Validate invocations against the tool catalogue before execution.

use crate::error::ValidationError;
use crate::types::ToolInvocation;

use super::catalog::ToolCatalog;

/// Validate an invocation's tool name and required parameters.
///
/// Composite invocations are containers and are not looked up; their children
/// are validated when they run. An empty catalogue accepts every name.
/// Returns the first violation found.
pub fn validate_invocation(
    catalog: &ToolCatalog,
    invocation: &ToolInvocation,
) -> Result<(), ValidationError> {
    if invocation.is_composite() || catalog.is_empty() {
        return Ok(());
    }

    let Some(spec) = catalog.get(&invocation.name) else {
        return Err(ValidationError::UnknownTool {
            name: invocation.name.clone(),
        });
    };

    for required in spec.required_params() {
        let present = invocation
            .parameters
            .get(required)
            .is_some_and(|value| !value.trim().is_empty());
        if !present {
            return Err(ValidationError::MissingParameter {
                tool: invocation.name.clone(),
                parameter: required.to_string(),
            });
        }
    }

    Ok(())
}
