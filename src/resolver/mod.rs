use crate::config::{default_parameters::default_parameters, ParameterSpec};
use crate::template;
use chrono::NaiveDate;
use log::error;

/// A parameter with its `additional_data` template expanded against the
/// cycle's reference date. Lives only for the cycle that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub spec: ParameterSpec,
    pub additional_data: Option<String>,
}

/// Produces the ordered request list for one cycle.
///
/// With `include_defaults` the built-in parameter set is prepended to the
/// user-configured one. No de-duplication is performed on purpose - a
/// duplicate address yields two requests and two published readings, and
/// downstream dashboards may rely on that.
///
/// All entries share the same `reference` date so relative-date expressions
/// are consistent within the cycle. Entries whose template fails to resolve
/// are logged and dropped; the rest of the cycle proceeds.
pub fn resolve(
    parameters: &[ParameterSpec],
    include_defaults: bool,
    reference: NaiveDate,
) -> Vec<ResolvedRequest> {
    let defaults = if include_defaults {
        default_parameters()
    } else {
        Vec::new()
    };

    let mut requests = Vec::with_capacity(defaults.len() + parameters.len());
    for spec in defaults.iter().chain(parameters) {
        let additional_data = match &spec.additional_data {
            Some(data) => match template::evaluate(data, reference) {
                Ok(expanded) => Some(expanded),
                Err(e) => {
                    error!(
                        "Failed to resolve additional data for parameter '{}', skipping it this cycle: {}",
                        spec.address, e
                    );
                    continue;
                }
            },
            None => None,
        };

        requests.push(ResolvedRequest {
            spec: spec.clone(),
            additional_data,
        });
    }
    requests
}
