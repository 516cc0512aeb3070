//! Python Bindings
//!
//! Graphs cross the boundary as JSON (see [`Graph::from_json`]) and
//! partitions come back as lists of node names.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::PartitionerConfig;
use crate::graph::{Graph, GraphView, Target};
use crate::partitioner::Partitioner;
use crate::support::SupportedTargets;

/// Partition a graph, supporting `call_function` nodes whose target is one
/// of `supported_targets` (e.g. `"relu"`, `"getitem"`).
#[pyfunction]
#[pyo3(signature = (graph_json, supported_targets, config_json = None))]
fn propose_partitions(
    graph_json: &str,
    supported_targets: Vec<String>,
    config_json: Option<&str>,
) -> PyResult<Vec<Vec<String>>> {
    let graph = Graph::from_json(graph_json).map_err(|e| PyValueError::new_err(e.to_string()))?;

    let targets = supported_targets
        .into_iter()
        .map(|name| serde_json::from_value::<Target>(serde_json::Value::String(name)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let config = match config_json {
        Some(json) => PartitionerConfig::from_json(json).map_err(|e| PyValueError::new_err(e.to_string()))?,
        None => PartitionerConfig::default(),
    };

    let partitions = Partitioner::new(&graph, SupportedTargets::new(targets))
        .with_config(config)
        .propose_partitions()
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;

    Ok(partitions
        .iter()
        .map(|partition| {
            partition
                .nodes()
                .iter()
                .map(|&node| graph.name(node).to_string())
                .collect()
        })
        .collect())
}

pub(crate) fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(propose_partitions, m)?)?;
    Ok(())
}
