//! Input validation shared by the vector backends
//!
//! Every check here runs before any embedding or network call, so a
//! rejected batch never leaves a partial upsert behind.

use std::collections::HashMap;

use cssa_core::{generate_id, CssaError, Metadata, Result, VectorRecord};

/// Check a single metadata map holds only values every backend can index
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    for (key, value) in metadata {
        let valid = match value {
            serde_json::Value::String(_)
            | serde_json::Value::Number(_)
            | serde_json::Value::Bool(_) => true,
            serde_json::Value::Array(items) => items.iter().all(|v| v.is_string()),
            serde_json::Value::Null | serde_json::Value::Object(_) => false,
        };

        if !valid {
            return Err(CssaError::validation(format!(
                "metadata should be a dictionary of scalar values (key '{key}')"
            )));
        }
    }
    Ok(())
}

/// Check `(id, embedding)` pairs and return their shared dimension
pub fn validate_vectors(vectors: &[(String, Vec<f32>)]) -> Result<usize> {
    let mut dimension = None;

    for (id, values) in vectors {
        if id.is_empty() {
            return Err(CssaError::validation("id should be a non-empty string"));
        }
        if values.is_empty() {
            return Err(CssaError::validation(format!(
                "vector should be a non-empty list of floats (id '{id}')"
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CssaError::validation(format!(
                "vector should only contain finite values (id '{id}')"
            )));
        }

        match dimension {
            None => dimension = Some(values.len()),
            Some(d) if d != values.len() => {
                return Err(CssaError::validation(format!(
                    "all vectors should have the same dimension: expected {d}, got {} (id '{id}')",
                    values.len()
                )));
            }
            Some(_) => {}
        }
    }

    Ok(dimension.unwrap_or(0))
}

/// Pair each vector with its metadata, defaulting to an empty map.
///
/// Output order follows `vectors`; entries of `metadata` whose id is not in
/// `vectors` are ignored.
pub fn merge_metadata(
    vectors: Vec<(String, Vec<f32>)>,
    metadata: Option<HashMap<String, Metadata>>,
) -> Result<Vec<VectorRecord>> {
    validate_vectors(&vectors)?;

    let metadata = metadata.unwrap_or_default();
    for meta in metadata.values() {
        validate_metadata(meta)?;
    }

    Ok(vectors
        .into_iter()
        .map(|(id, values)| {
            let meta = metadata.get(&id).cloned().unwrap_or_default();
            VectorRecord::new(id, values, meta)
        })
        .collect())
}

/// Use caller ids when given, otherwise generate one per input
pub fn resolve_ids(ids: Option<Vec<String>>, count: usize) -> Result<Vec<String>> {
    match ids {
        None => Ok((0..count).map(|_| generate_id()).collect()),
        Some(ids) => {
            if ids.len() != count {
                return Err(CssaError::validation(format!(
                    "ids should be a list of strings with the same length as sentences ({} != {count})",
                    ids.len()
                )));
            }
            if ids.iter().any(|id| id.is_empty()) {
                return Err(CssaError::validation("ids should be a list of non-empty strings"));
            }
            Ok(ids)
        }
    }
}

/// Check per-position metadata and fill in empty maps when absent
pub fn align_metadata(metadata: Option<Vec<Metadata>>, count: usize) -> Result<Vec<Metadata>> {
    match metadata {
        None => Ok(vec![Metadata::new(); count]),
        Some(metadata) => {
            if metadata.len() != count {
                return Err(CssaError::validation(format!(
                    "metadata should be a list of dictionaries with the same length as sentences ({} != {count})",
                    metadata.len()
                )));
            }
            for meta in &metadata {
                validate_metadata(meta)?;
            }
            Ok(metadata)
        }
    }
}

/// Check an embedding batch returned for `count` inputs
pub fn validate_embeddings(embeddings: &[Vec<f32>], count: usize) -> Result<()> {
    if embeddings.len() != count || embeddings.iter().any(|e| e.is_empty()) {
        return Err(CssaError::validation(format!(
            "embeddings should be a list of vectors, one per sentence (got {} for {count})",
            embeddings.len()
        )));
    }
    Ok(())
}

/// Check a query vector and result count
pub fn validate_query(query_vector: &[f32], top_k: usize) -> Result<()> {
    if query_vector.is_empty() {
        return Err(CssaError::validation("query vector should not be empty"));
    }
    if top_k == 0 {
        return Err(CssaError::validation("top_k should be greater than zero"));
    }
    Ok(())
}
