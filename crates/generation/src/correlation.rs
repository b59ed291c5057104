//! Per-item correlation tokens for batch submissions.

use std::collections::HashSet;

use docpipe_core::{BatchId, DomainError, DomainResult};

use crate::item::ItemSpec;

/// Fill in correlation ids for a batch, preserving submission order.
///
/// Caller-supplied ids are kept; missing ones become `<batch_id>-<position>`.
/// Any duplicate within the batch is a validation error, since correlation ids
/// are what clients join their own records on.
pub fn assign_correlation_ids(batch_id: BatchId, specs: &mut [ItemSpec]) -> DomainResult<()> {
    let width = specs.len().to_string().len().max(5);
    let mut seen = HashSet::with_capacity(specs.len());

    for (index, spec) in specs.iter_mut().enumerate() {
        let id = spec
            .correlation_id
            .get_or_insert_with(|| format!("{batch_id}-{index:0width$}"));
        if !seen.insert(id.clone()) {
            return Err(DomainError::validation(format!(
                "duplicate correlation id '{id}' at position {index}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::VersionSelector;

    fn spec() -> ItemSpec {
        ItemSpec::new("t", "v", VersionSelector::explicit("1"), serde_json::json!({}))
    }

    #[test]
    fn generated_ids_are_distinct_and_ordered() {
        let batch = BatchId::new();
        let mut specs = vec![spec(), spec().with_correlation_id("client-7"), spec()];
        assign_correlation_ids(batch, &mut specs).unwrap();

        let ids: Vec<_> = specs.iter().map(|s| s.correlation_id.clone().unwrap()).collect();
        assert_eq!(ids[0], format!("{batch}-00000"));
        assert_eq!(ids[1], "client-7");
        assert_eq!(ids[2], format!("{batch}-00002"));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut specs = vec![spec().with_correlation_id("a"), spec().with_correlation_id("a")];
        let err = assign_correlation_ids(BatchId::new(), &mut specs).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("'a'")));
    }
}
