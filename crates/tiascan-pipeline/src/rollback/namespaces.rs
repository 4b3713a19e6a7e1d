//! Namespace counter reversal from deleted message links

use {
    std::collections::{BTreeMap, HashSet},
    tiascan_common::types::NamespaceMessage,
    tiascan_store::NamespaceUpdate,
};

/// Subtracts each deleted link's contribution from its namespace. A
/// namespace first seen at the rolled-back height was deleted outright
/// and needs no counter adjustment.
pub(crate) fn reverse_usage(
    links: &[NamespaceMessage],
    deleted_namespaces: &HashSet<String>,
) -> Vec<NamespaceUpdate> {
    let mut updates: BTreeMap<&str, NamespaceUpdate> = BTreeMap::new();
    for link in links {
        if deleted_namespaces.contains(&link.namespace_id) {
            continue;
        }
        let update = updates
            .entry(link.namespace_id.as_str())
            .or_insert_with(|| NamespaceUpdate {
                namespace_id: link.namespace_id.clone(),
                ..Default::default()
            });
        update.size -= link.size;
        update.pfb_count -= 1;
    }
    updates.into_values().collect()
}
