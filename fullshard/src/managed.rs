//! Managed-scope resolution
//!
//! When a wrapping operation is applied to a root module it takes ownership
//! of the root's subtree, minus any subtree some earlier wrapping operation
//! already claimed. The functions here compute that scope: first the
//! managed modules, then the parameters and buffers those modules own.
//! Membership is all that matters to callers; the order is deterministic
//! but not part of the contract.

use std::collections::HashSet;

use tracing::debug;

use crate::module::{ModuleId, ModuleTree, TensorId};

/// Modules managed by a wrapping operation applied at `root`.
///
/// Walks the tree depth-first. A claimed module other than `root` is
/// skipped together with everything below it. `root` itself is always
/// included, claimed or not. Each module appears once even if it is
/// referenced from several parents. Children come before their parent.
#[must_use]
pub fn resolve_managed_modules(tree: &ModuleTree, root: ModuleId) -> Vec<ModuleId> {
    let mut visited = HashSet::new();
    let mut modules = Vec::new();
    visit(tree, root, root, &mut visited, &mut modules);
    debug!(root = root.index(), managed = modules.len(), "Resolved managed modules");
    modules
}

fn visit(
    tree: &ModuleTree,
    root: ModuleId,
    module: ModuleId,
    visited: &mut HashSet<ModuleId>,
    modules: &mut Vec<ModuleId>,
) {
    if module != root && tree.claim(module).is_claimed() {
        return;
    }
    visited.insert(module);
    for (_, child) in tree.children(module) {
        if !visited.contains(&child) {
            visit(tree, root, child, visited, modules);
        }
    }
    modules.push(module);
}

/// Parameters and buffers owned directly by `modules`, each once.
///
/// Returns `(parameters, buffers)` in discovery order. A tensor shared by
/// several managed modules is reported once, under the first module that
/// owns it.
#[must_use]
pub fn resolve_managed_states(
    tree: &ModuleTree,
    modules: &[ModuleId],
) -> (Vec<TensorId>, Vec<TensorId>) {
    let mut seen_params = HashSet::new();
    let mut seen_buffers = HashSet::new();
    let mut params = Vec::new();
    let mut buffers = Vec::new();
    for &module in modules {
        for (_, t) in tree.direct_parameters(module) {
            if seen_params.insert(t) {
                params.push(t);
            }
        }
        for (_, t) in tree.direct_buffers(module) {
            if seen_buffers.insert(t) {
                buffers.push(t);
            }
        }
    }
    debug!(
        params = params.len(),
        buffers = buffers.len(),
        "Resolved managed states"
    );
    (params, buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::dtype::DType;
    use crate::module::WrapKind;
    use crate::tensor::TensorData;

    fn node(tree: &mut ModuleTree, parent: Option<(ModuleId, &str)>) -> ModuleId {
        let m = tree.add_module("Node");
        let t = tree.add_tensor(TensorData::parameter(&[1], DType::F32, Device::cpu()));
        tree.register_parameter(m, "p", t);
        if let Some((p, name)) = parent {
            tree.register_module(p, name, m);
        }
        m
    }

    #[test]
    fn test_children_before_parent() {
        let mut tree = ModuleTree::new();
        let root = node(&mut tree, None);
        let a = node(&mut tree, Some((root, "a")));
        let b = node(&mut tree, Some((a, "b")));
        assert_eq!(resolve_managed_modules(&tree, root), vec![b, a, root]);
    }

    #[test]
    fn test_claimed_root_is_included() {
        let mut tree = ModuleTree::new();
        let root = node(&mut tree, None);
        let a = node(&mut tree, Some((root, "a")));
        tree.set_claim(root, WrapKind::FullyShard).unwrap();
        assert_eq!(resolve_managed_modules(&tree, root), vec![a, root]);
    }

    #[test]
    fn test_claimed_subtree_is_opaque() {
        let mut tree = ModuleTree::new();
        let root = node(&mut tree, None);
        let a = node(&mut tree, Some((root, "a")));
        let _below_a = node(&mut tree, Some((a, "x")));
        let b = node(&mut tree, Some((root, "b")));
        tree.set_claim(a, WrapKind::Replicate).unwrap();

        let modules = resolve_managed_modules(&tree, root);
        assert_eq!(modules, vec![b, root]);

        let (params, buffers) = resolve_managed_states(&tree, &modules);
        assert_eq!(params.len(), 2);
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_claimed_module_reached_twice_stays_excluded() {
        // `a` is claimed and also referenced from an unclaimed sibling.
        let mut tree = ModuleTree::new();
        let root = node(&mut tree, None);
        let a = node(&mut tree, Some((root, "a")));
        let b = node(&mut tree, Some((root, "b")));
        tree.register_module(b, "alias", a);
        tree.set_claim(a, WrapKind::FullyShard).unwrap();

        assert_eq!(resolve_managed_modules(&tree, root), vec![b, root]);
    }

    #[test]
    fn test_states_dedup_across_categories() {
        let mut tree = ModuleTree::new();
        let root = tree.add_module("Root");
        let a = tree.add_module("A");
        tree.register_module(root, "a", a);
        let shared = tree.add_tensor(TensorData::new(&[4], DType::F32, Device::cpu()));
        tree.register_buffer(root, "running", shared);
        tree.register_buffer(a, "running", shared);

        let modules = resolve_managed_modules(&tree, root);
        let (params, buffers) = resolve_managed_states(&tree, &modules);
        assert!(params.is_empty());
        assert_eq!(buffers, vec![shared]);
    }
}
