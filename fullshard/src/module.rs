//! Module trees
//!
//! A [`ModuleTree`] is an arena holding modules and the tensors they own.
//! Modules and tensors are addressed by [`ModuleId`] and [`TensorId`], and
//! those ids are their identity: two slots holding the same id alias one
//! object, two distinct ids are distinct objects even if their contents are
//! equal. Registering into an existing slot name replaces it, so
//! `register_parameter(b, "weight", tree.parameter(a, "weight"))` makes `a`
//! and `b` share one weight.
//!
//! Each module also carries a [`Claim`]: once a wrapping operation has taken
//! ownership of a module's subtree, the claim records which one.

use std::collections::HashSet;
use std::fmt;

use crate::tensor::TensorData;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl ModuleId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

impl TensorId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Wrapping operation that can claim a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapKind {
    FullyShard,
    Replicate,
}

impl fmt::Display for WrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullyShard => write!(f, "fully_shard"),
            Self::Replicate => write!(f, "replicate"),
        }
    }
}

/// Identifies one application of a wrapping operation within a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapId {
    pub kind: WrapKind,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Claim {
    #[default]
    Unclaimed,
    ClaimedBy(WrapId),
}

impl Claim {
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::ClaimedBy(_))
    }
}

#[derive(Debug, Clone)]
struct ModuleNode {
    type_name: String,
    parameters: Vec<(String, TensorId)>,
    buffers: Vec<(String, TensorId)>,
    children: Vec<(String, ModuleId)>,
    claim: Claim,
}

/// Arena of modules and tensors.
#[derive(Debug, Clone, Default)]
pub struct ModuleTree {
    modules: Vec<ModuleNode>,
    tensors: Vec<TensorData>,
    next_wrap: u32,
}

fn upsert<T: Copy>(slots: &mut Vec<(String, T)>, name: &str, value: T) {
    match slots.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = value,
        None => slots.push((name.to_string(), value)),
    }
}

fn lookup<T: Copy>(slots: &[(String, T)], name: &str) -> Option<T> {
    slots.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
}

impl ModuleTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detached module. Attach it with [`Self::register_module`].
    pub fn add_module(&mut self, type_name: &str) -> ModuleId {
        self.modules.push(ModuleNode {
            type_name: type_name.to_string(),
            parameters: Vec::new(),
            buffers: Vec::new(),
            children: Vec::new(),
            claim: Claim::Unclaimed,
        });
        ModuleId(self.modules.len() - 1)
    }

    pub fn add_tensor(&mut self, tensor: TensorData) -> TensorId {
        self.tensors.push(tensor);
        TensorId(self.tensors.len() - 1)
    }

    pub fn register_parameter(&mut self, module: ModuleId, name: &str, tensor: TensorId) {
        upsert(&mut self.modules[module.0].parameters, name, tensor);
    }

    pub fn register_buffer(&mut self, module: ModuleId, name: &str, tensor: TensorId) {
        upsert(&mut self.modules[module.0].buffers, name, tensor);
    }

    pub fn register_module(&mut self, parent: ModuleId, name: &str, child: ModuleId) {
        upsert(&mut self.modules[parent.0].children, name, child);
    }

    #[must_use]
    pub fn type_name(&self, module: ModuleId) -> &str {
        &self.modules[module.0].type_name
    }

    #[must_use]
    pub fn parameter(&self, module: ModuleId, name: &str) -> Option<TensorId> {
        lookup(&self.modules[module.0].parameters, name)
    }

    #[must_use]
    pub fn buffer(&self, module: ModuleId, name: &str) -> Option<TensorId> {
        lookup(&self.modules[module.0].buffers, name)
    }

    #[must_use]
    pub fn child(&self, module: ModuleId, name: &str) -> Option<ModuleId> {
        lookup(&self.modules[module.0].children, name)
    }

    /// Parameters registered directly on `module`.
    pub fn direct_parameters(
        &self,
        module: ModuleId,
    ) -> impl Iterator<Item = (&str, TensorId)> + '_ {
        self.modules[module.0]
            .parameters
            .iter()
            .map(|(n, t)| (n.as_str(), *t))
    }

    /// Buffers registered directly on `module`.
    pub fn direct_buffers(&self, module: ModuleId) -> impl Iterator<Item = (&str, TensorId)> + '_ {
        self.modules[module.0]
            .buffers
            .iter()
            .map(|(n, t)| (n.as_str(), *t))
    }

    /// Immediate children of `module`, including repeated references.
    pub fn children(&self, module: ModuleId) -> impl Iterator<Item = (&str, ModuleId)> + '_ {
        self.modules[module.0]
            .children
            .iter()
            .map(|(n, m)| (n.as_str(), *m))
    }

    /// Resolve a dotted path such as `"0.in_proj"` below `root`.
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] if any path component is missing.
    pub fn submodule(&self, root: ModuleId, path: &str) -> Result<ModuleId> {
        if path.is_empty() {
            return Ok(root);
        }
        path.split('.').try_fold(root, |m, name| {
            self.child(m, name)
                .ok_or_else(|| Error::ModuleNotFound(path.to_string()))
        })
    }

    #[must_use]
    pub fn tensor(&self, id: TensorId) -> &TensorData {
        &self.tensors[id.0]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut TensorData {
        &mut self.tensors[id.0]
    }

    /// All modules reachable from `root` (inclusive) in pre-order, each once.
    #[must_use]
    pub fn modules(&self, root: ModuleId) -> Vec<ModuleId> {
        self.named_modules(root).into_iter().map(|(_, m)| m).collect()
    }

    /// Like [`Self::modules`], paired with the dotted path of each module's
    /// first occurrence. The root's path is empty.
    #[must_use]
    pub fn named_modules(&self, root: ModuleId) -> Vec<(String, ModuleId)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![(String::new(), root)];
        while let Some((path, m)) = stack.pop() {
            if !seen.insert(m) {
                continue;
            }
            for (name, child) in self.modules[m.0].children.iter().rev() {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };
                stack.push((child_path, *child));
            }
            out.push((path, m));
        }
        out
    }

    /// All parameters reachable from `root`, each once.
    #[must_use]
    pub fn parameters(&self, root: ModuleId) -> Vec<TensorId> {
        self.named_parameters(root).into_iter().map(|(_, t)| t).collect()
    }

    /// All buffers reachable from `root`, each once.
    #[must_use]
    pub fn buffers(&self, root: ModuleId) -> Vec<TensorId> {
        self.named_buffers(root).into_iter().map(|(_, t)| t).collect()
    }

    #[must_use]
    pub fn named_parameters(&self, root: ModuleId) -> Vec<(String, TensorId)> {
        self.collect_named(root, |node| &node.parameters)
    }

    #[must_use]
    pub fn named_buffers(&self, root: ModuleId) -> Vec<(String, TensorId)> {
        self.collect_named(root, |node| &node.buffers)
    }

    fn collect_named<F>(&self, root: ModuleId, slots: F) -> Vec<(String, TensorId)>
    where
        F: Fn(&ModuleNode) -> &Vec<(String, TensorId)>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (prefix, m) in self.named_modules(root) {
            for (name, t) in slots(&self.modules[m.0]) {
                if seen.insert(*t) {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}.{name}")
                    };
                    out.push((path, *t));
                }
            }
        }
        out
    }

    #[must_use]
    pub fn claim(&self, module: ModuleId) -> Claim {
        self.modules[module.0].claim
    }

    /// # Errors
    /// Returns [`Error::AlreadyWrapped`] if the module already carries a claim.
    pub fn ensure_unclaimed(&self, module: ModuleId) -> Result<()> {
        match self.modules[module.0].claim {
            Claim::Unclaimed => Ok(()),
            Claim::ClaimedBy(existing) => Err(Error::AlreadyWrapped {
                module: module.0,
                existing: existing.kind,
            }),
        }
    }

    /// Mark `module` as owned by a new application of `kind`.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyWrapped`] if the module already carries a claim.
    pub fn set_claim(&mut self, module: ModuleId, kind: WrapKind) -> Result<WrapId> {
        self.ensure_unclaimed(module)?;
        let id = WrapId {
            kind,
            seq: self.next_wrap,
        };
        self.next_wrap += 1;
        self.modules[module.0].claim = Claim::ClaimedBy(id);
        Ok(id)
    }
}
