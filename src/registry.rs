//! Node registry (C1): the node table plus its four status lists, with
//! atomic persistence. The control thread is the sole writer; readers take
//! a snapshot by reading the `.conf` files directly (spec section 3 & 9).

use std::path::{Path, PathBuf};

use crate::buildcfg;
use crate::error::DigsError;
use crate::fsutil::{read_to_string_or_empty, replace_file_contents};
use crate::node::{parse_node_list, serialize_node_list, Node};
use crate::node_status::NodeStatusLists;

pub struct NodeRegistry {
    nodes: Vec<Node>,
    pub status: NodeStatusLists,
    install_dir: PathBuf,
}

impl NodeRegistry {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        NodeRegistry {
            nodes: Vec::new(),
            status: NodeStatusLists::new(0),
            install_dir: install_dir.into(),
        }
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.install_dir.join(file_name)
    }

    /// Loads `mainnodelist.conf` and the four status list files under
    /// `install_dir`. Failing to open the main list is fatal at startup
    /// (spec section 4.1); missing status-list files are treated as empty.
    pub fn load(install_dir: impl Into<PathBuf>) -> Result<Self, DigsError> {
        let install_dir = install_dir.into();
        let main_list_path = install_dir.join(file_name_of(buildcfg::MAIN_NODE_LIST));
        let contents = std::fs::read_to_string(&main_list_path).map_err(|err| {
            DigsError::invariant(format!(
                "fatal: cannot open node list {:?}: {}",
                main_list_path, err
            ))
        })?;
        let nodes = parse_node_list(&contents)?;

        let mut registry = NodeRegistry {
            status: NodeStatusLists::new(nodes.len()),
            nodes,
            install_dir,
        };
        registry.load_status_lists().map_err(|e| {
            DigsError::invariant(format!("failed to load node status lists: {e}"))
        })?;
        Ok(registry)
    }

    fn load_status_lists(&mut self) -> Result<(), anyhow::Error> {
        let dead = read_to_string_or_empty(self.path(file_name_of(buildcfg::DEAD_NODE_LIST)))?;
        let disabled =
            read_to_string_or_empty(self.path(file_name_of(buildcfg::DISABLED_NODE_LIST)))?;
        let retiring =
            read_to_string_or_empty(self.path(file_name_of(buildcfg::RETIRING_NODE_LIST)))?;
        let prefs = read_to_string_or_empty(self.path(file_name_of(buildcfg::NODE_PREFS_LIST)))?;

        for name in dead.lines().filter(|l| !l.trim().is_empty()) {
            if let Some(idx) = self.index_of(name.trim()) {
                self.status.add_to_dead(idx);
            }
        }
        for name in disabled.lines().filter(|l| !l.trim().is_empty()) {
            if let Some(idx) = self.index_of(name.trim()) {
                self.status.add_to_disabled(idx);
            }
        }
        for name in retiring.lines().filter(|l| !l.trim().is_empty()) {
            if let Some(idx) = self.index_of(name.trim()) {
                self.status.add_to_retiring(idx);
            }
        }
        if !prefs.trim().is_empty() {
            self.status.preference = prefs
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|name| self.index_of(name.trim()))
                .collect();
        }
        Ok(())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn lookup(&self, name: &str) -> Result<&Node, DigsError> {
        self.index_of(name)
            .map(|idx| &self.nodes[idx])
            .ok_or_else(|| DigsError::not_found(format!("node '{name}' not found")))
    }

    pub fn get(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.nodes.iter().enumerate()
    }

    /// Appends a node to the table. Does not persist (spec section 4.1).
    pub fn add(&mut self, node: Node) {
        self.nodes.push(node);
        let new_idx = self.nodes.len() - 1;
        self.status.preference.push(new_idx);
    }

    /// Removes node `idx`, shifting successors and remapping every status
    /// list atomically with the table mutation. Does not delete backing
    /// files on the SE itself.
    pub fn remove(&mut self, idx: usize) -> Result<Node, DigsError> {
        if idx >= self.nodes.len() {
            return Err(DigsError::not_found(format!("no node at index {idx}")));
        }
        let removed = self.nodes.remove(idx);
        self.status.remap_after_removal(idx);
        Ok(removed)
    }

    /// Reparses `mainnodelist.conf` from the control node's own copy and
    /// refreshes each known node's `free_space_kb` from it — the reconciler's
    /// "updateNodeDiskSpace" step (spec section 4.7 step 2), an intentional
    /// atomic-swap read rather than a live per-node query.
    pub fn reload_disk_space(&mut self) -> Result<(), DigsError> {
        let path = self.path(file_name_of(buildcfg::MAIN_NODE_LIST));
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| DigsError::invariant(format!("reload_disk_space: {e}")))?;
        let fresh = parse_node_list(&contents)?;
        for node in &fresh {
            if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == node.name) {
                existing.free_space_kb = node.free_space_kb;
                existing.disks = node.disks.clone();
            }
        }
        Ok(())
    }

    /// Persists the node table to `mainnodelist.new` then atomically
    /// renames it over `mainnodelist.conf`. Sole durability mechanism for
    /// the node table (spec section 4.1).
    pub fn persist(&self) -> Result<(), DigsError> {
        let path = self.path(file_name_of(buildcfg::MAIN_NODE_LIST));
        let data = serialize_node_list(&self.nodes);
        replace_file_contents(&path, data.as_bytes())
            .map_err(|e| DigsError::invariant(format!("persist failed: {e}")))
    }

    pub fn persist_status_lists(&self) -> Result<(), DigsError> {
        self.persist_list(buildcfg::DEAD_NODE_LIST, self.status.dead_indices())?;
        self.persist_list(buildcfg::DISABLED_NODE_LIST, self.status.disabled_indices())?;
        self.persist_list(buildcfg::RETIRING_NODE_LIST, self.status.retiring_indices())?;
        let pref_names: Vec<&str> = self
            .status
            .preference
            .iter()
            .filter_map(|&i| self.nodes.get(i).map(|n| n.name.as_str()))
            .collect();
        let path = self.path(file_name_of(buildcfg::NODE_PREFS_LIST));
        let data = pref_names.join("\n") + if pref_names.is_empty() { "" } else { "\n" };
        replace_file_contents(&path, data.as_bytes())
            .map_err(|e| DigsError::invariant(format!("persist failed: {e}")))
    }

    fn persist_list<'a>(
        &self,
        file_const: &str,
        indices: impl Iterator<Item = &'a usize>,
    ) -> Result<(), DigsError> {
        let names: Vec<&str> = indices
            .filter_map(|&i| self.nodes.get(i).map(|n| n.name.as_str()))
            .collect();
        let path = self.path(file_name_of(file_const));
        let data = names.join("\n") + if names.is_empty() { "" } else { "\n" };
        replace_file_contents(&path, data.as_bytes())
            .map_err(|e| DigsError::invariant(format!("persist failed: {e}")))
    }
}

fn file_name_of(full_path: &str) -> &str {
    Path::new(full_path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(full_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;
    use std::collections::HashMap;

    fn sample_node(name: &str, site: &str) -> Node {
        Node {
            name: name.to_string(),
            site: site.to_string(),
            path: "/data".to_string(),
            inbox: "/data/inbox".to_string(),
            node_type: NodeType::Globus,
            disks: vec![crate::node::Disk { index: 1, quota_kb: 1_000_000 }],
            free_space_kb: 1_000_000,
            timeouts: Default::default(),
            extra_rsl: None,
            extra_jss_contact: None,
            gpfs: false,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::new(dir.path());
        registry.add(sample_node("n1", "siteA"));
        registry.add(sample_node("n2", "siteB"));
        registry.status.add_to_dead(1);
        registry.persist().unwrap();
        registry.persist_status_lists().unwrap();

        let reloaded = NodeRegistry::load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.status.is_dead(1));
        assert_eq!(reloaded.lookup("n1").unwrap().site, "siteA");
    }

    #[test]
    fn remove_renumbers_status_lists() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::new(dir.path());
        registry.add(sample_node("n1", "siteA"));
        registry.add(sample_node("n2", "siteB"));
        registry.add(sample_node("n3", "siteC"));
        registry.status.add_to_retiring(2);

        registry.remove(0).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.status.is_retiring(1));
        assert_eq!(registry.lookup("n2").unwrap().name, "n2");
    }
}
