//! Container size introspection.
//!
//! Every stateful component exposes a `container_info()` hook returning
//! a tree of `(name, count, element_size)` entries. The node aggregates
//! them for monitoring.

/// One leaf measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfoEntry {
    /// Container name
    pub name: String,
    /// Number of elements
    pub count: usize,
    /// Approximate size of one element in bytes
    pub element_size: usize,
}

/// A tree of container measurements.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    leaves: Vec<ContainerInfoEntry>,
    children: Vec<(String, ContainerInfo)>,
}

impl ContainerInfo {
    /// Adds a leaf measurement.
    pub fn leaf(mut self, name: impl Into<String>, count: usize, element_size: usize) -> Self {
        self.leaves.push(ContainerInfoEntry {
            name: name.into(),
            count,
            element_size,
        });
        self
    }

    /// Adds a named child subtree.
    pub fn node(mut self, name: impl Into<String>, child: ContainerInfo) -> Self {
        self.children.push((name.into(), child));
        self
    }

    /// Leaf measurements at this level.
    pub fn leaves(&self) -> &[ContainerInfoEntry] {
        &self.leaves
    }

    /// Child subtrees.
    pub fn children(&self) -> &[(String, ContainerInfo)] {
        &self.children
    }

    /// Flattens the tree into `(path, count, element_size)` rows with
    /// `/`-joined paths.
    pub fn flatten(&self) -> Vec<(String, usize, usize)> {
        let mut rows = Vec::new();
        self.flatten_into("", &mut rows);
        rows
    }

    fn flatten_into(&self, prefix: &str, rows: &mut Vec<(String, usize, usize)>) {
        for leaf in &self.leaves {
            let path = if prefix.is_empty() {
                leaf.name.clone()
            } else {
                format!("{prefix}/{}", leaf.name)
            };
            rows.push((path, leaf.count, leaf.element_size));
        }
        for (name, child) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            child.flatten_into(&path, rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_paths() {
        let info = ContainerInfo::default()
            .leaf("top", 1, 8)
            .node("child", ContainerInfo::default().leaf("inner", 2, 16));
        let rows = info.flatten();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("top".to_string(), 1, 8));
        assert_eq!(rows[1], ("child/inner".to_string(), 2, 16));
    }
}
