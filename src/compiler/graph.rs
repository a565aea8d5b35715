//! Relationship graph and resolver tree
//!
//! The relationship graph is static configuration: per named source, a
//! mapping from field/relationship name to the related source. The
//! resolver tree is derived from it per compilation: a spanning tree
//! rooted at the primary source, validating dotted paths (case-correcting
//! each segment) and computing every binding's foreign-key and ID field
//! names.

use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{CompileError, CompileResult};

/// One declared relationship edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Relationship {
    /// Details contain one master: the edge points at the master source,
    /// the implicit foreign key lives on the detail (this) side.
    Master(String),
    /// Master has many details: the edge points at the detail source, the
    /// implicit foreign key lives on the detail (related) side.
    Details(String),
    /// Explicit master edge with a non-default foreign-key field on the
    /// detail (this) side.
    Custom { source: String, foreign_key: String },
}

impl Relationship {
    pub fn related_source(&self) -> &str {
        match self {
            Relationship::Master(s) | Relationship::Details(s) => s,
            Relationship::Custom { source, .. } => source,
        }
    }
}

/// Direction of a joined fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    /// Detail record joining up to its one master.
    Master,
    /// Master record fanning out to its details.
    Detail,
}

impl JoinDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinDirection::Master => "master",
            JoinDirection::Detail => "detail",
        }
    }
}

type NameRule = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// ID and foreign-key field naming rules.
#[derive(Clone)]
pub struct NamingRules {
    id: NameRule,
    foreign: NameRule,
}

impl NamingRules {
    pub fn new(
        id: impl Fn(&str) -> String + Send + Sync + 'static,
        foreign: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: Arc::new(id),
            foreign: Arc::new(foreign),
        }
    }

    /// The ID field of a source's records.
    pub fn id_field_name(&self, source: &str) -> String {
        (self.id)(source)
    }

    /// The foreign-key field a detail record carries for a master source.
    pub fn foreign_id_field_name(&self, source: &str) -> String {
        (self.foreign)(source)
    }
}

impl Default for NamingRules {
    fn default() -> Self {
        Self::new(|_| "Id".to_string(), |source| format!("{}Id", source))
    }
}

impl std::fmt::Debug for NamingRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamingRules").finish()
    }
}

/// Static relationship declarations, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    sources: HashMap<String, HashMap<String, Relationship>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a relationship edge.
    pub fn relate(mut self, source: &str, name: &str, rel: Relationship) -> Self {
        self.sources
            .entry(source.to_string())
            .or_default()
            .insert(name.to_string(), rel);
        self
    }

    /// True-case spelling of a source name, if it is known to the graph
    /// either as a declaring source or as a relationship target.
    pub fn source_true_case(&self, name: &str) -> Option<&str> {
        if let Some(key) = self
            .sources
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
        {
            return Some(key);
        }
        self.sources
            .values()
            .flat_map(|rels| rels.values())
            .map(Relationship::related_source)
            .find(|s| s.eq_ignore_ascii_case(name))
    }

    /// Whether any source declares a relationship under this name.
    pub fn is_relationship_name(&self, name: &str) -> bool {
        self.sources
            .values()
            .any(|rels| rels.keys().any(|k| k.eq_ignore_ascii_case(name)))
    }

    /// Case-insensitive relationship lookup on a source.
    pub fn lookup(&self, source: &str, name: &str) -> Option<(&str, &Relationship)> {
        let (_, rels) = self
            .sources
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(source))?;
        rels.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// One validated node of the resolver tree.
#[derive(Debug, Clone)]
pub struct PathNode {
    /// True-cased dotted path from the root.
    pub path: String,
    /// True-cased source name.
    pub source: String,
    pub parent_path: Option<String>,
    pub parent_source: Option<String>,
    /// True-cased relationship name this node was reached through.
    pub relationship: Option<String>,
    /// None at the root.
    pub direction: Option<JoinDirection>,
    /// Foreign-key field on the detail side of the edge. None at the root.
    pub foreign_key: Option<String>,
    /// ID field of this node's source records.
    pub id_field: String,
}

/// Spanning tree rooted at the primary source.
#[derive(Debug, Clone)]
pub struct ResolverTree {
    root_path: String,
    nodes: HashMap<String, PathNode>,
}

impl ResolverTree {
    /// Creates the tree with its root node.
    ///
    /// The root must be a source, not a bare relationship name.
    pub fn new(
        graph: &RelationshipGraph,
        naming: &NamingRules,
        root_source: &str,
    ) -> CompileResult<Self> {
        let known = graph.source_true_case(root_source);
        if known.is_none() && graph.is_relationship_name(root_source) {
            return Err(CompileError::BareRelationshipRoot(root_source.to_string()));
        }
        let source = known.unwrap_or(root_source).to_string();
        let root = PathNode {
            path: source.clone(),
            source: source.clone(),
            parent_path: None,
            parent_source: None,
            relationship: None,
            direction: None,
            foreign_key: None,
            id_field: naming.id_field_name(&source),
        };
        let mut nodes = HashMap::new();
        nodes.insert(source.to_ascii_lowercase(), root);
        Ok(Self {
            root_path: source,
            nodes,
        })
    }

    /// True-cased root path (the primary source name).
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Resolves a dotted path against the tree, materializing nodes for
    /// every prefix and case-correcting each segment.
    pub fn resolve_path(
        &mut self,
        graph: &RelationshipGraph,
        naming: &NamingRules,
        dotted: &str,
    ) -> CompileResult<PathNode> {
        let segments: Vec<&str> = dotted.split('.').collect();
        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| CompileError::MalformedQuery("empty path".into()))?;
        if !first.eq_ignore_ascii_case(&self.root_path) {
            return Err(CompileError::UnknownSource((*first).to_string()));
        }
        let mut current = self.root_path.clone();
        for segment in rest {
            current = self.descend(graph, naming, &current, segment)?;
        }
        Ok(self
            .nodes
            .get(&current.to_ascii_lowercase())
            .cloned()
            .expect("resolved node present"))
    }

    /// Looks up an already-resolved node.
    pub fn node(&self, dotted: &str) -> Option<&PathNode> {
        self.nodes.get(&dotted.to_ascii_lowercase())
    }

    fn descend(
        &mut self,
        graph: &RelationshipGraph,
        naming: &NamingRules,
        parent_path: &str,
        segment: &str,
    ) -> CompileResult<String> {
        let parent = self
            .nodes
            .get(&parent_path.to_ascii_lowercase())
            .cloned()
            .expect("parent node present");
        let candidate = format!("{}.{}", parent.path, segment);
        if let Some(existing) = self.nodes.get(&candidate.to_ascii_lowercase()) {
            return Ok(existing.path.clone());
        }
        let (true_name, rel) = graph
            .lookup(&parent.source, segment)
            .ok_or_else(|| CompileError::UnknownRelationship {
                source_name: parent.source.clone(),
                name: segment.to_string(),
            })?;
        let source = rel.related_source().to_string();
        let (direction, foreign_key) = match rel {
            Relationship::Master(master) => (
                JoinDirection::Master,
                naming.foreign_id_field_name(master),
            ),
            Relationship::Details(_) => (
                JoinDirection::Detail,
                naming.foreign_id_field_name(&parent.source),
            ),
            Relationship::Custom { foreign_key, .. } => {
                (JoinDirection::Master, foreign_key.clone())
            }
        };
        let path = format!("{}.{}", parent.path, true_name);
        let node = PathNode {
            path: path.clone(),
            source: source.clone(),
            parent_path: Some(parent.path.clone()),
            parent_source: Some(parent.source.clone()),
            relationship: Some(true_name.to_string()),
            direction: Some(direction),
            foreign_key: Some(foreign_key),
            id_field: naming.id_field_name(&source),
        };
        self.nodes.insert(path.to_ascii_lowercase(), node);
        Ok(path)
    }
}
