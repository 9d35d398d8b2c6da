//! Knowledge graph tools: graph_add_entity, graph_add_relation,
//! graph_remove_relation and graph_query
//!
//! The graph is one JSON document in the agent's [`StateStore`], loaded on
//! first use and written back after every change.

use async_trait::async_trait;
use cappuccino_state::StateStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ToolRegistry, ToolResult, ToolTrait};

/// Document name the graph is stored under
pub const GRAPH_DOCUMENT: &str = "knowledge_graph";

/// Directed, labelled edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub relation: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Relation {
    fn is(&self, source: &str, target: &str, relation: &str) -> bool {
        self.source == source && self.target == target && self.relation == relation
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    /// Add an entity or merge attributes into an existing one
    pub fn add_entity(&mut self, name: &str, attributes: Map<String, Value>) {
        self.entities
            .entry(name.to_string())
            .or_default()
            .extend(attributes);
    }

    /// Add an edge, creating missing endpoints. An existing edge with the
    /// same triple has its attributes merged.
    pub fn add_relation(
        &mut self,
        source: &str,
        target: &str,
        relation: &str,
        attributes: Map<String, Value>,
    ) {
        self.entities.entry(source.to_string()).or_default();
        self.entities.entry(target.to_string()).or_default();

        match self
            .relations
            .iter_mut()
            .find(|r| r.is(source, target, relation))
        {
            Some(existing) => existing.attributes.extend(attributes),
            None => self.relations.push(Relation {
                source: source.to_string(),
                target: target.to_string(),
                relation: relation.to_string(),
                attributes,
            }),
        }
    }

    /// Remove an edge; false when it was not there
    pub fn remove_relation(&mut self, source: &str, target: &str, relation: &str) -> bool {
        let before = self.relations.len();
        self.relations.retain(|r| !r.is(source, target, relation));
        self.relations.len() != before
    }

    /// Edges touching `entity`, in insertion order
    pub fn query(&self, entity: &str) -> Vec<&Relation> {
        self.relations
            .iter()
            .filter(|r| r.source == entity || r.target == entity)
            .collect()
    }
}

/// Shared, persisted graph behind the graph tools
pub struct GraphStore {
    store: StateStore,
    graph: Mutex<Option<KnowledgeGraph>>,
}

impl GraphStore {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            graph: Mutex::new(None),
        }
    }

    /// Current graph; a missing or unreadable document starts empty
    pub async fn snapshot(&self) -> Result<KnowledgeGraph, cappuccino_state::StateError> {
        let mut slot = self.graph.lock().await;
        Ok(self.loaded(&mut slot).await?.clone())
    }

    /// Apply `change` and persist the result
    pub async fn update<R>(
        &self,
        change: impl FnOnce(&mut KnowledgeGraph) -> R,
    ) -> Result<R, cappuccino_state::StateError> {
        let mut slot = self.graph.lock().await;
        let graph = self.loaded(&mut slot).await?;
        let out = change(&mut *graph);
        self.store
            .save_document(GRAPH_DOCUMENT, &serde_json::to_value(&*graph)?)
            .await?;
        Ok(out)
    }

    async fn loaded<'a>(
        &self,
        slot: &'a mut Option<KnowledgeGraph>,
    ) -> Result<&'a mut KnowledgeGraph, cappuccino_state::StateError> {
        if slot.is_none() {
            let graph = match self.store.load_document(GRAPH_DOCUMENT).await? {
                Some(doc) => serde_json::from_value(doc).unwrap_or_else(|e| {
                    debug!("◆ GRAPH DOCUMENT UNUSABLE, STARTING EMPTY: {}", e);
                    KnowledgeGraph::default()
                }),
                None => KnowledgeGraph::default(),
            };
            *slot = Some(graph);
        }
        Ok(slot.get_or_insert_with(KnowledgeGraph::default))
    }
}

/// Register the four graph tools over one shared store
pub fn register_graph_tools(registry: &mut ToolRegistry, graph: Arc<GraphStore>) {
    registry.register(GraphAddEntityTool::new(graph.clone()));
    registry.register(GraphAddRelationTool::new(graph.clone()));
    registry.register(GraphRemoveRelationTool::new(graph.clone()));
    registry.register(GraphQueryTool::new(graph));
}

#[derive(Deserialize)]
struct EntityArgs {
    name: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Deserialize)]
struct RelationArgs {
    source: String,
    target: String,
    relation: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Deserialize)]
struct QueryArgs {
    entity: String,
}

fn relation_schema(with_attributes: bool) -> Value {
    let mut properties = json!({
        "source": { "type": "string", "description": "Source entity" },
        "target": { "type": "string", "description": "Target entity" },
        "relation": { "type": "string", "description": "Relation label, e.g. works_at" }
    });
    if with_attributes {
        properties["attributes"] =
            json!({ "type": "object", "description": "Extra attributes of the relation" });
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["source", "target", "relation"]
    })
}

fn required(field: &str, value: &str) -> Result<(), super::ToolError> {
    if value.trim().is_empty() {
        return Err(format!("'{}' must not be empty", field).into());
    }
    Ok(())
}

pub struct GraphAddEntityTool {
    graph: Arc<GraphStore>,
}

impl GraphAddEntityTool {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl ToolTrait for GraphAddEntityTool {
    fn name(&self) -> &str {
        "graph_add_entity"
    }
    fn description(&self) -> &str {
        "Add an entity to the knowledge graph, merging any attributes into an existing one."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Entity name" },
                "attributes": { "type": "object", "description": "Attributes of the entity" }
            },
            "required": ["name"]
        })
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: EntityArgs = serde_json::from_value(args)?;
        required("name", &args.name)?;
        debug!("◆ GRAPH ENTITY: {}", args.name);
        self.graph
            .update(|g| g.add_entity(&args.name, args.attributes))
            .await?;
        Ok(json!({ "entity": args.name }))
    }
}

pub struct GraphAddRelationTool {
    graph: Arc<GraphStore>,
}

impl GraphAddRelationTool {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl ToolTrait for GraphAddRelationTool {
    fn name(&self) -> &str {
        "graph_add_relation"
    }
    fn description(&self) -> &str {
        "Connect two entities in the knowledge graph with a labelled relation."
    }
    fn parameters(&self) -> Value {
        relation_schema(true)
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: RelationArgs = serde_json::from_value(args)?;
        required("source", &args.source)?;
        required("target", &args.target)?;
        required("relation", &args.relation)?;
        debug!(
            "◆ GRAPH RELATION: {} -{}-> {}",
            args.source, args.relation, args.target
        );
        self.graph
            .update(|g| g.add_relation(&args.source, &args.target, &args.relation, args.attributes))
            .await?;
        Ok(json!({
            "relation": args.relation,
            "source": args.source,
            "target": args.target
        }))
    }
}

pub struct GraphRemoveRelationTool {
    graph: Arc<GraphStore>,
}

impl GraphRemoveRelationTool {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl ToolTrait for GraphRemoveRelationTool {
    fn name(&self) -> &str {
        "graph_remove_relation"
    }
    fn description(&self) -> &str {
        "Remove a relation between two entities from the knowledge graph."
    }
    fn parameters(&self) -> Value {
        relation_schema(false)
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: RelationArgs = serde_json::from_value(args)?;
        let existed = self
            .graph
            .update(|g| g.remove_relation(&args.source, &args.target, &args.relation))
            .await?;
        Ok(json!({
            "removed": [args.source, args.target, args.relation],
            "existed": existed
        }))
    }
}

pub struct GraphQueryTool {
    graph: Arc<GraphStore>,
}

impl GraphQueryTool {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl ToolTrait for GraphQueryTool {
    fn name(&self) -> &str {
        "graph_query"
    }
    fn description(&self) -> &str {
        "List an entity's attributes and every relation it takes part in."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entity": { "type": "string", "description": "Entity name" }
            },
            "required": ["entity"]
        })
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: QueryArgs = serde_json::from_value(args)?;
        let graph = self.graph.snapshot().await?;
        let attributes = graph
            .entities
            .get(&args.entity)
            .map(|a| Value::Object(a.clone()))
            .unwrap_or(Value::Null);
        Ok(json!({
            "entity": args.entity,
            "attributes": attributes,
            "relations": graph.query(&args.entity)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_add_entity_merges_attributes() {
        let mut graph = KnowledgeGraph::default();
        graph.add_entity("Alice", attrs(json!({"age": 30})));
        graph.add_entity("Alice", attrs(json!({"city": "Paris", "age": 31})));

        assert_eq!(
            Value::Object(graph.entities["Alice"].clone()),
            json!({"age": 31, "city": "Paris"})
        );
    }

    #[test]
    fn test_add_relation_creates_endpoints_once() {
        let mut graph = KnowledgeGraph::default();
        graph.add_relation("Alice", "Acme", "works_at", Map::new());
        graph.add_relation("Alice", "Acme", "works_at", attrs(json!({"since": 2020})));

        assert_eq!(graph.relations.len(), 1);
        assert_eq!(graph.relations[0].attributes["since"], json!(2020));
        assert!(graph.entities.contains_key("Alice"));
        assert!(graph.entities.contains_key("Acme"));
    }

    #[test]
    fn test_remove_and_query() {
        let mut graph = KnowledgeGraph::default();
        graph.add_relation("Alice", "Acme", "works_at", Map::new());
        graph.add_relation("Bob", "Alice", "knows", Map::new());
        graph.add_relation("Bob", "Acme", "works_at", Map::new());

        let labels: Vec<&str> = graph
            .query("Alice")
            .iter()
            .map(|r| r.relation.as_str())
            .collect();
        assert_eq!(labels, vec!["works_at", "knows"]);

        assert!(graph.remove_relation("Bob", "Alice", "knows"));
        assert!(!graph.remove_relation("Bob", "Alice", "knows"));
        assert_eq!(graph.query("Alice").len(), 1);
        assert!(graph.query("Nobody").is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let graph = Arc::new(GraphStore::new(StateStore::in_memory("g")));
        let tool = GraphAddEntityTool::new(graph);
        assert!(tool.execute(json!({"name": "  "})).await.is_err());
        assert!(tool.execute(json!({})).await.is_err());
    }
}
