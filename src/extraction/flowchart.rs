use super::{
    build_transcript, slice_json_object, strip_code_fences, truncate_chars, ExtractionStage,
    TextCompleter, MAX_TRANSCRIPT_CHARS,
};
use crate::error::Result;
use crate::llm::{ChatTurn, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

pub const MAX_LABEL_CHARS: usize = 50;
pub const MAX_DESCRIPTION_CHARS: usize = 200;
pub const MAX_EDGE_LABEL_CHARS: usize = 50;
pub const DEFAULT_TITLE: &str = "Learning Flowchart";

// Grid used for nodes that arrive without a position
const GRID_COLUMNS: usize = 3;
const GRID_LEFT: f64 = 150.0;
const GRID_TOP: f64 = 80.0;
const GRID_COLUMN_WIDTH: f64 = 300.0;
const GRID_ROW_HEIGHT: f64 = 150.0;

// Two-column zig-zag used by the fallback graph
const FALLBACK_LEFT_X: f64 = 250.0;
const FALLBACK_RIGHT_X: f64 = 650.0;
const FALLBACK_TOP: f64 = 60.0;
const FALLBACK_STEP_Y: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    Topic,
    Concept,
    Decision,
    End,
    Process,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Topic => "topic",
            NodeType::Concept => "concept",
            NodeType::Decision => "decision",
            NodeType::End => "end",
            NodeType::Process => "process",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "start" => Some(NodeType::Start),
            "topic" => Some(NodeType::Topic),
            "concept" => Some(NodeType::Concept),
            "decision" => Some(NodeType::Decision),
            "end" => Some(NodeType::End),
            "process" => Some(NodeType::Process),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Canvas rectangle every node position is clamped into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Default for CanvasBounds {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            max_x: 1200.0,
            min_y: 0.0,
            max_y: 800.0,
        }
    }
}

impl CanvasBounds {
    pub fn clamp(&self, position: Position) -> Position {
        Position {
            x: clamp_axis(position.x, self.min_x, self.max_x),
            y: clamp_axis(position.y, self.min_y, self.max_y),
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        (self.min_x..=self.max_x).contains(&position.x)
            && (self.min_y..=self.max_y).contains(&position.y)
    }
}

fn clamp_axis(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FlowEdge {
    fn between(source: &str, target: &str, label: Option<String>) -> Self {
        Self {
            id: format!("edge-{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowchartGraph {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
}

/// Graph content that passed validation, before ids and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFlow {
    pub title: String,
    pub description: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl ValidatedFlow {
    fn into_graph(self, source_conversation_id: Option<&str>) -> FlowchartGraph {
        let now = Utc::now();
        FlowchartGraph {
            id: format!("flowchart-{}", now.timestamp_millis()),
            title: self.title,
            description: self.description,
            nodes: self.nodes,
            edges: self.edges,
            created_at: now,
            updated_at: now,
            source_conversation_id: source_conversation_id.map(str::to_string),
        }
    }
}

/// String ids may also arrive as JSON numbers.
fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(object: &Value, keys: &[&str], max_chars: usize) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(|text| truncate_chars(text, max_chars))
}

fn grid_slot(index: usize, bounds: &CanvasBounds) -> Position {
    let column = index % GRID_COLUMNS;
    let row = index / GRID_COLUMNS;
    Position {
        x: bounds.min_x + GRID_LEFT + column as f64 * GRID_COLUMN_WIDTH,
        y: bounds.min_y + GRID_TOP + row as f64 * GRID_ROW_HEIGHT,
    }
}

fn node_position(raw: &Value, index: usize, bounds: &CanvasBounds) -> Position {
    let slot = grid_slot(index, bounds);
    let position = raw.get("position");
    let axis = |key: &str| position.and_then(|p| p.get(key)).and_then(Value::as_f64);
    bounds.clamp(Position {
        x: axis("x").unwrap_or(slot.x),
        y: axis("y").unwrap_or(slot.y),
    })
}

fn unique_id(candidate: String, taken: &HashSet<String>) -> String {
    if !taken.contains(&candidate) {
        return candidate;
    }
    let mut suffix = 2;
    loop {
        let id = format!("{}-{}", candidate, suffix);
        if !taken.contains(&id) {
            return id;
        }
        suffix += 1;
    }
}

/// Endpoint-derived edge ids can collide when node ids contain `-`.
fn assign_unique_edge_ids(edges: &mut [FlowEdge]) {
    let mut taken = HashSet::new();
    for edge in edges.iter_mut() {
        let id = unique_id(std::mem::take(&mut edge.id), &taken);
        taken.insert(id.clone());
        edge.id = id;
    }
}

/// Make sure the graph has both a `start` and an `end` node.
///
/// Returns the edge needed to attach an appended `end` node, if one was
/// appended.
fn ensure_start_and_end(nodes: &mut Vec<FlowNode>, bounds: &CanvasBounds) -> Option<FlowEdge> {
    if nodes.is_empty() {
        return None;
    }
    if !nodes.iter().any(|n| n.node_type == NodeType::Start) {
        nodes[0].node_type = NodeType::Start;
    }

    if nodes.iter().any(|n| n.node_type == NodeType::End) {
        return None;
    }

    let start_count = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Start)
        .count();
    let last = nodes.len() - 1;
    let last_is_only_start = nodes[last].node_type == NodeType::Start && start_count == 1;

    if !last_is_only_start {
        nodes[last].node_type = NodeType::End;
        return None;
    }

    let anchor = &nodes[last];
    let taken: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let end = FlowNode {
        id: unique_id("node-end".to_string(), &taken),
        node_type: NodeType::End,
        label: "Summary".to_string(),
        description: None,
        position: bounds.clamp(Position {
            x: anchor.position.x,
            y: anchor.position.y + GRID_ROW_HEIGHT,
        }),
    };
    let edge = FlowEdge::between(&anchor.id, &end.id, None);
    nodes.push(end);
    Some(edge)
}

fn chain_edges(nodes: &[FlowNode]) -> Vec<FlowEdge> {
    nodes
        .windows(2)
        .map(|pair| FlowEdge::between(&pair[0].id, &pair[1].id, None))
        .collect()
}

/// Validate and repair a model-authored graph.
///
/// `None` means the input is unusable and the caller should fall back.
pub fn validate_flowchart(raw: &Value, bounds: &CanvasBounds) -> Option<ValidatedFlow> {
    let raw_nodes = raw.get("nodes").and_then(Value::as_array)?;
    if raw_nodes.is_empty() {
        debug!("Flowchart has no nodes");
        return None;
    }

    let mut nodes = Vec::with_capacity(raw_nodes.len() + 1);
    // Every raw id is reserved up front so generated ids never shadow one.
    let mut taken: HashSet<String> = raw_nodes
        .iter()
        .filter_map(|raw_node| id_value(raw_node.get("id")))
        .collect();
    let mut id_map: HashMap<String, String> = HashMap::new();

    for (index, raw_node) in raw_nodes.iter().enumerate() {
        let id = match id_value(raw_node.get("id")) {
            Some(raw_id) if !id_map.contains_key(&raw_id) => {
                id_map.insert(raw_id.clone(), raw_id.clone());
                raw_id
            }
            // Duplicates keep the raw id pointing at its first node
            Some(raw_id) => unique_id(raw_id, &taken),
            None => {
                let generated = unique_id(format!("node-{}", index + 1), &taken);
                id_map.insert(generated.clone(), generated.clone());
                generated
            }
        };
        taken.insert(id.clone());

        let node_type = raw_node
            .get("type")
            .and_then(Value::as_str)
            .and_then(NodeType::parse)
            .unwrap_or(NodeType::Concept);

        let label = text_field(raw_node, &["label", "title", "name"], MAX_LABEL_CHARS)
            .unwrap_or_else(|| format!("Step {}", index + 1));

        nodes.push(FlowNode {
            id,
            node_type,
            label,
            description: text_field(raw_node, &["description"], MAX_DESCRIPTION_CHARS),
            position: node_position(raw_node, index, bounds),
        });
    }

    let appended_edge = ensure_start_and_end(&mut nodes, bounds);

    let raw_edges = raw
        .get("edges")
        .or_else(|| raw.get("connections"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut edges = Vec::new();
    let mut seen_pairs = HashSet::new();
    for raw_edge in raw_edges {
        let endpoint = |keys: [&str; 2]| {
            keys.iter()
                .find_map(|key| id_value(raw_edge.get(*key)))
                .and_then(|raw_id| id_map.get(&raw_id).cloned())
        };
        let (Some(source), Some(target)) = (endpoint(["source", "from"]), endpoint(["target", "to"]))
        else {
            debug!("Dropping edge with unknown endpoint: {}", raw_edge);
            continue;
        };
        if source == target {
            debug!("Dropping self-loop on {}", source);
            continue;
        }
        if !seen_pairs.insert((source.clone(), target.clone())) {
            continue;
        }
        let label = text_field(raw_edge, &["label", "relationship"], MAX_EDGE_LABEL_CHARS);
        edges.push(FlowEdge::between(&source, &target, label));
    }

    if edges.is_empty() && nodes.len() > 1 {
        debug!("No usable edges, connecting {} nodes in order", nodes.len());
        edges = chain_edges(&nodes);
    } else if let Some(edge) = appended_edge {
        edges.push(edge);
    }
    assign_unique_edge_ids(&mut edges);

    Some(ValidatedFlow {
        title: text_field(raw, &["title"], usize::MAX).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        description: text_field(raw, &["description"], MAX_DESCRIPTION_CHARS),
        nodes,
        edges,
    })
}

fn fallback_label(content: &str) -> String {
    let first_line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("(empty message)");
    truncate_chars(first_line, MAX_LABEL_CHARS)
}

/// Linear graph built straight from the turns, one node per turn.
pub fn fallback_flowchart(turns: &[ChatTurn], bounds: &CanvasBounds) -> ValidatedFlow {
    let position = |index: usize| {
        bounds.clamp(Position {
            x: bounds.min_x
                + if index % 2 == 0 {
                    FALLBACK_LEFT_X
                } else {
                    FALLBACK_RIGHT_X
                },
            y: bounds.min_y + FALLBACK_TOP + index as f64 * FALLBACK_STEP_Y,
        })
    };

    let mut nodes: Vec<FlowNode> = if turns.is_empty() {
        vec![
            FlowNode {
                id: "node-1".to_string(),
                node_type: NodeType::Start,
                label: "Start".to_string(),
                description: None,
                position: position(0),
            },
            FlowNode {
                id: "node-2".to_string(),
                node_type: NodeType::End,
                label: "End".to_string(),
                description: None,
                position: position(1),
            },
        ]
    } else {
        turns
            .iter()
            .enumerate()
            .map(|(index, turn)| FlowNode {
                id: format!("node-{}", index + 1),
                node_type: match turn.role {
                    MessageRole::User => NodeType::Topic,
                    MessageRole::Assistant => NodeType::Concept,
                },
                label: fallback_label(&turn.content),
                description: Some(turn.content.trim())
                    .filter(|text| !text.is_empty())
                    .map(|text| truncate_chars(text, MAX_DESCRIPTION_CHARS)),
                position: position(index),
            })
            .collect()
    };

    nodes[0].node_type = NodeType::Start;
    let last = nodes.len() - 1;
    if last > 0 {
        nodes[last].node_type = NodeType::End;
    }
    let appended_edge = ensure_start_and_end(&mut nodes, bounds);

    let mut edges = chain_edges(&nodes[..nodes.len() - usize::from(appended_edge.is_some())]);
    edges.extend(appended_edge);
    assign_unique_edge_ids(&mut edges);

    ValidatedFlow {
        title: DEFAULT_TITLE.to_string(),
        description: Some("Built directly from the conversation".to_string()),
        nodes,
        edges,
    }
}

/// Builds a learning flowchart from a conversation. Never fails: anything
/// unusable from the model yields [`fallback_flowchart`] instead.
pub struct FlowchartGenerator<C> {
    completer: C,
    bounds: CanvasBounds,
}

impl<C: TextCompleter> FlowchartGenerator<C> {
    pub fn new(completer: C) -> Self {
        Self {
            completer,
            bounds: CanvasBounds::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: CanvasBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub async fn generate(
        &self,
        turns: &[ChatTurn],
        source_conversation_id: Option<&str>,
    ) -> FlowchartGraph {
        let flow = match self.try_generate(turns).await {
            Some(flow) => {
                debug!("Flowchart stage: {}", ExtractionStage::Success);
                flow
            }
            None => {
                debug!("Flowchart stage: {}", ExtractionStage::Fallback);
                fallback_flowchart(turns, &self.bounds)
            }
        };
        info!(
            "Flowchart ready: {} nodes, {} edges",
            flow.nodes.len(),
            flow.edges.len()
        );
        flow.into_graph(source_conversation_id)
    }

    async fn try_generate(&self, turns: &[ChatTurn]) -> Option<ValidatedFlow> {
        if turns.is_empty() {
            return None;
        }

        debug!("Flowchart stage: {}", ExtractionStage::Requesting);
        let reply = match self.completer.complete(&self.build_prompt(turns)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Flowchart request failed, using fallback: {}", e);
                return None;
            }
        };

        debug!("Flowchart stage: {}", ExtractionStage::Cleaning);
        let cleaned = strip_code_fences(&reply);
        let Some(json) = slice_json_object(&cleaned) else {
            warn!("Flowchart reply contains no JSON object, using fallback");
            return None;
        };

        debug!("Flowchart stage: {}", ExtractionStage::Parsing);
        let raw: Value = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Flowchart reply is not valid JSON, using fallback: {}", e);
                return None;
            }
        };

        debug!("Flowchart stage: {}", ExtractionStage::Validating);
        let flow = validate_flowchart(&raw, &self.bounds);
        if flow.is_none() {
            warn!("Flowchart reply failed validation, using fallback");
        }
        flow
    }

    fn build_prompt(&self, turns: &[ChatTurn]) -> String {
        format!(
            r#"Analyze the following tutoring conversation and turn it into a learning flowchart that shows how the concepts build on each other.

Conversation:
{transcript}

Respond with ONLY valid JSON, no commentary, in exactly this format:
{{"title":"...","description":"...","nodes":[{{"id":"1","type":"start","label":"...","description":"...","position":{{"x":100,"y":100}}}}],"edges":[{{"source":"1","target":"2","label":"..."}}]}}

Rules:
- Use between 5 and 12 nodes.
- "type" is one of: start, topic, concept, decision, process, end.
- Exactly one "start" node first and at least one "end" node last.
- Labels at most {label} characters, descriptions at most {description} characters, edge labels at most {edge_label} characters.
- Positions within x {min_x}-{max_x} and y {min_y}-{max_y}, laid out top to bottom.
- Every edge connects two existing node ids; no edge from a node to itself."#,
            transcript = build_transcript(turns, MAX_TRANSCRIPT_CHARS),
            label = MAX_LABEL_CHARS,
            description = MAX_DESCRIPTION_CHARS,
            edge_label = MAX_EDGE_LABEL_CHARS,
            min_x = self.bounds.min_x,
            max_x = self.bounds.max_x,
            min_y = self.bounds.min_y,
            max_y = self.bounds.max_y,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub node_types: BTreeMap<NodeType, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub description: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportConnection {
    pub id: String,
    pub from: String,
    pub to: String,
    pub relationship: String,
}

/// File format for sharing a flowchart outside the app
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowchartExport {
    pub title: String,
    pub description: String,
    pub exported_at: DateTime<Utc>,
    pub stats: ExportStats,
    pub nodes: Vec<ExportNode>,
    pub connections: Vec<ExportConnection>,
}

impl FlowchartGraph {
    pub fn to_export(&self) -> FlowchartExport {
        let mut node_types = BTreeMap::new();
        for node in &self.nodes {
            *node_types.entry(node.node_type).or_insert(0) += 1;
        }

        FlowchartExport {
            title: self.title.clone(),
            description: self.description.clone().unwrap_or_default(),
            exported_at: Utc::now(),
            stats: ExportStats {
                node_count: self.nodes.len(),
                edge_count: self.edges.len(),
                node_types,
            },
            nodes: self
                .nodes
                .iter()
                .map(|node| ExportNode {
                    id: node.id.clone(),
                    node_type: node.node_type,
                    label: node.label.clone(),
                    description: node.description.clone().unwrap_or_default(),
                    position: node.position,
                })
                .collect(),
            connections: self
                .edges
                .iter()
                .map(|edge| ExportConnection {
                    id: edge.id.clone(),
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                    relationship: edge.label.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Pretty-printed export document
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_export())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::mock::MockCompleter;
    use serde_json::json;

    fn bounds() -> CanvasBounds {
        CanvasBounds::default()
    }

    fn conversation() -> Vec<ChatTurn> {
        vec![
            ChatTurn::user("What is photosynthesis?"),
            ChatTurn::assistant("Plants turn light into chemical energy.\nIt happens in chloroplasts."),
            ChatTurn::user("What are the inputs?"),
            ChatTurn::assistant("Water, carbon dioxide and light."),
        ]
    }

    fn assert_invariants(flow: &ValidatedFlow, bounds: &CanvasBounds) {
        let ids: HashSet<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), flow.nodes.len(), "node ids must be unique");
        assert!(flow.nodes.iter().any(|n| n.node_type == NodeType::Start));
        assert!(flow.nodes.iter().any(|n| n.node_type == NodeType::End));
        for node in &flow.nodes {
            assert!(bounds.contains(node.position), "{:?}", node);
            assert!(node.label.chars().count() <= MAX_LABEL_CHARS);
        }
        for edge in &flow.edges {
            assert!(ids.contains(edge.source.as_str()), "{:?}", edge);
            assert!(ids.contains(edge.target.as_str()), "{:?}", edge);
            assert_ne!(edge.source, edge.target);
        }
        let edge_ids: HashSet<&str> = flow.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(edge_ids.len(), flow.edges.len(), "edge ids must be unique");
    }

    #[test]
    fn test_zero_nodes_is_rejected() {
        assert_eq!(validate_flowchart(&json!({"nodes": []}), &bounds()), None);
        assert_eq!(validate_flowchart(&json!({"title": "x"}), &bounds()), None);
        assert_eq!(validate_flowchart(&json!([1, 2]), &bounds()), None);
    }

    #[test]
    fn test_nodes_without_valid_edges_get_a_chain() {
        let raw = json!({
            "nodes": [
                {"id": "a", "type": "start", "label": "A"},
                {"id": "b", "type": "concept", "label": "B"},
                {"id": "c", "type": "concept", "label": "C"},
                {"id": "d", "type": "end", "label": "D"}
            ],
            "edges": [
                {"source": "a", "target": "zzz"},
                {"source": "b", "target": "b"}
            ]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.edges.len(), 3);
        let pairs: Vec<(&str, &str)> = flow
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("b", "c"), ("c", "d")]);
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_positions_are_clamped() {
        let raw = json!({
            "nodes": [
                {"id": "1", "type": "start", "label": "Far", "position": {"x": -500, "y": 10000}},
                {"id": "2", "type": "end", "label": "Near", "position": {"x": 300.5, "y": 200}}
            ]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.nodes[0].position, Position { x: 0.0, y: 800.0 });
        assert_eq!(flow.nodes[1].position, Position { x: 300.5, y: 200.0 });
    }

    #[test]
    fn test_self_loops_and_dangling_edges_are_dropped() {
        let raw = json!({
            "nodes": [
                {"id": "1", "type": "start", "label": "One"},
                {"id": "2", "type": "concept", "label": "Two"},
                {"id": "3", "type": "end", "label": "Three"}
            ],
            "edges": [
                {"source": "1", "target": "2", "label": "leads to"},
                {"source": "2", "target": "2"},
                {"source": "2", "target": "99"},
                {"source": "2", "target": "3"},
                {"source": "1", "target": "2", "label": "duplicate"}
            ]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.edges.len(), 2);
        assert_eq!(flow.edges[0].label.as_deref(), Some("leads to"));
        assert_eq!(flow.edges[1].source, "2");
        assert_eq!(flow.edges[1].target, "3");
    }

    #[test]
    fn test_types_are_repaired() {
        let raw = json!({
            "nodes": [
                {"id": "1", "type": "intro", "label": "Intro"},
                {"id": "2", "label": "Body"},
                {"id": "3", "type": "DECISION", "label": "Choice"},
                {"id": "4", "type": "topic", "label": "Wrap-up"}
            ],
            "edges": [{"source": "1", "target": "2"}]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        let types: Vec<NodeType> = flow.nodes.iter().map(|n| n.node_type).collect();
        assert_eq!(
            types,
            vec![NodeType::Start, NodeType::Concept, NodeType::Decision, NodeType::End]
        );
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_aliases_numeric_and_duplicate_ids() {
        let raw = json!({
            "title": "Cells",
            "nodes": [
                {"id": 1, "type": "start", "label": "Cell"},
                {"id": 1, "type": "concept", "label": "Membrane"},
                {"type": "end", "label": "Nucleus"}
            ],
            "connections": [
                {"from": 1, "to": "node-3", "relationship": "contains"}
            ]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        let ids: Vec<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1-2", "node-3"]);
        assert_eq!(flow.title, "Cells");
        assert_eq!(flow.edges.len(), 1);
        assert_eq!(flow.edges[0].source, "1");
        assert_eq!(flow.edges[0].target, "node-3");
        assert_eq!(flow.edges[0].label.as_deref(), Some("contains"));
    }

    #[test]
    fn test_renamed_duplicate_does_not_capture_later_raw_id() {
        let raw = json!({
            "nodes": [
                {"id": "1", "type": "start", "label": "A"},
                {"id": "1", "type": "concept", "label": "B"},
                {"id": "1-2", "type": "end", "label": "C"}
            ],
            "edges": [{"source": "1", "target": "1-2"}]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        let nodes: Vec<(&str, &str)> = flow
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.label.as_str()))
            .collect();
        assert_eq!(nodes, vec![("1", "A"), ("1-3", "B"), ("1-2", "C")]);
        assert_eq!(flow.edges.len(), 1);
        assert_eq!(flow.edges[0].source, "1");
        assert_eq!(flow.edges[0].target, "1-2");
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_hyphenated_ids_get_distinct_edge_ids() {
        let raw = json!({
            "nodes": [
                {"id": "a-b", "type": "start", "label": "AB"},
                {"id": "c", "type": "concept", "label": "C"},
                {"id": "a", "type": "concept", "label": "A"},
                {"id": "b-c", "type": "end", "label": "BC"}
            ],
            "edges": [
                {"source": "a-b", "target": "c"},
                {"source": "a", "target": "b-c"}
            ]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        let ids: Vec<&str> = flow.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["edge-a-b-c", "edge-a-b-c-2"]);
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_single_node_gets_an_end() {
        let raw = json!({"nodes": [{"id": "only", "type": "concept", "label": "Only"}]});
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.nodes.len(), 2);
        assert_eq!(flow.nodes[0].node_type, NodeType::Start);
        assert_eq!(flow.nodes[1].node_type, NodeType::End);
        assert_eq!(flow.edges.len(), 1);
        assert_eq!(flow.title, DEFAULT_TITLE);
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_lone_start_at_the_end_is_kept() {
        let raw = json!({
            "nodes": [
                {"id": "a", "type": "concept", "label": "A"},
                {"id": "b", "type": "start", "label": "B"}
            ],
            "edges": [{"source": "b", "target": "a"}]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.nodes[1].node_type, NodeType::Start);
        assert_eq!(flow.nodes.len(), 3);
        assert_eq!(flow.edges.len(), 2);
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_long_text_is_truncated() {
        let raw = json!({
            "nodes": [
                {"id": "1", "type": "start", "label": "x".repeat(80), "description": "y".repeat(500)},
                {"id": "2", "type": "end", "label": "End"}
            ],
            "edges": [{"source": "1", "target": "2", "label": "z".repeat(90)}]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.nodes[0].label.chars().count(), MAX_LABEL_CHARS);
        assert_eq!(
            flow.nodes[0].description.as_ref().unwrap().chars().count(),
            MAX_DESCRIPTION_CHARS
        );
        assert_eq!(
            flow.edges[0].label.as_ref().unwrap().chars().count(),
            MAX_EDGE_LABEL_CHARS
        );
    }

    #[test]
    fn test_missing_positions_use_grid() {
        let raw = json!({
            "nodes": [
                {"id": "1", "type": "start", "label": "A"},
                {"id": "2", "type": "end", "label": "B", "position": {"x": 10}}
            ]
        });
        let flow = validate_flowchart(&raw, &bounds()).unwrap();
        assert_eq!(flow.nodes[0].position, grid_slot(0, &bounds()));
        assert_eq!(flow.nodes[1].position.x, 10.0);
        assert_eq!(flow.nodes[1].position.y, grid_slot(1, &bounds()).y);
    }

    #[test]
    fn test_fallback_builds_a_chain_from_turns() {
        let flow = fallback_flowchart(&conversation(), &bounds());
        assert_eq!(flow.nodes.len(), 4);
        assert_eq!(flow.edges.len(), 3);

        let types: Vec<NodeType> = flow.nodes.iter().map(|n| n.node_type).collect();
        assert_eq!(
            types,
            vec![NodeType::Start, NodeType::Concept, NodeType::Topic, NodeType::End]
        );
        assert_eq!(flow.nodes[1].label, "Plants turn light into chemical energy.");
        assert_ne!(flow.nodes[0].position.x, flow.nodes[1].position.x);
        assert_eq!(flow.nodes[0].position.x, flow.nodes[2].position.x);
        assert!(flow.nodes[1].position.y > flow.nodes[0].position.y);
        assert_invariants(&flow, &bounds());
    }

    #[test]
    fn test_fallback_for_empty_and_single_turn_conversations() {
        let empty = fallback_flowchart(&[], &bounds());
        assert_eq!(empty.nodes.len(), 2);
        assert_eq!(empty.edges.len(), 1);
        assert_invariants(&empty, &bounds());

        let single = fallback_flowchart(&[ChatTurn::user("Hi")], &bounds());
        assert_eq!(single.nodes.len(), 2);
        assert_eq!(single.edges.len(), 1);
        assert_invariants(&single, &bounds());
    }

    #[test]
    fn test_fallback_positions_stay_on_small_canvas() {
        let tiny = CanvasBounds {
            min_x: 0.0,
            max_x: 100.0,
            min_y: 0.0,
            max_y: 100.0,
        };
        let turns: Vec<ChatTurn> = (0..10).map(|i| ChatTurn::user(format!("q{}", i))).collect();
        let flow = fallback_flowchart(&turns, &tiny);
        assert_invariants(&flow, &tiny);
    }

    #[tokio::test]
    async fn test_generator_uses_model_graph() {
        let reply = format!(
            "Here is your flowchart:\n```json\n{}\n```\nEnjoy!",
            json!({
                "title": "Photosynthesis",
                "nodes": [
                    {"id": "1", "type": "start", "label": "Light"},
                    {"id": "2", "type": "process", "label": "Chloroplast"},
                    {"id": "3", "type": "end", "label": "Glucose"}
                ],
                "edges": [
                    {"source": "1", "target": "2"},
                    {"source": "2", "target": "3"}
                ]
            })
        );
        let generator = FlowchartGenerator::new(MockCompleter::replying(reply));
        let graph = generator.generate(&conversation(), Some("conv-7")).await;

        assert_eq!(graph.title, "Photosynthesis");
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.source_conversation_id.as_deref(), Some("conv-7"));
        assert!(graph.id.starts_with("flowchart-"));

        let prompt = &generator.completer.prompts()[0];
        assert!(prompt.contains("User: What is photosynthesis?"));
        assert!(prompt.contains("between 5 and 12 nodes"));
    }

    #[tokio::test]
    async fn test_generator_falls_back_on_bad_output() {
        for reply in [
            "Sorry, I cannot draw.",
            "{\"nodes\": [",
            "{\"nodes\": []}",
        ] {
            let generator = FlowchartGenerator::new(MockCompleter::replying(reply));
            let graph = generator.generate(&conversation(), None).await;
            assert_eq!(graph.nodes.len(), conversation().len(), "reply: {}", reply);
            assert_eq!(graph.edges.len(), conversation().len() - 1);
        }

        let generator = FlowchartGenerator::new(MockCompleter::failing("offline"));
        let graph = generator.generate(&conversation(), None).await;
        assert_eq!(graph.nodes.len(), 4);
    }

    #[test]
    fn test_export_format() {
        let graph = fallback_flowchart(&conversation(), &bounds()).into_graph(None);
        let export = graph.to_export();
        assert_eq!(export.stats.node_count, 4);
        assert_eq!(export.stats.edge_count, 3);
        assert_eq!(export.stats.node_types.get(&NodeType::Concept), Some(&1));
        assert_eq!(export.stats.node_types.get(&NodeType::Start), Some(&1));

        let json: Value = serde_json::from_str(&graph.export_json().unwrap()).unwrap();
        assert_eq!(json["stats"]["node_types"]["topic"], 1);
        assert_eq!(json["nodes"][0]["type"], "start");
        assert_eq!(json["connections"][0]["from"], "node-1");
        assert_eq!(json["connections"][0]["to"], "node-2");
        assert_eq!(json["connections"][0]["relationship"], "");
        assert!(json["exported_at"].is_string());
    }
}
