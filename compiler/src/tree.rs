// tree.rs — Program tree consumed by the lowering engine
//
// Typed mirror of the validator's output: a list of nodes, each either a
// stream (ordered member chain) or a declared block whose ports are a
// per-kind record. Deserialized from JSON and checked once here, so the
// lowering phases can match on shapes instead of probing string keys.
//
// Preconditions: input is the JSON produced by the upstream validator.
// Postconditions: a `Program` that passed `validate` has a platform domain,
//   unique block names per block list, module ports bound to declared
//   blocks, loop termination flags declared, and 1-based literal bundle
//   indices.
// Failure modes: malformed JSON → `InvalidTree`; structural violations →
//   `InvalidTree` or `MissingPlatformDomain`.
// Side effects: none.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LowerError;

/// Domain identifier as seen by lowering. `None` inherits the surrounding
/// domain.
pub type DomainKey = Option<String>;

// ── Source locations ────────────────────────────────────────────────────────

/// Source position carried by streams and members for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
}

impl SourceLoc {
    pub fn new(filename: impl Into<String>, line: u32) -> Self {
        SourceLoc {
            line: Some(line),
            filename: filename.into(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.line.is_some() || !self.filename.is_empty()
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.filename.is_empty(), self.line) {
            (false, Some(line)) => write!(f, "{}:{}", self.filename, line),
            (false, None) => write!(f, "{}", self.filename),
            (true, Some(line)) => write!(f, "line {}", line),
            (true, None) => write!(f, "<unknown>"),
        }
    }
}

// ── Values and types ────────────────────────────────────────────────────────

/// Storage type of a materialized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Real,
    Int,
    Bool,
    Str,
}

/// Literal value as written in the source program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Real(f64),
    Str(String),
    List(Vec<Literal>),
}

impl Literal {
    pub fn value_type(&self) -> ValueType {
        match self {
            Literal::Bool(_) => ValueType::Bool,
            Literal::Real(_) => ValueType::Real,
            Literal::Str(_) => ValueType::Str,
            Literal::List(items) => items.first().map_or(ValueType::Real, Literal::value_type),
        }
    }

    /// Flatten into per-element literals (a scalar yields itself).
    pub fn elements(&self) -> Vec<&Literal> {
        match self {
            Literal::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// The documented fallback when a value is needed but absent.
    pub fn default_for(ty: ValueType) -> Literal {
        match ty {
            ValueType::Real | ValueType::Int => Literal::Real(0.0),
            ValueType::Bool => Literal::Bool(false),
            ValueType::Str => Literal::Str(String::new()),
        }
    }
}

// ── Expression operators ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Greater,
    Lesser,
    Equal,
    NotEqual,
    GreaterEqual,
    LesserEqual,
}

impl BinaryOp {
    pub fn result_type(self) -> ValueType {
        match self {
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
                ValueType::Real
            }
            _ => ValueType::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    UnaryMinus,
    LogicalNot,
}

impl UnaryOp {
    pub fn result_type(self) -> ValueType {
        match self {
            UnaryOp::UnaryMinus => ValueType::Real,
            UnaryOp::LogicalNot => ValueType::Bool,
        }
    }
}

// ── Program ─────────────────────────────────────────────────────────────────

fn default_platform_rate() -> f64 {
    44100.0
}

/// Platform-wide settings supplied alongside the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    /// Domain hosting type declarations and unplaced code.
    #[serde(default)]
    pub domain: Option<String>,
    /// Order in which domain sections appear in the output.
    #[serde(default)]
    pub domain_order: Vec<String>,
    #[serde(default = "default_platform_rate")]
    pub rate: f64,
    #[serde(default)]
    pub framework: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            domain: None,
            domain_order: Vec::new(),
            rate: default_platform_rate(),
            framework: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Stream(Stream),
    Block(Block),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub members: Vec<Member>,
    #[serde(flatten)]
    pub loc: SourceLoc,
}

// ── Blocks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Element count for bundles and buffers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(flatten)]
    pub kind: BlockKind,
    #[serde(flatten)]
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BlockKind {
    #[serde(rename = "signal")]
    Signal(SignalPorts),
    #[serde(rename = "constant")]
    Constant(ConstantPorts),
    #[serde(rename = "switch")]
    Switch(SignalPorts),
    #[serde(rename = "trigger")]
    Trigger(SignalPorts),
    #[serde(rename = "signalbridge")]
    SignalBridge(BridgePorts),
    #[serde(rename = "module")]
    Module(ModulePorts),
    #[serde(rename = "reaction")]
    Reaction(ModulePorts),
    #[serde(rename = "loop")]
    Loop(ModulePorts),
    #[serde(rename = "buffer")]
    Buffer(BufferPorts),
    #[serde(rename = "platformBlock")]
    PlatformBlock(PlatformPorts),
    #[serde(rename = "platformModule")]
    PlatformModule(PlatformPorts),
    #[serde(rename = "ringBufferType")]
    RingBufferType(RingBufferPorts),
    #[serde(rename = "_domainDefinition")]
    DomainDefinition(DomainPorts),
}

/// Domain annotation: a concrete name or a property of an enclosing
/// module's connected port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainRef {
    Named(String),
    Property { portproperty: PortPropertyRef },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortPropertyRef {
    pub port: String,
    pub property: String,
    #[serde(flatten)]
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPorts {
    #[serde(default)]
    pub domain: Option<DomainRef>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub default: Option<Literal>,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
    #[serde(default)]
    pub native: Option<NativeCode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstantPorts {
    #[serde(default)]
    pub value: Option<Literal>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePorts {
    #[serde(default)]
    pub input_domain: Option<DomainRef>,
    #[serde(default)]
    pub output_domain: Option<DomainRef>,
    /// `"switch"` bridges carry booleans.
    #[serde(default)]
    pub bridge_type: Option<String>,
    #[serde(default)]
    pub default: Option<Literal>,
    #[serde(default)]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePorts {
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub ports: Vec<PortDecl>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
    #[serde(default)]
    pub rate: Option<f64>,
    /// Loops only: the boolean block that ends the iteration.
    #[serde(default)]
    pub terminate_when: Option<String>,
}

impl ModulePorts {
    pub fn port(&self, kind: PortKind) -> Option<&PortDecl> {
        self.ports.iter().find(|p| p.kind == kind)
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PortKind,
    /// Internal block that carries the port's value.
    pub block: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortKind {
    MainInput,
    MainOutput,
    PropertyInput,
    PropertyOutput,
}

impl PortKind {
    pub fn is_output(self) -> bool {
        matches!(self, PortKind::MainOutput | PortKind::PropertyOutput)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferPorts {
    /// Name of the `ringBufferType` block implementing the buffer.
    pub internal_type: String,
    #[serde(default)]
    pub default: Option<Literal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPorts {
    #[serde(default)]
    pub native: NativeCode,
    /// Class text for platform modules, emitted verbatim.
    #[serde(default)]
    pub declaration: Option<String>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
    #[serde(default)]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingBufferPorts {
    pub class_name: String,
    pub declaration: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPorts {
    pub domain_name: String,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub framework: Option<String>,
}

/// Platform-native code attached to a block. Snippets may contain the
/// markers understood by `snippet::substitute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCode {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub processing: Option<String>,
    #[serde(default)]
    pub pre_processing: Option<String>,
    #[serde(default)]
    pub post_processing: Option<String>,
    #[serde(default)]
    pub pre_processing_once: Option<String>,
    #[serde(default)]
    pub post_processing_once: Option<String>,
    #[serde(default)]
    pub initializations: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub include_dir: Vec<String>,
    #[serde(default)]
    pub link_to: Vec<String>,
    #[serde(default)]
    pub link_dir: Vec<String>,
}

impl Block {
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            BlockKind::Signal(_) => "signal",
            BlockKind::Constant(_) => "constant",
            BlockKind::Switch(_) => "switch",
            BlockKind::Trigger(_) => "trigger",
            BlockKind::SignalBridge(_) => "signalbridge",
            BlockKind::Module(_) => "module",
            BlockKind::Reaction(_) => "reaction",
            BlockKind::Loop(_) => "loop",
            BlockKind::Buffer(_) => "buffer",
            BlockKind::PlatformBlock(_) => "platformBlock",
            BlockKind::PlatformModule(_) => "platformModule",
            BlockKind::RingBufferType(_) => "ringBufferType",
            BlockKind::DomainDefinition(_) => "_domainDefinition",
        }
    }

    pub fn domain_ref(&self) -> Option<&DomainRef> {
        match &self.kind {
            BlockKind::Signal(p) | BlockKind::Switch(p) | BlockKind::Trigger(p) => p.domain.as_ref(),
            BlockKind::Constant(p) => p.domain.as_ref(),
            BlockKind::Module(p) | BlockKind::Reaction(p) | BlockKind::Loop(p) => p.domain.as_ref(),
            BlockKind::PlatformBlock(p) | BlockKind::PlatformModule(p) => p.domain.as_ref(),
            _ => None,
        }
    }

    /// Explicit processing rate; non-positive rates are unconstrained.
    pub fn rate(&self) -> Option<f64> {
        let rate = match &self.kind {
            BlockKind::Signal(p) | BlockKind::Switch(p) | BlockKind::Trigger(p) => p.rate,
            BlockKind::SignalBridge(p) => p.rate,
            BlockKind::Module(p) | BlockKind::Reaction(p) | BlockKind::Loop(p) => p.rate,
            BlockKind::PlatformBlock(p) | BlockKind::PlatformModule(p) => p.rate,
            _ => None,
        };
        rate.filter(|r| *r > 0.0)
    }

    pub fn default_value(&self) -> Option<&Literal> {
        match &self.kind {
            BlockKind::Signal(p) | BlockKind::Switch(p) | BlockKind::Trigger(p) => p.default.as_ref(),
            BlockKind::Constant(p) => p.value.as_ref(),
            BlockKind::SignalBridge(p) => p.default.as_ref(),
            BlockKind::Buffer(p) => p.default.as_ref(),
            _ => None,
        }
    }

    pub fn native(&self) -> Option<&NativeCode> {
        match &self.kind {
            BlockKind::Signal(p) | BlockKind::Switch(p) | BlockKind::Trigger(p) => p.native.as_ref(),
            BlockKind::PlatformBlock(p) | BlockKind::PlatformModule(p) => Some(&p.native),
            _ => None,
        }
    }

    /// Storage type of the values this block holds.
    pub fn value_type(&self) -> ValueType {
        match &self.kind {
            BlockKind::Switch(_) | BlockKind::Trigger(_) => ValueType::Bool,
            BlockKind::SignalBridge(p) if p.bridge_type.as_deref() == Some("switch") => {
                ValueType::Bool
            }
            _ => self
                .default_value()
                .map_or(ValueType::Real, Literal::value_type),
        }
    }

    /// Named property exposed through module ports (`size`, `rate`,
    /// `default`). `domain` is resolved by the scope layer.
    pub fn property(&self, name: &str) -> Option<Literal> {
        match name {
            "size" => self.size.map(|s| Literal::Real(s as f64)),
            "rate" => self.rate().map(Literal::Real),
            "default" => self.default_value().cloned(),
            "domain" => match self.domain_ref() {
                Some(DomainRef::Named(d)) => Some(Literal::Str(d.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Namespace filter: unqualified blocks and blocks of the active
    /// framework are visible.
    pub fn visible_in(&self, framework: Option<&str>) -> bool {
        match self.namespace.as_deref() {
            None | Some("") => true,
            Some(ns) => Some(ns) == framework,
        }
    }
}

// ── Stream members ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Member {
    Name(NameRef),
    Bundle(BundleRef),
    Function(FunctionCall),
    Expression(Expression),
    List(Vec<Member>),
    Value(Literal),
    #[serde(rename = "portproperty")]
    PortProperty(PortPropertyRef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
    #[serde(flatten)]
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRef {
    pub name: String,
    pub index: BundleIndex,
    #[serde(flatten)]
    pub loc: SourceLoc,
}

/// 1-based bundle index: a literal position or the name of a block
/// holding the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundleIndex {
    Literal(u32),
    Name(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortValue>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(flatten)]
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortValue {
    pub name: String,
    pub value: Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Binary {
        #[serde(rename = "type")]
        op: BinaryOp,
        left: Box<Member>,
        right: Box<Member>,
    },
    Unary {
        #[serde(rename = "type")]
        op: UnaryOp,
        value: Box<Member>,
    },
}

impl Member {
    pub fn loc(&self) -> Option<&SourceLoc> {
        match self {
            Member::Name(n) => Some(&n.loc),
            Member::Bundle(b) => Some(&b.loc),
            Member::Function(f) => Some(&f.loc),
            Member::PortProperty(p) => Some(&p.loc),
            _ => None,
        }
    }

    /// Name of the referenced declaration, for members that have one.
    pub fn reference_name(&self) -> Option<&str> {
        match self {
            Member::Name(n) => Some(&n.name),
            Member::Bundle(b) => Some(&b.name),
            Member::Function(f) => Some(&f.name),
            _ => None,
        }
    }
}

// ── Program access ──────────────────────────────────────────────────────────

impl Program {
    /// Parse the validator's JSON output.
    pub fn from_json(text: &str) -> Result<Program, LowerError> {
        serde_json::from_str(text).map_err(|e| LowerError::InvalidTree(e.to_string()))
    }

    pub fn root_blocks(&self) -> impl Iterator<Item = &Block> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Block(b) => Some(b),
            Node::Stream(_) => None,
        })
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Stream(s) => Some(s),
            Node::Block(_) => None,
        })
    }

    /// Definition block for a domain, searched among the root blocks.
    pub fn domain_definition(&self, domain: &str) -> Option<&DomainPorts> {
        self.root_blocks().find_map(|b| match &b.kind {
            BlockKind::DomainDefinition(d) if d.domain_name == domain => Some(d),
            _ => None,
        })
    }

    /// Structural checks performed once at the tree boundary.
    pub fn validate(&self) -> Result<(), LowerError> {
        if self.platform.domain.as_deref().map_or(true, str::is_empty) {
            return Err(LowerError::MissingPlatformDomain);
        }
        let roots: Vec<&Block> = self.root_blocks().collect();
        validate_blocks(&roots, &[], "program root")?;
        for stream in self.streams() {
            validate_members(&stream.members)?;
        }
        Ok(())
    }
}

/// `outer` holds every block visible from enclosing scopes.
fn validate_blocks(blocks: &[&Block], outer: &[&Block], owner: &str) -> Result<(), LowerError> {
    let mut seen = HashSet::new();
    for block in blocks {
        let key = (block.name.as_str(), block.namespace.as_deref().unwrap_or(""));
        if !seen.insert(key) {
            return Err(LowerError::InvalidTree(format!(
                "duplicate declaration '{}' in {}",
                block.name, owner
            )));
        }
        match &block.kind {
            BlockKind::Module(body) | BlockKind::Reaction(body) | BlockKind::Loop(body) => {
                let visible: Vec<&Block> = blocks.iter().chain(outer).copied().collect();
                validate_body(block, body, &visible)?;
            }
            BlockKind::Buffer(ports) => {
                if ports.internal_type.is_empty() {
                    return Err(LowerError::InvalidTree(format!(
                        "buffer '{}' has no internal type",
                        block.name
                    )));
                }
                if block.size.map_or(true, |s| s == 0) {
                    return Err(LowerError::InvalidTree(format!(
                        "buffer '{}' needs a non-zero size",
                        block.name
                    )));
                }
                let mut candidates = blocks
                    .iter()
                    .chain(outer)
                    .filter(|b| b.name == ports.internal_type)
                    .peekable();
                if candidates.peek().is_none() {
                    return Err(LowerError::InvalidTree(format!(
                        "buffer '{}' uses undeclared ring buffer type '{}'",
                        block.name, ports.internal_type
                    )));
                }
                if !candidates.any(|b| matches!(b.kind, BlockKind::RingBufferType(_))) {
                    return Err(LowerError::InvalidTree(format!(
                        "buffer '{}' uses '{}', which is not a ringBufferType",
                        block.name, ports.internal_type
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_body(block: &Block, body: &ModulePorts, outer: &[&Block]) -> Result<(), LowerError> {
    for port in &body.ports {
        if body.block(&port.block).is_none() {
            return Err(LowerError::InvalidTree(format!(
                "port '{}' of '{}' refers to undeclared block '{}'",
                port.name, block.name, port.block
            )));
        }
    }
    if let BlockKind::Loop(_) = block.kind {
        match body.terminate_when.as_deref() {
            Some(flag) if body.block(flag).is_some() => {}
            Some(flag) => {
                return Err(LowerError::InvalidTree(format!(
                    "loop '{}' terminates on undeclared block '{}'",
                    block.name, flag
                )))
            }
            None => {
                return Err(LowerError::InvalidTree(format!(
                    "loop '{}' has no termination flag",
                    block.name
                )))
            }
        }
    }
    let inner: Vec<&Block> = body.blocks.iter().collect();
    validate_blocks(&inner, outer, &format!("'{}'", block.name))?;
    for stream in &body.streams {
        validate_members(&stream.members)?;
    }
    Ok(())
}

fn validate_members(members: &[Member]) -> Result<(), LowerError> {
    for member in members {
        match member {
            Member::Bundle(b) if b.index == BundleIndex::Literal(0) => {
                return Err(LowerError::InvalidTree(format!(
                    "bundle '{}' indexed with 0 at {} (indices start at 1)",
                    b.name, b.loc
                )));
            }
            Member::List(items) => validate_members(items)?,
            Member::Function(f) => {
                for port in &f.ports {
                    validate_members(std::slice::from_ref(&port.value))?;
                }
            }
            Member::Expression(Expression::Binary { left, right, .. }) => {
                validate_members(std::slice::from_ref(left.as_ref()))?;
                validate_members(std::slice::from_ref(right.as_ref()))?;
            }
            Member::Expression(Expression::Unary { value, .. }) => {
                validate_members(std::slice::from_ref(value.as_ref()))?;
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Program {
        Program::from_json(text).expect("tree should parse")
    }

    #[test]
    fn parses_signal_block_with_typed_ports() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"block": {"name": "Osc", "type": "signal", "domain": "Audio",
                                      "rate": 44100, "default": 0.5, "line": 3, "filename": "a.dl"}}]}"#,
        );
        let block = p.root_blocks().next().expect("one block");
        assert_eq!(block.kind_name(), "signal");
        assert_eq!(block.rate(), Some(44100.0));
        assert_eq!(block.default_value(), Some(&Literal::Real(0.5)));
        assert_eq!(block.domain_ref(), Some(&DomainRef::Named("Audio".into())));
        assert_eq!(block.loc, SourceLoc::new("a.dl", 3));
    }

    #[test]
    fn parses_stream_members() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"stream": {"members": [
                    {"value": 1.0},
                    {"expression": {"type": "Add", "left": {"name": {"name": "A"}}, "right": {"value": 2.0}}},
                    {"bundle": {"name": "B", "index": 2}},
                    {"list": [{"name": {"name": "C"}}, {"name": {"name": "D"}}]}
                ], "line": 7}}]}"#,
        );
        let stream = p.streams().next().expect("one stream");
        assert_eq!(stream.members.len(), 4);
        assert!(matches!(
            &stream.members[1],
            Member::Expression(Expression::Binary { op: BinaryOp::Add, .. })
        ));
        assert!(matches!(&stream.members[2], Member::Bundle(b) if b.index == BundleIndex::Literal(2)));
        assert_eq!(stream.loc.line, Some(7));
    }

    #[test]
    fn unary_expression_is_distinguished_from_binary() {
        let m: Member =
            serde_json::from_str(r#"{"expression": {"type": "UnaryMinus", "value": {"value": 1.0}}}"#)
                .expect("unary parses");
        assert!(matches!(
            m,
            Member::Expression(Expression::Unary { op: UnaryOp::UnaryMinus, .. })
        ));
    }

    #[test]
    fn port_property_domain_ref() {
        let d: DomainRef =
            serde_json::from_str(r#"{"portproperty": {"port": "Output", "property": "domain"}}"#)
                .expect("domain ref parses");
        assert!(matches!(d, DomainRef::Property { portproperty } if portproperty.port == "Output"));
    }

    #[test]
    fn missing_platform_domain_is_rejected() {
        let p = parse(r#"{"nodes": []}"#);
        assert_eq!(p.validate(), Err(LowerError::MissingPlatformDomain));
    }

    #[test]
    fn zero_bundle_index_is_rejected() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"stream": {"members": [{"bundle": {"name": "B", "index": 0}}]}}]}"#,
        );
        assert!(matches!(p.validate(), Err(LowerError::InvalidTree(msg)) if msg.contains("indices start at 1")));
    }

    #[test]
    fn loop_without_declared_flag_is_rejected() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"block": {"name": "L", "type": "loop", "terminateWhen": "Done"}}]}"#,
        );
        assert!(matches!(p.validate(), Err(LowerError::InvalidTree(msg)) if msg.contains("Done")));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"block": {"name": "X", "type": "signal"}},
                          {"block": {"name": "X", "type": "switch"}}]}"#,
        );
        assert!(matches!(p.validate(), Err(LowerError::InvalidTree(_))));
    }

    #[test]
    fn buffer_with_undeclared_ring_type_is_rejected() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"block": {"name": "Fifo", "type": "buffer", "size": 8, "internalType": "Ring"}}]}"#,
        );
        assert!(matches!(p.validate(), Err(LowerError::InvalidTree(msg)) if msg.contains("undeclared ring buffer type 'Ring'")));
    }

    #[test]
    fn buffer_with_non_ring_internal_type_is_rejected() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"block": {"name": "Osc", "type": "signal", "domain": "Audio"}},
                          {"block": {"name": "Fifo", "type": "buffer", "size": 8, "internalType": "Osc"}}]}"#,
        );
        assert!(matches!(p.validate(), Err(LowerError::InvalidTree(msg)) if msg.contains("not a ringBufferType")));
    }

    #[test]
    fn buffer_inside_module_sees_root_ring_type() {
        let p = parse(
            r#"{"platform": {"domain": "Audio"},
                "nodes": [{"block": {"name": "Ring", "type": "ringBufferType", "className": "Ring", "declaration": ""}},
                          {"block": {"name": "M", "type": "module",
                                     "blocks": [{"name": "Fifo", "type": "buffer", "size": 4, "internalType": "Ring"}]}}]}"#,
        );
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn namespace_filter() {
        let mut b = Block {
            name: "Out".into(),
            namespace: Some("Gamma".into()),
            size: None,
            kind: BlockKind::Signal(SignalPorts::default()),
            loc: SourceLoc::default(),
        };
        assert!(b.visible_in(Some("Gamma")));
        assert!(!b.visible_in(Some("Other")));
        assert!(!b.visible_in(None));
        b.namespace = Some(String::new());
        assert!(b.visible_in(None));
    }

    #[test]
    fn literal_list_elements_and_type() {
        let l = Literal::List(vec![Literal::Bool(true), Literal::Bool(false)]);
        assert_eq!(l.value_type(), ValueType::Bool);
        assert_eq!(l.elements().len(), 2);
        assert_eq!(Literal::default_for(ValueType::Str), Literal::Str(String::new()));
    }
}
