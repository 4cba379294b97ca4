//! Trace endpoint selectors.
//!
//! A selector is either `net.<name>` or a chain of parts separated by `>`:
//!
//! - `.R1` matches a component (or port) named `R1`
//! - `#R1` matches by id, which for tree nodes is the name
//! - `port.left` matches a port answering to `left`, `port` any port
//! - a bare word matches a name or an element kind (`resistor`)
//!
//! Each part is searched below the matches of the previous one, and the chain
//! must end on a port or a net. When several nodes match, the first in tree
//! order wins. Strings are parsed once and cached.

use std::collections::HashMap;

use itertools::Itertools;
use thiserror::Error;

use crate::tree::props::ElementProps;
use crate::tree::{NodeId, Tree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("invalid selector \"{selector}\": {reason}")]
    Parse { selector: String, reason: String },

    #[error("could not find net \"{net}\" for selector \"{selector}\"")]
    NetNotFound { selector: String, net: String },

    #[error("could not find port for selector \"{selector}\": {ancestor} {ports}")]
    NotFound {
        selector: String,
        ancestor: String,
        /// `has ports a, b` or `has no ports`.
        ports: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorPart {
    Name(String),
    Id(String),
    Port(Option<String>),
    Bare(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Net(String),
    Chain(Vec<SelectorPart>),
}

impl Selector {
    pub fn parse(text: &str) -> Result<Selector, SelectorError> {
        let parse_err = |reason: &str| SelectorError::Parse {
            selector: text.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(parse_err("empty selector"));
        }

        if let Some(net) = trimmed.strip_prefix("net.") {
            if net.is_empty() || net.contains(char::is_whitespace) || net.contains('>') {
                return Err(parse_err("expected `net.<name>`"));
            }
            return Ok(Selector::Net(net.to_string()));
        }

        let mut parts = Vec::new();
        for raw in trimmed.split('>').map(str::trim) {
            if raw.is_empty() {
                return Err(parse_err("empty part between `>`"));
            }
            // `.R1 .pin1` is shorthand for `.R1 > .pin1`.
            for token in raw.split_whitespace() {
                parts.push(parse_part(token).ok_or_else(|| parse_err(&format!("bad part `{token}`")))?);
            }
        }
        Ok(Selector::Chain(parts))
    }

    pub fn net_name(&self) -> Option<&str> {
        match self {
            Selector::Net(name) => Some(name),
            Selector::Chain(_) => None,
        }
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '+')
}

fn parse_part(token: &str) -> Option<SelectorPart> {
    if token == "port" {
        return Some(SelectorPart::Port(None));
    }
    if let Some(alias) = token.strip_prefix("port.") {
        return is_ident(alias).then(|| SelectorPart::Port(Some(alias.to_string())));
    }
    if let Some(name) = token.strip_prefix('.') {
        return is_ident(name).then(|| SelectorPart::Name(name.to_string()));
    }
    if let Some(id) = token.strip_prefix('#') {
        return is_ident(id).then(|| SelectorPart::Id(id.to_string()));
    }
    is_ident(token).then(|| SelectorPart::Bare(token.to_string()))
}

fn part_matches(tree: &Tree, id: NodeId, part: &SelectorPart) -> bool {
    let Some(props) = tree.props(id) else {
        return false;
    };
    let named = |name: &str| match props {
        ElementProps::Port(port) => port.matches(name),
        other => other.name() == Some(name),
    };
    match part {
        SelectorPart::Name(name) | SelectorPart::Id(name) => named(name),
        SelectorPart::Port(None) => matches!(props, ElementProps::Port(_)),
        SelectorPart::Port(Some(alias)) => {
            matches!(props, ElementProps::Port(port) if port.matches(alias))
        }
        SelectorPart::Bare(word) => named(word) || props.kind_name() == word,
    }
}

/// Candidates for `part` strictly below `base`.
fn candidates(tree: &Tree, base: NodeId, part: &SelectorPart) -> Vec<NodeId> {
    let indexed = match part {
        SelectorPart::Name(name) | SelectorPart::Id(name) => Some(name),
        SelectorPart::Port(Some(alias)) => Some(alias),
        SelectorPart::Port(None) | SelectorPart::Bare(_) => None,
    };
    match indexed {
        Some(key) => tree
            .by_name(key)
            .iter()
            .copied()
            .filter(|n| *n != base && tree.is_descendant_of(*n, base))
            .filter(|n| part_matches(tree, *n, part))
            .collect(),
        None => tree
            .descendants(base)
            .into_iter()
            .filter(|n| part_matches(tree, *n, part))
            .collect(),
    }
}

/// Subcircuit scopes searched for a selector written at `from`, innermost first.
fn scopes(tree: &Tree, from: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut scope = tree.subcircuit_of(from);
    loop {
        out.push(scope);
        if scope == tree.root() {
            break;
        }
        let next = tree.parent_subcircuit_of(scope);
        if next == scope {
            break;
        }
        scope = next;
    }
    out
}

fn first_in_tree_order(tree: &Tree, ids: impl IntoIterator<Item = NodeId>) -> Option<NodeId> {
    ids.into_iter().min_by_key(|id| tree.order_key(*id))
}

fn port_listing(tree: &Tree, id: NodeId) -> String {
    let ports = tree.ports_of(id);
    if ports.is_empty() {
        return "has no ports".to_string();
    }
    let listed = ports
        .iter()
        .filter_map(|p| match tree.props(*p) {
            Some(ElementProps::Port(port)) => {
                let aliases = port.aliases.iter().filter(|a| **a != port.name).join(", ");
                Some(if aliases.is_empty() {
                    port.name.clone()
                } else {
                    format!("{} ({aliases})", port.name)
                })
            }
            _ => None,
        })
        .join(", ");
    format!("has ports {listed}")
}

/// Resolve a parsed selector written at node `from` to a port or net node.
pub fn resolve(tree: &Tree, from: NodeId, selector: &Selector, text: &str) -> Result<NodeId, SelectorError> {
    match selector {
        Selector::Net(name) => scopes(tree, from)
            .into_iter()
            .find_map(|scope| {
                first_in_tree_order(
                    tree,
                    tree.by_name(name).iter().copied().filter(|n| {
                        matches!(tree.props(*n), Some(ElementProps::Net(_)))
                            && tree.subcircuit_of(*n) == scope
                    }),
                )
            })
            .ok_or_else(|| SelectorError::NetNotFound {
                selector: text.to_string(),
                net: name.clone(),
            }),
        Selector::Chain(parts) => {
            let scopes = scopes(tree, from);
            let mut nearest: Option<NodeId> = None;
            for scope in &scopes {
                match resolve_chain(tree, *scope, parts) {
                    Ok(found) => return Ok(found),
                    Err(resolved) => {
                        if nearest.is_none() {
                            nearest = resolved;
                        }
                    }
                }
            }
            let ancestor = nearest.unwrap_or(scopes[0]);
            let describe = tree
                .get(ancestor)
                .map(|n| n.describe())
                .unwrap_or_else(|| ancestor.to_string());
            Err(SelectorError::NotFound {
                selector: text.to_string(),
                ancestor: describe,
                ports: port_listing(tree, ancestor),
            })
        }
    }
}

/// `Err` carries the deepest node the chain did resolve to, if any.
fn resolve_chain(tree: &Tree, scope: NodeId, parts: &[SelectorPart]) -> Result<NodeId, Option<NodeId>> {
    let mut current = vec![scope];
    let mut resolved: Option<NodeId> = None;

    for part in parts {
        let mut next: Vec<NodeId> = current
            .iter()
            .flat_map(|base| candidates(tree, *base, part))
            .unique()
            .collect();
        if next.is_empty() {
            return Err(resolved);
        }
        next.sort_by_key(|id| tree.order_key(*id));
        resolved = next.first().copied();
        current = next;
    }

    current
        .into_iter()
        .find(|id| matches!(tree.props(*id), Some(ElementProps::Port(_) | ElementProps::Net(_))))
        .ok_or(resolved)
}

/// Parsed selectors by source string.
#[derive(Debug, Default)]
pub struct SelectorCache {
    parsed: HashMap<String, Result<Selector, SelectorError>>,
}

impl SelectorCache {
    pub fn parse(&mut self, text: &str) -> Result<Selector, SelectorError> {
        self.parsed
            .entry(text.to_string())
            .or_insert_with(|| Selector::parse(text))
            .clone()
    }

    pub fn resolve(&mut self, tree: &Tree, from: NodeId, text: &str) -> Result<NodeId, SelectorError> {
        let selector = self.parse(text)?;
        resolve(tree, from, &selector, text)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::port::standard_ports;
    use crate::tree::props::ElementDescription;
    use insta::assert_snapshot;
    use serde_json::json;

    fn tree() -> Tree {
        let desc: ElementDescription = serde_json::from_value(json!({
            "type": "board",
            "children": [
                { "type": "resistor", "name": "R1" },
                { "type": "capacitor", "name": "C1" },
                { "type": "chip", "name": "U1" },
                { "type": "net", "name": "GND" },
                { "type": "group", "name": "G", "subcircuit": true, "children": [
                    { "type": "resistor", "name": "R1" },
                    { "type": "trace", "from": ".R1 > .pin1", "to": "net.GND" }
                ]}
            ]
        }))
        .unwrap();
        let mut tree = Tree::build(&desc);
        for id in tree.ids() {
            let props = tree.get(id).unwrap().props.clone();
            for port in standard_ports(&props).unwrap_or_default() {
                tree.add_child(id, ElementProps::Port(port));
            }
        }
        tree
    }

    #[test]
    fn parses_chains_and_nets() {
        assert_eq!(Selector::parse("net.GND"), Ok(Selector::Net("GND".into())));
        assert_eq!(
            Selector::parse(".R1 > port.left"),
            Ok(Selector::Chain(vec![
                SelectorPart::Name("R1".into()),
                SelectorPart::Port(Some("left".into()))
            ]))
        );
        assert_eq!(
            Selector::parse("R1 .pin2"),
            Ok(Selector::Chain(vec![
                SelectorPart::Bare("R1".into()),
                SelectorPart::Name("pin2".into())
            ]))
        );
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert_snapshot!(Selector::parse(" > .R1").unwrap_err(), @r#"invalid selector " > .R1": empty part between `>`"#);
        assert_snapshot!(Selector::parse("net.").unwrap_err(), @r#"invalid selector "net.": expected `net.<name>`"#);
    }

    #[test]
    fn resolves_port_by_alias() {
        let tree = tree();
        let root = tree.root();
        let port = resolve(&tree, root, &Selector::parse("R1 > port.pin1").unwrap(), "R1 > port.pin1").unwrap();
        let node = tree.get(port).unwrap();
        assert_eq!(node.name(), Some("pin1"));
        let r1 = tree.parent(port).unwrap();
        assert_eq!(tree.order_key(r1), vec![0]);

        let cathode = resolve(&tree, root, &Selector::parse(".C1 > .cathode").unwrap(), ".C1 > .cathode").unwrap();
        assert_eq!(tree.get(cathode).unwrap().name(), Some("pin2"));
    }

    #[test]
    fn nearest_subcircuit_wins_then_falls_back_outwards() {
        let tree = tree();
        let trace = tree
            .iter()
            .find(|n| matches!(n.props, ElementProps::Trace(_)))
            .unwrap()
            .id;
        let mut cache = SelectorCache::default();
        let inner = cache.resolve(&tree, trace, ".R1 > .pin1").unwrap();
        let group = tree.by_name("G")[0];
        assert!(tree.is_descendant_of(inner, group));

        let gnd = cache.resolve(&tree, trace, "net.GND").unwrap();
        assert!(!tree.is_descendant_of(gnd, group));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn typo_lists_real_ports() {
        let tree = tree();
        let err = resolve(&tree, tree.root(), &Selector::parse("R1 > port.pni1").unwrap(), "R1 > port.pni1")
            .unwrap_err();
        assert_snapshot!(err, @r#"could not find port for selector "R1 > port.pni1": resistor "R1" has ports pin1 (1, left), pin2 (2, right)"#);
    }

    #[test]
    fn component_without_ports_says_so() {
        let tree = tree();
        let err = resolve(&tree, tree.root(), &Selector::parse(".U1 > .pin1").unwrap(), ".U1 > .pin1").unwrap_err();
        assert_snapshot!(err, @r#"could not find port for selector ".U1 > .pin1": chip "U1" has no ports"#);
    }

    #[test]
    fn missing_net_is_reported() {
        let tree = tree();
        let err = resolve(&tree, tree.root(), &Selector::parse("net.VCC").unwrap(), "net.VCC").unwrap_err();
        assert_snapshot!(err, @r#"could not find net "VCC" for selector "net.VCC""#);
    }
}
