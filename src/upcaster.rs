//! Schema evolution for stored payloads.
//!
//! An upcaster is a stateless, pure transformation from one payload version
//! to the next. Edges are registered per event type and resolved once at
//! startup into a chain per source version, so reads pay a single map
//! lookup.

use std::collections::HashMap;
use std::fmt;

/// One registered transformation edge.
pub struct UpcasterEdge {
    pub event_type: &'static str,
    pub from_version: u64,
    pub to_version: u64,
    pub transform: fn(payload: &[u8]) -> Vec<u8>,
}

/// Rejected upcaster configurations. All of these are programming errors
/// and surface at build time, never at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpcasterError {
    DuplicateEdge {
        event_type: String,
        from_version: u64,
    },
    /// Every version appears as a source; the graph never terminates.
    NoTerminal { event_type: String },
    /// More than one version is a sink; the graph does not converge.
    MultipleTerminals {
        event_type: String,
        terminals: Vec<u64>,
    },
    Cycle {
        event_type: String,
        at_version: u64,
    },
    /// A source version's walk ends before reaching the terminal.
    Unreachable {
        event_type: String,
        from_version: u64,
    },
}

impl fmt::Display for UpcasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpcasterError::DuplicateEdge {
                event_type,
                from_version,
            } => write!(
                f,
                "duplicate upcaster edge for {} from version {}",
                event_type, from_version
            ),
            UpcasterError::NoTerminal { event_type } => {
                write!(f, "upcaster graph for {} has no terminal version", event_type)
            }
            UpcasterError::MultipleTerminals {
                event_type,
                terminals,
            } => write!(
                f,
                "upcaster graph for {} has multiple terminal versions: {:?}",
                event_type, terminals
            ),
            UpcasterError::Cycle {
                event_type,
                at_version,
            } => write!(
                f,
                "upcaster graph for {} cycles at version {}",
                event_type, at_version
            ),
            UpcasterError::Unreachable {
                event_type,
                from_version,
            } => write!(
                f,
                "upcaster chain for {} from version {} does not reach the terminal",
                event_type, from_version
            ),
        }
    }
}

impl std::error::Error for UpcasterError {}

struct Chain {
    transforms: Vec<fn(&[u8]) -> Vec<u8>>,
    to_version: u64,
}

/// Resolved upcaster chains, one per (event type, source version).
///
/// Built once at startup; `upcast` is an O(1) lookup. Pairs with no
/// registered chain pass through unchanged.
pub struct UpcasterChain {
    chains: HashMap<(String, u64), Chain>,
}

impl Default for UpcasterChain {
    fn default() -> Self {
        UpcasterChain {
            chains: HashMap::new(),
        }
    }
}

impl fmt::Debug for UpcasterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&(String, u64)> = self.chains.keys().collect();
        keys.sort();
        f.debug_struct("UpcasterChain").field("chains", &keys).finish()
    }
}

impl UpcasterChain {
    /// A chain with no registered edges; every payload passes through.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build chains from registered edges, validating convergence.
    pub fn build(edges: &[UpcasterEdge]) -> Result<Self, UpcasterError> {
        // Group edges by event type into from -> (to, transform) adjacency.
        let mut adjacency: HashMap<&str, HashMap<u64, (u64, fn(&[u8]) -> Vec<u8>)>> =
            HashMap::new();
        for edge in edges {
            let per_type = adjacency.entry(edge.event_type).or_default();
            if per_type
                .insert(edge.from_version, (edge.to_version, edge.transform))
                .is_some()
            {
                return Err(UpcasterError::DuplicateEdge {
                    event_type: edge.event_type.to_string(),
                    from_version: edge.from_version,
                });
            }
        }

        let mut chains = HashMap::new();

        for (event_type, per_type) in &adjacency {
            // The terminal version appears as a target but never as a source.
            let mut terminals: Vec<u64> = per_type
                .values()
                .map(|(to, _)| *to)
                .filter(|to| !per_type.contains_key(to))
                .collect();
            terminals.sort_unstable();
            terminals.dedup();

            let terminal = match terminals.as_slice() {
                [] => {
                    return Err(UpcasterError::NoTerminal {
                        event_type: event_type.to_string(),
                    })
                }
                [terminal] => *terminal,
                _ => {
                    return Err(UpcasterError::MultipleTerminals {
                        event_type: event_type.to_string(),
                        terminals,
                    })
                }
            };

            // Walk each source version to the terminal, rejecting cycles.
            // Sorted so error reporting does not depend on map order.
            let mut sources: Vec<u64> = per_type.keys().copied().collect();
            sources.sort_unstable();
            for from in sources {
                let mut transforms = Vec::new();
                let mut visited = vec![from];
                let mut current = from;

                while current != terminal {
                    let (next, transform) = match per_type.get(&current) {
                        Some(edge) => *edge,
                        None => {
                            return Err(UpcasterError::Unreachable {
                                event_type: event_type.to_string(),
                                from_version: from,
                            })
                        }
                    };
                    if visited.contains(&next) {
                        return Err(UpcasterError::Cycle {
                            event_type: event_type.to_string(),
                            at_version: next,
                        });
                    }
                    visited.push(next);
                    transforms.push(transform);
                    current = next;
                }

                chains.insert(
                    (event_type.to_string(), from),
                    Chain {
                        transforms,
                        to_version: terminal,
                    },
                );
            }
        }

        Ok(UpcasterChain { chains })
    }

    /// Apply the chain for (event type, version). Unregistered pairs pass
    /// through unchanged.
    pub fn upcast(&self, event_type: &str, from_version: u64, payload: Vec<u8>) -> (Vec<u8>, u64) {
        match self.chains.get(&(event_type.to_string(), from_version)) {
            Some(chain) => {
                let mut payload = payload;
                for transform in &chain.transforms {
                    payload = transform(&payload);
                }
                (payload, chain.to_version)
            }
            None => (payload, from_version),
        }
    }

    /// Current (terminal) version for an event type, if any chain exists.
    pub fn current_version(&self, event_type: &str) -> Option<u64> {
        self.chains
            .iter()
            .find(|((name, _), _)| name == event_type)
            .map(|(_, chain)| chain.to_version)
    }
}
