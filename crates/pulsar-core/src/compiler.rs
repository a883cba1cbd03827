//! Graph → [`Spec`] compiler.
//!
//! Compilation runs in four passes:
//!
//! 1. **Validate** – every connection must reference live nodes and ports.
//! 2. **Sort** – Kahn's algorithm over the connections; ties are broken by
//!    graph insertion order so the output is deterministic.
//! 3. **Allocate** – one buffer per port, typed by port kind.
//! 4. **Emit** – `CONNECT_PORT` for every port of every processor node
//!    (init phase), then per node in order: input preparation opcodes
//!    followed by the node body.
//!
//! Input preparation per port kind:
//!
//! | Kind | Unconnected | One source | Several sources |
//! |------|-------------|------------|-----------------|
//! | audio | `CLEAR_BUFFER` | `CLEAR_BUFFER`, `MIX` | `CLEAR_BUFFER`, `MIX`… |
//! | control | `SET_FLOAT default` | `COPY_BUFFER` | `SET_FLOAT 0`, `MIX`… |
//! | events | `FETCH_MESSAGES {node, port}` | `COPY_BUFFER` | error |

use std::collections::{BTreeSet, HashMap};

use crate::buffer::BufferId;
use crate::context::LabelSet;
use crate::error::CompileError;
use crate::graph::{Graph, NodeId, NodeKind, PortDesc, PortDirection, PortKind};
use crate::spec::{Opcode, Spec, SpecBuilder};

type PortKey = (NodeId, String, PortDirection);

struct Ordered<'g> {
    id: &'g NodeId,
    ports: &'g [PortDesc],
    kind: NodeKind,
}

/// Compiles `graph` into a spec for frames of `frame_size` samples.
pub fn compile(graph: &Graph, frame_size: usize) -> Result<Spec, CompileError> {
    if frame_size == 0 {
        return Err(CompileError::InvalidFrameSize(frame_size));
    }

    validate_connections(graph)?;

    let order = kahn_sort(graph)?;
    tracing::debug!("graph_sort: {} nodes in topo order", order.len());

    let ids: Vec<&NodeId> = graph.node_ids().collect();
    let handles: Vec<_> = graph.nodes().collect();
    let mut nodes = Vec::with_capacity(order.len());
    for &idx in &order {
        let id = ids[idx];
        nodes.push(Ordered {
            id,
            ports: graph
                .ports(id)
                .map_err(|_| CompileError::DanglingConnection(id.to_string()))?,
            kind: handles[idx].lock().kind(),
        });
    }

    let mut builder = Spec::builder(frame_size);

    // Buffers: one per port.
    let mut port_buffers: HashMap<PortKey, BufferId> = HashMap::new();
    for node in &nodes {
        for port in node.ports {
            let id = builder.buffer(port.kind.buffer_type(frame_size));
            port_buffers.insert((node.id.clone(), port.name.clone(), port.direction), id);
        }
    }
    let lookup = |node: &NodeId, port: &str, dir: PortDirection| -> Result<BufferId, CompileError> {
        port_buffers
            .get(&(node.clone(), port.to_string(), dir))
            .copied()
            .ok_or_else(|| CompileError::DanglingConnection(format!("{node}:{port}")))
    };

    // Init phase.
    for node in &nodes {
        if node.kind != NodeKind::Processor {
            continue;
        }
        let index = builder.node(node.id);
        for port in node.ports {
            let buf = lookup(node.id, &port.name, port.direction)?;
            builder.push(Opcode::ConnectPort {
                node: index,
                port: port.name.clone(),
                buf,
            });
        }
    }

    // Performance phase.
    for node in &nodes {
        for port in node.ports.iter().filter(|p| p.is_input()) {
            let dest = lookup(node.id, &port.name, PortDirection::Input)?;
            let sources = graph
                .upstream_of(node.id, &port.name)
                .map(|c| lookup(&c.src.node, &c.src.port, PortDirection::Output))
                .collect::<Result<Vec<_>, _>>()?;
            emit_input(&mut builder, node.id, port, dest, &sources)?;
        }
        emit_body(&mut builder, node, &lookup)?;
    }

    let spec = builder.build();
    tracing::debug!(
        "graph_compile: spec v{} with {} opcodes, {} buffers",
        spec.version(),
        spec.opcodes().len(),
        spec.buffers().len()
    );
    for (i, op) in spec.opcodes().iter().enumerate() {
        tracing::trace!("  op[{i}]: {op}");
    }
    Ok(spec)
}

fn emit_input(
    builder: &mut SpecBuilder,
    node: &NodeId,
    port: &PortDesc,
    dest: BufferId,
    sources: &[BufferId],
) -> Result<(), CompileError> {
    match port.kind {
        PortKind::Audio => {
            builder.push(Opcode::ClearBuffer { buf: dest });
            for &src in sources {
                builder.push(Opcode::Mix { src, dest });
            }
        }
        PortKind::Control => match sources {
            [] => {
                builder.push(Opcode::SetFloat {
                    buf: dest,
                    value: port.default,
                });
            }
            [src] => {
                builder.push(Opcode::CopyBuffer { src: *src, dest });
            }
            many => {
                builder.push(Opcode::SetFloat {
                    buf: dest,
                    value: 0.0,
                });
                for &src in many {
                    builder.push(Opcode::Mix { src, dest });
                }
            }
        },
        PortKind::Events => match sources {
            [] => {
                builder.push(Opcode::FetchMessages {
                    buf: dest,
                    labels: LabelSet::new()
                        .with("node", node.as_str())
                        .with("port", port.name.as_str()),
                });
            }
            [src] => {
                builder.push(Opcode::CopyBuffer { src: *src, dest });
            }
            _ => {
                return Err(CompileError::MultipleEventSources(format!(
                    "{node}:{}",
                    port.name
                )));
            }
        },
    }
    Ok(())
}

fn emit_body<F>(builder: &mut SpecBuilder, node: &Ordered<'_>, lookup: &F) -> Result<(), CompileError>
where
    F: Fn(&NodeId, &str, PortDirection) -> Result<BufferId, CompileError>,
{
    let required = |name: &str, direction: PortDirection, kind: PortKind| {
        if node
            .ports
            .iter()
            .any(|p| p.name == name && p.direction == direction && p.kind == kind)
        {
            lookup(node.id, name, direction)
        } else {
            Err(CompileError::MissingPort {
                node: node.id.clone(),
                port: name.to_string(),
            })
        }
    };

    match &node.kind {
        NodeKind::Processor => {
            let index = builder.node(node.id);
            builder.push(Opcode::Call { node: index });
        }
        NodeKind::Sine { freq } => {
            let buf = required("out", PortDirection::Output, PortKind::Audio)?;
            builder.push(Opcode::Sine { buf, freq: *freq });
        }
        NodeKind::Noise => {
            let buf = required("out", PortDirection::Output, PortKind::Audio)?;
            builder.push(Opcode::Noise { buf });
        }
        NodeKind::Constant { value } => {
            let buf = required("out", PortDirection::Output, PortKind::Control)?;
            builder.push(Opcode::SetFloat { buf, value: *value });
        }
        NodeKind::Entity { entity_id } => {
            let buf = required("out", PortDirection::Output, PortKind::Audio)?;
            builder.push(Opcode::FetchEntity {
                buf,
                entity: entity_id.clone(),
            });
        }
        NodeKind::Gain { factor } => {
            let src = required("in", PortDirection::Input, PortKind::Audio)?;
            let dest = required("out", PortDirection::Output, PortKind::Audio)?;
            builder
                .push(Opcode::CopyBuffer { src, dest })
                .push(Opcode::Mul {
                    buf: dest,
                    factor: *factor,
                });
        }
        NodeKind::Sink => {
            for port in node
                .ports
                .iter()
                .filter(|p| p.is_input() && p.kind == PortKind::Audio)
            {
                let buf = lookup(node.id, &port.name, PortDirection::Input)?;
                builder.push(Opcode::Output {
                    buf,
                    channel: port.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_connections(graph: &Graph) -> Result<(), CompileError> {
    for conn in graph.connections() {
        let live = |node: &NodeId, port: &str, dir: PortDirection| {
            graph
                .ports(node)
                .is_ok_and(|ports| ports.iter().any(|p| p.name == port && p.direction == dir))
        };
        if !live(&conn.src.node, &conn.src.port, PortDirection::Output)
            || !live(&conn.dest.node, &conn.dest.port, PortDirection::Input)
        {
            return Err(CompileError::DanglingConnection(conn.to_string()));
        }
    }
    Ok(())
}

/// Kahn's algorithm over node indices in insertion order.
///
/// Among ready nodes the earliest inserted goes first.
fn kahn_sort(graph: &Graph) -> Result<Vec<usize>, CompileError> {
    let ids: Vec<&NodeId> = graph.node_ids().collect();
    let index: HashMap<&NodeId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let n = ids.len();

    let mut in_degree = vec![0usize; n];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for conn in graph.connections() {
        let (Some(&from), Some(&to)) = (index.get(&conn.src.node), index.get(&conn.dest.node))
        else {
            return Err(CompileError::DanglingConnection(conn.to_string()));
        };
        in_degree[to] += 1;
        outgoing[from].push(to);
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);

    while let Some(idx) = ready.pop_first() {
        sorted.push(idx);
        for &to in &outgoing[idx] {
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                ready.insert(to);
            }
        }
    }

    if sorted.len() != n {
        return Err(CompileError::Cycle(n - sorted.len()));
    }
    Ok(sorted)
}
