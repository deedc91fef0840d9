use std::collections::HashSet;

use ild_db::{ConnectedServer, Server, ServerStore};
use uuid::Uuid;

use crate::{Error, Result};

struct Frame {
    id: Uuid,
    children: Vec<Uuid>,
    next: usize,
}

impl Frame {
    fn new(id: Uuid, connected: &[ConnectedServer]) -> Self {
        Self {
            id,
            children: connected.iter().map(|c| c.id).collect(),
            next: 0,
        }
    }
}

/// Every server `root` transitively depends on, dependencies first.
///
/// `root` itself is not included and each dependency appears once. A
/// dependency reachable from itself fails with `DependencyCycle`; chains
/// longer than `max_depth` fail with `DependencyDepth`.
pub async fn start_order(
    store: &dyn ServerStore,
    root: &Server,
    max_depth: usize,
) -> Result<Vec<Uuid>> {
    let mut order = Vec::new();
    let mut done: HashSet<Uuid> = HashSet::new();
    let mut stack = vec![Frame::new(root.id, &root.connected)];

    loop {
        let next = match stack.last_mut() {
            None => break,
            Some(frame) if frame.next < frame.children.len() => {
                frame.next += 1;
                Some(frame.children[frame.next - 1])
            }
            Some(_) => None,
        };

        match next {
            Some(child) => {
                if done.contains(&child) {
                    continue;
                }
                if let Some(pos) = stack.iter().position(|f| f.id == child) {
                    let mut cycle: Vec<Uuid> = stack[pos..].iter().map(|f| f.id).collect();
                    cycle.push(child);
                    return Err(Error::DependencyCycle(cycle));
                }
                if stack.len() > max_depth {
                    return Err(Error::DependencyDepth {
                        root: root.id,
                        max: max_depth,
                    });
                }

                let server = store.get_server(child).await?;
                stack.push(Frame::new(child, &server.connected));
            }
            None => {
                if let Some(frame) = stack.pop() {
                    done.insert(frame.id);
                    if frame.id != root.id {
                        order.push(frame.id);
                    }
                }
            }
        }
    }

    Ok(order)
}
