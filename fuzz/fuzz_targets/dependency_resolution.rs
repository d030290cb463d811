#![no_main]

use ferrous_lifecycle::{DependencyResolver, LifecycleError, ServiceNode};
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

// Each byte pair is an edge between two of up to 16 services.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let count = (data[0] % 16) as usize + 1;
    let mut nodes: Vec<ServiceNode> = (0..count)
        .map(|i| ServiceNode::new(format!("s{}", i), Vec::<String>::new()).with_priority((i % 3) as i32))
        .collect();
    for pair in data[1..].chunks_exact(2) {
        let from = pair[0] as usize % count;
        let to = pair[1] as usize % 20;
        nodes[from].dependencies.push(format!("s{}", to));
    }

    let resolver = DependencyResolver::new();
    match resolver.resolve_initialization_order(&nodes) {
        Ok(order) => {
            assert_eq!(order.len(), count);
            let mut placed = HashSet::new();
            for name in &order {
                let node = nodes.iter().find(|n| &n.name == name).unwrap();
                for dep in &node.dependencies {
                    let known = nodes.iter().any(|n| &n.name == dep);
                    assert!(!known || placed.contains(dep.as_str()));
                }
                placed.insert(name.as_str());
            }
        }
        Err(LifecycleError::CircularDependency(path)) => {
            assert!(path.len() >= 2);
            assert_eq!(path.first(), path.last());
        }
        Err(other) => panic!("unexpected error: {}", other),
    }
});
