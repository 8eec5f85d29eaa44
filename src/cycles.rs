// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cycle detector over the expression dependency graph.

use std::collections::HashMap;

use crate::scope::{ContextId, ScopeTree};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first walk from every expression node following `dependencies`.
/// Returns the first cycle found, expressed as the chain of node ids from
/// the revisited node back to itself.
pub fn detect(tree: &ScopeTree) -> Option<Vec<ContextId>> {
    let ids = tree.all_expr_ids();
    let mut color: HashMap<ContextId, Color> = ids.iter().map(|&id| (id, Color::White)).collect();

    for &start in &ids {
        if color[&start] == Color::White {
            let mut stack = vec![];
            if let Some(cycle) = visit(tree, start, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    tree: &ScopeTree,
    node: ContextId,
    color: &mut HashMap<ContextId, Color>,
    stack: &mut Vec<ContextId>,
) -> Option<Vec<ContextId>> {
    color.insert(node, Color::Gray);
    stack.push(node);

    if let Some(expr) = tree.context(node).as_expr() {
        for &dep in &expr.dependencies {
            match color.get(&dep).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = visit(tree, dep, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<ContextId> = stack[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }
    }

    stack.pop();
    color.insert(node, Color::Black);
    None
}
