//! # Permutation Search
//!
//! Enumerates every way of handing the slots' current capabilities back out
//! to the slots. `order[i] = j` means "slot `i` gets the capability slot `j`
//! holds now". The identity order is always first, so index 0 means
//! "keep everything as it is".
//!
//! Slot counts are bounded by physical SIM slots (2, rarely 3–4), so the n!
//! growth never matters. The list is cached by the registry and rebuilt only
//! when slots come or go.

/// All `n!` orders of `0..n`, identity first.
pub fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if n == 0 {
        return out;
    }
    let mut order: Vec<usize> = (0..n).collect();
    permute(&mut order, 0, &mut out);
    out
}

fn permute(order: &mut [usize], start: usize, out: &mut Vec<Vec<usize>>) {
    if start + 1 >= order.len() {
        out.push(order.to_vec());
        return;
    }
    for i in start..order.len() {
        order.swap(start, i);
        permute(order, start + 1, out);
        order.swap(start, i);
    }
}

/// Index of the best-scoring order.
///
/// Only a strictly higher score replaces the current best, so ties resolve
/// to the earliest order (identity first). Returns `None` for an empty list.
pub fn best_index<F>(orders: &[Vec<usize>], mut score: F) -> Option<(usize, i64)>
where
    F: FnMut(&[usize]) -> i64,
{
    let mut best: Option<(usize, i64)> = None;
    for (idx, order) in orders.iter().enumerate() {
        let s = score(order);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((idx, s)),
        }
    }
    best
}

/// Render an order for logs: `[1 0]`.
pub fn order_str(order: &[usize]) -> String {
    let parts: Vec<String> = order.iter().map(|i| i.to_string()).collect();
    format!("[{}]", parts.join(" "))
}
