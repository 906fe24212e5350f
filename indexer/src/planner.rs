//! Block window planning.

use hypercerts_core::BlockWindow;

/// Computes the next `[from, to]` window for a pair, capped at the chain
/// head. Returns `None` when the pair is caught up (not an error).
///
/// `from = max(last_indexed, start_block)`, `to = min(from + batch_size,
/// head)`; `to >= from` always holds for a returned window.
pub fn plan_window(
    last_indexed: Option<u64>,
    start_block: u64,
    batch_size: u64,
    head: u64,
) -> Option<BlockWindow> {
    let from = u64::max(last_indexed.unwrap_or(start_block), start_block);
    if from >= head {
        return None;
    }
    let to = u64::min(from.saturating_add(batch_size), head);
    Some(BlockWindow { from, to })
}

#[cfg(test)]
mod tests {
    use hypercerts_core::BlockWindow;

    use super::plan_window;

    #[test]
    fn test_first_window_starts_at_start_block() {
        let window = plan_window(None, 1_000, 100, 5_000);
        assert_eq!(window, Some(BlockWindow { from: 1_000, to: 1_100 }));
    }

    #[test]
    fn test_resumes_from_cursor() {
        let window = plan_window(Some(2_000), 1_000, 100, 5_000);
        assert_eq!(window, Some(BlockWindow { from: 2_000, to: 2_100 }));
    }

    #[test]
    fn test_cursor_below_start_block_is_clamped() {
        let window = plan_window(Some(500), 1_000, 100, 5_000);
        assert_eq!(window, Some(BlockWindow { from: 1_000, to: 1_100 }));
    }

    #[test]
    fn test_window_capped_at_head() {
        let window = plan_window(Some(4_950), 1_000, 100, 5_000);
        assert_eq!(window, Some(BlockWindow { from: 4_950, to: 5_000 }));
    }

    #[test]
    fn test_caught_up_yields_nothing() {
        assert_eq!(plan_window(Some(5_000), 1_000, 100, 5_000), None);
        assert_eq!(plan_window(Some(6_000), 1_000, 100, 5_000), None);
    }

    #[test]
    fn test_window_is_never_inverted() {
        let window = plan_window(Some(4_999), 1_000, 100, 5_000).unwrap();
        assert!(window.to >= window.from);
    }
}
