use std::env;
use std::sync::OnceLock;

use crate::driver::Traversal;

static DRR_MAX_ITERATIONS: OnceLock<Option<usize>> = OnceLock::new();
static DRR_TRAVERSAL: OnceLock<Option<Traversal>> = OnceLock::new();

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse().ok()
}

fn parse_traversal(value: &str) -> Option<Traversal> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "top-down" | "topdown" | "top_down" => Some(Traversal::TopDown),
        "bottom-up" | "bottomup" | "bottom_up" => Some(Traversal::BottomUp),
        _ => None,
    }
}

fn read<T>(name: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            let parsed = parse(&value);
            if parsed.is_none() {
                tracing::warn!(
                    var = name,
                    value = %value,
                    "ignoring unparsable environment override"
                );
            }
            parsed
        }
        _ => None,
    }
}

pub(crate) fn max_iterations_override() -> Option<usize> {
    *DRR_MAX_ITERATIONS.get_or_init(|| read("DRR_MAX_ITERATIONS", parse_usize))
}

pub(crate) fn traversal_override() -> Option<Traversal> {
    *DRR_TRAVERSAL.get_or_init(|| read("DRR_TRAVERSAL", parse_traversal))
}
