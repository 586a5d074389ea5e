//! HTTP method semantics for MCP `ToolAnnotations`.
//!
//! The passthrough tool can issue any of the supported methods, so its annotations are the
//! most permissive combination of the per-method hints.

use crate::tool::HttpMethod;
use rmcp::model::ToolAnnotations;

/// Annotations for a tool that only ever issues `method`.
///
/// `openWorldHint` is always `true`: every call reaches the SIEM console.
#[must_use]
pub fn annotations_for_method(method: HttpMethod) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match method {
        HttpMethod::Get => (true, false, true),
        HttpMethod::Post => (false, false, false),
        HttpMethod::Put | HttpMethod::Delete => (false, true, true),
    };
    ToolAnnotations {
        title: None,
        read_only_hint: Some(read_only),
        destructive_hint: Some(destructive),
        idempotent_hint: Some(idempotent),
        open_world_hint: Some(true),
    }
}

/// Annotations for a tool that may issue any of `methods`.
///
/// Read-only and idempotent only if every method is; destructive if any method is.
#[must_use]
pub fn annotations_for_methods(methods: &[HttpMethod]) -> ToolAnnotations {
    let per_method: Vec<ToolAnnotations> =
        methods.iter().copied().map(annotations_for_method).collect();
    let all = |f: fn(&ToolAnnotations) -> Option<bool>| {
        Some(per_method.iter().all(|a| f(a) == Some(true)))
    };
    ToolAnnotations {
        title: None,
        read_only_hint: all(|a| a.read_only_hint),
        destructive_hint: Some(per_method.iter().any(|a| a.destructive_hint == Some(true))),
        idempotent_hint: all(|a| a.idempotent_hint),
        open_world_hint: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_readonly_and_idempotent() {
        let a = annotations_for_method(HttpMethod::Get);
        assert_eq!(a.read_only_hint, Some(true));
        assert_eq!(a.destructive_hint, Some(false));
        assert_eq!(a.idempotent_hint, Some(true));
        assert_eq!(a.open_world_hint, Some(true));
    }

    #[test]
    fn post_is_neither_readonly_nor_idempotent() {
        let a = annotations_for_method(HttpMethod::Post);
        assert_eq!(a.read_only_hint, Some(false));
        assert_eq!(a.destructive_hint, Some(false));
        assert_eq!(a.idempotent_hint, Some(false));
    }

    #[test]
    fn combined_annotations_take_the_weakest_guarantee() {
        let a = annotations_for_methods(&HttpMethod::ALL);
        assert_eq!(a.read_only_hint, Some(false));
        assert_eq!(a.destructive_hint, Some(true));
        assert_eq!(a.idempotent_hint, Some(false));
        assert_eq!(a.open_world_hint, Some(true));

        let a = annotations_for_methods(&[HttpMethod::Put, HttpMethod::Delete]);
        assert_eq!(a.idempotent_hint, Some(true));
        assert_eq!(a.read_only_hint, Some(false));
    }
}
