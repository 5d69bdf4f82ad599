//! Maps convergence error reasons to user-visible strings. The source dispatches on exception type at runtime
//! (`singledispatch`); here that becomes a total `match` over a closed
//! enum, which is the "registry mapping `ErrorKind -> formatter`" design
//! note calls for.

/// A single reason convergence could not proceed, as reported by the
/// external `converge()` collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    Exception(UpstreamReason),
    /// Any other structured reason the core doesn't know how to present;
    /// filtered out of `present_reasons`, matching the original's
    /// `singledispatch` default returning `None`.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamReason {
    NoSuchLoadBalancer { id: String },
    LoadBalancerDeleted { id: String },
}

fn present_exception(exc: &UpstreamReason) -> String {
    match exc {
        UpstreamReason::NoSuchLoadBalancer { id } => {
            format!("Cloud Load Balancer does not exist: {id}")
        }
        UpstreamReason::LoadBalancerDeleted { id } => {
            format!("Cloud Load Balancer is currently being deleted: {id}")
        }
    }
}

/// Get the list of user-presentable messages from a list of
/// `ErrorReason`s, dropping anything not in the known registry.
pub fn present_reasons(reasons: &[ErrorReason]) -> Vec<String> {
    reasons
        .iter()
        .filter_map(|reason| match reason {
            ErrorReason::Exception(exc) => Some(present_exception(exc)),
            ErrorReason::Other(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_such_load_balancer_message() {
        let reasons = vec![ErrorReason::Exception(UpstreamReason::NoSuchLoadBalancer {
            id: "42".to_string(),
        })];
        assert_eq!(
            present_reasons(&reasons),
            vec!["Cloud Load Balancer does not exist: 42".to_string()]
        );
    }

    #[test]
    fn load_balancer_deleted_message() {
        let reasons = vec![ErrorReason::Exception(UpstreamReason::LoadBalancerDeleted {
            id: "7".to_string(),
        })];
        assert_eq!(
            present_reasons(&reasons),
            vec!["Cloud Load Balancer is currently being deleted: 7".to_string()]
        );
    }

    #[test]
    fn unknown_reasons_are_filtered_out() {
        let reasons = vec![ErrorReason::Other("some unrelated fault".to_string())];
        assert!(present_reasons(&reasons).is_empty());
    }

    #[test]
    fn mixed_reasons_keep_only_presentable_ones() {
        let reasons = vec![
            ErrorReason::Other("ignored".to_string()),
            ErrorReason::Exception(UpstreamReason::NoSuchLoadBalancer { id: "1".to_string() }),
        ];
        assert_eq!(
            present_reasons(&reasons),
            vec!["Cloud Load Balancer does not exist: 1".to_string()]
        );
    }
}
