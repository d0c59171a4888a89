//! Fault isolation for content code (behaviors, event callbacks, the step).
//!
//! A failing callback is logged and counted under `server.errors_total{site}`;
//! whatever state it already mutated stays mutated.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;

/// Run `f`, converting both `Err` and panics into a logged, counted `None`.
pub fn isolate<T>(site: &'static str, f: impl FnOnce() -> Result<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            log::error!("{site}: {e:#}");
            metrics::counter!("server.errors_total", "site" => site).increment(1);
            None
        }
        Err(payload) => {
            log::error!("{site}: panicked: {}", panic_message(payload.as_ref()));
            metrics::counter!("server.errors_total", "site" => site).increment(1);
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_passes_through() {
        assert_eq!(isolate("test", || Ok(3)), Some(3));
    }

    #[test]
    fn errors_and_panics_become_none() {
        assert_eq!(isolate::<()>("test", || anyhow::bail!("nope")), None);
        assert_eq!(isolate::<()>("test", || panic!("boom")), None);
    }

    #[test]
    fn partial_mutation_is_kept() {
        let mut v = Vec::new();
        let r = isolate::<()>("test", || {
            v.push(1);
            panic!("after push");
        });
        assert!(r.is_none());
        assert_eq!(v, vec![1]);
    }
}
