//! Session state shared by every request of one proxy instance.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

/// Current session cookie and context root.
///
/// An empty cookie means no session is believed valid. Writes are lock-free;
/// a reader racing a reconnect may see the cookie empty.
#[derive(Debug, Default)]
pub struct SessionStore {
    cookie: ArcSwap<String>,
    context_root: ArcSwapOption<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cookie pairs to send upstream, e.g. `"JSESSIONID=abc;"`.
    pub fn cookie(&self) -> Arc<String> {
        self.cookie.load_full()
    }

    pub fn has_session(&self) -> bool {
        !self.cookie.load().is_empty()
    }

    pub fn clear_cookie(&self) {
        self.cookie.store(Arc::new(String::new()));
    }

    /// Append captured cookie pairs after whatever is already stored.
    pub fn append_cookie(&self, pairs: &str) {
        if pairs.is_empty() {
            return;
        }
        self.cookie
            .rcu(|current| Arc::new(format!("{}{}", current, pairs)));
    }

    pub fn context_root(&self) -> Option<Arc<String>> {
        self.context_root.load_full()
    }

    pub fn set_context_root(&self, prefix: Option<String>) {
        self.context_root.store(prefix.map(Arc::new));
    }
}
