//! Route compression dictionary.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::ProtoError;

/// Bidirectional `route ↔ code` mapping used to compress route strings.
///
/// Installed once (or monotonically extended) before serving traffic and
/// read-many afterwards. A failed install leaves the previous state intact.
#[derive(Debug, Default)]
pub struct RouteDictionary {
    inner: RwLock<DictInner>,
}

#[derive(Debug, Default, Clone)]
struct DictInner {
    routes: HashMap<String, u16>,
    codes: HashMap<u16, String>,
}

impl RouteDictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a batch of `route → code` entries.
    ///
    /// Route strings are trimmed of surrounding whitespace. A duplicate
    /// route or duplicate code, against either the existing state or the
    /// batch itself, rejects the whole install.
    pub fn install(&self, entries: HashMap<String, u16>) -> Result<(), ProtoError> {
        let mut inner = self.inner.write().expect("dictionary lock poisoned");

        let mut staged = inner.clone();
        for (route, code) in entries {
            let route = route.trim().to_owned();

            if staged.routes.contains_key(&route) || staged.codes.contains_key(&code) {
                return Err(ProtoError::DuplicatedRoute { route, code });
            }

            staged.codes.insert(code, route.clone());
            staged.routes.insert(route, code);
        }

        *inner = staged;
        Ok(())
    }

    /// Looks up the code for a route.
    #[must_use]
    pub fn code_for(&self, route: &str) -> Option<u16> {
        self.inner
            .read()
            .expect("dictionary lock poisoned")
            .routes
            .get(route)
            .copied()
    }

    /// Looks up the route for a code.
    #[must_use]
    pub fn route_for(&self, code: u16) -> Option<String> {
        self.inner
            .read()
            .expect("dictionary lock poisoned")
            .codes
            .get(&code)
            .cloned()
    }

    /// Number of installed routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("dictionary lock poisoned").routes.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, u16)]) -> HashMap<String, u16> {
        pairs
            .iter()
            .map(|(route, code)| ((*route).to_owned(), *code))
            .collect()
    }

    #[test]
    fn install_and_lookup() {
        let dict = RouteDictionary::new();
        dict.install(entries(&[("Room.Join", 7), ("Room.Leave", 8)]))
            .unwrap();

        assert_eq!(dict.code_for("Room.Join"), Some(7));
        assert_eq!(dict.route_for(8).as_deref(), Some("Room.Leave"));
        assert_eq!(dict.code_for("Room.Missing"), None);
        assert_eq!(dict.route_for(99), None);
    }

    #[test]
    fn routes_are_trimmed() {
        let dict = RouteDictionary::new();
        dict.install(entries(&[("  Room.Join  ", 7)])).unwrap();
        assert_eq!(dict.code_for("Room.Join"), Some(7));
    }

    #[test]
    fn duplicate_route_rejected_and_state_preserved() {
        let dict = RouteDictionary::new();
        dict.install(entries(&[("Room.Join", 7)])).unwrap();

        let err = dict
            .install(entries(&[("Room.Join", 9), ("Room.Leave", 8)]))
            .unwrap_err();
        assert!(matches!(err, ProtoError::DuplicatedRoute { .. }));

        // Whole batch rolled back.
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.code_for("Room.Leave"), None);
        assert_eq!(dict.code_for("Room.Join"), Some(7));
    }

    #[test]
    fn duplicate_code_rejected() {
        let dict = RouteDictionary::new();
        dict.install(entries(&[("Room.Join", 7)])).unwrap();

        let err = dict.install(entries(&[("Room.Leave", 7)])).unwrap_err();
        assert!(matches!(
            err,
            ProtoError::DuplicatedRoute { code: 7, .. }
        ));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn monotonic_extension() {
        let dict = RouteDictionary::new();
        dict.install(entries(&[("Room.Join", 7)])).unwrap();
        dict.install(entries(&[("Room.Leave", 8)])).unwrap();
        assert_eq!(dict.len(), 2);
    }
}
