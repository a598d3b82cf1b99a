//! Configuration for the pub/sub data tree.

/// Configuration of node update history and the authorization step.
///
/// | Option | Default | Description |
/// |--------|---------|-------------|
/// | `authorization_required` | `true` | Drive the adapter's `authorize` callback for every subscription |
/// | `keep_update_percent` | 30 | Delta-ring budget as a percentage of the current value's size |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    authorization_required: bool,
    keep_update_percent: usize,
}

impl Configuration {
    /// Create a configuration with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Configuration {
            authorization_required: true,
            keep_update_percent: 30,
        }
    }

    /// Skip the adapter's `authorize` callback; every validated
    /// subscription is allowed.
    #[must_use]
    pub fn authorization_not_required(mut self) -> Self {
        self.authorization_required = false;
        self
    }

    /// Set the delta-ring budget as a percentage of the current node
    /// value's serialized size.
    #[must_use]
    pub fn keep_update_percent(mut self, percent: usize) -> Self {
        self.keep_update_percent = percent;
        self
    }

    pub(crate) fn is_authorization_required(&self) -> bool {
        self.authorization_required
    }

    pub(crate) fn get_keep_update_percent(&self) -> usize {
        self.keep_update_percent
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_required_by_default() {
        assert!(Configuration::new().is_authorization_required());
    }

    #[test]
    fn authorization_can_be_disabled() {
        let config = Configuration::new().authorization_not_required();
        assert!(!config.is_authorization_required());
    }

    #[test]
    fn keep_update_percent_is_settable() {
        let config = Configuration::new().keep_update_percent(75);
        assert_eq!(config.get_keep_update_percent(), 75);
    }
}
