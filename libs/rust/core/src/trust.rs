//! Single-value origin allow-list.
//!
//! The declared origin comes from `X-Real-IP`, not the socket peer. Matching is exact string
//! equality against one configured value; there is no CIDR support.

#[derive(Debug, Clone, Default)]
pub struct TrustFilter {
    allowed: Option<String>,
}

impl TrustFilter {
    /// An empty value disables the filter.
    pub fn new(allowed: impl Into<String>) -> Self {
        let allowed = allowed.into();
        let allowed = allowed.trim();
        Self { allowed: if allowed.is_empty() { None } else { Some(allowed.to_owned()) } }
    }

    pub fn is_trusted(&self, declared: Option<&str>) -> bool {
        match &self.allowed {
            None => true,
            Some(allowed) => declared.map(str::trim) == Some(allowed.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_only() {
        let f = TrustFilter::new("10.0.0.1");
        assert!(f.is_trusted(Some("10.0.0.1")));
        assert!(!f.is_trusted(Some("10.0.0.2")));
        assert!(!f.is_trusted(Some("10.0.0.0/24")));
        assert!(!f.is_trusted(None));
    }

    #[test]
    fn empty_value_disables() {
        let f = TrustFilter::new("");
        assert!(f.is_trusted(None));
        assert!(f.is_trusted(Some("anything")));
    }
}
