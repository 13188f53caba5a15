use std::collections::HashMap;
use std::sync::Arc;

use super::client::VendorConnector;
use super::routeros::RouterOsConnector;

/// IANA enterprise number used as MikroTik's vendor code.
pub const VENDOR_MIKROTIK: &str = "14988";

/// Vendor code → connector lookup, populated once at startup.
#[derive(Clone, Default)]
pub struct VendorRegistry {
    connectors: HashMap<String, Arc<dyn VendorConnector>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(VENDOR_MIKROTIK, Arc::new(RouterOsConnector));
        registry
    }

    pub fn register(&mut self, vendor_code: &str, connector: Arc<dyn VendorConnector>) {
        self.connectors.insert(vendor_code.to_owned(), connector);
    }

    pub fn get(&self, vendor_code: &str) -> Option<Arc<dyn VendorConnector>> {
        self.connectors.get(vendor_code).cloned()
    }

    pub fn supports(&self, vendor_code: &str) -> bool {
        self.connectors.contains_key(vendor_code)
    }

    pub fn vendor_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

impl std::fmt::Debug for VendorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorRegistry")
            .field("vendors", &self.vendor_codes())
            .finish()
    }
}
